//! YAML configuration for a percolator.
//!
//! ```yaml
//! version: "1.0"
//! name: "alerts"
//! map_unmapped_fields_as_string: false
//! query_field: "query"
//!
//! analyzer:
//!   conjunction_strategy: "union"   # or "best_clause"
//!
//! verify:
//!   trust_complete: true
//!   parallel_threshold: 64
//!
//! store:
//!   backend: "redb"
//!   path: "/data/queries.redb"
//!
//! compression:
//!   codec: "zstd"
//!   level: 3
//!
//! mapping:
//!   status: keyword
//!   body: text
//!   age: integer
//!   comments: nested
//!   comments.author: keyword
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::AnalyzerConfig;
use crate::compression::{CompressionCodec, CompressionConfig};
use crate::mapping::{FieldType, Mapping};
use crate::percolate::VerifyConfig;
use crate::signature::FIELD_VALUE_SEPARATOR;
use crate::store::StoreConfig;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercolatorConfig {
    /// Configuration format version
    pub version: String,

    /// Name attached to this percolator's log spans.
    #[serde(default)]
    pub name: Option<String>,

    /// Compile queries on unmapped fields as `text` instead of rejecting them.
    #[serde(default)]
    pub map_unmapped_fields_as_string: bool,

    /// Field of a registration document holding the query.
    #[serde(default = "default_query_field")]
    pub query_field: String,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub verify: VerifyConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub mapping: Mapping,
}

impl PercolatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: PercolatorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_verify(mut self, verify: VerifyConfig) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_map_unmapped_fields_as_string(mut self, enabled: bool) -> Self {
        self.map_unmapped_fields_as_string = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        if self.query_field.is_empty() {
            return Err(ConfigLoadError::Validation(
                "query_field must not be empty".into(),
            ));
        }
        if self.compression.codec == CompressionCodec::Zstd
            && !(1..=22).contains(&self.compression.level)
        {
            return Err(ConfigLoadError::Validation(format!(
                "compression level must be within 1..=22, got {}",
                self.compression.level
            )));
        }
        if self.verify.parallel_threshold == 0 {
            return Err(ConfigLoadError::Validation(
                "verify.parallel_threshold must be >= 1".into(),
            ));
        }

        for (path, ty) in self.mapping.iter() {
            if path.is_empty() || path.as_bytes().contains(&FIELD_VALUE_SEPARATOR) {
                return Err(ConfigLoadError::Validation(format!(
                    "invalid mapped field name {path:?}"
                )));
            }
            if let Some((parent, _)) = path.rsplit_once('.') {
                if let Some(parent_ty) = self.mapping.field_type(parent) {
                    if parent_ty != FieldType::Nested {
                        return Err(ConfigLoadError::Validation(format!(
                            "field [{path}] is nested under [{parent}] of type {parent_ty:?}"
                        )));
                    }
                }
            }
            if ty == FieldType::Nested && path == self.query_field {
                return Err(ConfigLoadError::Validation(format!(
                    "query_field [{path}] cannot be a nested path"
                )));
            }
        }
        Ok(())
    }
}

impl Default for PercolatorConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            map_unmapped_fields_as_string: false,
            query_field: default_query_field(),
            analyzer: AnalyzerConfig::default(),
            verify: VerifyConfig::default(),
            store: StoreConfig::default(),
            compression: CompressionConfig::default(),
            mapping: Mapping::default(),
        }
    }
}

fn default_query_field() -> String {
    "query".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ConjunctionStrategy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "alerts"
map_unmapped_fields_as_string: true
analyzer:
  conjunction_strategy: "best_clause"
verify:
  parallel_threshold: 8
store:
  backend: "redb"
  path: "/data/queries.redb"
compression:
  codec: "none"
mapping:
  status: keyword
  age: integer
  comments: nested
  comments.author: keyword
"#;

        let config = PercolatorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name.as_deref(), Some("alerts"));
        assert!(config.map_unmapped_fields_as_string);
        assert_eq!(config.query_field, "query");
        assert_eq!(
            config.analyzer.conjunction_strategy,
            ConjunctionStrategy::BestClause
        );
        assert!(config.verify.trust_complete);
        assert_eq!(config.verify.parallel_threshold, 8);
        assert_eq!(config.store, StoreConfig::redb("/data/queries.redb"));
        assert_eq!(config.compression.codec, CompressionCodec::None);
        assert_eq!(config.mapping.field_type("age"), Some(FieldType::Integer));
    }

    #[test]
    fn test_load_from_file() {
        let yaml = "version: \"1\"\nmapping:\n  status: keyword\n";

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = PercolatorConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.store, StoreConfig::InMemory);
    }

    #[test]
    fn test_default_config() {
        let config = PercolatorConfig::default();
        assert_eq!(config.version, "1.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = PercolatorConfig::from_yaml("version: \"2.0\"\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::UnsupportedVersion(_)));

        let err = PercolatorConfig::from_yaml("version: \"1.0\"\ncompression:\n  level: 40\n").unwrap_err();
        assert!(err.to_string().contains("compression level"));

        let err = PercolatorConfig::from_yaml("version: \"1.0\"\nmapping:\n  user: keyword\n  user.name: keyword\n")
            .unwrap_err();
        assert!(err.to_string().contains("nested under"));
    }
}
