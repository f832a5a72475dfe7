use serde::{Deserialize, Serialize};
use zstd::{decode_all, encode_all};

use crate::error::PercolatorError;

/// Codec applied to the stored query source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionCodec {
    None,
    #[default]
    Zstd,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub codec: CompressionCodec,
    /// Zstd level, 1-22.
    #[serde(default = "default_level")]
    pub level: i32,
}

fn default_level() -> i32 {
    3
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            codec: CompressionCodec::default(),
            level: default_level(),
        }
    }
}

impl CompressionConfig {
    pub fn new(codec: CompressionCodec, level: i32) -> Self {
        Self { codec, level }
    }

    pub fn with_codec(mut self, codec: CompressionCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    pub(crate) fn compress(&self, data: &[u8]) -> Result<Vec<u8>, PercolatorError> {
        match self.codec {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(encode_all(data, self.level)?),
        }
    }
}

impl CompressionCodec {
    /// Sources are decoded with the codec they were written with, whatever
    /// the current configuration says.
    pub(crate) fn decompress(self, data: &[u8]) -> Result<Vec<u8>, PercolatorError> {
        match self {
            CompressionCodec::None => Ok(data.to_vec()),
            CompressionCodec::Zstd => Ok(decode_all(data)?),
        }
    }
}
