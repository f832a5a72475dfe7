//! Command-line percolator.
//!
//! ```text
//! percolator --config percolator.yaml register queries.json
//! percolator --config percolator.yaml percolate docs.jsonl --queries queries.json
//! percolator --config percolator.yaml unregister old-alert
//! ```
//!
//! `queries.json` maps query names to registration documents
//! (`{"alert": {"query": {...}}}`); documents are read one JSON object per
//! line. Results are written to stdout as JSON lines, logs go to stderr.

use std::error::Error;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use percolator::{Percolator, PercolatorConfig};

#[derive(Parser, Debug)]
#[command(name = "percolator", about = "Match documents against stored queries")]
struct Cli {
    /// YAML configuration; defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register the queries of a JSON file.
    Register { queries: PathBuf },
    /// Percolate JSON-lines documents.
    Percolate {
        documents: PathBuf,
        /// Register these queries first.
        #[arg(long)]
        queries: Option<PathBuf>,
    },
    /// Remove queries by name.
    Unregister { names: Vec<String> },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = match &cli.config {
        Some(path) => PercolatorConfig::from_file(path)?,
        None => PercolatorConfig::default(),
    };
    let percolator = Percolator::new(cfg)?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Register { queries } => register_file(&percolator, &queries, &mut out)?,
        Command::Percolate { documents, queries } => {
            if let Some(queries) = queries {
                register_file(&percolator, &queries, &mut io::sink())?;
            }
            let reader = BufReader::new(fs::File::open(&documents)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let doc: Value = serde_json::from_str(&line)
                    .map_err(|e| format!("{}:{}: {e}", documents.display(), line_no + 1))?;
                let set = percolator.percolate(&doc)?;
                let names: Vec<&str> = set.names().collect();
                writeln!(out, "{}", json!({"line": line_no + 1, "matches": names, "stats": set.stats}))?;
            }
        }
        Command::Unregister { names } => {
            for name in names {
                let removed = percolator.unregister(&name)?;
                writeln!(out, "{}", json!({"name": name, "removed": removed}))?;
            }
        }
    }

    percolator.flush()?;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn register_file(percolator: &Percolator, path: &Path, out: &mut dyn Write) -> Result<(), Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let queries: serde_json::Map<String, Value> = serde_json::from_str(&content)?;
    for (name, source) in &queries {
        let registration = percolator.register_source(name, source)?;
        writeln!(
            out,
            "{}",
            json!({
                "name": registration.name,
                "id": registration.id,
                "outcome": registration.outcome,
                "verified": registration.verified,
                "extractions": registration.extractions.len(),
            })
        )?;
    }
    Ok(())
}
