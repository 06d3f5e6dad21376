//! Command line argument parsing for the Tessera CLI using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::storage::StoreKind;

/// Tessera - a shardable in-memory inverted-index search engine
#[derive(Parser, Debug, Clone)]
#[command(name = "tessera")]
#[command(about = "A shardable in-memory inverted-index search engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct TesseraArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// JSON configuration file
    #[arg(short, long, env = "TESSERA_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl TesseraArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Forward-store overrides.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Forward-store backend
    #[arg(long = "store", env = "TESSERA_STORE")]
    pub kind: Option<StoreKind>,

    /// Forward-store file
    #[arg(long = "store-path", env = "TESSERA_STORE_PATH")]
    pub path: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add documents from a JSONL file
    Add(AddArgs),

    /// Delete a document by id
    Delete(DeleteArgs),

    /// Search the local index
    Search(SearchArgs),

    /// Count stored documents
    Count,

    /// Rewrite a log store without dead records
    Compact,

    /// Load documents into an in-process sharded cluster and search it
    Cluster(ClusterArgs),
}

/// Arguments for adding documents
#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// JSONL file, one document per line
    #[arg(value_name = "DOCUMENT_FILE")]
    pub document_file: PathBuf,
}

/// Arguments for deleting a document
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Document id
    #[arg(value_name = "ID")]
    pub id: String,
}

/// Query terms and bitmask filter
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Keyword every hit must carry, as field.word (repeatable)
    #[arg(long, value_name = "FIELD.WORD")]
    pub must: Vec<String>,

    /// Keywords of which a hit must carry at least one (repeatable)
    #[arg(long, value_name = "FIELD.WORD")]
    pub should: Vec<String>,

    /// Bits that must all be set
    #[arg(long, default_value = "0", value_parser = parse_bits)]
    pub on: u64,

    /// Bits that must all be clear
    #[arg(long, default_value = "0", value_parser = parse_bits)]
    pub off: u64,

    /// Bit group of which at least one must be set (repeatable)
    #[arg(long = "or", value_parser = parse_bits)]
    pub or_flags: Vec<u64>,
}

/// Arguments for searching
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Maximum number of results to print
    #[arg(short, long, default_value = "10")]
    pub limit: usize,
}

/// Arguments for the in-process cluster
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// JSONL file, one document per line
    #[arg(value_name = "DOCUMENT_FILE")]
    pub document_file: PathBuf,

    /// Number of shard groups
    #[arg(long, default_value = "2")]
    pub groups: usize,

    /// Workers per shard group
    #[arg(long, default_value = "2")]
    pub replicas: usize,

    /// Discovery calls per second through the proxy, overriding the
    /// configuration (0 disables the limit)
    #[arg(long, value_name = "QPS")]
    pub discovery_qps: Option<u32>,

    #[command(flatten)]
    pub query: QueryArgs,

    /// Maximum number of results to print
    #[arg(short, long, default_value = "10")]
    pub limit: usize,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Parse a bitmask written in decimal, `0x` hex or `0b` binary.
pub fn parse_bits(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim().replace('_', "");
    let parsed = if let Some(bin) = s.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("invalid bitmask '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bits() {
        assert_eq!(parse_bits("0b101").unwrap(), 5);
        assert_eq!(parse_bits("0x1f").unwrap(), 31);
        assert_eq!(parse_bits("1_000").unwrap(), 1000);
        assert!(parse_bits("0b2").is_err());
    }

    #[test]
    fn test_parse_search_command() {
        let args = TesseraArgs::try_parse_from([
            "tessera", "-vv", "--store", "memory", "search", "--must", "content.rust", "--should",
            "title.tokio", "--should", "title.async", "--or", "0b11", "--off", "4",
        ])
        .unwrap();
        assert_eq!(args.verbosity(), 2);
        assert_eq!(args.store.kind, Some(StoreKind::Memory));
        match args.command {
            Command::Search(search) => {
                assert_eq!(search.query.must, vec!["content.rust"]);
                assert_eq!(search.query.should.len(), 2);
                assert_eq!(search.query.or_flags, vec![3]);
                assert_eq!(search.query.off, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_cluster_command() {
        let args = TesseraArgs::try_parse_from([
            "tessera", "cluster", "docs.jsonl", "--groups", "3", "--discovery-qps", "0", "--must",
            "content.rust",
        ])
        .unwrap();
        match args.command {
            Command::Cluster(cluster) => {
                assert_eq!(cluster.groups, 3);
                assert_eq!(cluster.replicas, 2);
                assert_eq!(cluster.discovery_qps, Some(0));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = TesseraArgs::try_parse_from(["tessera", "cluster", "docs.jsonl"]).unwrap();
        match args.command {
            Command::Cluster(cluster) => assert_eq!(cluster.discovery_qps, None),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
