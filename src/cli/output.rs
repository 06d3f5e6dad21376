//! Output formatting for CLI commands.

use serde::Serialize;

use crate::cli::args::{OutputFormat, TesseraArgs};
use crate::document::Document;
use crate::error::Result;

/// Result structure for document addition.
#[derive(Debug, Serialize)]
pub struct DocumentAdditionResult {
    pub documents_added: usize,
    pub lines_skipped: usize,
    pub duration_ms: u64,
    pub docs_per_second: f64,
}

/// Result structure for deletion.
#[derive(Debug, Serialize)]
pub struct DeletionResult {
    pub id: String,
    pub deleted: usize,
}

/// One search hit as printed.
#[derive(Debug, Serialize)]
pub struct Hit {
    pub id: String,
    pub seq_id: u64,
    pub bits: String,
    pub keywords: Vec<String>,
    pub payload: serde_json::Value,
}

impl From<&Document> for Hit {
    fn from(doc: &Document) -> Self {
        Hit {
            id: doc.id.clone(),
            seq_id: doc.seq_id,
            bits: format!("{:#b}", doc.bits_feature),
            keywords: doc.keywords.iter().map(|k| k.to_string()).collect(),
            payload: if doc.payload.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&doc.payload).unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(&doc.payload).into_owned())
                })
            },
        }
    }
}

/// Result structure for search operations.
#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub hits: Vec<Hit>,
    pub total_hits: usize,
    pub duration_ms: u64,
}

/// Result structure for counting.
#[derive(Debug, Serialize)]
pub struct CountResult {
    pub documents: usize,
}

/// Result structure for log compaction.
#[derive(Debug, Serialize)]
pub struct CompactionResult {
    pub size_before_bytes: u64,
    pub size_after_bytes: u64,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &TesseraArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &TesseraArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    if value.get("hits").is_some() {
        output_search_results_human(&value);
    } else {
        output_generic_human(&value);
    }
    Ok(())
}

/// Output search results in human format.
fn output_search_results_human(value: &serde_json::Value) {
    let Some(obj) = value.as_object() else {
        return;
    };
    if let Some(query) = obj.get("query").and_then(|q| q.as_str()) {
        println!("Query: {query}");
    }
    if let Some(hits) = obj.get("hits").and_then(|h| h.as_array()) {
        for (i, hit) in hits.iter().enumerate() {
            println!();
            println!(
                "Result {}: {} (seq {}, bits {})",
                i + 1,
                hit.get("id").and_then(|s| s.as_str()).unwrap_or(""),
                hit.get("seq_id").and_then(|s| s.as_u64()).unwrap_or(0),
                hit.get("bits").and_then(|s| s.as_str()).unwrap_or("0"),
            );
            println!("─────────────");
            if let Some(keywords) = hit.get("keywords") {
                println!("keywords: {}", format_value(keywords));
            }
            if let Some(payload) = hit.get("payload").filter(|p| !p.is_null()) {
                println!("payload: {payload}");
            }
        }
    }

    println!();
    if let Some(total) = obj.get("total_hits").and_then(|t| t.as_u64()) {
        println!("Total hits: {total}");
    }
    if let Some(duration) = obj.get("duration_ms").and_then(|d| d.as_u64()) {
        println!("Search time: {duration}ms");
    }
}

/// Output generic data in human format.
fn output_generic_human(value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                let formatted_val = format_value(val);
                println!("{key}: {formatted_val}");
            }
        }
        _ => println!("{}", format_value(value)),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &TesseraArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Format a JSON value for human output.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "[object]".to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}
