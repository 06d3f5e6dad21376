//! Command implementations for the Tessera CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use log::{info, warn};
use serde::Deserialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::cli::args::*;
use crate::cli::output::*;
use crate::cluster::{
    IndexService, IndexWorker, LocalNetwork, MemoryCoordinator, SearchRequest, Sentinel,
    ServiceDiscovery, ServiceHub, ServiceHubProxy,
};
use crate::config::TesseraConfig;
use crate::document::{Document, Keyword};
use crate::error::{Result, TesseraError};
use crate::index::{BitsFilter, Indexer};
use crate::query::TermQuery;
use crate::storage::{ForwardStore, LogStore, StoreConfig, StoreKind};

/// Field that free text from the `content` attribute is indexed under.
pub const CONTENT_FIELD: &str = "content";

/// Execute a CLI command.
pub fn execute_command(args: TesseraArgs) -> Result<()> {
    let config = load_config(&args)?;
    match &args.command {
        Command::Add(add_args) => add_documents(add_args, &config, &args),
        Command::Delete(delete_args) => delete_document(delete_args, &config, &args),
        Command::Search(search_args) => search_index(search_args, &config, &args),
        Command::Count => count_documents(&config, &args),
        Command::Compact => compact_store(&config, &args),
        Command::Cluster(cluster_args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_cluster(cluster_args, &config, &args))
        }
    }
}

/// Configuration file (or defaults) with command line overrides applied.
pub fn load_config(args: &TesseraArgs) -> Result<TesseraConfig> {
    let mut config = match &args.config {
        Some(path) => TesseraConfig::from_json_file(path)?,
        None => TesseraConfig::default(),
    };
    if let Some(kind) = args.store.kind {
        config.indexer.store.kind = kind;
    }
    if let Some(path) = &args.store.path {
        config.indexer.store.path = path.clone();
    }
    Ok(config)
}

/// A document as written in JSONL input.
#[derive(Debug, Deserialize)]
struct InputDocument {
    id: String,
    #[serde(default)]
    keywords: Vec<Keyword>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    bits: u64,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Lowercased, de-duplicated words of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();
    words.sort();
    words.dedup();
    words
}

/// Keywords are matched case-insensitively on the word.
fn normalize_keyword(field: impl Into<String>, word: &str) -> Keyword {
    Keyword::new(field, word.to_lowercase())
}

/// Parse one JSONL line into a document.
pub fn parse_document(line: &str) -> Result<Document> {
    let input: InputDocument = serde_json::from_str(line)?;
    let content_keywords = input
        .content
        .as_deref()
        .map(tokenize)
        .unwrap_or_default()
        .into_iter()
        .map(|word| Keyword::new(CONTENT_FIELD, word));

    let keywords = input
        .keywords
        .into_iter()
        .map(|k| normalize_keyword(k.field, &k.word));

    let mut builder = Document::builder(input.id)
        .keywords(keywords)
        .keywords(content_keywords)
        .bits(input.bits);
    if let Some(payload) = input.payload {
        builder = builder.payload(serde_json::to_vec(&payload)?);
    }
    Ok(builder.build())
}

/// Parse `field.word`.
pub fn parse_keyword(s: &str) -> Result<Keyword> {
    match s.split_once('.') {
        Some((field, word)) if !field.is_empty() && !word.is_empty() => {
            Ok(normalize_keyword(field, word))
        }
        _ => Err(TesseraError::invalid_argument(format!(
            "keyword '{s}' is not of the form field.word"
        ))),
    }
}

/// AND of every `--must` keyword, with the OR of the `--should` keywords as
/// one more operand.
pub fn build_query(args: &QueryArgs) -> Result<(TermQuery, BitsFilter)> {
    let musts = args
        .must
        .iter()
        .map(|s| parse_keyword(s).map(TermQuery::Term))
        .collect::<Result<Vec<_>>>()?;
    let shoulds = args
        .should
        .iter()
        .map(|s| parse_keyword(s).map(TermQuery::Term))
        .collect::<Result<Vec<_>>>()?;

    let should = match shoulds.len() {
        0 => None,
        1 => shoulds.into_iter().next(),
        _ => Some(TermQuery::Or(shoulds)),
    };
    let mut operands = musts.into_iter().chain(should);
    let Some(first) = operands.next() else {
        return Err(TesseraError::invalid_argument(
            "a search needs at least one --must or --should keyword",
        ));
    };
    let rest: Vec<TermQuery> = operands.collect();
    let query = first.and(rest);

    Ok((
        query,
        BitsFilter::new(args.on, args.off, args.or_flags.clone()),
    ))
}

fn open_indexer(store: &StoreConfig, config: &TesseraConfig) -> Result<Indexer> {
    let indexer = Indexer::open(store, config.indexer.doc_num_estimate)?;
    indexer.load_from_index_file()?;
    Ok(indexer)
}

fn read_documents(path: &Path) -> Result<(Vec<Document>, usize)> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut documents = Vec::new();
    let mut skipped = 0;
    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_document(&line) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                warn!("skipping line {}: {e}", line_num + 1);
                skipped += 1;
            }
        }
    }
    Ok((documents, skipped))
}

/// Add documents to the local index.
fn add_documents(args: &AddArgs, config: &TesseraConfig, cli_args: &TesseraArgs) -> Result<()> {
    let start_time = Instant::now();
    let indexer = open_indexer(&config.indexer.store, config)?;
    let (documents, mut skipped) = read_documents(&args.document_file)?;

    let mut added = 0;
    for doc in documents {
        match indexer.add_doc(doc)? {
            0 => skipped += 1,
            n => added += n,
        }
    }
    indexer.close()?;

    let duration = start_time.elapsed();
    output_result(
        "Documents added successfully",
        &DocumentAdditionResult {
            documents_added: added,
            lines_skipped: skipped,
            duration_ms: duration.as_millis() as u64,
            docs_per_second: added as f64 / duration.as_secs_f64().max(f64::EPSILON),
        },
        cli_args,
    )
}

/// Delete a document from the local index.
fn delete_document(args: &DeleteArgs, config: &TesseraConfig, cli_args: &TesseraArgs) -> Result<()> {
    let indexer = Indexer::open(&config.indexer.store, config.indexer.doc_num_estimate)?;
    let deleted = indexer.delete_doc(&args.id)?;
    indexer.close()?;
    output_result(
        "Delete finished",
        &DeletionResult {
            id: args.id.clone(),
            deleted,
        },
        cli_args,
    )
}

fn search_results(query: &TermQuery, docs: &[Document], limit: usize, start: Instant) -> SearchResults {
    SearchResults {
        query: query.to_string(),
        hits: docs.iter().take(limit).map(Hit::from).collect(),
        total_hits: docs.len(),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Search the local index.
fn search_index(args: &SearchArgs, config: &TesseraConfig, cli_args: &TesseraArgs) -> Result<()> {
    let (query, filter) = build_query(&args.query)?;
    let indexer = open_indexer(&config.indexer.store, config)?;

    let start = Instant::now();
    let docs = indexer.search(&query, &filter)?;
    let results = search_results(&query, &docs, args.limit, start);
    indexer.close()?;
    output_result("Search finished", &results, cli_args)
}

/// Count documents in the local index.
fn count_documents(config: &TesseraConfig, cli_args: &TesseraArgs) -> Result<()> {
    let indexer = Indexer::open(&config.indexer.store, config.indexer.doc_num_estimate)?;
    let documents = indexer.count()?;
    indexer.close()?;
    output_result("Count finished", &CountResult { documents }, cli_args)
}

/// Compact a log store in place.
fn compact_store(config: &TesseraConfig, cli_args: &TesseraArgs) -> Result<()> {
    let store = &config.indexer.store;
    if store.kind != StoreKind::Log {
        return Err(TesseraError::invalid_argument(format!(
            "only log stores can be compacted, not {:?}",
            store.kind
        )));
    }
    let log = LogStore::open(&store.path)?;
    let size_before_bytes = log.log_size();
    log.compact()?;
    let result = CompactionResult {
        size_before_bytes,
        size_after_bytes: log.log_size(),
    };
    log.close()?;
    output_result("Compaction finished", &result, cli_args)
}

/// Start `groups * replicas` in-memory workers, load the documents through a
/// sentinel and run the query against the cluster.
async fn run_cluster(args: &ClusterArgs, config: &TesseraConfig, cli_args: &TesseraArgs) -> Result<()> {
    if args.groups == 0 || args.replicas == 0 {
        return Err(TesseraError::invalid_argument(
            "--groups and --replicas must be positive",
        ));
    }
    let (query, filter) = build_query(&args.query)?;
    let (documents, _) = read_documents(&args.document_file)?;

    let coordinator = Arc::new(MemoryCoordinator::new());
    let hub = Arc::new(ServiceHub::new(coordinator, &config.cluster));
    let network = LocalNetwork::new();
    let memory = StoreConfig::new(StoreKind::Memory, "");

    let mut workers = Vec::new();
    for group in 0..args.groups {
        for replica in 0..args.replicas {
            let endpoint = format!("local://{group}/{replica}");
            // Every worker owns its own slice of the sequence-number space.
            let worker_id = config.indexer.worker_id + workers.len() as u64;
            let indexer_config = config
                .indexer
                .clone()
                .with_store(memory.clone())
                .with_worker_id(worker_id);
            let hub: Arc<dyn ServiceDiscovery> = hub.clone();
            let worker = Arc::new(IndexWorker::open(
                &indexer_config,
                hub,
                group,
                endpoint.clone(),
                config.cluster.heart_rate,
            )?);
            worker.register().await?;
            network.bind(endpoint, worker.clone());
            workers.push(worker);
        }
    }
    info!("started {} workers", workers.len());

    let qps = args.discovery_qps.unwrap_or(config.cluster.discovery_qps);
    let proxy = Arc::new(ServiceHubProxy::new(hub, qps));
    let discovery: Arc<dyn ServiceDiscovery> = proxy.clone();
    let sentinel = Sentinel::new(discovery, Arc::new(network.connector()), &config.cluster);

    // Every write spends one discovery call, so loading keeps to the limit.
    let mut added = 0;
    for doc in documents {
        tokio::time::sleep(proxy.wait_hint()).await;
        match sentinel.add_doc(doc).await {
            Ok(n) => added += n,
            Err(e) => warn!("add failed: {e}"),
        }
    }
    info!("replicated {added} document copies");

    tokio::time::sleep(proxy.wait_hint()).await;
    let start = Instant::now();
    let docs = sentinel
        .search(SearchRequest::new(query.clone(), filter))
        .await?;
    let results = search_results(&query, &docs, args.limit, start);

    for worker in &workers {
        worker.close().await?;
    }
    sentinel.close().await?;
    output_result("Cluster search finished", &results, cli_args)
}
