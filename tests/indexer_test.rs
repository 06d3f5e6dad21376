use tempfile::TempDir;
use tessera::document::Document;
use tessera::index::{BitsFilter, Indexer};
use tessera::query::TermQuery;
use tessera::storage::{StoreConfig, StoreKind};

fn doc(id: &str, words: &[&str], bits: u64) -> Document {
    let mut builder = Document::builder(id).bits(bits);
    for word in words {
        builder = builder.keyword("content", *word);
    }
    builder.build()
}

fn ids(indexer: &Indexer, query: &TermQuery, filter: &BitsFilter) -> Vec<String> {
    let mut ids: Vec<String> = indexer
        .search(query, filter)
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_bits_scenario() {
    let indexer = Indexer::open(&StoreConfig::new(StoreKind::Memory, ""), 16).unwrap();
    indexer.add_doc(doc("A", &["x"], 0b001)).unwrap();
    indexer.add_doc(doc("B", &["x"], 0b010)).unwrap();
    let x = TermQuery::term("content", "x");

    assert_eq!(ids(&indexer, &x, &BitsFilter::new(0, 0, vec![0b001])), vec!["A"]);
    assert_eq!(ids(&indexer, &x, &BitsFilter::new(0, 0, vec![0b010])), vec!["B"]);
    assert_eq!(ids(&indexer, &x, &BitsFilter::none()), vec!["A", "B"]);
    assert_eq!(ids(&indexer, &x, &BitsFilter::new(0b001, 0, vec![])), vec!["A"]);
    assert_eq!(ids(&indexer, &x, &BitsFilter::new(0, 0b001, vec![])), vec!["B"]);

    let before = indexer.count().unwrap();
    assert_eq!(indexer.delete_doc("A").unwrap(), 1);
    assert_eq!(ids(&indexer, &x, &BitsFilter::none()), vec!["B"]);
    assert_eq!(indexer.count().unwrap(), before - 1);
}

#[test]
fn test_boolean_queries() {
    let indexer = Indexer::open(&StoreConfig::new(StoreKind::Memory, ""), 16).unwrap();
    indexer.add_doc(doc("1", &["rust", "tokio"], 0)).unwrap();
    indexer.add_doc(doc("2", &["rust", "rayon"], 0)).unwrap();
    indexer.add_doc(doc("3", &["go"], 0)).unwrap();

    let rust_and_tokio = TermQuery::term("content", "rust").and([TermQuery::term("content", "tokio")]);
    assert_eq!(ids(&indexer, &rust_and_tokio, &BitsFilter::none()), vec!["1"]);

    let tokio_or_go = TermQuery::term("content", "tokio").or([TermQuery::term("content", "go")]);
    assert_eq!(ids(&indexer, &tokio_or_go, &BitsFilter::none()), vec!["1", "3"]);

    let nested = TermQuery::term("content", "rust").and([TermQuery::term("content", "tokio")
        .or([TermQuery::term("content", "rayon")])]);
    assert_eq!(ids(&indexer, &nested, &BitsFilter::none()), vec!["1", "2"]);

    let missing = TermQuery::term("content", "java").and([TermQuery::term("content", "rust")]);
    assert!(ids(&indexer, &missing, &BitsFilter::none()).is_empty());
}

#[test]
fn test_last_operation_wins() {
    let indexer = Indexer::open(&StoreConfig::new(StoreKind::Memory, ""), 16).unwrap();
    let old = TermQuery::term("content", "old");
    let new = TermQuery::term("content", "new");

    indexer.add_doc(doc("A", &["old"], 0)).unwrap();
    indexer.delete_doc("A").unwrap();
    indexer.add_doc(doc("A", &["new"], 0)).unwrap();
    for _ in 0..3 {
        indexer.add_doc(doc("A", &["new"], 0)).unwrap();
    }

    assert!(ids(&indexer, &old, &BitsFilter::none()).is_empty());
    assert_eq!(ids(&indexer, &new, &BitsFilter::none()), vec!["A"]);

    indexer.delete_doc("A").unwrap();
    assert!(ids(&indexer, &new, &BitsFilter::none()).is_empty());
    assert_eq!(indexer.count().unwrap(), 0);
}

#[test]
fn test_rebuild_after_restart() {
    let dir = TempDir::new().unwrap();
    for (kind, file) in [(StoreKind::Log, "fwd.log"), (StoreKind::Snapshot, "fwd.snap")] {
        let store = StoreConfig::new(kind, dir.path().join(file));

        let indexer = Indexer::open(&store, 16).unwrap();
        indexer.add_doc(doc("A", &["x", "y"], 1)).unwrap();
        indexer.add_doc(doc("B", &["x"], 2)).unwrap();
        indexer.add_doc(doc("C", &["y"], 4)).unwrap();
        indexer.delete_doc("C").unwrap();
        indexer.close().unwrap();

        let reopened = Indexer::open(&store, 16).unwrap();
        assert_eq!(reopened.load_from_index_file().unwrap(), 2);
        assert_eq!(reopened.count().unwrap(), 2);

        let x = TermQuery::term("content", "x");
        let y = TermQuery::term("content", "y");
        assert_eq!(ids(&reopened, &x, &BitsFilter::none()), vec!["A", "B"]);
        assert_eq!(ids(&reopened, &y, &BitsFilter::none()), vec!["A"]);

        // New sequence numbers continue after the recovered ones.
        reopened.add_doc(doc("D", &["x"], 0)).unwrap();
        let hits = reopened.search(&x, &BitsFilter::none()).unwrap();
        let max_old = hits.iter().filter(|d| d.id != "D").map(|d| d.seq_id).max().unwrap();
        let d = hits.iter().find(|d| d.id == "D").unwrap();
        assert!(d.seq_id > max_old);
        reopened.close().unwrap();
    }
}

#[test]
fn test_blank_ids_are_ignored() {
    let indexer = Indexer::open(&StoreConfig::new(StoreKind::Memory, ""), 16).unwrap();
    assert_eq!(indexer.add_doc(doc("", &["x"], 0)).unwrap(), 0);
    assert_eq!(indexer.add_doc(doc(" \t", &["x"], 0)).unwrap(), 0);
    assert_eq!(indexer.count().unwrap(), 0);
    assert_eq!(indexer.delete_doc("nope").unwrap(), 0);
}
