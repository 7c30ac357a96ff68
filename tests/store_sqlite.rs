//! Integration tests for the SQLite chunk store: index lifecycle, upsert
//! semantics, filtered similarity search, and stats.

use riskrag::stores::{ChunkRecord, ChunkStore, SearchFilters, SqliteChunkStore};
use riskrag::types::RagError;
use tempfile::TempDir;

const DIM: usize = 4;

async fn open_store(dir: &TempDir) -> SqliteChunkStore {
    SqliteChunkStore::open(dir.path().join("chunks.db"), "filing_chunks", "FilingChunk")
        .await
        .expect("store should open")
}

async fn open_created_store(dir: &TempDir) -> SqliteChunkStore {
    let store = open_store(dir).await;
    store.ensure_index("filing_chunks", DIM).await.unwrap();
    store
}

fn chunk(chunk_id: &str, company: &str, embedding: Vec<f32>) -> ChunkRecord {
    ChunkRecord {
        chunk_id: chunk_id.to_string(),
        text: format!("{company} filing text for {chunk_id}"),
        embedding,
        company: company.to_string(),
        year: 2024,
        form_type: "10-K".to_string(),
        section_title: Some("Item 7A".to_string()),
        item_number: Some("7A".to_string()),
        chunk_index: 0,
        source_file: format!("{chunk_id}-source.html"),
    }
}

#[tokio::test]
async fn ensure_index_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.ensure_index("filing_chunks", DIM).await.unwrap();
    store.ensure_index("filing_chunks", DIM).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert!(stats.index_exists);
    assert_eq!(stats.total_chunks, 0);
}

#[tokio::test]
async fn ensure_index_rejects_dimension_conflicts() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.ensure_index("filing_chunks", DIM).await.unwrap();
    let err = store.ensure_index("filing_chunks", DIM * 2).await.unwrap_err();
    assert!(matches!(
        err,
        RagError::IndexConflict {
            existing: 4,
            requested: 8,
            ..
        }
    ));

    // The original registration survives untouched.
    store.ensure_index("filing_chunks", DIM).await.unwrap();
}

#[tokio::test]
async fn upsert_before_create_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let err = store
        .upsert_chunks(vec![chunk("c1", "AAPL", vec![1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Storage(_)));
    assert!(err.to_string().contains("ensure_index"));
}

#[tokio::test]
async fn upsert_replaces_by_chunk_id() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    store
        .upsert_chunks(vec![chunk("c1", "AAPL", vec![1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();

    let mut replacement = chunk("c1", "AAPL", vec![0.0, 1.0, 0.0, 0.0]);
    replacement.text = "updated text".to_string();
    store.upsert_chunks(vec![replacement]).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1, "replace, not duplicate");
    let stored = store.get_chunk("c1").await.unwrap().unwrap();
    assert_eq!(stored.text, "updated text");
    assert_eq!(stored.embedding, vec![0.0, 1.0, 0.0, 0.0]);
}

#[tokio::test]
async fn upsert_batch_is_all_or_nothing_on_bad_dimension() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    let good = chunk("good", "AAPL", vec![1.0, 0.0, 0.0, 0.0]);
    let bad = chunk("bad", "MSFT", vec![1.0, 0.0]);
    let err = store.upsert_chunks(vec![good, bad]).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert!(err.to_string().contains("bad"));

    assert_eq!(store.count().await.unwrap(), 0, "nothing may be written");
}

#[tokio::test]
async fn ordering_key_is_unique_within_source_file() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    let mut first = chunk("c1", "AAPL", vec![1.0, 0.0, 0.0, 0.0]);
    first.source_file = "aapl-2024.html".to_string();
    first.chunk_index = 3;
    let mut second = chunk("c2", "AAPL", vec![0.0, 1.0, 0.0, 0.0]);
    second.source_file = "aapl-2024.html".to_string();
    second.chunk_index = 3;

    store.upsert_chunks(vec![first]).await.unwrap();
    store.upsert_chunks(vec![second]).await.unwrap();

    // The second write claims the (source_file, chunk_index) slot.
    assert_eq!(store.count().await.unwrap(), 1);
    assert!(store.get_chunk("c1").await.unwrap().is_none());
    assert!(store.get_chunk("c2").await.unwrap().is_some());
}

#[tokio::test]
async fn search_respects_company_filter() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    store
        .upsert_chunks(vec![
            chunk("a", "AAPL", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("b", "MSFT", vec![1.0, 0.1, 0.0, 0.0]),
            chunk("c", "MSFT", vec![0.9, 0.0, 0.1, 0.0]),
        ])
        .await
        .unwrap();

    let filters = SearchFilters::default().with_company("AAPL");
    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 10, &filters)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.chunk_id, "a");
    assert!(hits.iter().all(|hit| hit.record.company == "AAPL"));
}

#[tokio::test]
async fn search_combines_all_supplied_filters() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    let mut aapl_2023 = chunk("a23", "AAPL", vec![1.0, 0.0, 0.0, 0.0]);
    aapl_2023.year = 2023;
    aapl_2023.form_type = "10-Q".to_string();
    let aapl_2024 = chunk("a24", "AAPL", vec![1.0, 0.0, 0.0, 0.0]);

    store
        .upsert_chunks(vec![aapl_2023, aapl_2024])
        .await
        .unwrap();

    let filters = SearchFilters::default()
        .with_company("AAPL")
        .with_year(2024)
        .with_form_type("10-K");
    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 10, &filters)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.chunk_id, "a24");
}

#[tokio::test]
async fn search_k_semantics() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    store
        .upsert_chunks(vec![
            chunk("a", "AAPL", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("b", "AAPL", vec![0.9, 0.1, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    // k = 0 is an empty result, not an error.
    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 0, &SearchFilters::default())
        .await
        .unwrap();
    assert!(hits.is_empty());

    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], -3, &SearchFilters::default())
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Fewer matches than k returns all matches, best first.
    let hits = store
        .search(&[1.0, 0.0, 0.0, 0.0], 5, &SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.chunk_id, "a");
    assert_eq!(hits[1].record.chunk_id, "b");
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn search_ties_break_by_chunk_id_ascending() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    // Identical embeddings, so identical similarity to any query.
    let shared = vec![0.0, 1.0, 0.0, 0.0];
    let mut z = chunk("z", "AAPL", shared.clone());
    z.chunk_index = 1;
    let mut m = chunk("m", "AAPL", shared.clone());
    m.chunk_index = 2;
    let mut a = chunk("a", "AAPL", shared);
    a.chunk_index = 3;
    store.upsert_chunks(vec![z, m, a]).await.unwrap();

    let hits = store
        .search(&[1.0, 1.0, 0.0, 0.0], 3, &SearchFilters::default())
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|hit| hit.record.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "m", "z"]);
}

#[tokio::test]
async fn search_rejects_wrong_query_dimension() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    let err = store
        .search(&[1.0, 0.0], 5, &SearchFilters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
}

#[tokio::test]
async fn clear_removes_chunks_but_keeps_the_index() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    store
        .upsert_chunks(vec![
            chunk("a", "AAPL", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("b", "MSFT", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    let deleted = store.clear().await.unwrap();
    assert_eq!(deleted, 2);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_chunks, 0);
    assert!(stats.companies.is_empty());
    assert!(stats.index_exists, "index structure survives the clear");

    // Indexing works again without re-running ensure_index.
    store
        .upsert_chunks(vec![chunk("c", "AAPL", vec![1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn stats_break_down_by_company() {
    let dir = TempDir::new().unwrap();
    let store = open_created_store(&dir).await;

    let mut b2 = chunk("b2", "MSFT", vec![0.0, 1.0, 0.0, 0.0]);
    b2.chunk_index = 1;
    b2.source_file = "msft-2024-2.html".to_string();
    store
        .upsert_chunks(vec![
            chunk("a1", "AAPL", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("b1", "MSFT", vec![0.0, 1.0, 0.0, 0.0]),
            b2,
        ])
        .await
        .unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_chunks, 3);
    assert_eq!(stats.companies.get("AAPL"), Some(&1));
    assert_eq!(stats.companies.get("MSFT"), Some(&2));
    assert_eq!(stats.index_name, "filing_chunks");
}

#[tokio::test]
async fn store_reopens_with_persisted_index_and_chunks() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_created_store(&dir).await;
        store
            .upsert_chunks(vec![chunk("a", "AAPL", vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap();
    }
    let store = open_store(&dir).await;
    let stats = store.stats().await.unwrap();
    assert!(stats.index_exists);
    assert_eq!(stats.total_chunks, 1);
    // Same-dimension ensure_index on the persisted registry is a no-op.
    store.ensure_index("filing_chunks", DIM).await.unwrap();
}
