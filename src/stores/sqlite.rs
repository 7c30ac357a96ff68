//! SQLite-backed chunk store with vector search via the `sqlite-vec`
//! extension.
//!
//! The store owns two tables: `chunks`, holding one row per chunk node with
//! the full persisted property set, and `vector_indexes`, a registry pinning
//! each named index to its node label and embedding dimension. Registering
//! the index is what `ensure_index` does; the dimension recorded there is
//! the single source of truth every upsert and search validates against.
//!
//! Cosine distance is computed row-side with `vec_distance_cosine` over the
//! JSON-encoded embedding column, so filters are plain SQL predicates
//! evaluated in the same query as the ranking.

use std::collections::BTreeMap;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, ffi, rusqlite};
use tracing::{debug, info, warn};

use crate::types::RagError;

use super::{ChunkRecord, ChunkStore, IndexStats, ScoredChunk, SearchFilters};

const SELECT_COLUMNS: &str = "chunk_id, text, embedding, company, year, form_type, \
     section_title, item_number, chunk_index, source_file";

#[derive(Clone)]
pub struct SqliteChunkStore {
    conn: Connection,
    index_name: String,
    node_label: String,
}

impl SqliteChunkStore {
    /// Open (or create) the database at `path` and prepare the base schema.
    /// The named vector index itself is registered later by
    /// [`ChunkStore::ensure_index`].
    pub async fn open(
        path: impl AsRef<Path>,
        index_name: impl Into<String>,
        node_label: impl Into<String>,
    ) -> Result<Self, RagError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            // Fails loudly if the extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS vector_indexes (
                     name TEXT PRIMARY KEY,
                     node_label TEXT NOT NULL,
                     dimension INTEGER NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS chunks (
                     chunk_id TEXT PRIMARY KEY,
                     text TEXT NOT NULL,
                     embedding TEXT NOT NULL,
                     company TEXT NOT NULL,
                     year INTEGER NOT NULL,
                     form_type TEXT NOT NULL,
                     section_title TEXT,
                     item_number TEXT,
                     chunk_index INTEGER NOT NULL,
                     source_file TEXT NOT NULL,
                     UNIQUE (source_file, chunk_index)
                 );
                 CREATE INDEX IF NOT EXISTS idx_chunks_company ON chunks(company);
                 CREATE INDEX IF NOT EXISTS idx_chunks_year ON chunks(year);",
            )?;
            Ok(())
        })
        .await
        .map_err(|err| RagError::Storage(err.to_string()))?;
        Ok(Self {
            conn,
            index_name: index_name.into(),
            node_label: node_label.into(),
        })
    }

    /// Name of the index this store reads and writes.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    fn register_sqlite_vec() -> Result<(), RagError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(RagError::Storage)
    }

    /// Dimension registered for a named index, if any.
    async fn registered_dimension(&self, name: &str) -> Result<Option<usize>, RagError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<Option<usize>, rusqlite::Error> {
                let dimension = conn
                    .query_row(
                        "SELECT dimension FROM vector_indexes WHERE name = ?1",
                        [&name],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;
                Ok(dimension.map(|value| value as usize))
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }

    /// Dimension of this store's configured index, or an error if
    /// `ensure_index` has not been run.
    async fn require_dimension(&self) -> Result<usize, RagError> {
        self.registered_dimension(&self.index_name)
            .await?
            .ok_or_else(|| {
                RagError::Storage(format!(
                    "vector index '{}' has not been created; run ensure_index first",
                    self.index_name
                ))
            })
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn ensure_index(&self, name: &str, dimension: usize) -> Result<(), RagError> {
        if dimension == 0 {
            return Err(RagError::Validation(
                "index dimension must be at least 1".into(),
            ));
        }
        match self.registered_dimension(name).await? {
            Some(existing) if existing == dimension => {
                info!(index = name, dimension, "vector index already exists");
                Ok(())
            }
            Some(existing) => Err(RagError::IndexConflict {
                name: name.to_string(),
                existing,
                requested: dimension,
            }),
            None => {
                let name = name.to_string();
                let label = self.node_label.clone();
                let logged = name.clone();
                self.conn
                    .call(move |conn| -> Result<(), rusqlite::Error> {
                        conn.execute(
                            "INSERT OR IGNORE INTO vector_indexes (name, node_label, dimension) \
                             VALUES (?1, ?2, ?3)",
                            (&name, &label, dimension as i64),
                        )?;
                        Ok(())
                    })
                    .await
                    .map_err(|err| RagError::Storage(err.to_string()))?;
                info!(index = %logged, dimension, "created vector index");
                Ok(())
            }
        }
    }

    async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<(), RagError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let dimension = self.require_dimension().await?;
        // All-or-nothing: reject the whole batch before any row is written.
        for chunk in &chunks {
            if chunk.embedding.len() != dimension {
                return Err(RagError::Validation(format!(
                    "chunk '{}' has a {}-dimensional embedding, index expects {dimension}",
                    chunk.chunk_id,
                    chunk.embedding.len()
                )));
            }
        }
        let written = chunks.len();
        let rows: Vec<(ChunkRecord, String)> = chunks
            .into_iter()
            .map(|chunk| {
                let embedding_json =
                    serde_json::to_string(&chunk.embedding).unwrap_or_else(|_| "[]".to_string());
                (chunk, embedding_json)
            })
            .collect();
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                for (chunk, embedding_json) in rows {
                    // OR REPLACE covers both the chunk_id primary key and
                    // the (source_file, chunk_index) ordering key.
                    tx.execute(
                        "INSERT OR REPLACE INTO chunks \
                         (chunk_id, text, embedding, company, year, form_type, \
                          section_title, item_number, chunk_index, source_file) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        (
                            &chunk.chunk_id,
                            &chunk.text,
                            &embedding_json,
                            &chunk.company,
                            chunk.year,
                            &chunk.form_type,
                            &chunk.section_title,
                            &chunk.item_number,
                            chunk.chunk_index as i64,
                            &chunk.source_file,
                        ),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        debug!(written, "upserted chunk batch");
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if k <= 0 {
            return Ok(Vec::new());
        }
        let dimension = self.require_dimension().await?;
        if query_vector.len() != dimension {
            return Err(RagError::Validation(format!(
                "query vector has {} dimensions, index expects {dimension}",
                query_vector.len()
            )));
        }
        let query_json = serde_json::to_string(query_vector)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let filters = filters.clone();
        let results = self
            .conn
            .call(move |conn| -> Result<Vec<ScoredChunk>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS}, \
                     vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance \
                     FROM chunks \
                     WHERE (?2 IS NULL OR company = ?2) \
                       AND (?3 IS NULL OR year = ?3) \
                       AND (?4 IS NULL OR form_type = ?4) \
                     ORDER BY distance ASC, chunk_id ASC \
                     LIMIT ?5"
                ))?;
                let rows = stmt.query_map(
                    (
                        &query_json,
                        &filters.company,
                        filters.year,
                        &filters.form_type,
                        k,
                    ),
                    |row| {
                        let record = ChunkRecord {
                            chunk_id: row.get(0)?,
                            text: row.get(1)?,
                            embedding: row
                                .get::<_, String>(2)
                                .map(|raw| serde_json::from_str(&raw).unwrap_or_default())?,
                            company: row.get(3)?,
                            year: row.get(4)?,
                            form_type: row.get(5)?,
                            section_title: row.get(6)?,
                            item_number: row.get(7)?,
                            chunk_index: row.get::<_, i64>(8)? as usize,
                            source_file: row.get(9)?,
                        };
                        let distance: f32 = row.get(10)?;
                        // Convert distance to similarity (1 - distance for cosine).
                        Ok(ScoredChunk {
                            record,
                            score: 1.0 - distance,
                        })
                    },
                )?;
                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        debug!(hits = results.len(), k, "similarity search complete");
        Ok(results)
    }

    async fn clear(&self) -> Result<usize, RagError> {
        let deleted = self
            .conn
            .call(|conn| conn.execute("DELETE FROM chunks", []))
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        warn!(deleted, "cleared all chunks from the store");
        Ok(deleted)
    }

    async fn stats(&self) -> Result<IndexStats, RagError> {
        let index_exists = self.registered_dimension(&self.index_name).await?.is_some();
        let index_name = self.index_name.clone();
        let (total_chunks, companies) = self
            .conn
            .call(
                |conn| -> Result<(usize, BTreeMap<String, usize>), rusqlite::Error> {
                    let total: i64 =
                        conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                    let mut stmt =
                        conn.prepare("SELECT company, COUNT(*) FROM chunks GROUP BY company")?;
                    let rows = stmt.query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                    })?;
                    let mut companies = BTreeMap::new();
                    for row in rows {
                        let (company, count) = row?;
                        companies.insert(company, count);
                    }
                    Ok((total as usize, companies))
                },
            )
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Ok(IndexStats {
            total_chunks,
            companies,
            index_exists,
            index_name,
        })
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.conn
            .call(|conn| -> Result<usize, rusqlite::Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkRecord>, RagError> {
        let chunk_id = chunk_id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<ChunkRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM chunks WHERE chunk_id = ?1"
                ))?;
                let record = stmt
                    .query_row([&chunk_id], |row| {
                        Ok(ChunkRecord {
                            chunk_id: row.get(0)?,
                            text: row.get(1)?,
                            embedding: row
                                .get::<_, String>(2)
                                .map(|raw| serde_json::from_str(&raw).unwrap_or_default())?,
                            company: row.get(3)?,
                            year: row.get(4)?,
                            form_type: row.get(5)?,
                            section_title: row.get(6)?,
                            item_number: row.get(7)?,
                            chunk_index: row.get::<_, i64>(8)? as usize,
                            source_file: row.get(9)?,
                        })
                    })
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(|err| RagError::Storage(err.to_string()))
    }
}
