
use super::IndexedRecord;
use crate::config::Config;
use crate::embeddings::{Chunk, Embedder};
use crate::{KnowledgeError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Chunks embedded and written per round trip
const INGEST_BATCH_SIZE: usize = 64;

/// LanceDB refuses to train an IVF index on fewer rows than this
const MIN_ROWS_FOR_INDEX: usize = 256;

/// Vector database store using LanceDB for similarity search
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: usize,
    nprobes: usize,
    embedder: Arc<dyn Embedder>,
    /// Serializes sequence number assignment on the write path
    write_lock: Mutex<()>,
}

/// A single nearest-neighbour match
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub text: String,
    /// Squared Euclidean distance to the query vector
    pub distance: f32,
    pub seq: u64,
}

impl std::fmt::Debug for VectorStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("table_name", &self.table_name)
            .field("vector_dimension", &self.vector_dimension)
            .field("nprobes", &self.nprobes)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Open the store described by `config`, creating the table on first use
    #[inline]
    pub async fn open(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::connect(
            &config.vector_database_path(),
            &config.vector_store.table,
            config.ollama.embedding_dimension as usize,
            config.vector_store.nprobes,
            embedder,
        )
        .await
    }

    /// Connect to the LanceDB database at `db_path` and initialize `table_name`.
    ///
    /// Reusing an existing table is only allowed when its vector column has
    /// `vector_dimension` entries; anything else is a `DimensionMismatch`.
    #[inline]
    pub async fn connect(
        db_path: &Path,
        table_name: &str,
        vector_dimension: usize,
        nprobes: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            KnowledgeError::IndexUnavailable(format!(
                "Failed to create vector database directory {}: {}",
                db_path.display(),
                e
            ))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("Failed to connect to LanceDB: {}", e))
        })?;

        let store = Self {
            connection,
            table_name: table_name.to_string(),
            vector_dimension,
            nprobes: nprobes.max(1),
            embedder,
            write_lock: Mutex::new(()),
        };

        store.initialize_table().await?;

        info!(
            "Vector store initialized: table {} with {} dimensions",
            store.table_name, store.vector_dimension
        );
        Ok(store)
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[inline]
    pub fn vector_dimension(&self) -> usize {
        self.vector_dimension
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| KnowledgeError::IndexUnavailable(format!("Failed to list tables: {}", e)))?;

        if !table_names.contains(&self.table_name) {
            info!(
                "Creating table {} with {} dimensions",
                self.table_name, self.vector_dimension
            );

            let schema = self.create_schema()?;
            self.connection
                .create_empty_table(&self.table_name, schema)
                .execute()
                .await
                .map_err(|e| KnowledgeError::Database(format!("Failed to create table: {}", e)))?;
            return Ok(());
        }

        debug!("Table {} already exists, checking schema", self.table_name);

        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| KnowledgeError::Database(format!("Failed to get table schema: {}", e)))?;

        let existing = schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                KnowledgeError::Database(format!(
                    "Table {} has no fixed-size vector column",
                    self.table_name
                ))
            })?;

        if existing != self.vector_dimension {
            return Err(KnowledgeError::DimensionMismatch {
                expected: self.vector_dimension,
                actual: existing,
            });
        }

        for column in ["text", "seq"] {
            if schema.field_with_name(column).is_err() {
                return Err(KnowledgeError::Database(format!(
                    "Table {} is missing the {} column",
                    self.table_name, column
                )));
            }
        }

        Ok(())
    }

    fn create_schema(&self) -> Result<Arc<Schema>> {
        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    self.list_size()?,
                ),
                false,
            ),
            Field::new("text", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, true),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("seq", DataType::UInt64, false),
            Field::new("created_at", DataType::Utf8, false),
        ])))
    }

    fn list_size(&self) -> Result<i32> {
        i32::try_from(self.vector_dimension).map_err(|_| {
            KnowledgeError::Config(format!(
                "Vector dimension {} is too large",
                self.vector_dimension
            ))
        })
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| KnowledgeError::IndexUnavailable(format!("Failed to open table: {}", e)))
    }

    /// Embed and store each text, returning how many records were written.
    ///
    /// Records are written in batches; a failure leaves earlier batches in place.
    #[inline]
    pub async fn ingest(&self, chunks: &[String]) -> Result<usize> {
        let pending: Vec<(String, u32)> = chunks
            .iter()
            .enumerate()
            .map(|(i, text)| (text.clone(), u32::try_from(i).unwrap_or(u32::MAX)))
            .collect();
        self.ingest_pending(pending, None).await
    }

    /// Embed and store segmented chunks of the document named `source`
    #[inline]
    pub async fn ingest_chunks(&self, chunks: &[Chunk], source: Option<&str>) -> Result<usize> {
        let pending: Vec<(String, u32)> = chunks
            .iter()
            .map(|chunk| {
                (
                    chunk.text.clone(),
                    u32::try_from(chunk.index).unwrap_or(u32::MAX),
                )
            })
            .collect();
        self.ingest_pending(pending, source).await
    }

    async fn ingest_pending(&self, pending: Vec<(String, u32)>, source: Option<&str>) -> Result<usize> {
        if pending.is_empty() {
            debug!("No chunks to ingest");
            return Ok(0);
        }

        let mut stored = 0;
        for batch in pending.chunks(INGEST_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;

            if vectors.len() != texts.len() {
                return Err(KnowledgeError::Embedding(format!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    texts.len()
                )));
            }
            for vector in &vectors {
                self.check_dimension(vector)?;
            }

            let _guard = self.write_lock.lock().await;
            let table = self.open_table().await?;
            let next_seq = table.count_rows(None).await.map_err(|e| {
                KnowledgeError::IndexUnavailable(format!("Failed to count rows: {}", e))
            })? as u64;

            let records: Vec<IndexedRecord> = batch
                .iter()
                .zip(vectors)
                .zip(next_seq..)
                .map(|(((text, chunk_index), vector), seq)| {
                    IndexedRecord::new(
                        text.clone(),
                        vector,
                        source.map(str::to_string),
                        *chunk_index,
                        seq,
                    )
                })
                .collect();

            let record_batch = self.create_record_batch(&records)?;
            let schema = record_batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
            table.add(reader).execute().await.map_err(|e| {
                KnowledgeError::IndexUnavailable(format!("Failed to insert records: {}", e))
            })?;

            stored += records.len();
            debug!("Stored batch of {} records ({} so far)", records.len(), stored);
        }

        info!("Ingested {} chunks into {}", stored, self.table_name);
        Ok(stored)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() == self.vector_dimension {
            Ok(())
        } else {
            Err(KnowledgeError::DimensionMismatch {
                expected: self.vector_dimension,
                actual: vector.len(),
            })
        }
    }

    fn create_record_batch(&self, records: &[IndexedRecord]) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * self.vector_dimension);
        let mut texts = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut seqs = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            texts.push(record.text.as_str());
            sources.push(record.source.as_deref());
            chunk_indices.push(record.chunk_index);
            seqs.push(record.seq);
            created_ats.push(record.created_at.as_str());
        }

        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.list_size()?,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| KnowledgeError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(sources)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt64Array::from(seqs)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(self.create_schema()?, arrays)
            .map_err(|e| KnowledgeError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Return up to `k` chunk texts closest to `text`, nearest first
    #[inline]
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<String>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_one(text).await?;
        let hits = self.search(&query_vector, k).await?;
        Ok(hits.into_iter().map(|hit| hit.text).collect())
    }

    /// Nearest-neighbour search by L2 distance.
    ///
    /// Results are ordered by ascending distance, with equal distances ordered by
    /// insertion sequence. An empty table yields no hits.
    #[inline]
    pub async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query_vector)?;

        debug!("Searching {} for {} nearest chunks", self.table_name, k);

        let table = self.open_table().await?;
        let total = table.count_rows(None).await.map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("Failed to count rows: {}", e))
        })?;
        if total == 0 {
            debug!("Table {} is empty, nothing to search", self.table_name);
            return Ok(Vec::new());
        }

        let mut hits = self
            .run_search(&table, query_vector, k.min(total), None)
            .await?;

        // The engine keeps an arbitrary subset of rows tied at the k-th distance,
        // so fetch every row up to and including that distance before ordering
        if hits.len() == k && total > k {
            let cutoff = hits
                .iter()
                .map(|hit| hit.distance)
                .fold(f32::NEG_INFINITY, f32::max);
            hits = self
                .run_search(&table, query_vector, total, Some(cutoff.next_up()))
                .await?;
        }

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        hits.truncate(k);

        debug!("Search returned {} hits", hits.len());
        Ok(hits)
    }

    async fn run_search(
        &self,
        table: &Table,
        query_vector: &[f32],
        limit: usize,
        max_distance: Option<f32>,
    ) -> Result<Vec<SearchHit>> {
        let mut query = table
            .vector_search(query_vector)
            .map_err(|e| {
                KnowledgeError::Database(format!("Failed to create vector search: {}", e))
            })?
            .column("vector")
            .distance_type(DistanceType::L2)
            .nprobes(self.nprobes)
            .limit(limit);
        if max_distance.is_some() {
            query = query.distance_range(None, max_distance);
        }

        let mut results = query.execute().await.map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("Failed to execute search: {}", e))
        })?;

        let mut hits = Vec::new();
        while let Some(batch) = results.try_next().await.map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("Failed to read result stream: {}", e))
        })? {
            hits.extend(parse_search_batch(&batch)?);
        }
        Ok(hits)
    }

    /// Get the total number of records stored
    #[inline]
    pub async fn count_records(&self) -> Result<usize> {
        let table = self.open_table().await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| KnowledgeError::IndexUnavailable(format!("Failed to count rows: {}", e)))
    }

    /// Build an approximate nearest-neighbour index on the vector column.
    ///
    /// Returns `false` without touching the table when there are too few rows to train one.
    #[inline]
    pub async fn create_vector_index(&self) -> Result<bool> {
        let table = self.open_table().await?;
        let rows = table.count_rows(None).await.map_err(|e| {
            KnowledgeError::IndexUnavailable(format!("Failed to count rows: {}", e))
        })?;

        if rows < MIN_ROWS_FOR_INDEX {
            warn!(
                "Only {} records in {}, need at least {} to build a vector index",
                rows, self.table_name, MIN_ROWS_FOR_INDEX
            );
            return Ok(false);
        }

        debug!("Creating vector index on {}", self.table_name);
        table
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
            .map_err(|e| KnowledgeError::Database(format!("Failed to create vector index: {}", e)))?;

        info!("Vector index created on {} ({} rows)", self.table_name, rows);
        Ok(true)
    }
}

/// Parse a single record batch from search results
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let texts = batch
        .column_by_name("text")
        .ok_or_else(|| KnowledgeError::Database("Missing text column".to_string()))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| KnowledgeError::Database("Invalid text column type".to_string()))?;

    let seqs = batch
        .column_by_name("seq")
        .ok_or_else(|| KnowledgeError::Database("Missing seq column".to_string()))?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .ok_or_else(|| KnowledgeError::Database("Invalid seq column type".to_string()))?;

    let distances = batch
        .column_by_name("_distance")
        .ok_or_else(|| KnowledgeError::Database("Missing _distance column".to_string()))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| KnowledgeError::Database("Invalid _distance column type".to_string()))?;

    Ok((0..batch.num_rows())
        .map(|row| SearchHit {
            text: texts.value(row).to_string(),
            distance: if distances.is_null(row) {
                f32::INFINITY
            } else {
                distances.value(row)
            },
            seq: seqs.value(row),
        })
        .collect())
}
