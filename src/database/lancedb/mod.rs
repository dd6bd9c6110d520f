// LanceDB vector database module
// Handles vector storage and similarity search for document chunks


pub mod vector_store;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One embedded chunk as stored in LanceDB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    /// Unique identifier for this record
    pub id: String,
    /// The embedding of `text`
    pub vector: Vec<f32>,
    /// The chunk text returned by similarity search
    pub text: String,
    /// Name of the uploaded document, when known
    pub source: Option<String>,
    /// Index of this chunk within its document
    pub chunk_index: u32,
    /// Insertion sequence number, used to break distance ties
    pub seq: u64,
    /// RFC 3339 timestamp of ingestion
    pub created_at: String,
}

impl IndexedRecord {
    #[inline]
    pub fn new(
        text: String,
        vector: Vec<f32>,
        source: Option<String>,
        chunk_index: u32,
        seq: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            text,
            source,
            chunk_index,
            seq,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
