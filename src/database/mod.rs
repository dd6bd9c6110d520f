// Database module
// LanceDB holds the indexed document chunks and their embeddings

pub mod lancedb;

pub use lancedb::IndexedRecord;
pub use lancedb::vector_store::{SearchHit, VectorStore};
