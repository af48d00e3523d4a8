pub mod chunk_persister;
pub mod chunk_store;
pub mod file_chunk_store;
pub mod metadata;
pub mod recovery;
