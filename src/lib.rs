// Módulos de la aplicación
pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod models;
pub mod rag;
pub mod retriever;
pub mod session;
pub mod vector_store;

#[cfg(test)]
pub(crate) mod testing;
