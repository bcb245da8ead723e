//! Recuperación de contexto: consulta → embedding → k-NN en el vector store.

use std::sync::Arc;

use tracing::debug;

use crate::embeddings::Embedder;
use crate::error::{ChatError, EmbeddingError};
use crate::models::ScoredRecord;
use crate::vector_store::VectorStore;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, top_k: usize) -> Self {
        Self {
            embedder,
            store,
            top_k,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Devuelve como máximo `top_k` chunks, del más al menos similar.
    /// Una consulta vacía se rechaza sin tocar el vector store.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredRecord>, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::EmptyQuery);
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed_query(&text))
            .await
            .map_err(|e| EmbeddingError::Inference(e.to_string()))??;

        let results = self.store.search(&vector, self.top_k).await?;
        debug!(
            "Recuperados {} chunks para la consulta (top_k = {})",
            results.len(),
            self.top_k
        );
        Ok(results)
    }
}
