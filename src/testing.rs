//! Dobles de prueba compartidos por los tests unitarios.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::chunker::Chunker;
use crate::embeddings::{normalize, Embedder, EMBEDDING_DIMENSIONS};
use crate::error::{ChatError, EmbeddingError, StoreError};
use crate::llm::{GenerationModel, GenerationRequest, TokenStream};
use crate::models::{Document, ScoredRecord, VectorRecord};
use crate::rag::ChatEngine;
use crate::retriever::Retriever;
use crate::vector_store::{validate_dimensions, VectorStore};

/// Documento sembrado en el store de los motores de prueba.
pub const REFUND_POLICY: &str = "Return a product within 30 days of purchase for a full refund.";

/// Embedder determinista: bolsa de palabras con hashing.
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % self.dimensions as u64) as usize] += 1.0;
        }
        Ok(normalize(vector))
    }
}

/// Embedder cuya inferencia falla siempre.
pub struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Inference("modelo corrupto".to_string()))
    }
}

/// Vector store en memoria con búsqueda exacta por coseno.
pub struct MemoryStore {
    dimension: usize,
    records: Mutex<HashMap<String, VectorRecord>>,
    searches: AtomicUsize,
    batches: AtomicUsize,
    failing: bool,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: Mutex::new(HashMap::new()),
            searches: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            failing: false,
        }
    }

    /// Store inalcanzable: toda operación devuelve un error de conexión.
    pub fn failing(dimension: usize) -> Self {
        Self {
            failing: true,
            ..Self::new(dimension)
        }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn collection(&self) -> &str {
        "test"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn reset_collection(&self) -> Result<(), StoreError> {
        self.check()?;
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }

    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        self.check()?;
        validate_dimensions(records, self.dimension)?;
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let stored = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<ScoredRecord> = stored
            .values()
            .map(|record| ScoredRecord {
                score: cosine(vector, &record.vector),
                record: record.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.check()?;
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }
}

pub fn record(id: &str, vector: Vec<f32>, text: &str) -> VectorRecord {
    let mut metadata = serde_json::Map::new();
    metadata.insert("source".to_string(), serde_json::json!(id));
    VectorRecord {
        id: id.to_string(),
        vector,
        text: text.to_string(),
        metadata,
    }
}

enum Script {
    Tokens(Vec<String>),
    FailFirst { failures: usize, tokens: Vec<String> },
    BrokenAfter(Vec<String>),
    Hang,
}

/// Modelo de generación con un guion fijo.
pub struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

fn owned(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

impl ScriptedModel {
    fn with(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        })
    }

    pub fn tokens(tokens: &[&str]) -> Arc<Self> {
        Self::with(Script::Tokens(owned(tokens)))
    }

    /// Falla al conectar las primeras `failures` veces.
    pub fn failing_first(failures: usize, tokens: &[&str]) -> Arc<Self> {
        Self::with(Script::FailFirst {
            failures,
            tokens: owned(tokens),
        })
    }

    /// Emite los tokens y luego corta el stream con un error.
    pub fn broken_after(tokens: &[&str]) -> Arc<Self> {
        Self::with(Script::BrokenAfter(owned(tokens)))
    }

    /// Nunca llega a abrir el stream.
    pub fn hanging() -> Arc<Self> {
        Self::with(Script::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn replay(tokens: &[String], trailing_error: bool) -> TokenStream {
    let (tx, rx) = mpsc::channel(tokens.len() + 1);
    for token in tokens {
        let _ = tx.try_send(Ok(token.clone()));
    }
    if trailing_error {
        let _ = tx.try_send(Err(ChatError::Generation("stream reset".to_string())));
    }
    rx
}

#[async_trait]
impl GenerationModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: GenerationRequest) -> Result<TokenStream, ChatError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request);

        match &self.script {
            Script::Tokens(tokens) => Ok(replay(tokens, false)),
            Script::FailFirst { failures, tokens } => {
                if call < *failures {
                    Err(ChatError::Generation("connection refused".to_string()))
                } else {
                    Ok(replay(tokens, false))
                }
            }
            Script::BrokenAfter(tokens) => Ok(replay(tokens, true)),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Motor de chat sobre un store en memoria con la política de devoluciones.
pub async fn engine_with(model: Arc<ScriptedModel>, timeout: Duration) -> ChatEngine {
    let embedder = Arc::new(HashEmbedder::default());
    let store = Arc::new(MemoryStore::new(embedder.dimensions()));

    let chunker = Chunker::new(500, 50).unwrap();
    let doc = Document::new("faq.csv#0", "Returns", REFUND_POLICY);
    let records: Vec<VectorRecord> = chunker
        .chunk(&doc)
        .iter()
        .map(|chunk| VectorRecord::from_chunk(chunk, embedder.embed_query(&chunk.text).unwrap()))
        .collect();
    store.upsert(&records).await.unwrap();

    ChatEngine::new(Retriever::new(embedder, store, 2), model, timeout)
}

/// Motor cuyo vector store no responde.
pub fn unreachable_engine(model: Arc<ScriptedModel>) -> ChatEngine {
    let embedder = Arc::new(HashEmbedder::default());
    let store = Arc::new(MemoryStore::failing(embedder.dimensions()));
    ChatEngine::new(
        Retriever::new(embedder, store, 2),
        model,
        Duration::from_secs(5),
    )
}
