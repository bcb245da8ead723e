//! Taxonomía de errores del sistema.
//!
//! - `ConfigError`: falta una credencial o un valor es inválido (fatal al arrancar).
//! - `EmbeddingError`: el modelo local no pudo generar un embedding.
//! - `StoreError`: fallo de conexión o de API contra el vector store.
//! - `ChatError`: cualquier fallo durante la respuesta a un mensaje.
//!
//! El desbordamiento de la memoria de conversación no es un error: el turno
//! se trunca (ver `memory.rs`).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Falta {0} en el entorno")]
    Missing(&'static str),

    #[error("Valor inválido para {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("no se puede generar el embedding de un texto vacío")]
    EmptyInput,

    #[error("no se pudo cargar el modelo de embeddings: {0}")]
    Load(String),

    #[error("error de tokenización: {0}")]
    Tokenizer(String),

    #[error("error de inferencia: {0}")]
    Inference(String),

    #[error("dimensión de embedding inesperada: esperada {expected}, obtenida {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no se pudo conectar con el vector store: {0}")]
    Connection(String),

    #[error("el vector store respondió {status}: {body}")]
    Api { status: u16, body: String },

    #[error("dimensión de vector inválida: esperada {expected}, obtenida {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("respuesta inesperada del vector store: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        StoreError::Connection(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("la consulta está vacía")]
    EmptyQuery,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Retrieval(#[from] StoreError),

    #[error("error del modelo de generación: {0}")]
    Generation(String),

    #[error("el modelo de generación no respondió en {0:?}")]
    Timeout(Duration),

    #[error("la generación fue cancelada")]
    Cancelled,
}

impl ChatError {
    pub fn generation<E: std::fmt::Display>(err: E) -> Self {
        ChatError::Generation(err.to_string())
    }

    /// Mensaje único que ve el usuario cuando falla una respuesta.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::EmptyQuery => "Please type a question so I can help you.".to_string(),
            ChatError::Embedding(_) => {
                "⚠️ I couldn't understand that message. Please rephrase it.".to_string()
            }
            ChatError::Retrieval(err) => format!("❌ Error connecting to Qdrant: {err}"),
            ChatError::Generation(_) => {
                "❌ The assistant is unavailable right now. Please try again.".to_string()
            }
            ChatError::Timeout(_) => {
                "⏱️ The assistant took too long to answer. Please try again.".to_string()
            }
            ChatError::Cancelled => "The answer was cancelled.".to_string(),
        }
    }
}
