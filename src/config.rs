//! Carga y gestión de configuración de la aplicación (Qdrant + embeddings + LLM).
//!
//! La configuración se construye una sola vez y se pasa por referencia a los
//! constructores del chunker, el embedder y el motor de chat.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_COLLECTION: &str = "flipkart_faqs";
pub const DEFAULT_CHAT_MODEL: &str = "llama-3.1-8b-instant";
pub const DEFAULT_EMBEDDING_MODEL_DIR: &str = "models/all-MiniLM-L6-v2";

/// Conexión al vector store (Qdrant Cloud o local).
#[derive(Clone, Debug)]
pub struct QdrantConfig {
    pub url: Url,
    pub api_key: String,
    pub collection: String,
    pub timeout: Duration,
}

/// Parámetros del troceado de documentos (en caracteres).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// Configuración completa del servidor de chat.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub qdrant: QdrantConfig,
    pub groq_api_key: String,
    /// Endpoint alternativo compatible con Groq (`None`: el oficial).
    pub groq_base_url: Option<String>,
    pub chat_model: String,
    pub embedding_model_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub memory_token_limit: usize,
    pub generation_timeout: Duration,
    /// Sesiones sin actividad durante este tiempo se cierran.
    pub session_idle_ttl: Duration,
    pub server_addr: String,
}

/// Configuración del binario de ingesta (no necesita la clave del LLM).
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub qdrant: QdrantConfig,
    pub embedding_model_dir: PathBuf,
    pub chunking: ChunkingConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let qdrant = QdrantConfig::from_lookup(&lookup)?;
        // Los `.env` del despliegue anterior usan CHATGROQ_API_KEY.
        let groq_api_key = required(&lookup, "GROQ_API_KEY")
            .or_else(|_| required(&lookup, "CHATGROQ_API_KEY"))
            .map_err(|_| ConfigError::Missing("GROQ_API_KEY"))?;

        let groq_base_url = lookup("GROQ_BASE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let chat_model = lookup("GROQ_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let embedding_model_dir = embedding_model_dir(&lookup);
        let chunking = ChunkingConfig::from_lookup(&lookup)?;

        let top_k: usize = parse_or(&lookup, "TOP_K", 2)?;
        if top_k == 0 {
            return Err(ConfigError::Invalid {
                var: "TOP_K",
                reason: "debe ser mayor que 0".to_string(),
            });
        }
        let memory_token_limit = parse_or(&lookup, "MEMORY_TOKEN_LIMIT", 4000)?;
        let generation_timeout =
            Duration::from_secs(parse_or(&lookup, "GENERATION_TIMEOUT_SECS", 60)?);
        let session_idle_ttl =
            Duration::from_secs(parse_or(&lookup, "SESSION_IDLE_TTL_SECS", 1800)?);

        let server_addr = match lookup("SERVER_ADDR") {
            Some(addr) => addr,
            None => {
                let port: u16 = parse_or(&lookup, "PORT", 8000)?;
                format!("0.0.0.0:{port}")
            }
        };

        Ok(Self {
            qdrant,
            groq_api_key,
            groq_base_url,
            chat_model,
            embedding_model_dir,
            chunking,
            top_k,
            memory_token_limit,
            generation_timeout,
            session_idle_ttl,
            server_addr,
        })
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            qdrant: QdrantConfig::from_lookup(&lookup)?,
            embedding_model_dir: embedding_model_dir(&lookup),
            chunking: ChunkingConfig::from_lookup(&lookup)?,
        })
    }
}

impl QdrantConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = required(lookup, "QDRANT_URL")?;
        let url = Url::parse(&raw_url).map_err(|e| ConfigError::Invalid {
            var: "QDRANT_URL",
            reason: e.to_string(),
        })?;
        let api_key = required(lookup, "QDRANT_API_KEY")?;
        let collection =
            lookup("COLLECTION_NAME").unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        let timeout = Duration::from_secs(parse_or(lookup, "QDRANT_TIMEOUT_SECS", 60)?);

        Ok(Self {
            url,
            api_key,
            collection,
            timeout,
        })
    }
}

impl ChunkingConfig {
    fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            chunk_size: parse_or(lookup, "CHUNK_SIZE", defaults.chunk_size)?,
            overlap: parse_or(lookup, "CHUNK_OVERLAP", defaults.overlap)?,
        })
    }
}

fn embedding_model_dir<F>(lookup: &F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("EMBEDDING_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EMBEDDING_MODEL_DIR))
}

// Las credenciales vacías cuentan como ausentes.
fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
