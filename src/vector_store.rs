//! Integración con Qdrant como vector store de los chunks.
//!
//! API pública:
//!   - trait `VectorStore` (colección, upsert por lotes, búsqueda k-NN)
//!   - `QdrantStore`, implementación sobre la API REST de Qdrant.
//!
//! Los fallos de conexión o autenticación se devuelven tal cual: no se
//! reintentan contra un servicio remoto de pago.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::QdrantConfig;
use crate::error::StoreError;
use crate::models::{ScoredRecord, VectorRecord};

/// Tamaño de lote del upsert: acota memoria y tamaño de cada petición.
pub const UPSERT_BATCH_SIZE: usize = 64;

/// Campo del payload donde se guarda el texto original del chunk.
const TEXT_FIELD: &str = "text";

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Nombre de la colección.
    fn collection(&self) -> &str;

    /// Dimensión configurada de la colección.
    fn dimension(&self) -> usize;

    /// Crea la colección si no existe (idempotente).
    async fn ensure_collection(&self) -> Result<(), StoreError>;

    /// Borra la colección (si existe) y la vuelve a crear vacía.
    async fn reset_collection(&self) -> Result<(), StoreError>;

    /// Upsert de un lote ya acotado. Un id repetido sobrescribe.
    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<(), StoreError>;

    /// Los `k` registros más similares, ordenados por score descendente.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError>;

    /// Número de puntos almacenados.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Upsert en lotes de `UPSERT_BATCH_SIZE`.
    ///
    /// Todas las dimensiones se validan antes de enviar nada. Un lote es la
    /// unidad de reintento: si falla, se devuelve el error y el lote completo
    /// debe reenviarse (los ids estables hacen que reenviar sobrescriba).
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize, StoreError> {
        validate_dimensions(records, self.dimension())?;

        let total_batches = records.len().div_ceil(UPSERT_BATCH_SIZE);
        for (i, batch) in records.chunks(UPSERT_BATCH_SIZE).enumerate() {
            self.upsert_batch(batch).await?;
            debug!(
                "Lote {}/{} subido a '{}' ({} puntos)",
                i + 1,
                total_batches,
                self.collection(),
                batch.len()
            );
        }
        Ok(records.len())
    }
}

pub fn validate_dimensions(records: &[VectorRecord], expected: usize) -> Result<(), StoreError> {
    match records.iter().find(|r| r.vector.len() != expected) {
        Some(bad) => Err(StoreError::DimensionMismatch {
            expected,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

/// Cliente REST de Qdrant.
#[derive(Clone)]
pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: String,
    collection: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ExistsResult {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: usize,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

impl QdrantStore {
    pub fn new(cfg: &QdrantConfig, dimension: usize) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(StoreError::connection)?;

        Ok(Self {
            client,
            base_url: cfg.url.as_str().trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            collection: cfg.collection.clone(),
            dimension,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        self.client.request(method, url).header("api-key", &self.api_key)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(StoreError::connection)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T>(&self, builder: RequestBuilder) -> Result<T, StoreError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.send(builder).await?;
        let payload: QdrantResponse<T> = response
            .json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(payload.result)
    }

    async fn collection_exists(&self) -> Result<bool, StoreError> {
        let result: ExistsResult = self.send_json(self.request(Method::GET, "/exists")).await?;
        Ok(result.exists)
    }

    /// Dimensión con la que se creó la colección remota.
    async fn remote_dimension(&self) -> Result<Option<usize>, StoreError> {
        let info: Value = self.send_json(self.request(Method::GET, "")).await?;
        Ok(info
            .pointer("/config/params/vectors/size")
            .and_then(Value::as_u64)
            .map(|size| size as usize))
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        let body = json!({
            "vectors": { "size": self.dimension, "distance": "Cosine" }
        });
        self.send(self.request(Method::PUT, "").json(&body)).await?;
        info!(
            "Colección '{}' creada ({} dimensiones, coseno).",
            self.collection, self.dimension
        );
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_collection(&self) -> Result<(), StoreError> {
        if !self.collection_exists().await? {
            return self.create_collection().await;
        }

        match self.remote_dimension().await? {
            Some(size) if size != self.dimension => Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: size,
            }),
            Some(_) => {
                info!("Colección '{}' ya existe.", self.collection);
                Ok(())
            }
            None => {
                warn!(
                    "No se pudo leer la dimensión de la colección '{}'; se asume {}.",
                    self.collection, self.dimension
                );
                Ok(())
            }
        }
    }

    async fn reset_collection(&self) -> Result<(), StoreError> {
        if self.collection_exists().await? {
            info!("Colección '{}' existe. Borrando...", self.collection);
            self.send(self.request(Method::DELETE, "")).await?;
        }
        self.create_collection().await
    }

    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                let mut payload = record.metadata.clone();
                payload.insert(TEXT_FIELD.to_string(), Value::String(record.text.clone()));
                json!({ "id": record.id, "vector": record.vector, "payload": payload })
            })
            .collect();

        self.send(
            self.request(Method::PUT, "/points?wait=true")
                .json(&json!({ "points": points })),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let body = json!({ "vector": vector, "limit": k, "with_payload": true });
        let points: Vec<ScoredPoint> = self
            .send_json(self.request(Method::POST, "/points/search").json(&body))
            .await?;

        let mut results: Vec<ScoredRecord> = points.into_iter().map(into_scored_record).collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(k);
        Ok(results)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let result: CountResult = self
            .send_json(
                self.request(Method::POST, "/points/count")
                    .json(&json!({ "exact": true })),
            )
            .await?;
        Ok(result.count)
    }
}

fn into_scored_record(point: ScoredPoint) -> ScoredRecord {
    let mut metadata = point.payload.unwrap_or_default();
    let text = match metadata.remove(TEXT_FIELD) {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };
    let id = match point.id {
        Value::String(id) => id,
        other => other.to_string(),
    };
    ScoredRecord {
        record: VectorRecord {
            id,
            vector: point.vector.unwrap_or_default(),
            text,
            metadata,
        },
        score: point.score,
    }
}
