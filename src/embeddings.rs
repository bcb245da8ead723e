//! Embeddings locales con `sentence-transformers/all-MiniLM-L6-v2` (ONNX vía tract).
//!
//! El modelo es fijo (no se reentrena), así que el mismo texto produce
//! siempre el mismo vector. El camino por lotes usa internamente el mismo
//! camino que la consulta individual: los vectores de ingesta y de consulta
//! son numéricamente idénticos para un mismo texto.

use std::path::Path;
use std::sync::Arc;

use tokenizers::Tokenizer;
use tracing::info;
use tract_onnx::prelude::tract_ndarray::ArrayViewD;
use tract_onnx::prelude::*;

use crate::error::EmbeddingError;

/// Dimensión de all-MiniLM-L6-v2 (y de la colección de Qdrant).
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Longitud máxima de secuencia con la que se entrenó el modelo.
const MAX_SEQUENCE_LENGTH: usize = 256;

/// Ficheros esperados en el directorio del modelo.
const MODEL_FILE: &str = "model.onnx";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Mapeo determinista texto → vector de dimensión fija.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embeddings en bloque, en el mismo orden que `texts`.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed_query(text)).collect()
    }
}

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Modelo ONNX cargado y listo para inferencia en CPU.
pub struct OnnxEmbedder {
    model: Arc<OnnxPlan>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

impl OnnxEmbedder {
    /// Carga `model.onnx` y `tokenizer.json` desde `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, EmbeddingError> {
        let model_path = dir.join(MODEL_FILE);
        let tokenizer_path = dir.join(TOKENIZER_FILE);

        info!("Cargando modelo de embeddings desde {}...", dir.display());
        let model = tract_onnx::onnx()
            .model_for_path(&model_path)
            .map_err(|e| EmbeddingError::Load(format!("{}: {e}", model_path.display())))?
            .into_optimized()
            .map_err(|e| EmbeddingError::Load(e.to_string()))?
            .into_runnable()
            .map_err(|e| EmbeddingError::Load(e.to_string()))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EmbeddingError::Load(format!("{}: {e}", tokenizer_path.display())))?;

        info!("Modelo de embeddings listo ({EMBEDDING_DIMENSIONS} dimensiones).");
        Ok(Self {
            model: Arc::new(model),
            tokenizer: Arc::new(tokenizer),
            dimensions: EMBEDDING_DIMENSIONS,
        })
    }

    fn tokenize(&self, text: &str) -> Result<(Vec<i64>, Vec<i64>, Vec<i64>), EmbeddingError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        Ok((
            model_input(encoding.get_ids()),
            model_input(encoding.get_attention_mask()),
            model_input(encoding.get_type_ids()),
        ))
    }
}

impl Embedder for OnnxEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let (input_ids, attention_mask, token_type_ids) = self.tokenize(text)?;
        let seq_len = input_ids.len();

        let to_tensor = |data: &[i64]| {
            Tensor::from_shape(&[1, seq_len], data)
                .map_err(|e| EmbeddingError::Inference(e.to_string()))
        };
        let inputs: TVec<TValue> = tvec![
            to_tensor(&input_ids)?.into(),
            to_tensor(&attention_mask)?.into(),
            to_tensor(&token_type_ids)?.into(),
        ];

        let outputs = self
            .model
            .run(inputs)
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;

        // Salida del modelo: (batch, seq_len, hidden)
        let hidden = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| EmbeddingError::Inference(e.to_string()))?;
        let pooled = mean_pool(hidden, &attention_mask, self.dimensions)?;

        Ok(normalize(pooled))
    }
}

/// Entrada del modelo: ids como `i64`, recortados a la longitud máxima.
fn model_input(values: &[u32]) -> Vec<i64> {
    values
        .iter()
        .take(MAX_SEQUENCE_LENGTH)
        .map(|&v| v as i64)
        .collect()
}

/// Media de los estados ocultos `(1, seq_len, dim)` sobre las posiciones con
/// máscara de atención activa.
fn mean_pool(
    hidden: ArrayViewD<f32>,
    mask: &[i64],
    dimensions: usize,
) -> Result<Vec<f32>, EmbeddingError> {
    let shape = hidden.shape();
    if shape.len() != 3 || shape[2] != dimensions {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: shape.last().copied().unwrap_or(0),
        });
    }

    let mut pooled = vec![0.0f32; dimensions];
    let mut count = 0.0f32;
    for (j, &m) in mask.iter().enumerate().take(shape[1]) {
        if m > 0 {
            for (k, value) in pooled.iter_mut().enumerate() {
                *value += hidden[[0, j, k]];
            }
            count += 1.0;
        }
    }
    if count > 0.0 {
        pooled.iter_mut().for_each(|v| *v /= count);
    }
    Ok(pooled)
}

/// Normalización L2 (la similitud coseno se reduce a producto escalar).
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;

    #[test]
    fn normalize_produces_unit_vectors() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn batch_and_query_paths_agree() {
        let embedder = HashEmbedder::default();
        let texts = vec![
            "How do I return an item?".to_string(),
            "Track my order".to_string(),
        ];
        let batch = embedder.embed_batch(&texts).unwrap();
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(&embedder.embed_query(text).unwrap(), vector);
        }
    }

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed_query("Cancel my EMI").unwrap();
        let b = embedder.embed_query("Cancel my EMI").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
    }

    #[test]
    fn empty_batch_member_aborts_the_whole_batch() {
        let embedder = HashEmbedder::default();
        let texts = vec!["refund".to_string(), "   ".to_string()];
        assert!(matches!(
            embedder.embed_batch(&texts),
            Err(EmbeddingError::EmptyInput)
        ));
    }

    #[test]
    fn mean_pool_ignores_masked_positions() {
        let hidden = tract_ndarray::Array3::from_shape_vec(
            (1, 3, 2),
            vec![1.0, 2.0, 3.0, 4.0, 100.0, -100.0],
        )
        .unwrap()
        .into_dyn();

        let pooled = mean_pool(hidden.view(), &[1, 1, 0], 2).unwrap();
        assert_eq!(pooled, vec![2.0, 3.0]);

        let none = mean_pool(hidden.view(), &[0, 0, 0], 2).unwrap();
        assert_eq!(none, vec![0.0, 0.0]);
    }

    #[test]
    fn mean_pool_rejects_unexpected_hidden_size() {
        let hidden = tract_ndarray::Array3::<f32>::zeros((1, 2, 3)).into_dyn();
        let err = mean_pool(hidden.view(), &[1, 1], EMBEDDING_DIMENSIONS).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { expected: EMBEDDING_DIMENSIONS, actual: 3 }
        ));
    }

    #[test]
    fn model_input_is_truncated_to_the_sequence_limit() {
        let ids: Vec<u32> = (0..400).collect();
        let input = model_input(&ids);
        assert_eq!(input.len(), MAX_SEQUENCE_LENGTH);
        assert_eq!(input[0], 0);
        assert_eq!(input[MAX_SEQUENCE_LENGTH - 1], (MAX_SEQUENCE_LENGTH - 1) as i64);
        assert_eq!(model_input(&[7, 8]), vec![7, 8]);
    }

    #[test]
    fn missing_model_directory_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxEmbedder::from_dir(dir.path()).err().unwrap();
        assert!(matches!(err, EmbeddingError::Load(_)));
    }
}
