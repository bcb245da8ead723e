//! Modelos de dominio (documentos, chunks, registros vectoriales y turnos de chat).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Texto completo de una fuente (fichero o fila del CSV del centro de ayuda).
/// Inmutable una vez cargado.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub source: String,
    pub title: String,
    pub text: String,
}

impl Document {
    /// El id se deriva de la fuente, de modo que reingestar la misma fuente
    /// produce los mismos ids.
    pub fn new(source: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_URL, source.as_bytes()),
            source,
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Fila exportada por el scraper del centro de ayuda.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaqRecord {
    #[serde(rename = "Topic")]
    pub topic: String,
    #[serde(rename = "Question")]
    pub question: String,
    #[serde(rename = "Answer")]
    pub answer: String,
}

impl FaqRecord {
    pub fn into_document(self, source: String) -> Document {
        let text = format!(
            "Topic: {}\nQuestion: {}\nAnswer: {}",
            self.topic.trim(),
            self.question.trim(),
            self.answer.trim()
        );
        Document::new(source, self.question.trim(), text)
    }
}

/// Trozo contiguo de un `Document`. `start` y `end` son offsets en caracteres.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub source: String,
    pub title: String,
    pub index: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    /// Id estable por (fuente, índice): un upsert repetido sobrescribe.
    pub fn stable_id(source: &str, index: usize) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{source}#{index}").as_bytes())
    }
}

/// Registro persistido en la colección del vector store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), chunk.source.clone().into());
        metadata.insert("title".into(), chunk.title.clone().into());
        metadata.insert("document_id".into(), chunk.document_id.to_string().into());
        metadata.insert("chunk_index".into(), chunk.index.into());

        Self {
            id: chunk.id.to_string(),
            vector,
            text: chunk.text.clone(),
            metadata,
        }
    }
}

/// Resultado de una búsqueda k-NN.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Un turno de la conversación.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_across_loads() {
        let a = Document::new("dataset/faq.csv#3", "q", "uno");
        let b = Document::new("dataset/faq.csv#3", "q", "dos");
        assert_eq!(a.id, b.id);
        assert_eq!(Chunk::stable_id("a.pdf", 0), Chunk::stable_id("a.pdf", 0));
        assert_ne!(Chunk::stable_id("a.pdf", 0), Chunk::stable_id("a.pdf", 1));
    }

    #[test]
    fn faq_rows_become_self_describing_documents() {
        let record = FaqRecord {
            topic: "Refunds".into(),
            question: " How long does a refund take? ".into(),
            answer: "5-7 business days.".into(),
        };
        let doc = record.into_document("faq.csv#1".into());
        assert_eq!(doc.title, "How long does a refund take?");
        assert_eq!(
            doc.text,
            "Topic: Refunds\nQuestion: How long does a refund take?\nAnswer: 5-7 business days."
        );
    }
}
