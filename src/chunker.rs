//! Troceado de documentos en ventanas de tamaño fijo con solape.
//!
//! Las posiciones se cuentan en caracteres (`char`), nunca en bytes, por lo
//! que un chunk jamás corta un carácter multibyte.

use tracing::debug;

use crate::config::ChunkingConfig;
use crate::error::ConfigError;
use crate::models::{Chunk, Document};

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 {
            return Err(ConfigError::Invalid {
                var: "CHUNK_SIZE",
                reason: "debe ser mayor que 0".to_string(),
            });
        }
        if overlap >= chunk_size {
            return Err(ConfigError::Invalid {
                var: "CHUNK_OVERLAP",
                reason: format!("debe ser menor que CHUNK_SIZE ({chunk_size})"),
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_config(cfg: &ChunkingConfig) -> Result<Self, ConfigError> {
        Self::new(cfg.chunk_size, cfg.overlap)
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Divide el documento en chunks de como máximo `chunk_size` caracteres.
    ///
    /// Cada par de chunks consecutivos comparte exactamente `overlap`
    /// caracteres; el último puede ser más corto y no se rellena. Un
    /// documento vacío produce cero chunks.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        // Offsets en bytes de cada carácter, más el final del texto.
        let boundaries: Vec<usize> = doc
            .text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(doc.text.len()))
            .collect();
        let total_chars = boundaries.len() - 1;

        let mut chunks = Vec::new();
        if total_chars == 0 {
            return chunks;
        }

        let step = self.chunk_size - self.overlap;
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(total_chars);
            let index = chunks.len();
            chunks.push(Chunk {
                id: Chunk::stable_id(&doc.source, index),
                document_id: doc.id,
                source: doc.source.clone(),
                title: doc.title.clone(),
                index,
                text: doc.text[boundaries[start]..boundaries[end]].to_string(),
                start,
                end,
            });
            if end == total_chars {
                break;
            }
            start += step;
        }

        debug!(
            "'{}' troceado en {} chunks ({} caracteres)",
            doc.source,
            chunks.len(),
            total_chars
        );
        chunks
    }
}

/// Reconstruye el texto original quitando el solape de cada chunk.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut text = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            text.push_str(&chunk.text);
        } else {
            text.extend(chunk.text.chars().skip(overlap));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("test.txt", "test", text)
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = Chunker::new(500, 50).unwrap();
        assert!(chunker.chunk(&doc("")).is_empty());
    }

    #[test]
    fn short_document_is_a_single_chunk() {
        let chunker = Chunker::new(500, 50).unwrap();
        let text = "Return a product within 30 days of purchase for a full refund.";
        let chunks = chunker.chunk(&doc(text));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!((chunks[0].start, chunks[0].end), (0, text.chars().count()));
    }

    #[test]
    fn adjacent_chunks_share_exactly_the_overlap() {
        let chunker = Chunker::new(10, 3).unwrap();
        let text: String = ('a'..='z').collect();
        let chunks = chunker.chunk(&doc(&text));

        // ventanas [0,10) [7,17) [14,24) [21,26)
        assert_eq!(chunks.len(), 4);
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().skip(10 - 3).collect();
            let head: String = pair[1].text.chars().take(3).collect();
            assert_eq!(tail, head);
        }
        assert_eq!(chunks[3].text, "vwxyz");
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 10));
    }

    #[test]
    fn exact_multiple_does_not_emit_a_redundant_tail() {
        let chunker = Chunker::new(10, 2).unwrap();
        let text = "x".repeat(18);
        let chunks = chunker.chunk(&doc(&text));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].end, 18);
    }

    #[test]
    fn reassembling_chunks_restores_the_document() {
        let chunker = Chunker::new(500, 50).unwrap();
        let texts = [
            "a".to_string(),
            "Order tracking. ".repeat(120),
            "x".repeat(500),
            "y".repeat(501),
            "Reembolsos y devoluciones — ñandú 🚚 ".repeat(40),
        ];
        for text in &texts {
            let chunks = chunker.chunk(&doc(text));
            assert_eq!(&reassemble(&chunks, chunker.overlap()), text);
        }
    }

    #[test]
    fn never_splits_a_multibyte_character() {
        let chunker = Chunker::new(7, 2).unwrap();
        let text = "🚚📦💳ñéü日本語テキスト".repeat(5);
        for chunk in chunker.chunk(&doc(&text)) {
            // si se hubiera cortado un carácter, el slice habría hecho panic
            assert!(chunk.text.chars().count() <= 7);
        }
    }

    #[test]
    fn chunks_reference_their_document_with_stable_ids() {
        let chunker = Chunker::new(10, 3).unwrap();
        let document = doc(&"z".repeat(25));
        let first = chunker.chunk(&document);
        let second = chunker.chunk(&document);

        assert!(first.iter().all(|c| c.document_id == document.id));
        let ids: Vec<_> = first.iter().map(|c| c.id).collect();
        let again: Vec<_> = second.iter().map(|c| c.id).collect();
        assert_eq!(ids, again);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(Chunker::new(50, 50).is_err());
        assert!(Chunker::new(0, 0).is_err());
    }
}
