//! Ingesta del dataset del centro de ayuda en el vector store.
//!
//! Fuentes admitidas (según tipo MIME): CSV de FAQs con cabecera
//! `Topic,Question,Answer`, PDF y texto plano/Markdown. Cualquier error de
//! embeddings o del vector store aborta la ejecución completa: nunca se deja
//! un índice parcial sin avisar. Como los ids son estables, relanzar la
//! ingesta sobrescribe lo ya subido.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use mime_guess::mime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    chunker::Chunker,
    embeddings::Embedder,
    models::{Document, FaqRecord, VectorRecord},
    vector_store::{VectorStore, UPSERT_BATCH_SIZE},
};

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files_scanned: usize,
    pub files_ingested: usize,
    pub files_skipped: usize,
    pub documents: usize,
    pub chunks: usize,
    pub points_in_collection: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} documentos, {} chunks; la colección tiene {} puntos.",
            self.files_scanned,
            self.files_ingested,
            self.files_skipped,
            self.documents,
            self.chunks,
            self.points_in_collection
        )
    }
}

/// Ficheros a ingerir: los indicados explícitamente (descartando los que no
/// existen) o, si no hay ninguno, todo el árbol de `dataset_dir`.
pub fn collect_files(dataset_dir: &Path, explicit: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let files: Vec<PathBuf> = if explicit.is_empty() {
        if !dataset_dir.is_dir() {
            bail!("La ruta no es un directorio: {}", dataset_dir.display());
        }
        let mut files: Vec<PathBuf> = WalkDir::new(dataset_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    } else {
        explicit
            .iter()
            .filter(|path| {
                let exists = path.is_file();
                if !exists {
                    warn!("Fichero no encontrado, se ignora: {}", path.display());
                }
                exists
            })
            .cloned()
            .collect()
    };

    if files.is_empty() {
        bail!("No se encontró ningún fichero válido para ingerir.");
    }
    Ok(files)
}

/// Carga los documentos de un fichero. `None` si el tipo no está soportado.
pub fn load_file(path: &Path) -> Result<Option<Vec<Document>>> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let source = path.to_string_lossy().to_string();
    let title = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| source.clone());

    let docs = if mime == mime::TEXT_CSV {
        let file = fs::File::open(path)
            .with_context(|| format!("No se pudo abrir {}", path.display()))?;
        read_faq_csv(file, &source)?
    } else if mime == mime::APPLICATION_PDF {
        let text = pdf_extract::extract_text(path)
            .map_err(|e| anyhow!("No se pudo extraer texto del PDF {}: {}", path.display(), e))?;
        vec![Document::new(source, title, text)]
    } else if mime.type_() == mime::TEXT {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Fichero no-UTF8: {}", path.display()))?;
        vec![Document::new(source, title, text)]
    } else {
        info!("Saltando fichero con tipo no soportado ({}): {}", mime, path.display());
        return Ok(None);
    };

    Ok(Some(
        docs.into_iter()
            .filter(|doc| !doc.text.trim().is_empty())
            .collect(),
    ))
}

/// Una fila del CSV = un documento, con fuente `<fichero>#<fila>`.
pub fn read_faq_csv<R: Read>(reader: R, source: &str) -> Result<Vec<Document>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let mut docs = Vec::new();
    for (row, record) in csv_reader.deserialize::<FaqRecord>().enumerate() {
        let record = record.with_context(|| format!("Fila {} inválida en {}", row + 1, source))?;
        if record.question.trim().is_empty() && record.answer.trim().is_empty() {
            continue;
        }
        docs.push(record.into_document(format!("{source}#{row}")));
    }
    Ok(docs)
}

/// Trocea, genera embeddings y sube los documentos en lotes. Los chunks que
/// sólo contienen espacios se omiten. Devuelve el número de chunks subidos.
pub async fn index_documents(
    docs: &[Document],
    chunker: &Chunker,
    embedder: Arc<dyn Embedder>,
    store: &dyn VectorStore,
) -> Result<usize> {
    let chunks: Vec<_> = docs
        .iter()
        .flat_map(|doc| chunker.chunk(doc))
        .filter(|chunk| {
            // Relleno de página de los PDF: no hay nada que indexar.
            let blank = chunk.text.trim().is_empty();
            if blank {
                debug!("Chunk {} de '{}' vacío; se omite.", chunk.index, chunk.source);
            }
            !blank
        })
        .collect();
    let total_batches = chunks.len().div_ceil(UPSERT_BATCH_SIZE);

    for (i, batch) in chunks.chunks(UPSERT_BATCH_SIZE).enumerate() {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embedder = Arc::clone(&embedder);
        let vectors = tokio::task::spawn_blocking(move || embedder.embed_batch(&texts))
            .await
            .context("La tarea de embeddings terminó de forma inesperada")?
            .with_context(|| format!("Error generando embeddings del lote {}", i + 1))?;

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord::from_chunk(chunk, vector))
            .collect();
        store
            .upsert(&records)
            .await
            .with_context(|| format!("Error subiendo el lote {}", i + 1))?;

        info!("[{}/{}] Lote de {} chunks subido.", i + 1, total_batches, records.len());
    }

    Ok(chunks.len())
}

/// Ingesta completa: prepara la colección, carga cada fichero y lo indexa.
pub async fn ingest_files(
    files: &[PathBuf],
    chunker: &Chunker,
    embedder: Arc<dyn Embedder>,
    store: &dyn VectorStore,
    reset: bool,
) -> Result<IngestionSummary> {
    if reset {
        info!("Reiniciando la colección '{}'...", store.collection());
        store.reset_collection().await?;
    } else {
        store.ensure_collection().await?;
    }

    let mut summary = IngestionSummary::default();
    let mut documents = Vec::new();
    for path in files {
        summary.files_scanned += 1;
        match load_file(path)? {
            Some(docs) => {
                info!("Cargado {} ({} documentos)", path.display(), docs.len());
                summary.files_ingested += 1;
                documents.extend(docs);
            }
            None => summary.files_skipped += 1,
        }
    }
    summary.documents = documents.len();

    summary.chunks = index_documents(&documents, chunker, embedder, store).await?;
    summary.points_in_collection = store.count().await?;
    info!("{}", summary);
    Ok(summary)
}
