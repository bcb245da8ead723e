use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use helpdesk_rag::{
    chunker::Chunker,
    config::IngestConfig,
    embeddings::{Embedder, OnnxEmbedder},
    ingest, logging,
    vector_store::QdrantStore,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Indexa el dataset del centro de ayuda en la colección de Qdrant")]
#[command(version)]
struct Cli {
    /// Directorio del dataset, recorrido de forma recursiva
    #[arg(long, default_value = "dataset")]
    dataset_dir: PathBuf,

    /// Ficheros concretos a ingerir (sustituyen al recorrido del directorio)
    #[arg(long = "file")]
    files: Vec<PathBuf>,

    /// Borrar y recrear la colección antes de subir los puntos
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    reset: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let cfg = IngestConfig::from_env().context("Error al cargar la configuración")?;

    let files = ingest::collect_files(&cli.dataset_dir, &cli.files)?;
    info!("{} ficheros a ingerir.", files.len());

    let chunker = Chunker::from_config(&cfg.chunking)?;
    let embedder = OnnxEmbedder::from_dir(&cfg.embedding_model_dir).with_context(|| {
        format!(
            "Error cargando el modelo de embeddings desde {}",
            cfg.embedding_model_dir.display()
        )
    })?;
    let store = QdrantStore::new(&cfg.qdrant, embedder.dimensions())
        .context("Error creando el cliente de Qdrant")?;

    let summary = ingest::ingest_files(&files, &chunker, Arc::new(embedder), &store, cli.reset)
        .await
        .context("La ingesta se ha abortado")?;

    println!("✅ Ingesta completada. {}", summary);
    Ok(())
}
