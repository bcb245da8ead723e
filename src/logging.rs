use tracing_subscriber::EnvFilter;

/// Inicializa `tracing` con el filtro de `RUST_LOG` (por defecto `info`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
