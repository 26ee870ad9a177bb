use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber shared by every binary.
///
/// `default_filter` applies when `RUST_LOG` is unset, so each entry point can
/// pick its own baseline verbosity without touching the environment.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
