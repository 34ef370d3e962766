use tracing_subscriber::{fmt, EnvFilter};

/// Initializes tracing/logging based on environment variables. Defaults to
/// info for this crate so poll progress stays visible.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("genie_nlq=info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    subscriber.init();
}
