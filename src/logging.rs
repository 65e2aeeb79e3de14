use tracing_subscriber::EnvFilter;

/// Installs the process-wide `fmt` subscriber, filtered by `RUST_LOG` and
/// defaulting to `info`. Calling it again after a subscriber is set does nothing.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
