use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info,market_pulse_lib=debug";

/// Installs the global fmt subscriber. `RUST_LOG` overrides `default_filter`.
/// A second call is a no-op so tests and embedders can call it freely.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init();
}
