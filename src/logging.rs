use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "veilbid=info";

/// Installs the global `fmt` subscriber. `RUST_LOG` wins over `default_filter`.
/// Returns `false` when a subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).compact().try_init().is_ok()
}
