//! Logging bootstrap for binaries that embed the routing memory core.
//!
//! The library itself never installs a global subscriber — it only emits
//! `tracing` events. Call [`init_tracing`] once from a binary's `main`.

/// Installs a `tracing-subscriber` `fmt` subscriber driven by `RUST_LOG`,
/// defaulting to `info` for this crate when the variable is unset.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("routing_memory=info"));
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
