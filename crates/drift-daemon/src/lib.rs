pub mod capture;
pub mod cas;
pub mod chunker;
pub mod cleanup;
pub mod keys;
pub mod setup;
pub mod source;
pub mod streamer;
pub mod sync;

/// Shared subscriber setup for the role binaries. `RUST_LOG` wins;
/// otherwise everything logs at info.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
