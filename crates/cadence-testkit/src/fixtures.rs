//! Engine factories and runtime helpers.

use cadence_actions::{Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Engine with diagnostics enabled and default timeouts.
pub fn test_engine() -> Engine {
    test_engine_with(EngineConfig::default().with_diagnostics(true))
}

/// Engine from an explicit config.
pub fn test_engine_with(config: EngineConfig) -> Engine {
    Engine::new(config).expect("test config is valid")
}

/// Let spawned tasks on the current runtime make progress.
pub async fn flush() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
