//! Tracing subscriber setup

/// Default filter when neither `RUST_LOG` nor a configured level is present
pub const DEFAULT_FILTER: &str = "media_orchestrator=info";

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `level`; a second call is a no-op.
pub fn init_tracing(level: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match level {
            Some(level) => format!("media_orchestrator={level}").into(),
            None => DEFAULT_FILTER.into(),
        }
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
