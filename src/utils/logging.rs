use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the application.
///
/// `RUST_LOG` wins when it is set; otherwise `default_level` is used for the
/// whole process.
pub fn init(default_level: &str) {
    let level = match default_level.to_lowercase().as_str() {
        "error" => "error",
        "warn" | "warning" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Use try_init so tests and libraries can call this multiple times without panicking
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
