use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for a daemon or CLI invocation.
/// `RUST_LOG` wins when set; otherwise the service logs at info.
pub fn init_telemetry(service_name: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("info,{}=info", service_name)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
