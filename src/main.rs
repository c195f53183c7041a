use chat_relay::config::RelayConfig;
use chat_relay::service;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Warning: a rustls crypto provider was already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export CHAT_RELAY_ROLE=leaf|central");
        std::process::exit(1);
    });

    eprintln!("📨 Chat Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Role: {}", config.role.as_str());
    eprintln!("   Port: {}", config.port);
    eprintln!("   Poll interval: {}ms\n", config.poll_interval.as_millis());

    service::run(config).await?;
    Ok(())
}
