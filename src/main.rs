//! CLI for via
//!
//! `via [-v] [ADDR]` runs the HTTP broker. `ADDR` overrides the configured
//! `host:port`; `:8080` is shorthand for `localhost:8080`.

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use via::broker::Broker;
use via::config::{DEFAULT_CONFIG_FILE, Settings, load_config_from};
use via::persistence::open_store;
use via::transport::start_http_server;
use via::utils::logging;

#[derive(Parser, Debug)]
#[command(name = "via", version, about = "Per-topic publish/subscribe over HTTP")]
struct Cli {
    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(short, long)]
    verbose: bool,

    /// Config file base name, any format the config loader detects
    #[arg(long, env = "VIA_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Listen address, `host:port` or `:port`
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(if cli.verbose { "debug" } else { "info" });

    let config = load_config_from(&cli.config)
        .with_context(|| format!("failed to load configuration from '{}'", cli.config))?;
    let addr = listen_addr(cli.addr.as_deref(), &config);

    let store = open_store(&config.storage).with_context(|| {
        format!(
            "failed to open {:?} history store at '{}'",
            config.storage.backend, config.storage.path
        )
    })?;
    let broker = Broker::new(config.broker.clone(), store);
    info!(
        history_prefix = %config.broker.history_prefix,
        max_history_size = config.broker.max_history_size,
        "broker ready"
    );

    tokio::select! {
        result = start_http_server(&addr, broker) => {
            if let Err(e) = result {
                error!("HTTP server failed: {}", e);
                return Err(e).with_context(|| format!("cannot serve on {addr}"));
            }
            error!("HTTP server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

fn listen_addr(arg: Option<&str>, config: &Settings) -> String {
    match arg {
        Some(addr) if addr.starts_with(':') => format!("localhost{addr}"),
        Some(addr) => addr.to_string(),
        None => format!("{}:{}", config.server.host, config.server.port),
    }
}
