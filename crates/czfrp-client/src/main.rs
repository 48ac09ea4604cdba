//! czfrp-client: private side of the czfrp reverse tunnel.
//!
//! Holds an outbound control connection to the server and, on demand,
//! opens data channels that splice the server with a local service.

mod config;
mod runtime;

use config::ClientConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_addr(),
        tunnel_id = %config.tunnel_id,
        local_service = %config.local_addr(),
        "starting czfrp-client"
    );

    tokio::select! {
        result = runtime::run(config) => match result {
            Ok(()) => info!("server closed the control channel"),
            Err(e) => {
                error!(error = %e, "client error");
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    info!("czfrp-client stopped");
}
