//! Server composition: binds the three listeners and runs them to
//! completion.

use crate::api::{self, ApiState};
use crate::callback::BotCallback;
use crate::config::ServerConfig;
use crate::proxy::{self, ProxySettings};
use crate::frp;
use crate::registry::Registry;
use czfrp_core::FrpResult;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The czfrp server instance.
pub struct FrpServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    callback: Arc<BotCallback>,
}

impl FrpServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::new(config.base_domain.clone()));
        let callback = Arc::new(BotCallback::new(
            config.bot_callback_url.clone(),
            config.api_secret_key.clone(),
        ));
        Self {
            config,
            registry,
            callback,
        }
    }

    /// Bind the FRP, HTTP, and API listeners and serve until shutdown.
    ///
    /// Bind failures are the only fatal errors; once the listeners are up,
    /// per-connection faults stay inside their own tasks.
    pub async fn run(self) -> FrpResult<()> {
        let frp_addr = SocketAddr::new(self.config.bind_ip, self.config.frp_port);
        let http_addr = SocketAddr::new(self.config.bind_ip, self.config.http_port);
        let api_addr = SocketAddr::new(self.config.bind_ip, self.config.api_port);

        let frp_listener = TcpListener::bind(frp_addr).await?;
        let http_listener = TcpListener::bind(http_addr).await?;
        let api_listener = TcpListener::bind(api_addr).await?;

        info!(addr = %frp_addr, "frp listener ready");
        info!(
            addr = %http_addr,
            base_domain = %self.config.base_domain,
            "http proxy ready"
        );
        info!(addr = %api_addr, "management API ready");

        let api_state = ApiState {
            registry: self.registry.clone(),
            api_secret_key: Arc::new(self.config.api_secret_key.clone()),
        };

        tokio::select! {
            _ = frp::serve(frp_listener, self.registry.clone(), self.callback.clone()) => {}
            _ = proxy::serve(http_listener, self.registry.clone(), ProxySettings::default()) => {}
            result = api::serve(api_listener, api_state) => {
                result?;
            }
        }

        Ok(())
    }
}
