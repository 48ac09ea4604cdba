//! Server configuration from environment variables.
//!
//! Every knob has a default; a variable that is present but unparseable is
//! a fatal startup error rather than a silent fallback.

use czfrp_core::{FrpError, FrpResult};
use std::net::IpAddr;
use std::str::FromStr;

const SERVER_IP: (&str, &str) = ("SERVER_IP", "0.0.0.0");
const FRP_PORT: (&str, &str) = ("FRP_PORT", "7000");
const API_PORT: (&str, &str) = ("API_PORT", "8000");
const HTTP_PORT: (&str, &str) = ("HTTP_PORT", "80");
const BASE_DOMAIN: (&str, &str) = ("BASE_DOMAIN", "tunnel.cz7host.local");
const API_SECRET_KEY: (&str, &str) = ("API_SECRET_KEY", "supersecretkey_for_discord_bot");
const BOT_CALLBACK_URL: &str = "BOT_CALLBACK_URL";

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address all three listeners bind to.
    pub bind_ip: IpAddr,
    /// Port for client control and data channels.
    pub frp_port: u16,
    /// Port for the management REST API.
    pub api_port: u16,
    /// Port for public HTTP traffic.
    pub http_port: u16,
    /// Suffix composed onto mapped subdomains, lowercased.
    pub base_domain: String,
    /// Shared secret for the management API and the bot callback.
    pub api_secret_key: String,
    /// Webhook to notify when a tunnel connects; `None` disables callbacks.
    pub bot_callback_url: Option<String>,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> FrpResult<Self> {
        Ok(Self {
            bind_ip: parse_var(SERVER_IP.0, env_var(SERVER_IP.0), SERVER_IP.1)?,
            frp_port: parse_var(FRP_PORT.0, env_var(FRP_PORT.0), FRP_PORT.1)?,
            api_port: parse_var(API_PORT.0, env_var(API_PORT.0), API_PORT.1)?,
            http_port: parse_var(HTTP_PORT.0, env_var(HTTP_PORT.0), HTTP_PORT.1)?,
            base_domain: env_var(BASE_DOMAIN.0)
                .unwrap_or_else(|| BASE_DOMAIN.1.to_string())
                .to_lowercase(),
            api_secret_key: env_var(API_SECRET_KEY.0)
                .unwrap_or_else(|| API_SECRET_KEY.1.to_string()),
            bot_callback_url: env_var(BOT_CALLBACK_URL).filter(|url| !url.is_empty()),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse the raw value when present, the default otherwise. Present but
/// unparseable values are configuration errors.
fn parse_var<T>(key: &str, raw: Option<String>, default: &str) -> FrpResult<T>
where
    T: FromStr,
{
    let value = raw.unwrap_or_else(|| default.to_string());
    value
        .parse::<T>()
        .map_err(|_| FrpError::Config(format!("invalid value for {key}: {value:?}")))
}
