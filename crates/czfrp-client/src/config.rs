//! Client configuration from environment variables.

use czfrp_core::{FrpError, FrpResult};

const SERVER_IP: (&str, &str) = ("SERVER_IP", "127.0.0.1");
const SERVER_PORT: (&str, &str) = ("SERVER_PORT", "7000");
const LOCAL_IP: (&str, &str) = ("LOCAL_IP", "127.0.0.1");
const LOCAL_PORT: (&str, &str) = ("LOCAL_PORT", "8080");
const TUNNEL_ID: &str = "TUNNEL_ID";

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Host or address of the czfrp server.
    pub server_ip: String,
    /// FRP port on the server.
    pub server_port: u16,
    /// Host or address of the local service being exposed.
    pub local_ip: String,
    /// Port of the local service.
    pub local_port: u16,
    /// Pre-issued tunnel identifier. Required.
    pub tunnel_id: String,
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// `TUNNEL_ID` has no default; starting without one is a fatal
    /// misconfiguration.
    pub fn from_env() -> FrpResult<Self> {
        let tunnel_id = std::env::var(TUNNEL_ID).ok().filter(|id| !id.is_empty());
        let Some(tunnel_id) = tunnel_id else {
            return Err(FrpError::Config(
                "TUNNEL_ID is not set; create a tunnel through the management API \
                 and export its id"
                    .into(),
            ));
        };

        Ok(Self {
            server_ip: string_var(SERVER_IP),
            server_port: port_var(SERVER_PORT)?,
            local_ip: string_var(LOCAL_IP),
            local_port: port_var(LOCAL_PORT)?,
            tunnel_id,
        })
    }

    /// `host:port` of the server's FRP endpoint.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }

    /// `host:port` of the local service.
    pub fn local_addr(&self) -> String {
        format!("{}:{}", self.local_ip, self.local_port)
    }
}

fn string_var(pair: (&str, &str)) -> String {
    std::env::var(pair.0).unwrap_or_else(|_| pair.1.to_string())
}

fn port_var(pair: (&str, &str)) -> FrpResult<u16> {
    let value = std::env::var(pair.0).unwrap_or_else(|_| pair.1.to_string());
    value
        .parse::<u16>()
        .map_err(|_| FrpError::Config(format!("invalid value for {}: {value:?}", pair.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_formatting() {
        let config = ClientConfig {
            server_ip: "203.0.113.4".into(),
            server_port: 7000,
            local_ip: "127.0.0.1".into(),
            local_port: 8080,
            tunnel_id: "t-1".into(),
        };
        assert_eq!(config.server_addr(), "203.0.113.4:7000");
        assert_eq!(config.local_addr(), "127.0.0.1:8080");
    }
}
