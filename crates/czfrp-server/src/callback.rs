//! Best-effort webhook notifying the bot when a tunnel connects.
//!
//! Delivery failures are logged and dropped; the tunnel itself is never
//! affected by an unreachable callback endpoint.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct TunnelEvent<'a> {
    tunnel_id: &'a str,
    user_id: &'a str,
    event: &'a str,
}

/// Client for the bot-callback webhook.
pub struct BotCallback {
    client: reqwest::Client,
    url: Option<String>,
    api_key: String,
}

impl BotCallback {
    /// Build a callback client. With `url == None` every notification is a
    /// no-op.
    pub fn new(url: Option<String>, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALLBACK_TIMEOUT)
            .build()
            .expect("failed to build callback HTTP client");
        Self {
            client,
            url,
            api_key,
        }
    }

    /// POST a `connected` event for a tunnel. Best-effort.
    pub async fn notify_connected(&self, tunnel_id: &str, user_id: &str) {
        let Some(url) = &self.url else {
            return;
        };

        let payload = TunnelEvent {
            tunnel_id,
            user_id,
            event: "connected",
        };
        let result = self
            .client
            .post(url)
            .header("X-API-Key", &self.api_key)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(tunnel_id = %tunnel_id, "bot callback delivered");
            }
            Ok(response) => {
                warn!(
                    tunnel_id = %tunnel_id,
                    status = %response.status(),
                    "bot callback rejected"
                );
            }
            Err(e) => {
                warn!(tunnel_id = %tunnel_id, error = %e, "bot callback failed");
            }
        }
    }
}
