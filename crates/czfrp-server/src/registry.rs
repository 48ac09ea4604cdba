//! Tunnel registry: the single source of truth for tunnel configuration
//! and rendezvous state.
//!
//! Stores tunnels by id, the hostname index used by the HTTP demux, and
//! the pending rendezvous connections awaiting a `DATA:` claim. Every
//! mutation goes through one `RwLock`'d state struct; no socket I/O ever
//! happens while the lock is held. Public sockets change owners by moving
//! through the pending map: the HTTP listener puts them in, and whichever
//! task takes them out (data claim or TTL reaper) is responsible for them.

use czfrp_core::{new_tunnel_id, FrpError, FrpResult};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Identity of a bound control channel, unique per process lifetime.
pub type ControlId = u64;

static NEXT_CONTROL_ID: AtomicU64 = AtomicU64::new(1);

/// Commands pushed to a control-channel task.
#[derive(Debug)]
pub enum ControlCommand {
    /// Ask the client to open a data channel for this token.
    NewConnection { token: String },
    /// Close the control connection (tunnel deleted through the API).
    Shutdown,
}

/// Handle for pushing commands to a tunnel's control channel.
///
/// The handle is the registry's view of the connection; the socket itself
/// stays owned by the FRP listener task that accepted it.
#[derive(Clone)]
pub struct ControlHandle {
    id: ControlId,
    peer_addr: SocketAddr,
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl ControlHandle {
    pub fn id(&self) -> ControlId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Queue a `NEW_CONNECTION` command. Fails when the control task has
    /// already gone away, in which case the caller must revoke the token.
    pub fn notify_new_connection(&self, token: &str) -> FrpResult<()> {
        self.tx
            .send(ControlCommand::NewConnection {
                token: token.to_string(),
            })
            .map_err(|_| FrpError::Other("control channel closed".into()))
    }

    fn shutdown(&self) {
        let _ = self.tx.send(ControlCommand::Shutdown);
    }
}

/// A public connection parked until the client claims it with `DATA:`.
pub struct PendingConn {
    /// The public-side socket, owned by whoever holds this entry.
    pub stream: TcpStream,
    /// Bytes already consumed from the public socket (the HTTP request
    /// head) that must be replayed to the client first.
    pub head: Vec<u8>,
    /// When the rendezvous was issued, for TTL accounting.
    pub created: Instant,
}

struct TunnelRecord {
    user_id: String,
    local_port: u16,
    domain: Option<String>,
    control: Option<ControlHandle>,
}

/// Serializable view of a tunnel, without the live socket handle.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelSnapshot {
    pub tunnel_id: String,
    pub user_id: String,
    pub local_port: u16,
    pub domain: Option<String>,
    pub connected: bool,
}

#[derive(Default)]
struct RegistryState {
    tunnels: HashMap<String, TunnelRecord>,
    domains: HashMap<String, String>,
    pending: HashMap<String, PendingConn>,
}

/// Process-wide tunnel registry.
pub struct Registry {
    base_domain: String,
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into().to_lowercase(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    /// Create a fresh, unconnected tunnel record.
    pub async fn register_tunnel(&self, user_id: &str, local_port: u16) -> TunnelSnapshot {
        let tunnel_id = new_tunnel_id();
        let mut state = self.state.write().await;
        state.tunnels.insert(
            tunnel_id.clone(),
            TunnelRecord {
                user_id: user_id.to_string(),
                local_port,
                domain: None,
                control: None,
            },
        );
        info!(tunnel_id = %tunnel_id, user_id = %user_id, local_port, "tunnel registered");
        TunnelSnapshot {
            tunnel_id,
            user_id: user_id.to_string(),
            local_port,
            domain: None,
            connected: false,
        }
    }

    /// Remove a tunnel and its domain mapping. A bound control link is told
    /// to shut down, which runs the disconnect cleanup path in the FRP
    /// listener.
    pub async fn delete_tunnel(&self, tunnel_id: &str) -> FrpResult<()> {
        let mut state = self.state.write().await;
        let record = state
            .tunnels
            .remove(tunnel_id)
            .ok_or_else(|| FrpError::NotFound(tunnel_id.to_string()))?;
        if let Some(domain) = &record.domain {
            state.domains.remove(domain);
        }
        if let Some(control) = &record.control {
            control.shutdown();
        }
        info!(tunnel_id = %tunnel_id, "tunnel deleted");
        Ok(())
    }

    /// Serializable view of one tunnel.
    pub async fn get_tunnel(&self, tunnel_id: &str) -> FrpResult<TunnelSnapshot> {
        let state = self.state.read().await;
        let record = state
            .tunnels
            .get(tunnel_id)
            .ok_or_else(|| FrpError::NotFound(tunnel_id.to_string()))?;
        Ok(TunnelSnapshot {
            tunnel_id: tunnel_id.to_string(),
            user_id: record.user_id.clone(),
            local_port: record.local_port,
            domain: record.domain.clone(),
            connected: record.control.is_some(),
        })
    }

    /// Point `<subdomain>.<base_domain>` at a tunnel.
    ///
    /// Fails with [`FrpError::Conflict`] when the host already belongs to a
    /// different tunnel; remapping the same tunnel to the same host is a
    /// no-op. A previous domain of the tunnel is dropped from the index.
    pub async fn map_domain(&self, tunnel_id: &str, subdomain: &str) -> FrpResult<String> {
        let full_host = format!("{}.{}", subdomain.to_lowercase(), self.base_domain);
        let mut state = self.state.write().await;

        if !state.tunnels.contains_key(tunnel_id) {
            return Err(FrpError::NotFound(tunnel_id.to_string()));
        }
        if let Some(owner) = state.domains.get(&full_host) {
            if owner != tunnel_id {
                return Err(FrpError::Conflict(full_host));
            }
        }

        let previous = state
            .tunnels
            .get_mut(tunnel_id)
            .and_then(|record| record.domain.replace(full_host.clone()));
        if let Some(previous) = previous {
            if previous != full_host {
                state.domains.remove(&previous);
            }
        }
        state.domains.insert(full_host.clone(), tunnel_id.to_string());

        info!(tunnel_id = %tunnel_id, domain = %full_host, "domain mapped");
        Ok(full_host)
    }

    /// Bind a control channel to an existing, unconnected tunnel.
    ///
    /// A second registration for an already-connected tunnel is rejected
    /// with [`FrpError::AlreadyConnected`]; the first binding stays.
    pub async fn bind_control(
        &self,
        tunnel_id: &str,
        tx: mpsc::UnboundedSender<ControlCommand>,
        peer_addr: SocketAddr,
    ) -> FrpResult<ControlHandle> {
        let mut state = self.state.write().await;
        let record = state
            .tunnels
            .get_mut(tunnel_id)
            .ok_or_else(|| FrpError::NotFound(tunnel_id.to_string()))?;
        if record.control.is_some() {
            return Err(FrpError::AlreadyConnected(tunnel_id.to_string()));
        }

        let handle = ControlHandle {
            id: NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            tx,
        };
        record.control = Some(handle.clone());
        Ok(handle)
    }

    /// Reverse of [`Registry::bind_control`], keyed by handle identity.
    ///
    /// A disconnect forgets the tunnel entirely: the domain mapping and the
    /// record itself are removed, so later host lookups 404. Returns the
    /// purged tunnel id, or `None` when the record was already gone (e.g.
    /// deleted through the API while the control link was live).
    pub async fn unbind_control(&self, handle: &ControlHandle) -> Option<String> {
        let mut state = self.state.write().await;
        let tunnel_id = state.tunnels.iter().find_map(|(id, record)| {
            record
                .control
                .as_ref()
                .filter(|control| control.id == handle.id)
                .map(|_| id.clone())
        })?;

        let record = state.tunnels.remove(&tunnel_id)?;
        if let Some(domain) = &record.domain {
            state.domains.remove(domain);
        }
        Some(tunnel_id)
    }

    /// Look up the tunnel owning a (lowercased) hostname.
    pub async fn lookup_host(&self, hostname: &str) -> Option<String> {
        let state = self.state.read().await;
        state.domains.get(hostname).cloned()
    }

    /// The control handle of a tunnel, if one is currently bound.
    pub async fn control_handle(&self, tunnel_id: &str) -> Option<ControlHandle> {
        let state = self.state.read().await;
        state.tunnels.get(tunnel_id)?.control.clone()
    }

    /// Park a public connection until a data channel claims its token.
    pub async fn put_pending(&self, token: &str, pending: PendingConn) {
        let mut state = self.state.write().await;
        state.pending.insert(token.to_string(), pending);
    }

    /// Claim a pending connection, exactly once. Racing claims for the same
    /// token are serialized by the state lock; one gets the entry, the rest
    /// get `None`.
    pub async fn take_pending(&self, token: &str) -> Option<PendingConn> {
        let mut state = self.state.write().await;
        let pending = state.pending.remove(token);
        if pending.is_some() {
            debug!(token = %token, "pending rendezvous taken");
        }
        pending
    }

    /// Number of live tunnel records.
    pub async fn tunnel_count(&self) -> usize {
        self.state.read().await.tunnels.len()
    }

    /// Number of unclaimed rendezvous entries.
    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    fn control_tx() -> (
        mpsc::UnboundedSender<ControlCommand>,
        mpsc::UnboundedReceiver<ControlCommand>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn socket() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        client.unwrap()
    }

    #[tokio::test]
    async fn register_get_delete_round_trip() {
        let registry = Registry::new("tunnel.test");
        let created = registry.register_tunnel("u1", 8080).await;

        let fetched = registry.get_tunnel(&created.tunnel_id).await.unwrap();
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(fetched.local_port, 8080);
        assert!(!fetched.connected);
        assert!(fetched.domain.is_none());

        registry.delete_tunnel(&created.tunnel_id).await.unwrap();
        assert!(matches!(
            registry.get_tunnel(&created.tunnel_id).await,
            Err(FrpError::NotFound(_))
        ));
        assert_eq!(registry.tunnel_count().await, 0);
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let registry = Registry::new("tunnel.test");
        assert!(matches!(
            registry.delete_tunnel("nope").await,
            Err(FrpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn map_domain_conflicts_and_idempotence() {
        let registry = Registry::new("tunnel.test");
        let t1 = registry.register_tunnel("u1", 8080).await;
        let t2 = registry.register_tunnel("u2", 9090).await;

        let host = registry.map_domain(&t1.tunnel_id, "Foo").await.unwrap();
        assert_eq!(host, "foo.tunnel.test");
        assert_eq!(
            registry.lookup_host("foo.tunnel.test").await,
            Some(t1.tunnel_id.clone())
        );

        // Same tunnel, same host: no-op.
        assert_eq!(
            registry.map_domain(&t1.tunnel_id, "foo").await.unwrap(),
            "foo.tunnel.test"
        );

        // Different tunnel, same host: conflict, first owner keeps it.
        assert!(matches!(
            registry.map_domain(&t2.tunnel_id, "foo").await,
            Err(FrpError::Conflict(_))
        ));
        assert_eq!(
            registry.lookup_host("foo.tunnel.test").await,
            Some(t1.tunnel_id.clone())
        );
    }

    #[tokio::test]
    async fn remapping_drops_previous_domain() {
        let registry = Registry::new("tunnel.test");
        let t1 = registry.register_tunnel("u1", 8080).await;

        registry.map_domain(&t1.tunnel_id, "foo").await.unwrap();
        registry.map_domain(&t1.tunnel_id, "bar").await.unwrap();

        assert_eq!(registry.lookup_host("foo.tunnel.test").await, None);
        assert_eq!(
            registry.lookup_host("bar.tunnel.test").await,
            Some(t1.tunnel_id.clone())
        );
        let snapshot = registry.get_tunnel(&t1.tunnel_id).await.unwrap();
        assert_eq!(snapshot.domain.as_deref(), Some("bar.tunnel.test"));
    }

    #[tokio::test]
    async fn bind_control_rejects_second_binding() {
        let registry = Registry::new("tunnel.test");
        let t1 = registry.register_tunnel("u1", 8080).await;

        let (tx1, _rx1) = control_tx();
        let handle = registry
            .bind_control(&t1.tunnel_id, tx1, peer())
            .await
            .unwrap();
        assert!(registry.get_tunnel(&t1.tunnel_id).await.unwrap().connected);

        let (tx2, _rx2) = control_tx();
        assert!(matches!(
            registry.bind_control(&t1.tunnel_id, tx2, peer()).await,
            Err(FrpError::AlreadyConnected(_))
        ));

        // First binding survives the rejected attempt.
        assert_eq!(
            registry
                .control_handle(&t1.tunnel_id)
                .await
                .map(|h| h.id()),
            Some(handle.id())
        );
    }

    #[tokio::test]
    async fn unbind_purges_record_and_domain() {
        let registry = Registry::new("tunnel.test");
        let t1 = registry.register_tunnel("u1", 8080).await;
        registry.map_domain(&t1.tunnel_id, "foo").await.unwrap();

        let (tx, _rx) = control_tx();
        let handle = registry
            .bind_control(&t1.tunnel_id, tx, peer())
            .await
            .unwrap();

        let purged = registry.unbind_control(&handle).await;
        assert_eq!(purged.as_deref(), Some(t1.tunnel_id.as_str()));
        assert_eq!(registry.lookup_host("foo.tunnel.test").await, None);
        assert!(matches!(
            registry.get_tunnel(&t1.tunnel_id).await,
            Err(FrpError::NotFound(_))
        ));

        // Second unbind finds nothing.
        assert!(registry.unbind_control(&handle).await.is_none());
    }

    #[tokio::test]
    async fn delete_sends_shutdown_to_control() {
        let registry = Registry::new("tunnel.test");
        let t1 = registry.register_tunnel("u1", 8080).await;
        let (tx, mut rx) = control_tx();
        registry
            .bind_control(&t1.tunnel_id, tx, peer())
            .await
            .unwrap();

        registry.delete_tunnel(&t1.tunnel_id).await.unwrap();
        assert!(matches!(rx.recv().await, Some(ControlCommand::Shutdown)));
    }

    #[tokio::test]
    async fn take_pending_is_exactly_once() {
        let registry = Registry::new("tunnel.test");
        let pending = PendingConn {
            stream: socket().await,
            head: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
            created: Instant::now(),
        };
        registry.put_pending("tok", pending).await;
        assert_eq!(registry.pending_count().await, 1);

        assert!(registry.take_pending("tok").await.is_some());
        assert!(registry.take_pending("tok").await.is_none());
        assert_eq!(registry.pending_count().await, 0);
    }
}
