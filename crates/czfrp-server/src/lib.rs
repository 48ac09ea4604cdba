//! czfrp-server: public side of the czfrp reverse tunnel.
//!
//! Runs three listeners in one process: the FRP port for client control
//! and data channels, the public HTTP port demultiplexed on the Host
//! header, and the management REST API.

pub mod api;
pub mod callback;
pub mod config;
pub mod frp;
pub mod proxy;
pub mod registry;
pub mod rendezvous;
pub mod server;
