use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{client::ClientID, upstream::UpstreamSet},
    ports::conn::DuplexConn,
};

/// Per-connection request state threaded through the handler pipeline.
///
/// The context is carried by value from the outermost layer inward; each
/// layer may populate fields before invoking its inner handler. There is no
/// global mutable state behind it.
#[derive(Debug, Clone)]
pub struct ConnContext {
    /// Address of the connecting peer.
    pub peer_addr: SocketAddr,
    /// Cancellation signal for the whole connection, typically tied to
    /// server shutdown.
    pub cancel: CancellationToken,
    /// Authenticated client identity, set by the authentication layer.
    pub client_id: Option<ClientID>,
    /// Upstreams the client is authorized to reach, set by the
    /// authorization layer.
    pub authorized_upstreams: Option<UpstreamSet>,
}

impl ConnContext {
    pub fn new(peer_addr: SocketAddr, cancel: CancellationToken) -> Self {
        Self {
            peer_addr,
            cancel,
            client_id: None,
            authorized_upstreams: None,
        }
    }
}

/// A layer of the per-connection handler pipeline.
///
/// Layers compose linearly; each concrete handler owns its inner handler
/// and invokes it at most once. The client connection is owned by whichever
/// layer currently holds it, so returning early from any layer drops (and
/// thereby closes) the connection.
#[async_trait]
pub trait ConnHandler: Send + Sync {
    async fn handle(&self, ctx: ConnContext, conn: DuplexConn);
}
