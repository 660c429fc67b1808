//! Boundary to the peer transport: identity, outbound streams per protocol, known peers.
//! Inbound streams are handed to `serve_inbound` by whatever accepts them.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::catalog::Catalog;
use crate::identity::PeerId;
use crate::protocol::{FILE_TRANSFER_PROTOCOL, SEARCH_PROTOCOL, TRANSFER_PROTOCOL};
use crate::{search, transfer};

/// Point-to-point stream transport. One stream per request; streams are never reused.
pub trait Transport: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Stable identity of this node for the process lifetime.
    fn local_peer_id(&self) -> PeerId;

    /// Open a fresh bidirectional stream to `peer` speaking `protocol`.
    fn open_stream(
        &self,
        peer: PeerId,
        protocol: &'static str,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;

    /// Currently known peers. May be empty or stale.
    fn known_peers(&self) -> impl Future<Output = Vec<PeerId>> + Send;
}

/// Run the responder registered for `protocol` on an inbound stream.
/// Unknown protocols are dropped. Responder errors are logged; the stream is closed either way.
pub async fn serve_inbound<S>(catalog: &Catalog, local_id: PeerId, protocol: &str, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    match protocol {
        SEARCH_PROTOCOL => match search::serve_search(catalog, local_id, stream).await {
            Ok(n) => tracing::debug!(results = n, "answered search"),
            Err(e) => tracing::debug!(error = %e, "search request aborted"),
        },
        TRANSFER_PROTOCOL => match transfer::serve_transfer(catalog, stream).await {
            Ok(bytes) => tracing::debug!(bytes, "served chunk"),
            Err(e) => tracing::debug!(error = %e, "chunk request aborted"),
        },
        FILE_TRANSFER_PROTOCOL => match transfer::serve_file(catalog, stream).await {
            Ok(bytes) => tracing::debug!(bytes, "served whole file"),
            Err(e) => tracing::debug!(error = %e, "file request aborted"),
        },
        other => tracing::debug!(protocol = other, "dropping stream for unknown protocol"),
    }
}
