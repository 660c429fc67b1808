//! TCP transport: one connection per stream. The opener sends `"<protocol> <peer-id>\n"`, then the
//! protocol's own request; the acceptor reads that header and hands the socket to the node.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use peerfs_core::protocol::SUPPORTED_PROTOCOLS;
use peerfs_core::wire;
use peerfs_core::{Node, PeerId, Transport};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const HEADER_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer table plus outbound connector. Discovery fills the table.
pub struct TcpHost {
    local_id: PeerId,
    peers: Mutex<HashMap<PeerId, SocketAddr>>,
}

impl TcpHost {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Record or refresh a peer's transport address. Returns true if the peer was not known.
    pub async fn insert_peer(&self, peer: PeerId, addr: SocketAddr) -> bool {
        self.peers.lock().await.insert(peer, addr).is_none()
    }

    pub async fn remove_peer(&self, peer: &PeerId) -> bool {
        self.peers.lock().await.remove(peer).is_some()
    }

    pub async fn peer_addr(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.peers.lock().await.get(peer).copied()
    }
}

impl Transport for TcpHost {
    type Stream = TcpStream;

    fn local_peer_id(&self) -> PeerId {
        self.local_id
    }

    async fn open_stream(&self, peer: PeerId, protocol: &'static str) -> io::Result<TcpStream> {
        let addr = self.peer_addr(&peer).await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no address for peer {peer}"))
        })?;
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
        stream.set_nodelay(true)?;
        stream
            .write_all(format!("{protocol} {}\n", self.local_id).as_bytes())
            .await?;
        Ok(stream)
    }

    async fn known_peers(&self) -> Vec<PeerId> {
        self.peers.lock().await.keys().copied().collect()
    }
}

/// Split a stream header into protocol id and (if well-formed) the sender's peer id.
fn parse_header(line: &str) -> Option<(&str, Option<PeerId>)> {
    let mut parts = line.split_whitespace();
    let protocol = parts.next()?;
    let peer = parts.next().and_then(|s| s.parse().ok());
    Some((protocol, peer))
}

/// Accept loop: read each connection's header and serve it on its own task.
pub async fn run_transport(listener: TcpListener, node: Arc<Node<TcpHost>>) -> io::Result<()> {
    loop {
        let (stream, from) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            // Buffered so the header and request lines are not read a byte per syscall;
            // whatever the buffer holds past the header goes on to the responder.
            let mut stream = BufReader::new(stream);
            let header = match tokio::time::timeout(HEADER_TIMEOUT, wire::read_line(&mut stream)).await {
                Ok(Ok(line)) => line,
                Ok(Err(e)) => {
                    tracing::debug!(%from, error = %e, "bad stream header");
                    return;
                }
                Err(_) => {
                    tracing::debug!(%from, "stream header timed out");
                    return;
                }
            };
            let Some((protocol, peer)) = parse_header(&header) else {
                tracing::debug!(%from, "empty stream header");
                return;
            };
            if !SUPPORTED_PROTOCOLS.contains(&protocol) {
                tracing::debug!(%from, protocol, "unsupported protocol");
                return;
            }
            tracing::debug!(
                %from,
                protocol,
                peer = %peer.map(|p| p.short()).unwrap_or_else(|| "?".into()),
                "inbound stream"
            );
            node.handle_inbound(protocol, stream).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerfs_core::protocol::SEARCH_PROTOCOL;
    use peerfs_core::search::query_peer;
    use peerfs_core::transfer::{fetch_chunk, ChunkRequest};
    use peerfs_core::{index_file, Catalog};

    #[test]
    fn header_parsing() {
        let id = PeerId::generate();
        let line = format!("/go-peerfs/search/1.0.0 {id}");
        assert_eq!(parse_header(&line), Some(("/go-peerfs/search/1.0.0", Some(id))));
        assert_eq!(parse_header("/x garbage"), Some(("/x", None)));
        assert_eq!(parse_header("   "), None);
    }

    async fn serving_node(catalog: Catalog) -> (PeerId, SocketAddr) {
        let id = PeerId::generate();
        let node = Arc::new(Node::new(Arc::new(TcpHost::new(id)), Arc::new(catalog)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_transport(listener, node));
        (id, addr)
    }

    #[tokio::test]
    async fn chunk_and_search_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Report.pdf");
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        let meta = index_file(&path).unwrap();
        let (remote, addr) = serving_node(Catalog::new(vec![meta.clone()])).await;

        let host = TcpHost::new(PeerId::generate());
        assert!(host.insert_peer(remote, addr).await);
        assert!(!host.insert_peer(remote, addr).await);

        let chunk = fetch_chunk(
            &host,
            remote,
            &ChunkRequest::new(meta.file_fingerprint.clone(), 0),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(chunk, data);

        let results = query_peer(&host, remote, "report", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].peer_id, remote);
        assert_eq!(results[0].file_fingerprint, meta.file_fingerprint);
    }

    #[tokio::test]
    async fn header_and_request_in_one_write() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, b"all in one segment").unwrap();
        let meta = index_file(&path).unwrap();
        let (_, addr) = serving_node(Catalog::new(vec![meta.clone()])).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "{} {}\n{}",
            peerfs_core::protocol::TRANSFER_PROTOCOL,
            PeerId::generate(),
            ChunkRequest::new(meta.file_fingerprint.clone(), 0).encode()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"all in one segment");
    }

    #[tokio::test]
    async fn unknown_peer_cannot_be_opened() {
        let host = TcpHost::new(PeerId::generate());
        let err = host
            .open_stream(PeerId::generate(), SEARCH_PROTOCOL)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(host.known_peers().await.is_empty());
    }
}
