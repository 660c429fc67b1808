//! In-memory network for tests: each remote peer is a catalog served over `tokio::io::duplex`.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tokio::io::{AsyncWriteExt, DuplexStream};

use crate::catalog::Catalog;
use crate::chunk;
use crate::identity::PeerId;
use crate::index::{index_file, FileMeta};
use crate::protocol::TRANSFER_PROTOCOL;
use crate::transfer::ChunkRequest;
use crate::transport::{serve_inbound, Transport};
use crate::wire;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Write `len` random bytes to `dir/name` and index the result.
pub(crate) fn shared_file(dir: &Path, name: &str, len: usize) -> (Vec<u8>, FileMeta) {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    let path = dir.join(name);
    std::fs::write(&path, &data).unwrap();
    (data, index_file(&path).unwrap())
}

/// How a simulated remote peer behaves.
#[derive(Clone)]
pub(crate) enum Remote {
    /// Serves every protocol from its catalog.
    Honest(Arc<Catalog>),
    /// Serves chunks with the first byte flipped; other protocols are honest.
    Corrupt(Arc<Catalog>),
    /// Accepts the stream and never answers.
    Silent,
    /// Refuses to open streams.
    Unreachable,
}

pub(crate) struct MemoryNet {
    local: PeerId,
    peers: HashMap<PeerId, Remote>,
    opened: Mutex<Vec<(PeerId, &'static str)>>,
}

impl MemoryNet {
    pub(crate) fn new(local: PeerId) -> Self {
        Self {
            local,
            peers: HashMap::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_peer(mut self, id: PeerId, remote: Remote) -> Self {
        self.peers.insert(id, remote);
        self
    }

    /// Every stream open attempt so far, in order.
    pub(crate) fn opened(&self) -> Vec<(PeerId, &'static str)> {
        self.opened.lock().unwrap().clone()
    }
}

async fn serve_corrupt(catalog: &Catalog, mut stream: DuplexStream) {
    let Ok(line) = wire::read_line(&mut stream).await else { return };
    let Ok(request) = ChunkRequest::parse(&line) else { return };
    let Some(path) = catalog
        .lookup(&request.file_fingerprint)
        .and_then(|m| m.path.clone())
    else {
        return;
    };
    let Ok(mut data) = chunk::read_chunk(&path, request.chunk_index).await else { return };
    if let Some(first) = data.first_mut() {
        *first ^= 0xff;
    }
    let _ = stream.write_all(&data).await;
    let _ = stream.shutdown().await;
}

impl Transport for MemoryNet {
    type Stream = DuplexStream;

    fn local_peer_id(&self) -> PeerId {
        self.local
    }

    async fn open_stream(&self, peer: PeerId, protocol: &'static str) -> io::Result<DuplexStream> {
        self.opened.lock().unwrap().push((peer, protocol));
        let remote = self.peers.get(&peer).cloned();
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        match remote {
            None | Some(Remote::Unreachable) => {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "peer unreachable"))
            }
            Some(Remote::Corrupt(catalog)) if protocol == TRANSFER_PROTOCOL => {
                tokio::spawn(async move { serve_corrupt(&catalog, theirs).await });
            }
            Some(Remote::Honest(catalog)) | Some(Remote::Corrupt(catalog)) => {
                tokio::spawn(async move { serve_inbound(&catalog, peer, protocol, theirs).await });
            }
            Some(Remote::Silent) => {
                tokio::spawn(async move {
                    let _held = theirs;
                    std::future::pending::<()>().await
                });
            }
        }
        Ok(ours)
    }

    async fn known_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.keys().copied().collect();
        peers.sort();
        peers
    }
}
