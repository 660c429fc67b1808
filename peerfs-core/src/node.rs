//! Node coordinator: the surface the control plane drives. Owns the catalog and transport handles,
//! aggregates search across peers and runs downloads.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use crate::catalog::Catalog;
use crate::download::{DownloadError, DownloadReport, Downloader};
use crate::identity::PeerId;
use crate::index::FileMeta;
use crate::search::{self, SearchError, SearchResult};
use crate::transport::{self, Transport};

/// Default per-peer deadline for one search query.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("search query is empty")]
    EmptyQuery,
    #[error("file {0} is not shared by this node")]
    UnknownFile(String),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Download(#[from] DownloadError),
}

pub struct Node<T> {
    transport: Arc<T>,
    catalog: Arc<Catalog>,
    downloader: Downloader<T>,
    search_timeout: Duration,
}

impl<T: Transport> Node<T> {
    pub fn new(transport: Arc<T>, catalog: Arc<Catalog>) -> Self {
        let downloader = Downloader::new(transport.clone(), catalog.clone());
        Self {
            transport,
            catalog,
            downloader,
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.downloader = self.downloader.with_chunk_timeout(timeout);
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.transport.local_peer_id()
    }

    /// Metadata for a file this node shares.
    pub fn resolve_metadata(&self, file_fingerprint: &str) -> Result<FileMeta, NodeError> {
        self.catalog
            .lookup(file_fingerprint.trim())
            .cloned()
            .ok_or_else(|| NodeError::UnknownFile(file_fingerprint.to_string()))
    }

    /// Local matches plus the answers of every known peer, unordered. A peer that fails or
    /// times out is logged and left out.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, NodeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(NodeError::EmptyQuery);
        }
        if query.contains(['\n', '\r']) {
            return Err(SearchError::InvalidQuery.into());
        }
        let local_id = self.local_peer_id();
        let mut results: Vec<SearchResult> = self
            .catalog
            .search(query)
            .iter()
            .map(|m| SearchResult::from_meta(m, local_id))
            .collect();

        let mut queries = JoinSet::new();
        for peer in self.transport.known_peers().await {
            if peer == local_id {
                continue;
            }
            let transport = self.transport.clone();
            let query = query.to_string();
            let timeout = self.search_timeout;
            queries.spawn(async move {
                let answer = search::query_peer(transport.as_ref(), peer, &query, timeout).await;
                (peer, answer)
            });
        }
        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((peer, Ok(remote))) => {
                    tracing::debug!(peer = %peer.short(), results = remote.len(), "peer answered search");
                    // Results are attributed to the peer we asked, whatever it claims.
                    results.extend(remote.into_iter().map(|r| SearchResult { peer_id: peer, ..r }));
                }
                Ok((peer, Err(e))) => {
                    tracing::warn!(peer = %peer.short(), error = %e, "search query failed");
                }
                Err(e) => tracing::warn!(error = %e, "search task did not complete"),
            }
        }
        Ok(results)
    }

    pub async fn download(
        &self,
        meta: &FileMeta,
        providers: &[PeerId],
        destination: &Path,
    ) -> Result<DownloadReport, NodeError> {
        Ok(self.downloader.download(meta, providers, destination).await?)
    }

    /// Whole-file fetch from a single peer over the legacy protocol.
    pub async fn download_whole(
        &self,
        meta: &FileMeta,
        peer: PeerId,
        destination: &Path,
    ) -> Result<DownloadReport, NodeError> {
        Ok(self.downloader.download_whole(meta, peer, destination).await?)
    }

    /// Serve one inbound stream for `protocol`.
    pub async fn handle_inbound<S>(&self, protocol: &str, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        transport::serve_inbound(&self.catalog, self.local_peer_id(), protocol, stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CHUNK_SIZE;
    use crate::protocol::{SEARCH_PROTOCOL, TRANSFER_PROTOCOL};
    use crate::testing::{shared_file, MemoryNet, Remote};
    use crate::transfer::{request_chunk, ChunkRequest};

    fn meta(name: &str, fingerprint: &str) -> FileMeta {
        FileMeta {
            name: name.into(),
            path: None,
            size: 1,
            file_fingerprint: fingerprint.into(),
            chunk_fingerprints: vec!["x".into()],
        }
    }

    #[tokio::test]
    async fn search_merges_local_and_remote() {
        let local = PeerId::generate();
        let alice = PeerId::generate();
        let bob = PeerId::generate();
        let down = PeerId::generate();
        let net = MemoryNet::new(local)
            .with_peer(alice, Remote::Honest(Arc::new(Catalog::new(vec![meta("Movie.mp4", "aa")]))))
            .with_peer(bob, Remote::Honest(Arc::new(Catalog::new(vec![meta("notes.txt", "bb")]))))
            .with_peer(down, Remote::Unreachable);
        let catalog = Arc::new(Catalog::new(vec![meta("old movie.avi", "cc")]));
        let node = Node::new(Arc::new(net), catalog);

        let mut found: Vec<(String, PeerId)> = node
            .search("MOVIE")
            .await
            .unwrap()
            .into_iter()
            .map(|r| (r.name, r.peer_id))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![("Movie.mp4".to_string(), alice), ("old movie.avi".to_string(), local)]
        );
    }

    #[tokio::test]
    async fn search_skips_self_and_silent_peers() {
        let local = PeerId::generate();
        let silent = PeerId::generate();
        let net = Arc::new(
            MemoryNet::new(local)
                .with_peer(local, Remote::Honest(Arc::new(Catalog::new(vec![meta("a.txt", "aa")]))))
                .with_peer(silent, Remote::Silent),
        );
        let node = Node::new(net.clone(), Arc::new(Catalog::new(vec![meta("a.txt", "aa")])))
            .with_search_timeout(Duration::from_millis(100));
        let results = node.search("a").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].peer_id, local);
        assert_eq!(net.opened(), vec![(silent, SEARCH_PROTOCOL)]);
    }

    #[tokio::test]
    async fn search_rejects_empty_query_without_io() {
        let peer = PeerId::generate();
        let net = Arc::new(MemoryNet::new(PeerId::generate()).with_peer(peer, Remote::Unreachable));
        let node = Node::new(net.clone(), Arc::new(Catalog::empty()));
        assert!(matches!(node.search("  ").await, Err(NodeError::EmptyQuery)));
        assert!(matches!(
            node.search("a\nb").await,
            Err(NodeError::Search(SearchError::InvalidQuery))
        ));
        assert!(net.opened().is_empty());
    }

    #[tokio::test]
    async fn resolve_metadata_uses_local_catalog() {
        let node = Node::new(
            Arc::new(MemoryNet::new(PeerId::generate())),
            Arc::new(Catalog::new(vec![meta("a.txt", "aa")])),
        );
        assert_eq!(node.resolve_metadata("aa").unwrap().name, "a.txt");
        assert!(matches!(
            node.resolve_metadata("zz"),
            Err(NodeError::UnknownFile(fp)) if fp == "zz"
        ));
    }

    #[tokio::test]
    async fn handle_inbound_serves_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let (data, shared) = shared_file(dir.path(), "f.bin", CHUNK_SIZE as usize + 10);
        let node = Arc::new(Node::new(
            Arc::new(MemoryNet::new(PeerId::generate())),
            Arc::new(Catalog::new(vec![shared.clone()])),
        ));
        let (client, server) = tokio::io::duplex(64 * 1024);
        let responder = node.clone();
        tokio::spawn(async move { responder.handle_inbound(TRANSFER_PROTOCOL, server).await });
        let chunk = request_chunk(client, &ChunkRequest::new(shared.file_fingerprint, 1))
            .await
            .unwrap();
        assert_eq!(chunk, data[CHUNK_SIZE as usize..]);
    }

    #[tokio::test]
    async fn download_errors_surface_through_node() {
        let node = Node::new(Arc::new(MemoryNet::new(PeerId::generate())), Arc::new(Catalog::empty()));
        let dir = tempfile::tempdir().unwrap();
        let err = node
            .download(&meta("a.txt", "aa"), &[], &dir.path().join("a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Download(DownloadError::NoProviders)));
    }
}
