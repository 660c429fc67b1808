//! Search protocol: requester sends one query line, responder answers with a JSON array
//! of matches from its catalog and closes the stream.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::catalog::Catalog;
use crate::identity::PeerId;
use crate::index::FileMeta;
use crate::protocol::SEARCH_PROTOCOL;
use crate::transport::Transport;
use crate::wire::{self, LineError};

/// Cap on a search response body.
const MAX_RESPONSE_LEN: u64 = 16 * 1024 * 1024;

/// One search hit as sent on the wire and returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub name: String,
    pub size: u64,
    pub file_fingerprint: String,
    pub peer_id: PeerId,
}

impl SearchResult {
    pub fn from_meta(meta: &FileMeta, peer_id: PeerId) -> Self {
        Self {
            name: meta.name.clone(),
            size: meta.size,
            file_fingerprint: meta.file_fingerprint.clone(),
            peer_id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("query must be a single non-empty line")]
    InvalidQuery,
    #[error("bad query line: {0}")]
    Line(#[from] LineError),
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed search results: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("peer did not answer within {0:?}")]
    Timeout(Duration),
}

/// Responder side. Returns the number of results sent.
pub async fn serve_search<S>(catalog: &Catalog, local_id: PeerId, mut stream: S) -> Result<usize, SearchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let query = wire::read_line(&mut stream).await?;
    let results: Vec<SearchResult> = catalog
        .search(&query)
        .iter()
        .map(|m| SearchResult::from_meta(m, local_id))
        .collect();
    tracing::debug!(query = %query, results = results.len(), "search query");
    let body = serde_json::to_vec(&results)?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(results.len())
}

/// Requester side: send `query`, read the whole response, decode it.
pub async fn request_search<S>(mut stream: S, query: &str) -> Result<Vec<SearchResult>, SearchError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if query.is_empty() || query.contains(['\n', '\r']) {
        return Err(SearchError::InvalidQuery);
    }
    stream.write_all(format!("{query}\n").as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    let mut body = Vec::new();
    (&mut stream).take(MAX_RESPONSE_LEN).read_to_end(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Open a search stream to `peer` and run one query under `timeout`.
pub async fn query_peer<T: Transport>(
    transport: &T,
    peer: PeerId,
    query: &str,
    timeout: Duration,
) -> Result<Vec<SearchResult>, SearchError> {
    let exchange = async {
        let stream = transport.open_stream(peer, SEARCH_PROTOCOL).await?;
        Ok::<_, SearchError>(request_search(stream, query).await?)
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| SearchError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, fp: &str, size: u64) -> FileMeta {
        FileMeta {
            name: name.to_string(),
            path: None,
            size,
            file_fingerprint: fp.to_string(),
            chunk_fingerprints: vec![],
        }
    }

    #[tokio::test]
    async fn query_over_duplex() {
        let catalog = Catalog::new(vec![meta("Movie.mp4", "aa", 10), meta("Sample1.txt", "bb", 3)]);
        let responder_id = PeerId::generate();
        let (client, server) = tokio::io::duplex(1024);

        let serve = tokio::spawn(async move { serve_search(&catalog, responder_id, server).await });
        let results = request_search(client, "movie").await.unwrap();
        assert_eq!(serve.await.unwrap().unwrap(), 1);

        assert_eq!(
            results,
            vec![SearchResult {
                name: "Movie.mp4".into(),
                size: 10,
                file_fingerprint: "aa".into(),
                peer_id: responder_id,
            }]
        );
    }

    #[tokio::test]
    async fn wire_format_is_camel_case_json_array() {
        let catalog = Catalog::new(vec![meta("a.txt", "aa", 1)]);
        let id = PeerId::from_bytes([1; 16]);
        let (mut client, server) = tokio::io::duplex(1024);
        let serve = tokio::spawn(async move { serve_search(&catalog, id, server).await });

        client.write_all(b"a\n").await.unwrap();
        client.shutdown().await.unwrap();
        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        serve.await.unwrap().unwrap();

        let expected = format!(
            r#"[{{"name":"a.txt","size":1,"fileFingerprint":"aa","peerId":"{}"}}]"#,
            "01".repeat(16)
        );
        assert_eq!(raw, expected);
    }

    #[tokio::test]
    async fn no_matches_is_empty_array() {
        let (client, server) = tokio::io::duplex(1024);
        let serve = tokio::spawn(async move {
            serve_search(&Catalog::empty(), PeerId::generate(), server).await
        });
        assert!(request_search(client, "x").await.unwrap().is_empty());
        assert_eq!(serve.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn unterminated_query_gets_no_response() {
        let (mut client, server) = tokio::io::duplex(1024);
        let serve = tokio::spawn(async move {
            serve_search(&Catalog::empty(), PeerId::generate(), server).await
        });
        client.write_all(b"movie").await.unwrap();
        client.shutdown().await.unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        assert!(raw.is_empty());
        assert!(matches!(
            serve.await.unwrap(),
            Err(SearchError::Line(LineError::Unterminated))
        ));
    }

    #[tokio::test]
    async fn garbage_response_is_decode_error() {
        let (client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let _ = wire::read_line(&mut server).await;
            server.write_all(b"{not json").await.unwrap();
            server.shutdown().await.unwrap();
        });
        assert!(matches!(
            request_search(client, "movie").await,
            Err(SearchError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn multi_line_query_rejected_before_io() {
        let (client, _server) = tokio::io::duplex(16);
        assert!(matches!(
            request_search(client, "a\nb").await,
            Err(SearchError::InvalidQuery)
        ));
    }
}
