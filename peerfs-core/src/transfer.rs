//! Transfer protocol: one chunk per stream. Request line `<fingerprint>:<index>`, response is the
//! raw chunk bytes terminated by stream close. A legacy whole-file variant lives alongside.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use crate::catalog::Catalog;
use crate::chunk::{self, ChunkIndex, CHUNK_SIZE};
use crate::identity::PeerId;
use crate::index::FileMeta;
use crate::integrity::FileHasher;
use crate::protocol::{FILE_TRANSFER_PROTOCOL, TRANSFER_PROTOCOL};
use crate::transport::Transport;
use crate::wire::{self, LineError};

/// Default deadline for one chunk request, stream open included.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

/// A request for one chunk of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub file_fingerprint: String,
    pub chunk_index: ChunkIndex,
}

impl ChunkRequest {
    pub fn new(file_fingerprint: impl Into<String>, chunk_index: ChunkIndex) -> Self {
        Self {
            file_fingerprint: file_fingerprint.into(),
            chunk_index,
        }
    }

    /// Wire form, terminator included.
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.file_fingerprint, self.chunk_index)
    }

    /// Parse a request line (terminator already stripped).
    pub fn parse(line: &str) -> Result<Self, TransferError> {
        let malformed = || TransferError::MalformedRequest(line.to_string());
        let mut parts = line.trim().split(':');
        let (Some(fp), Some(index), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        if fp.is_empty() {
            return Err(malformed());
        }
        let chunk_index = index.parse::<ChunkIndex>().map_err(|_| malformed())?;
        Ok(Self::new(fp, chunk_index))
    }
}

impl fmt::Display for ChunkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_fingerprint, self.chunk_index)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("malformed request {0:?}")]
    MalformedRequest(String),
    #[error("bad request line: {0}")]
    Line(#[from] LineError),
    #[error("file {0} is not in the local catalog")]
    UnknownFile(String),
    #[error("chunk {index} out of range, file has {count} chunks")]
    ChunkOutOfRange { index: ChunkIndex, count: usize },
    #[error("stream error: {0}")]
    Io(#[from] io::Error),
    #[error("peer sent no data")]
    EmptyResponse,
    #[error("peer sent more than one chunk of data")]
    OversizedResponse,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Resolve a fingerprint to a locally owned file.
fn local_file<'a>(catalog: &'a Catalog, fingerprint: &str) -> Result<&'a FileMeta, TransferError> {
    catalog
        .lookup(fingerprint)
        .filter(|m| m.path.is_some())
        .ok_or_else(|| TransferError::UnknownFile(fingerprint.to_string()))
}

/// Responder side: serve one chunk. Any failure closes the stream with no payload.
/// Returns the number of bytes sent.
pub async fn serve_transfer<S>(catalog: &Catalog, mut stream: S) -> Result<u64, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = wire::read_line(&mut stream).await?;
    let request = ChunkRequest::parse(&line)?;
    let meta = local_file(catalog, &request.file_fingerprint)?;
    if request.chunk_index >= meta.chunk_count() {
        return Err(TransferError::ChunkOutOfRange {
            index: request.chunk_index,
            count: meta.chunk_count(),
        });
    }
    let Some(path) = meta.path.as_deref() else {
        return Err(TransferError::UnknownFile(request.file_fingerprint));
    };
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(chunk::chunk_offset(request.chunk_index)))
        .await?;
    let sent = tokio::io::copy(&mut file.take(CHUNK_SIZE), &mut stream).await?;
    stream.shutdown().await?;
    tracing::debug!(
        fingerprint = %request.file_fingerprint,
        chunk = request.chunk_index,
        bytes = sent,
        "sent chunk"
    );
    Ok(sent)
}

/// Requester side: send the request, half-close, read the whole chunk into memory.
pub async fn request_chunk<S>(mut stream: S, request: &ChunkRequest) -> Result<Vec<u8>, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.encode().as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await?;
    let mut data = Vec::new();
    (&mut stream).take(CHUNK_SIZE + 1).read_to_end(&mut data).await?;
    if data.is_empty() {
        return Err(TransferError::EmptyResponse);
    }
    if data.len() as u64 > CHUNK_SIZE {
        return Err(TransferError::OversizedResponse);
    }
    Ok(data)
}

/// Open a transfer stream to `peer` and fetch one chunk under `timeout`. No internal retry.
pub async fn fetch_chunk<T: Transport>(
    transport: &T,
    peer: PeerId,
    request: &ChunkRequest,
    timeout: Duration,
) -> Result<Vec<u8>, TransferError> {
    let exchange = async {
        let stream = transport.open_stream(peer, TRANSFER_PROTOCOL).await?;
        Ok::<_, TransferError>(request_chunk(stream, request).await?)
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransferError::Timeout(timeout))?
}

/// Legacy responder: request line is a bare fingerprint, response is the whole file.
pub async fn serve_file<S>(catalog: &Catalog, mut stream: S) -> Result<u64, TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let fingerprint = wire::read_line(&mut stream).await?;
    let fingerprint = fingerprint.trim();
    if fingerprint.is_empty() || fingerprint.contains(':') {
        return Err(TransferError::MalformedRequest(fingerprint.to_string()));
    }
    let meta = local_file(catalog, fingerprint)?;
    let Some(path) = meta.path.as_deref() else {
        return Err(TransferError::UnknownFile(fingerprint.to_string()));
    };
    let mut file = tokio::fs::File::open(path).await?;
    let sent = tokio::io::copy(&mut file, &mut stream).await?;
    stream.shutdown().await?;
    Ok(sent)
}

/// Legacy requester: stream the whole file into `sink`, hashing as it goes.
/// Returns the byte count and the fingerprint of what was received.
pub async fn request_file<S, W>(
    mut stream: S,
    file_fingerprint: &str,
    sink: &mut W,
) -> Result<(u64, String), TransferError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    stream
        .write_all(format!("{file_fingerprint}\n").as_bytes())
        .await?;
    stream.flush().await?;
    stream.shutdown().await?;
    let mut hasher = FileHasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    sink.flush().await?;
    Ok((total, hasher.finalize()))
}

/// Open a legacy whole-file stream to `peer`.
pub async fn open_file_stream<T: Transport>(transport: &T, peer: PeerId) -> io::Result<T::Stream> {
    transport.open_stream(peer, FILE_TRANSFER_PROTOCOL).await
}
