//! Download engine: fetch every chunk of a file from a set of providers in parallel, verify each
//! against its fingerprint, and reassemble in index order. All chunks are attempted before the
//! download is judged; nothing unverified ever reaches disk.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;

use crate::catalog::Catalog;
use crate::chunk::{self, ChunkIndex};
use crate::identity::PeerId;
use crate::index::FileMeta;
use crate::integrity;
use crate::scheduler;
use crate::transfer::{self, ChunkRequest, TransferError, DEFAULT_CHUNK_TIMEOUT};
use crate::transport::Transport;

/// Why one chunk could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkFailure {
    #[error("peer {peer} could not supply it: {reason}")]
    Unavailable { peer: PeerId, reason: String },
    #[error("data from peer {peer} failed verification (expected {expected}, got {actual})")]
    IntegrityMismatch {
        peer: PeerId,
        expected: String,
        actual: String,
    },
    #[error("file is not in the local catalog")]
    NotInLocalCatalog,
    #[error("fetch task aborted")]
    Aborted,
}

/// Settled state of one chunk slot.
pub type ChunkOutcome = Result<Vec<u8>, ChunkFailure>;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no providers given")]
    NoProviders,
    #[error("metadata for {name} lists {listed} chunks, size implies {expected}")]
    InconsistentMetadata {
        name: String,
        listed: usize,
        expected: usize,
    },
    #[error("download failed: missing chunk {first_missing} ({missing} of {total} chunks unavailable)")]
    MissingChunks {
        first_missing: ChunkIndex,
        missing: usize,
        total: usize,
        failures: Vec<(ChunkIndex, ChunkFailure)>,
    },
    #[error("whole-file transfer from {peer} failed: {source}")]
    WholeFile {
        peer: PeerId,
        #[source]
        source: TransferError,
    },
    #[error("received file does not match metadata (expected {expected}, got {actual})")]
    FileMismatch { expected: String, actual: String },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Summary of a finished download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadReport {
    pub bytes: u64,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// One chunk's fetch-and-verify unit of work.
struct ChunkJob {
    index: ChunkIndex,
    provider: PeerId,
    file_fingerprint: String,
    expected: String,
}

impl ChunkJob {
    async fn run<T: Transport>(&self, transport: &T, catalog: &Catalog, timeout: Duration) -> ChunkOutcome {
        let bytes = if self.provider == transport.local_peer_id() {
            self.read_local(catalog).await?
        } else {
            let request = ChunkRequest::new(self.file_fingerprint.clone(), self.index);
            transfer::fetch_chunk(transport, self.provider, &request, timeout)
                .await
                .map_err(|e| ChunkFailure::Unavailable {
                    peer: self.provider,
                    reason: e.to_string(),
                })?
        };
        if !integrity::verify_chunk(&bytes, &self.expected) {
            tracing::warn!(
                chunk = self.index,
                peer = %self.provider.short(),
                "chunk failed verification"
            );
            return Err(ChunkFailure::IntegrityMismatch {
                peer: self.provider,
                expected: self.expected.clone(),
                actual: integrity::fingerprint(&bytes),
            });
        }
        tracing::debug!(chunk = self.index, peer = %self.provider.short(), "chunk verified");
        Ok(bytes)
    }

    /// Local provider: read straight from disk, no stream.
    async fn read_local(&self, catalog: &Catalog) -> ChunkOutcome {
        let path = catalog
            .lookup(&self.file_fingerprint)
            .and_then(|m| m.path.as_deref())
            .ok_or(ChunkFailure::NotInLocalCatalog)?;
        chunk::read_chunk(path, self.index)
            .await
            .map_err(|e| ChunkFailure::Unavailable {
                peer: self.provider,
                reason: e.to_string(),
            })
    }
}

/// Multi-source downloader. Cheap to clone; each `download` call owns its own session state.
pub struct Downloader<T> {
    transport: Arc<T>,
    catalog: Arc<Catalog>,
    chunk_timeout: Duration,
}

impl<T> Clone for Downloader<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            catalog: self.catalog.clone(),
            chunk_timeout: self.chunk_timeout,
        }
    }
}

impl<T: Transport> Downloader<T> {
    pub fn new(transport: Arc<T>, catalog: Arc<Catalog>) -> Self {
        Self {
            transport,
            catalog,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Deadline for each chunk request, independent of sibling requests.
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Download `meta` from `providers` (round-robin by chunk index) into `destination`.
    pub async fn download(
        &self,
        meta: &FileMeta,
        providers: &[PeerId],
        destination: &Path,
    ) -> Result<DownloadReport, DownloadError> {
        if providers.is_empty() {
            return Err(DownloadError::NoProviders);
        }
        if !meta.is_consistent() {
            return Err(DownloadError::InconsistentMetadata {
                name: meta.name.clone(),
                listed: meta.chunk_count(),
                expected: chunk::chunk_count(meta.size, chunk::CHUNK_SIZE),
            });
        }
        let started = Instant::now();
        let total = meta.chunk_count();
        tracing::info!(
            name = %meta.name,
            fingerprint = %meta.file_fingerprint,
            chunks = total,
            providers = providers.len(),
            "starting download"
        );

        let assignment = scheduler::assign_chunks_to_peers(total, providers);
        let mut tasks = JoinSet::new();
        for (index, provider) in assignment.into_iter().enumerate() {
            let job = ChunkJob {
                index,
                provider,
                file_fingerprint: meta.file_fingerprint.clone(),
                expected: meta.chunk_fingerprints[index].clone(),
            };
            let transport = self.transport.clone();
            let catalog = self.catalog.clone();
            let timeout = self.chunk_timeout;
            tasks.spawn(async move {
                let outcome = job.run(transport.as_ref(), &catalog, timeout).await;
                (job.index, outcome)
            });
        }

        // One slot per chunk, each written once by the join loop below.
        let mut slots: Vec<Option<ChunkOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => tracing::warn!(error = %e, "chunk task did not complete"),
            }
        }

        let mut chunks = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (index, slot) in slots.into_iter().enumerate() {
            match slot.unwrap_or(Err(ChunkFailure::Aborted)) {
                Ok(bytes) => chunks.push(bytes),
                Err(failure) => {
                    tracing::warn!(chunk = index, reason = %failure, "chunk unavailable");
                    failures.push((index, failure));
                }
            }
        }
        if let Some(&(first_missing, _)) = failures.first() {
            return Err(DownloadError::MissingChunks {
                first_missing,
                missing: failures.len(),
                total,
                failures,
            });
        }

        let bytes = write_output(destination, &chunks)
            .await
            .map_err(|source| DownloadError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        let report = DownloadReport {
            bytes,
            chunks: total,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            name = %meta.name,
            bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "download complete"
        );
        Ok(report)
    }

    /// Fetch a whole file from one peer over the legacy whole-file protocol, verifying size and
    /// file fingerprint before the result is moved into place. No deadline applies.
    pub async fn download_whole(
        &self,
        meta: &FileMeta,
        peer: PeerId,
        destination: &Path,
    ) -> Result<DownloadReport, DownloadError> {
        let started = Instant::now();
        let io_err = |source| DownloadError::Io {
            path: destination.to_path_buf(),
            source,
        };
        let (mut file, staged) = create_staging(destination).await.map_err(io_err)?;
        let received = async {
            let stream = transfer::open_file_stream(self.transport.as_ref(), peer).await?;
            Ok::<_, TransferError>(transfer::request_file(stream, &meta.file_fingerprint, &mut file).await?)
        }
        .await;
        drop(file);

        let (bytes, actual) = match received {
            Ok(r) => r,
            Err(source) => return Err(DownloadError::WholeFile { peer, source }),
        };
        if bytes != meta.size || !actual.eq_ignore_ascii_case(&meta.file_fingerprint) {
            return Err(DownloadError::FileMismatch {
                expected: meta.file_fingerprint.clone(),
                actual,
            });
        }
        staged.persist(destination).map_err(|e| io_err(e.error))?;
        Ok(DownloadReport {
            bytes,
            chunks: meta.chunk_count(),
            elapsed: started.elapsed(),
        })
    }
}

/// Fresh staging file beside `destination`, named `.<name>.<random>.part`. Unique per session;
/// removed when the returned path is dropped without being persisted.
async fn create_staging(destination: &Path) -> io::Result<(tokio::fs::File, TempPath)> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir).await?;
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".part")
        .tempfile_in(&dir)?;
    let (file, path) = staged.into_parts();
    Ok((tokio::fs::File::from_std(file), path))
}

/// Write verified chunks in index order to a staging file, then rename it over `destination`.
async fn write_output(destination: &Path, chunks: &[Vec<u8>]) -> io::Result<u64> {
    let (mut file, staged) = create_staging(destination).await?;
    let mut total = 0u64;
    for chunk in chunks {
        file.write_all(chunk).await?;
        total += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    staged.persist(destination)?;
    Ok(total)
}
