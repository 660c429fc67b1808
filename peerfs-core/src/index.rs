//! Indexer: turn files into `FileMeta` (size, whole-file fingerprint, ordered chunk fingerprints).

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::chunk::{self, CHUNK_SIZE};
use crate::integrity::{self, FileHasher};

/// Metadata of one locally or remotely known file. Immutable once indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// Display name; not unique.
    pub name: String,
    /// Local location. Only set for files this node indexed itself; never sent over the wire.
    #[serde(skip)]
    pub path: Option<PathBuf>,
    pub size: u64,
    pub file_fingerprint: String,
    pub chunk_fingerprints: Vec<String>,
}

impl FileMeta {
    pub fn chunk_count(&self) -> usize {
        self.chunk_fingerprints.len()
    }

    /// True when the chunk list length matches `ceil(size / CHUNK_SIZE)`.
    pub fn is_consistent(&self) -> bool {
        self.chunk_fingerprints.len() == chunk::chunk_count(self.size, CHUNK_SIZE)
    }
}

/// Result of reading one stream through the chunk codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDigest {
    pub size: u64,
    pub file_fingerprint: String,
    pub chunk_fingerprints: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to index {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to walk shared directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Read `reader` to end in `chunk_size` blocks, fingerprinting each block and the whole stream.
pub fn index_reader<R: Read>(reader: R, chunk_size: usize) -> io::Result<StreamDigest> {
    let mut whole = FileHasher::new();
    let mut chunk_fingerprints = Vec::new();
    let mut size = 0u64;
    for block in chunk::chunks(reader, chunk_size) {
        let block = block?;
        chunk_fingerprints.push(integrity::fingerprint(&block));
        whole.update(&block);
        size += block.len() as u64;
    }
    Ok(StreamDigest {
        size,
        file_fingerprint: whole.finalize(),
        chunk_fingerprints,
    })
}

/// Index a single file with the global chunk size.
pub fn index_file(path: &Path) -> Result<FileMeta, IndexError> {
    let io_err = |source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let digest = index_reader(BufReader::new(file), CHUNK_SIZE as usize).map_err(io_err)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FileMeta {
        name,
        path: Some(path.to_path_buf()),
        size: digest.size,
        file_fingerprint: digest.file_fingerprint,
        chunk_fingerprints: digest.chunk_fingerprints,
    })
}

/// Recursively index every regular file under `root`. Any failure aborts the whole walk.
pub fn index_directory(root: &Path) -> Result<Vec<FileMeta>, IndexError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        // Directories, FIFOs, sockets and devices are skipped; symlinks were already resolved.
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = index_file(entry.path())?;
        tracing::debug!(
            name = %meta.name,
            fingerprint = %meta.file_fingerprint,
            chunks = meta.chunk_count(),
            "indexed file"
        );
        files.push(meta);
    }
    Ok(files)
}
