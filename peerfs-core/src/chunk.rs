//! Chunk codec: fixed-size split of a byte stream, chunk offsets, local chunk reads.

use std::io::{self, Read};
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Chunk size in bytes. All peers must agree on it; changing it changes every fingerprint.
pub const CHUNK_SIZE: u64 = 256 * 1024; // 256 KiB

/// Position of a chunk within a file.
pub type ChunkIndex = usize;

/// Number of chunks for a file of `total_len` bytes. Zero for an empty file.
pub fn chunk_count(total_len: u64, chunk_size: u64) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    total_len.div_ceil(chunk_size) as usize
}

/// Byte offset of chunk `index`.
pub fn chunk_offset(index: ChunkIndex) -> u64 {
    index as u64 * CHUNK_SIZE
}

/// Iterator over consecutive blocks of a reader. Each block is exactly `chunk_size`
/// bytes except the last, which is shorter and never padded.
pub struct Chunks<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

/// Split `reader` into chunks of `chunk_size` bytes.
pub fn chunks<R: Read>(reader: R, chunk_size: usize) -> Chunks<R> {
    Chunks {
        reader,
        chunk_size,
        done: chunk_size == 0,
    }
}

impl<R: Read> Chunks<R> {
    /// Fill one block, tolerating short reads. Returns the number of bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = vec![0u8; self.chunk_size];
        match self.fill(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < self.chunk_size {
                    self.done = true;
                    buf.truncate(n);
                }
                Some(Ok(buf))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Read chunk `index` of the file at `path`: at most `CHUNK_SIZE` bytes from its offset.
/// Past the end of the file this yields an empty buffer.
pub async fn read_chunk(path: &Path, index: ChunkIndex) -> io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(chunk_offset(index))).await?;
    let mut buf = Vec::with_capacity(CHUNK_SIZE as usize);
    file.take(CHUNK_SIZE).read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut v = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut v);
        v
    }

    #[test]
    fn count_chunks() {
        assert_eq!(chunk_count(100, 30), 4);
        assert_eq!(chunk_count(90, 30), 3);
        assert_eq!(chunk_count(10, 100), 1);
        assert_eq!(chunk_count(0, 30), 0);
        assert_eq!(chunk_count(CHUNK_SIZE * 2, CHUNK_SIZE), 2);
    }

    #[test]
    fn split_concatenates_to_input() {
        for len in [0usize, 1, 29, 30, 31, 100, 1000] {
            let data = random_bytes(len);
            let parts: Vec<Vec<u8>> = chunks(&data[..], 30).collect::<io::Result<_>>().unwrap();
            assert_eq!(parts.len(), chunk_count(len as u64, 30), "len {len}");
            assert_eq!(parts.concat(), data);
            if let Some((last, rest)) = parts.split_last() {
                assert!(rest.iter().all(|c| c.len() == 30));
                assert!(!last.is_empty() && last.len() <= 30);
            }
        }
    }

    /// Reader that returns at most 7 bytes per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(7).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn short_reads_do_not_shrink_chunks() {
        let data = random_bytes(100);
        let parts: Vec<Vec<u8>> = chunks(Trickle(&data), 30)
            .collect::<io::Result<_>>()
            .unwrap();
        let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![30, 30, 30, 10]);
        assert_eq!(parts.concat(), data);
    }

    #[tokio::test]
    async fn read_chunk_at_offsets() {
        let data = random_bytes(CHUNK_SIZE as usize * 2 + 17);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, &data).unwrap();

        let c0 = read_chunk(&path, 0).await.unwrap();
        let c2 = read_chunk(&path, 2).await.unwrap();
        let past = read_chunk(&path, 3).await.unwrap();
        assert_eq!(c0, &data[..CHUNK_SIZE as usize]);
        assert_eq!(c2, &data[CHUNK_SIZE as usize * 2..]);
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn read_chunk_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_chunk(&dir.path().join("nope"), 0).await.is_err());
    }
}
