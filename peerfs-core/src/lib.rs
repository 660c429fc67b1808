//! PeerFS core: content-addressed chunking, the search and transfer protocols, and the
//! multi-source download engine. Generic over the peer transport; opens no sockets itself.

pub mod catalog;
pub mod chunk;
pub mod download;
pub mod identity;
pub mod index;
pub mod integrity;
pub mod node;
pub mod protocol;
pub mod scheduler;
pub mod search;
pub mod transfer;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod testing;

pub use catalog::Catalog;
pub use chunk::{ChunkIndex, CHUNK_SIZE};
pub use download::{ChunkFailure, DownloadError, DownloadReport, Downloader};
pub use identity::{PeerId, PeerIdParseError};
pub use index::{index_directory, index_file, FileMeta, IndexError};
pub use node::{Node, NodeError};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use search::SearchResult;
pub use transport::Transport;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
