//! Protocol identifiers and discovery messages.

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Search: query line in, JSON array out.
pub const SEARCH_PROTOCOL: &str = "/go-peerfs/search/1.0.0";
/// Chunk transfer: `<fingerprint>:<index>` in, raw chunk bytes out.
pub const TRANSFER_PROTOCOL: &str = "/go-peerfs/transfer/1.0.0";
/// Legacy whole-file transfer: `<fingerprint>` in, whole file out.
pub const FILE_TRANSFER_PROTOCOL: &str = "/go-peerfs/transfer-file/1.0.0";

/// Protocols a node answers on.
pub const SUPPORTED_PROTOCOLS: [&str; 3] =
    [SEARCH_PROTOCOL, TRANSFER_PROTOCOL, FILE_TRANSFER_PROTOCOL];

/// Discovery protocol version. Beacons with another version are ignored.
pub const PROTOCOL_VERSION: u8 = 1;

/// LAN discovery messages. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Periodic multicast announcement with the port streams are accepted on.
    Beacon {
        protocol_version: u8,
        peer_id: PeerId,
        listen_port: u16,
    },
    /// Unicast answer to a beacon.
    DiscoveryResponse {
        protocol_version: u8,
        peer_id: PeerId,
        listen_port: u16,
    },
    /// Graceful shutdown.
    Leave { peer_id: PeerId },
}
