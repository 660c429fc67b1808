//! Peer identity: opaque 16-byte id assigned at node start, used only as a map key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a peer id in bytes.
pub const PEER_ID_LEN: usize = 16;

/// Peer id. Textual form is 32 lowercase hex characters, which is also its serde form.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        PeerId(uuid::Uuid::new_v4().into_bytes())
    }

    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        PeerId(bytes)
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerIdParseError {
    #[error("peer id must be {expected} hex characters, got {got}")]
    Length { expected: usize, got: usize },
    #[error("peer id is not valid hex")]
    Hex,
}

impl FromStr for PeerId {
    type Err = PeerIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != PEER_ID_LEN * 2 {
            return Err(PeerIdParseError::Length {
                expected: PEER_ID_LEN * 2,
                got: s.len(),
            });
        }
        let mut out = [0u8; PEER_ID_LEN];
        hex::decode_to_slice(s, &mut out).map_err(|_| PeerIdParseError::Hex)?;
        Ok(PeerId(out))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_parse_roundtrip() {
        let id = PeerId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<PeerId>().unwrap(), id);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(PeerId::generate(), PeerId::generate());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            "abcd".parse::<PeerId>(),
            Err(PeerIdParseError::Length {
                expected: 32,
                got: 4
            })
        );
        let not_hex = "zz".repeat(16);
        assert_eq!(not_hex.parse::<PeerId>(), Err(PeerIdParseError::Hex));
    }

    #[test]
    fn serde_uses_hex_string() {
        let id = PeerId::from_bytes([0xab; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
