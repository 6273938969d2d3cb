//! Records exchanged with a relay transport.
//!
//! These describe what crosses the client/relay boundary, not how it is
//! framed on the wire. Everything except the group id and cursors is
//! ciphertext the relay cannot read.

use serde::{Deserialize, Serialize};

use crate::{BlobId, Cursor, GroupId};

/// Greeting sent when opening a link to a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Group the device wants to sync with.
    pub group_id: GroupId,
    /// Human-readable device name, if configured.
    pub device_name: Option<String>,
    /// Highest cursor the device has already seen.
    pub last_cursor: Cursor,
}

/// An encrypted blob on its way to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundBlob {
    /// Client-chosen blob identifier.
    pub blob_id: BlobId,
    /// Sealed payload (opaque to relay).
    pub payload: Vec<u8>,
    /// Seconds the relay should keep the blob; 0 = relay default.
    pub ttl: u32,
}

/// Relay acknowledgement of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// The blob that was stored.
    pub blob_id: BlobId,
    /// Cursor the relay assigned to it.
    pub cursor: Cursor,
}

/// A stored blob returned by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayBlob {
    /// The blob identifier.
    pub blob_id: BlobId,
    /// Relay-assigned cursor.
    pub cursor: Cursor,
    /// Sealed payload.
    pub payload: Vec<u8>,
    /// Unix timestamp (seconds) when the relay stored it.
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_survives_msgpack() {
        let hello = Hello {
            group_id: GroupId::from_secret(&[3u8; 32]),
            device_name: Some("laptop".into()),
            last_cursor: Cursor::new(12),
        };
        let bytes = rmp_serde::to_vec(&hello).unwrap();
        let back: Hello = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(hello, back);
    }

    #[test]
    fn relay_blob_keeps_cursor_and_payload() {
        let blob = RelayBlob {
            blob_id: BlobId::new(),
            cursor: Cursor::new(5),
            payload: vec![1, 2, 3],
            timestamp: 1_705_000_000,
        };
        let bytes = rmp_serde::to_vec(&blob).unwrap();
        let back: RelayBlob = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back.cursor, Cursor::new(5));
        assert_eq!(back.payload, vec![1, 2, 3]);
    }
}
