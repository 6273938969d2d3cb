//! Identity and ordering types for sealsync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain separator for group id derivation.
const GROUP_ID_DOMAIN: &[u8] = b"sealsync-group-id-v1";

/// Public identifier of a sync group.
///
/// Derived one-way from the group secret, so relays can address a group
/// without learning anything about the key that protects it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId([u8; 32]);

impl GroupId {
    /// Derive the group id for a secret.
    ///
    /// `SHA-256("sealsync-group-id-v1" || secret)`.
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(GROUP_ID_DOMAIN);
        hasher.update(secret);
        Self(hasher.finalize().into())
    }

    /// Rebuild a GroupId from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(bytes).ok().map(Self)
    }

    /// Raw bytes of this GroupId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", &self.to_string()[..8])
    }
}

/// Identifier of a single pushed blob (UUID v4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(uuid::Uuid);

impl BlobId {
    /// Create a new random BlobId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Rebuild a BlobId from its 16 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        uuid::Uuid::from_slice(bytes).ok().map(Self)
    }

    /// Raw bytes of this BlobId.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for BlobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

/// Position in a group's blob sequence.
///
/// Assigned by the relay and strictly increasing per group. `Cursor(0)`
/// means "nothing seen yet"; the first stored blob gets cursor 1.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Cursor(u64);

impl Cursor {
    /// Wrap a raw cursor value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The cursor before any blob.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The following cursor, saturating at `u64::MAX`.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_is_deterministic() {
        let a = GroupId::from_secret(&[7u8; 32]);
        let b = GroupId::from_secret(&[7u8; 32]);
        assert_eq!(a, b);
    }

    #[test]
    fn group_id_differs_per_secret() {
        assert_ne!(
            GroupId::from_secret(&[1u8; 32]),
            GroupId::from_secret(&[2u8; 32])
        );
    }

    #[test]
    fn group_id_does_not_echo_secret() {
        let secret = [0x42u8; 32];
        let id = GroupId::from_secret(&secret);
        assert_ne!(id.as_bytes(), &secret);
    }

    #[test]
    fn group_id_display_is_base64() {
        let id = GroupId::from_secret(b"anything");
        // 32 bytes = 43 base64 chars (URL-safe, no padding)
        assert_eq!(id.to_string().len(), 43);
    }

    #[test]
    fn group_id_from_wrong_length_fails() {
        assert!(GroupId::from_bytes(&[0u8; 31]).is_none());
        assert!(GroupId::from_bytes(&[0u8; 33]).is_none());
        assert!(GroupId::from_bytes(&[0u8; 32]).is_some());
    }

    #[test]
    fn blob_id_is_uuid_v4() {
        let id = BlobId::new();
        assert_eq!(id.as_bytes().len(), 16);
        assert_eq!(id.as_uuid().get_version_num(), 4);
        assert_eq!(BlobId::from_bytes(id.as_bytes()), Some(id));
    }

    #[test]
    fn cursor_orders_and_saturates() {
        assert!(Cursor::new(1) < Cursor::new(2));
        assert_eq!(Cursor::new(9).next(), Cursor::new(10));
        assert_eq!(Cursor::new(u64::MAX).next().value(), u64::MAX);
        assert_eq!(Cursor::default(), Cursor::zero());
    }
}
