//! Group invites: QR payloads and short codes.
//!
//! An invite carries everything a new device needs to join a group: the
//! group secret and the relay list, plus the Argon2id salt when the group
//! was created from a passphrase. It never travels over a relay; it is
//! shown on one screen and scanned (or typed) on another.
//!
//! - **QR payload**: `base64url(msgpack(record) || sha256(msgpack)[..4])`.
//!   The trailing checksum catches truncated or mistyped payloads before
//!   msgpack ever sees them.
//! - **Short code**: `XXXX-XXXX-XXXX-XXXX`, 80 bits of keyed BLAKE3 over the
//!   secret and relay list in Crockford base32. It is a reference to the
//!   invite (lookup half + check half), not an encoding of the secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sync_types::GroupId;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

use crate::config::{normalize_relays, ConfigError};
use crate::derive::GroupSecret;

/// Current invite format version.
pub const INVITE_VERSION: u32 = 3;

/// Length of a formatted short code, hyphens included.
pub const SHORT_CODE_LEN: usize = 19;

const CHECKSUM_LEN: usize = 4;
const SHORT_CODE_BYTES: usize = 10;
const SHORT_CODE_CHARS: usize = 16;
const SHORT_CODE_CONTEXT: &str = "sealsync invite short code v3";

/// Crockford base32: no I, L, O or U.
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Errors creating an invite.
#[derive(Debug, Error)]
pub enum InviteError {
    /// The relay list was rejected.
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    /// msgpack encoding failed.
    #[error("failed to encode invite: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Errors decoding an invite payload or parsing a short code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not URL-safe base64.
    #[error("invite payload is not valid base64: {0}")]
    InvalidBase64(String),

    /// Too short to hold a record and checksum.
    #[error("invite payload is truncated")]
    Truncated,

    /// Checksum does not match the record.
    #[error("invite checksum mismatch (corrupted or truncated payload)")]
    ChecksumMismatch,

    /// The record is not valid msgpack for an invite.
    #[error("invite record is malformed: {0}")]
    InvalidEncoding(String),

    /// Version other than [`INVITE_VERSION`].
    #[error("unsupported invite version: {0}")]
    UnsupportedVersion(u32),

    /// Secret of the wrong length.
    #[error("invite secret must be 32 bytes, got {0}")]
    InvalidSecretLength(usize),

    /// The invite lists no relays.
    #[error("invite has no relay addresses")]
    NoRelays,

    /// The invite's expiry time has passed.
    #[error("invite has expired")]
    Expired,

    /// A typed short code is malformed.
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
}

/// Serialized form inside the QR payload.
#[derive(Serialize, Deserialize)]
struct InviteRecord {
    v: u32,
    relays: Vec<String>,
    secret: Vec<u8>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<Vec<u8>>,
}

impl Drop for InviteRecord {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// An invite to join a sync group.
#[derive(Clone)]
pub struct SyncInvite {
    version: u32,
    relay_addresses: Vec<String>,
    group_secret: GroupSecret,
    expires_at: Option<u64>,
    salt: Option<Vec<u8>>,
    qr_payload: String,
    short_code: ShortCode,
}

impl SyncInvite {
    /// Create an invite that never expires.
    pub fn create<I, S>(secret: &GroupSecret, relay_addresses: I) -> Result<Self, InviteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(secret, relay_addresses, None)
    }

    /// Create an invite that stops decoding `ttl` from now.
    pub fn create_with_ttl<I, S>(
        secret: &GroupSecret,
        relay_addresses: I,
        ttl: Duration,
    ) -> Result<Self, InviteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let expires_at = unix_now().saturating_add(ttl.as_secs());
        Self::build(secret, relay_addresses, Some(expires_at))
    }

    fn build<I, S>(
        secret: &GroupSecret,
        relay_addresses: I,
        expires_at: Option<u64>,
    ) -> Result<Self, InviteError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let relay_addresses = normalize_relays(relay_addresses)?;

        let mut invite = Self {
            version: INVITE_VERSION,
            short_code: ShortCode::derive(secret, &relay_addresses),
            relay_addresses,
            group_secret: secret.clone(),
            expires_at,
            salt: None,
            qr_payload: String::new(),
        };
        invite.qr_payload = encode_payload(&invite.record())?;
        Ok(invite)
    }

    /// Carry the Argon2id salt of a passphrase group, so the joining device
    /// can also derive the secret from the passphrase later.
    pub fn with_salt(mut self, salt: &[u8]) -> Result<Self, InviteError> {
        self.salt = Some(salt.to_vec());
        self.qr_payload = encode_payload(&self.record())?;
        Ok(self)
    }

    fn record(&self) -> InviteRecord {
        InviteRecord {
            v: self.version,
            relays: self.relay_addresses.clone(),
            secret: self.group_secret.as_bytes().to_vec(),
            exp: self.expires_at,
            salt: self.salt.clone(),
        }
    }

    /// Decode a QR payload, checking expiry against the current time.
    pub fn from_qr_payload(payload: &str) -> Result<Self, DecodeError> {
        Self::decode_at(payload, unix_now())
    }

    /// Decode a QR payload, checking expiry against `now` (unix seconds).
    pub fn decode_at(payload: &str, now: u64) -> Result<Self, DecodeError> {
        let payload = payload.trim();
        let raw = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(payload)
                .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?,
        );

        if raw.len() <= CHECKSUM_LEN {
            return Err(DecodeError::Truncated);
        }
        let (body, checksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
        if Sha256::digest(body)[..CHECKSUM_LEN] != *checksum {
            return Err(DecodeError::ChecksumMismatch);
        }

        let mut record: InviteRecord = rmp_serde::from_slice(body)
            .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

        if record.v != INVITE_VERSION {
            return Err(DecodeError::UnsupportedVersion(record.v));
        }
        let group_secret = GroupSecret::from_slice(&record.secret)
            .ok_or(DecodeError::InvalidSecretLength(record.secret.len()))?;
        if record.relays.is_empty() {
            return Err(DecodeError::NoRelays);
        }
        let relay_addresses = normalize_relays(std::mem::take(&mut record.relays))
            .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;
        if let Some(exp) = record.exp {
            if now >= exp {
                return Err(DecodeError::Expired);
            }
        }

        Ok(Self {
            version: record.v,
            short_code: ShortCode::derive(&group_secret, &relay_addresses),
            relay_addresses,
            group_secret,
            expires_at: record.exp,
            salt: record.salt.take(),
            qr_payload: payload.to_string(),
        })
    }

    /// Format version (always [`INVITE_VERSION`]).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Relay addresses, in preference order.
    pub fn relay_addresses(&self) -> &[String] {
        &self.relay_addresses
    }

    /// The group secret this invite grants.
    pub fn group_secret(&self) -> &GroupSecret {
        &self.group_secret
    }

    /// Group identifier for the invited group.
    pub fn group_id(&self) -> GroupId {
        self.group_secret.group_id()
    }

    /// Expiry as unix seconds, if the invite has one.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Argon2id salt, for invites to passphrase groups.
    pub fn salt(&self) -> Option<&[u8]> {
        self.salt.as_deref()
    }

    /// Opaque payload for embedding in a QR code.
    pub fn qr_payload(&self) -> &str {
        &self.qr_payload
    }

    /// Human-typable short code.
    pub fn short_code(&self) -> &ShortCode {
        &self.short_code
    }

    /// Does a typed short code refer to this invite?
    pub fn matches_short_code(&self, code: &ShortCode) -> bool {
        self.short_code == *code
    }
}

/// Decode an invite from its QR payload.
pub fn invite_from_qr(payload: &str) -> Result<SyncInvite, DecodeError> {
    SyncInvite::from_qr_payload(payload)
}

impl fmt::Debug for SyncInvite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInvite")
            .field("version", &self.version)
            .field("relay_addresses", &self.relay_addresses)
            .field("group_secret", &self.group_secret)
            .field("expires_at", &self.expires_at)
            .field("salt", &self.salt)
            .field("qr_payload", &"[REDACTED]")
            .field("short_code", &self.short_code)
            .finish()
    }
}

/// A short code in canonical `XXXX-XXXX-XXXX-XXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShortCode(String);

impl ShortCode {
    fn derive(secret: &GroupSecret, relay_addresses: &[String]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(SHORT_CODE_CONTEXT);
        hasher.update(secret.as_bytes());
        for relay in relay_addresses {
            hasher.update(&(relay.len() as u64).to_le_bytes());
            hasher.update(relay.as_bytes());
        }
        let digest = hasher.finalize();
        Self::format(&crockford_encode(&digest.as_bytes()[..SHORT_CODE_BYTES]))
    }

    /// Parse user input.
    ///
    /// Case, spaces and hyphens are ignored. The commonly confused letters
    /// O, I and L are read as 0, 1 and 1.
    pub fn parse(input: &str) -> Result<Self, DecodeError> {
        let mut clean = String::with_capacity(SHORT_CODE_CHARS);
        for c in input.chars().filter(|c| *c != '-' && !c.is_whitespace()) {
            let c = match c.to_ascii_uppercase() {
                'O' => '0',
                'I' | 'L' => '1',
                other => other,
            };
            if !c.is_ascii() || !CROCKFORD.contains(&(c as u8)) {
                return Err(DecodeError::InvalidShortCode(format!(
                    "invalid character {:?}",
                    c
                )));
            }
            clean.push(c);
        }

        if clean.len() != SHORT_CODE_CHARS {
            return Err(DecodeError::InvalidShortCode(format!(
                "expected {} characters, got {}",
                SHORT_CODE_CHARS,
                clean.len()
            )));
        }
        Ok(Self::format(&clean))
    }

    /// The canonical 19-character form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into the lookup half and the check half (8 characters each,
    /// no hyphens).
    pub fn split(&self) -> (String, String) {
        let clean: String = self.0.chars().filter(|c| *c != '-').collect();
        let (lookup, check) = clean.split_at(SHORT_CODE_CHARS / 2);
        (lookup.to_string(), check.to_string())
    }

    fn format(clean: &str) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            &clean[0..4],
            &clean[4..8],
            &clean[8..12],
            &clean[12..16]
        ))
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ShortCode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn encode_payload(record: &InviteRecord) -> Result<String, InviteError> {
    let mut bytes = Zeroizing::new(rmp_serde::to_vec_named(record)?);
    let checksum = Sha256::digest(&bytes[..]);
    bytes.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    Ok(URL_SAFE_NO_PAD.encode(&bytes[..]))
}

/// Crockford base32, uppercase, no padding.
fn crockford_encode(bytes: &[u8]) -> String {
    let mut result = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut bits = 0u32;
    let mut bit_count = 0;

    for &byte in bytes {
        bits = (bits << 8) | u32::from(byte);
        bit_count += 8;
        while bit_count >= 5 {
            bit_count -= 5;
            result.push(CROCKFORD[((bits >> bit_count) & 0x1F) as usize] as char);
        }
    }
    if bit_count > 0 {
        result.push(CROCKFORD[((bits << (5 - bit_count)) & 0x1F) as usize] as char);
    }

    result
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> GroupSecret {
        GroupSecret::from_bytes([0x42; 32])
    }

    fn relays() -> Vec<&'static str> {
        vec!["relay-a.example", "relay-b.example"]
    }

    #[test]
    fn invite_has_expected_shape() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();

        assert_eq!(invite.version(), 3);
        assert_eq!(invite.relay_addresses(), relays().as_slice());
        assert_eq!(invite.group_secret().as_bytes().len(), 32);
        assert!(!invite.qr_payload().is_empty());
        assert!(invite.expires_at().is_none());
        assert_eq!(invite.group_id(), secret().group_id());
    }

    #[test]
    fn short_code_format() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let code = invite.short_code().as_str();

        assert_eq!(code.len(), SHORT_CODE_LEN);
        for (i, c) in code.chars().enumerate() {
            if i % 5 == 4 {
                assert_eq!(c, '-');
            } else {
                assert!(CROCKFORD.contains(&(c as u8)), "unexpected {:?} in {}", c, code);
            }
        }
    }

    #[test]
    fn qr_roundtrip_preserves_everything() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let decoded = invite_from_qr(invite.qr_payload()).unwrap();

        assert_eq!(decoded.group_secret(), invite.group_secret());
        assert_eq!(decoded.version(), invite.version());
        assert_eq!(decoded.relay_addresses(), invite.relay_addresses());
        assert_eq!(decoded.short_code(), invite.short_code());
        assert!(decoded.matches_short_code(invite.short_code()));
    }

    #[test]
    fn roundtrip_holds_for_generated_secrets() {
        for _ in 0..8 {
            let secret = GroupSecret::generate().unwrap();
            let invite = SyncInvite::create(&secret, ["relay"]).unwrap();
            let decoded = invite_from_qr(invite.qr_payload()).unwrap();
            assert_eq!(decoded.group_secret(), &secret);
        }
    }

    #[test]
    fn empty_relay_list_is_rejected() {
        let err = SyncInvite::create(&secret(), Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, InviteError::Invalid(ConfigError::EmptyRelayList)));
    }

    #[test]
    fn relays_are_normalized() {
        let invite = SyncInvite::create(&secret(), [" a ", "b", "a"]).unwrap();
        assert_eq!(invite.relay_addresses(), ["a", "b"]);
    }

    #[test]
    fn short_code_is_deterministic_and_relay_bound() {
        let a = SyncInvite::create(&secret(), ["relay-a"]).unwrap();
        let b = SyncInvite::create(&secret(), ["relay-a"]).unwrap();
        let c = SyncInvite::create(&secret(), ["relay-b"]).unwrap();
        let d = SyncInvite::create(&GroupSecret::from_bytes([7; 32]), ["relay-a"]).unwrap();

        assert_eq!(a.short_code(), b.short_code());
        assert_ne!(a.short_code(), c.short_code());
        assert_ne!(a.short_code(), d.short_code());
    }

    #[test]
    fn short_code_does_not_expose_secret_prefix() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let (lookup, _) = invite.short_code().split();
        assert_ne!(lookup, crockford_encode(&secret().as_bytes()[..5]));
    }

    #[test]
    fn expired_invite_is_rejected() {
        let invite = SyncInvite::create_with_ttl(&secret(), relays(), Duration::from_secs(60)).unwrap();
        let exp = invite.expires_at().unwrap();

        assert!(SyncInvite::decode_at(invite.qr_payload(), exp - 1).is_ok());
        assert_eq!(
            SyncInvite::decode_at(invite.qr_payload(), exp).unwrap_err(),
            DecodeError::Expired
        );
    }

    #[test]
    fn zero_ttl_invite_expires_immediately() {
        let invite = SyncInvite::create_with_ttl(&secret(), relays(), Duration::ZERO).unwrap();
        assert_eq!(
            invite_from_qr(invite.qr_payload()).unwrap_err(),
            DecodeError::Expired
        );
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert!(matches!(
            invite_from_qr("not-valid-base64!!!"),
            Err(DecodeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn tiny_payload_is_truncated() {
        let payload = URL_SAFE_NO_PAD.encode([1u8, 2, 3]);
        assert_eq!(invite_from_qr(&payload).unwrap_err(), DecodeError::Truncated);
    }

    #[test]
    fn truncated_payload_fails_checksum() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let payload = invite.qr_payload();
        let cut = &payload[..payload.len() - 6];
        assert!(invite_from_qr(cut).is_err());
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(invite.qr_payload()).unwrap();
        raw[3] ^= 0x01;
        let payload = URL_SAFE_NO_PAD.encode(&raw);
        assert_eq!(
            invite_from_qr(&payload).unwrap_err(),
            DecodeError::ChecksumMismatch
        );
    }

    fn payload_for(record: &InviteRecord) -> String {
        encode_payload(record).unwrap()
    }

    #[test]
    fn non_msgpack_body_is_rejected() {
        let mut raw = b"not msgpack at all".to_vec();
        let checksum = Sha256::digest(&raw);
        raw.extend_from_slice(&checksum[..CHECKSUM_LEN]);
        let payload = URL_SAFE_NO_PAD.encode(&raw);
        assert!(matches!(
            invite_from_qr(&payload),
            Err(DecodeError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let payload = payload_for(&InviteRecord {
            v: 2,
            relays: vec!["relay".into()],
            secret: vec![0; 32],
            exp: None,
            salt: None,
        });
        assert_eq!(
            invite_from_qr(&payload).unwrap_err(),
            DecodeError::UnsupportedVersion(2)
        );
    }

    #[test]
    fn wrong_secret_length_is_rejected() {
        let payload = payload_for(&InviteRecord {
            v: INVITE_VERSION,
            relays: vec!["relay".into()],
            secret: vec![0; 16],
            exp: None,
            salt: None,
        });
        assert_eq!(
            invite_from_qr(&payload).unwrap_err(),
            DecodeError::InvalidSecretLength(16)
        );
    }

    #[test]
    fn missing_relays_are_rejected() {
        let payload = payload_for(&InviteRecord {
            v: INVITE_VERSION,
            relays: Vec::new(),
            secret: vec![0; 32],
            exp: None,
            salt: None,
        });
        assert_eq!(invite_from_qr(&payload).unwrap_err(), DecodeError::NoRelays);
    }

    #[test]
    fn salt_travels_with_the_invite() {
        let invite = SyncInvite::create(&secret(), relays())
            .unwrap()
            .with_salt(b"group-salt")
            .unwrap();
        assert_eq!(invite.salt(), Some(&b"group-salt"[..]));

        let decoded = invite_from_qr(invite.qr_payload()).unwrap();
        assert_eq!(decoded.salt(), Some(&b"group-salt"[..]));
        assert_eq!(decoded.group_secret(), invite.group_secret());
        assert_eq!(decoded.short_code(), invite.short_code());
    }

    #[test]
    fn invite_without_salt_decodes_to_none() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        assert!(invite.salt().is_none());
        assert!(invite_from_qr(invite.qr_payload()).unwrap().salt().is_none());
    }

    #[test]
    fn payload_surrounding_whitespace_is_ignored() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let padded = format!("  {}\n", invite.qr_payload());
        assert!(invite_from_qr(&padded).is_ok());
    }

    #[test]
    fn short_code_parse_normalizes_input() {
        let parsed = ShortCode::parse("abcd efgh-jkmn-pqrs").unwrap();
        assert_eq!(parsed.as_str(), "ABCD-EFGH-JKMN-PQRS");

        let confusable = ShortCode::parse("OIL0-0000-0000-0000").unwrap();
        assert_eq!(confusable.as_str(), "0110-0000-0000-0000");
    }

    #[test]
    fn short_code_parse_accepts_generated_codes() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let typed = invite.short_code().as_str().to_lowercase().replace('-', "");
        let parsed: ShortCode = typed.parse().unwrap();
        assert!(invite.matches_short_code(&parsed));
    }

    #[test]
    fn short_code_parse_rejects_bad_input() {
        assert!(matches!(
            ShortCode::parse("ABCD-EFGH"),
            Err(DecodeError::InvalidShortCode(_))
        ));
        assert!(matches!(
            ShortCode::parse("ABCD-EFGH-JKMN-PQRU"),
            Err(DecodeError::InvalidShortCode(_))
        ));
        assert!(matches!(
            ShortCode::parse("ABCD-EFGH-JKMN-PQR*"),
            Err(DecodeError::InvalidShortCode(_))
        ));
    }

    #[test]
    fn short_code_splits_into_halves() {
        let code = ShortCode::parse("ABCD-EFGH-JKMN-PQRS").unwrap();
        let (lookup, check) = code.split();
        assert_eq!(lookup, "ABCDEFGH");
        assert_eq!(check, "JKMNPQRS");
    }

    #[test]
    fn crockford_encoding_matches_reference() {
        assert_eq!(crockford_encode(b""), "");
        assert_eq!(crockford_encode(b"f"), "CR");
        assert_eq!(crockford_encode(b"foobar"), "CSQPYRK1E8");
        assert_eq!(crockford_encode(&[0u8; 10]), "0000000000000000");
    }

    #[test]
    fn debug_redacts_secret_and_payload() {
        let invite = SyncInvite::create(&secret(), relays()).unwrap();
        let debug = format!("{:?}", invite);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(invite.qr_payload()));
    }
}
