//! Group secret derivation.
//!
//! A group secret is 32 bytes of key material shared by every device in a
//! sync group. It either comes in directly (raw bytes, e.g. from an invite)
//! or is stretched from a passphrase and salt with Argon2id.
//!
//! The Argon2id parameters are fixed rather than tuned to the local device:
//! every member of a group must land on the same secret, so the cost is part
//! of the group's identity. [`KdfParams::INTERACTIVE`] is the default; groups
//! that agree on something else pass it explicitly.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sync_types::GroupId;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a group secret in bytes.
pub const SECRET_SIZE: usize = 32;

/// Size of salts produced by [`generate_salt`].
pub const SALT_SIZE: usize = 16;

/// Domain separator mixed into every caller-supplied salt.
const SALT_DOMAIN: &[u8] = b"sealsync-salt-v1";

/// Errors from secret derivation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeriveError {
    /// Argon2 rejected the cost parameters.
    #[error("invalid kdf parameters: {0}")]
    InvalidParams(String),

    /// Argon2 failed while hashing.
    #[error("key derivation failed: {0}")]
    Failed(String),

    /// The OS random source failed.
    #[error("entropy unavailable: {0}")]
    Entropy(String),
}

/// Argon2id cost parameters.
///
/// Only constructible through [`KdfParams::new`] (or the constants), so a
/// value of this type is always accepted by Argon2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "KdfSpec")]
pub struct KdfParams {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl KdfParams {
    /// Default cost: 19 MiB, 2 passes, 1 lane.
    pub const INTERACTIVE: Self = Self {
        memory_kib: 19 * 1024,
        iterations: 2,
        parallelism: 1,
    };

    /// Validate custom cost parameters.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, DeriveError> {
        let params = Self {
            memory_kib,
            iterations,
            parallelism,
        };
        params.to_argon2_params()?;
        Ok(params)
    }

    /// Memory cost in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Number of passes.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Number of lanes.
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    fn to_argon2_params(self) -> Result<Params, DeriveError> {
        Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(SECRET_SIZE),
        )
        .map_err(|e| DeriveError::InvalidParams(e.to_string()))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

/// Unvalidated `[kdf]` table as it appears in config files.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KdfSpec {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl TryFrom<KdfSpec> for KdfParams {
    type Error = DeriveError;

    fn try_from(spec: KdfSpec) -> Result<Self, Self::Error> {
        Self::new(spec.memory_kib, spec.iterations, spec.parallelism)
    }
}

/// The 32-byte symmetric secret shared by all devices in a group.
///
/// Zeroed on drop; `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct GroupSecret([u8; SECRET_SIZE]);

impl GroupSecret {
    /// Wrap raw key material.
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Wrap a slice, which must be exactly [`SECRET_SIZE`] bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; SECRET_SIZE]>::try_from(bytes).ok().map(Self)
    }

    /// Generate a fresh random secret for a new group.
    pub fn generate() -> Result<Self, DeriveError> {
        let mut bytes = [0u8; SECRET_SIZE];
        getrandom::getrandom(&mut bytes).map_err(|e| DeriveError::Entropy(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw key material.
    pub fn as_bytes(&self) -> &[u8; SECRET_SIZE] {
        &self.0
    }

    /// Public identifier of the group this secret protects.
    pub fn group_id(&self) -> GroupId {
        GroupId::from_secret(&self.0)
    }
}

impl std::fmt::Debug for GroupSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GroupSecret([REDACTED])")
    }
}

/// Output of [`derive_secret`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeriveResult {
    /// The derived group secret.
    pub secret_bytes: GroupSecret,
    /// One-way identifier of the group.
    pub group_id: GroupId,
}

impl DeriveResult {
    /// Build the result for an existing secret.
    pub fn from_secret(secret: GroupSecret) -> Self {
        let group_id = secret.group_id();
        Self {
            secret_bytes: secret,
            group_id,
        }
    }
}

/// Derive a group secret from a passphrase and salt with the default cost.
///
/// Identical inputs always give identical output; changing either input
/// changes the secret.
pub fn derive_secret(passphrase: &str, salt: &[u8]) -> Result<DeriveResult, DeriveError> {
    derive_secret_with_params(passphrase, salt, KdfParams::INTERACTIVE)
}

/// Derive a group secret with explicit Argon2id cost parameters.
pub fn derive_secret_with_params(
    passphrase: &str,
    salt: &[u8],
    params: KdfParams,
) -> Result<DeriveResult, DeriveError> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2_params()?);

    let mut salt = normalize_salt(salt);
    let mut output = [0u8; SECRET_SIZE];
    let hashed = argon2
        .hash_password_into(passphrase.as_bytes(), &salt, &mut output)
        .map_err(|e| DeriveError::Failed(e.to_string()));
    salt.zeroize();
    hashed?;

    Ok(DeriveResult::from_secret(GroupSecret(output)))
}

/// Generate a random salt for a new passphrase-protected group.
pub fn generate_salt() -> Result<[u8; SALT_SIZE], DeriveError> {
    let mut salt = [0u8; SALT_SIZE];
    getrandom::getrandom(&mut salt).map_err(|e| DeriveError::Entropy(e.to_string()))?;
    Ok(salt)
}

/// Map any caller salt (including an empty one) to 32 domain-separated bytes.
///
/// Argon2 refuses salts shorter than 8 bytes; hashing first lifts that limit
/// without weakening longer salts.
fn normalize_salt(salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SALT_DOMAIN);
    hasher.update(salt);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cheap parameters so the suite does not spend seconds in Argon2.
    fn fast() -> KdfParams {
        KdfParams::new(64, 1, 1).unwrap()
    }

    const SALT: &[u8] = b"salt-00000000000!";

    #[test]
    fn derive_is_deterministic() {
        let a = derive_secret("test-pass", SALT).unwrap();
        let b = derive_secret("test-pass", SALT).unwrap();
        assert_eq!(a.secret_bytes, b.secret_bytes);
        assert_eq!(a.group_id, b.group_id);
        assert_eq!(a.secret_bytes.as_bytes().len(), 32);
        assert!(!a.group_id.to_string().is_empty());
    }

    #[test]
    fn different_passphrases_differ() {
        let a = derive_secret("pass-a", SALT).unwrap();
        let b = derive_secret("pass-b", SALT).unwrap();
        assert_ne!(a.secret_bytes, b.secret_bytes);
        assert_ne!(a.group_id, b.group_id);
    }

    #[test]
    fn different_salts_differ() {
        let a = derive_secret_with_params("test-pass", b"salt-AAAAAAAAAA!!", fast()).unwrap();
        let b = derive_secret_with_params("test-pass", b"salt-BBBBBBBBBB!!", fast()).unwrap();
        assert_ne!(a.secret_bytes, b.secret_bytes);
    }

    #[test]
    fn params_change_the_secret() {
        let a = derive_secret_with_params("test-pass", SALT, fast()).unwrap();
        let b = derive_secret_with_params("test-pass", SALT, KdfParams::new(128, 1, 1).unwrap())
            .unwrap();
        assert_ne!(a.secret_bytes, b.secret_bytes);
    }

    #[test]
    fn short_and_empty_salts_are_accepted() {
        let empty = derive_secret_with_params("pw", b"", fast()).unwrap();
        let short = derive_secret_with_params("pw", b"abc", fast()).unwrap();
        assert_ne!(empty.secret_bytes, short.secret_bytes);
    }

    #[test]
    fn group_id_matches_secret() {
        let result = derive_secret_with_params("pw", SALT, fast()).unwrap();
        assert_eq!(result.group_id, result.secret_bytes.group_id());
        assert_ne!(result.group_id.as_bytes(), result.secret_bytes.as_bytes());
    }

    #[test]
    fn derive_is_thread_safe() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| derive_secret_with_params("pw", SALT, fast()).unwrap()))
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(matches!(
            KdfParams::new(1, 1, 1),
            Err(DeriveError::InvalidParams(_))
        ));
        assert!(matches!(
            KdfParams::new(64, 0, 1),
            Err(DeriveError::InvalidParams(_))
        ));
    }

    #[test]
    fn interactive_params_are_valid() {
        let p = KdfParams::INTERACTIVE;
        assert_eq!(KdfParams::new(p.memory_kib(), p.iterations(), p.parallelism()), Ok(p));
        assert_eq!(KdfParams::default(), p);
    }

    #[test]
    fn secret_from_slice_checks_length() {
        assert!(GroupSecret::from_slice(&[0u8; 16]).is_none());
        assert!(GroupSecret::from_slice(&[0u8; 32]).is_some());
    }

    #[test]
    fn generated_secrets_and_salts_are_random() {
        assert_ne!(GroupSecret::generate().unwrap(), GroupSecret::generate().unwrap());
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = GroupSecret::from_bytes([0xAB; 32]);
        let debug = format!("{:?}", DeriveResult::from_secret(secret));
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("[171"));
    }
}
