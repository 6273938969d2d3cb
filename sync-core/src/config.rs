//! Session configuration and its validation.
//!
//! [`SessionConfigBuilder`] is the loose input shape (every field optional,
//! loadable from TOML). [`SessionConfigBuilder::build`] is the only way to
//! obtain a [`SessionConfig`], and it checks every rule up front:
//!
//! - exactly one secret source: `secret_bytes`, or `passphrase` + `salt`
//! - `secret_bytes` is exactly 32 bytes
//! - `relay_addresses` is non-empty (entries are trimmed and de-duplicated)
//!
//! A config that exists is a config that is valid.
//!
//! ```toml
//! relay_addresses = ["relay-a.example", "relay-b.example"]
//! passphrase = "correct horse battery staple"
//! salt = "per-group-salt"
//! device_name = "laptop"
//! ttl = 86400
//! ```

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::derive::{
    derive_secret_with_params, DeriveError, DeriveResult, GroupSecret, KdfParams,
};

/// Configuration errors. Each validation rule has its own variant.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both a passphrase and raw secret bytes were supplied.
    #[error("cannot set both passphrase and secret_bytes")]
    BothSecretSources,

    /// Neither a passphrase nor raw secret bytes were supplied.
    #[error("must set either passphrase or secret_bytes")]
    MissingSecretSource,

    /// A passphrase was supplied without a salt.
    #[error("passphrase requires salt")]
    MissingSalt,

    /// A salt was supplied without a passphrase.
    #[error("salt is only valid together with passphrase")]
    SaltWithoutPassphrase,

    /// Raw secret bytes of the wrong length.
    #[error("secret_bytes must be 32 bytes, got {0}")]
    InvalidSecretLength(usize),

    /// No relay addresses.
    #[error("relay_addresses must not be empty")]
    EmptyRelayList,

    /// A relay address that is empty after trimming.
    #[error("relay address #{0} is blank")]
    BlankRelayAddress(usize),

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where the group secret comes from.
#[derive(Clone)]
pub enum SecretSource {
    /// Pre-derived key material.
    FromSecret {
        /// The 32-byte group secret.
        secret: GroupSecret,
    },
    /// A passphrase stretched with Argon2id.
    FromPassphrase {
        /// The passphrase (zeroed on drop).
        passphrase: Zeroizing<String>,
        /// Per-group salt.
        salt: Vec<u8>,
    },
}

impl SecretSource {
    /// Produce the group secret, running the KDF on the passphrase path.
    pub fn resolve(&self, kdf: KdfParams) -> Result<DeriveResult, DeriveError> {
        match self {
            Self::FromSecret { secret } => Ok(DeriveResult::from_secret(secret.clone())),
            Self::FromPassphrase { passphrase, salt } => {
                derive_secret_with_params(passphrase, salt, kdf)
            }
        }
    }

    /// True for the passphrase path.
    pub fn is_passphrase(&self) -> bool {
        matches!(self, Self::FromPassphrase { .. })
    }
}

impl std::fmt::Debug for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromSecret { .. } => write!(f, "FromSecret([REDACTED])"),
            Self::FromPassphrase { salt, .. } => f
                .debug_struct("FromPassphrase")
                .field("passphrase", &"[REDACTED]")
                .field("salt_len", &salt.len())
                .finish(),
        }
    }
}

/// A validated session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    source: SecretSource,
    relay_addresses: Vec<String>,
    device_name: Option<String>,
    ttl: Option<u32>,
    kdf: KdfParams,
}

impl SessionConfig {
    /// Start an empty builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Config from pre-derived secret bytes.
    pub fn from_secret_bytes<I, S>(secret_bytes: &[u8], relay_addresses: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder()
            .secret_bytes(secret_bytes)
            .relay_addresses(relay_addresses)
            .build()
    }

    /// Config from a passphrase and salt.
    pub fn from_passphrase<I, S>(
        passphrase: &str,
        salt: &[u8],
        relay_addresses: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder()
            .passphrase(passphrase)
            .salt(salt)
            .relay_addresses(relay_addresses)
            .build()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let builder: SessionConfigBuilder = toml::from_str(contents)?;
        builder.build()
    }

    /// Read, parse and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`]
    /// for bad TOML, or any validation error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// The secret source.
    pub fn source(&self) -> &SecretSource {
        &self.source
    }

    /// Relay addresses in preference order (never empty).
    pub fn relay_addresses(&self) -> &[String] {
        &self.relay_addresses
    }

    /// Device name, if any.
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Blob time-to-live in seconds, if any.
    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    /// Argon2id cost used on the passphrase path.
    pub fn kdf_params(&self) -> KdfParams {
        self.kdf
    }

    /// Set the device name. A blank name clears it.
    pub fn with_device_name(mut self, name: &str) -> Self {
        self.device_name = normalize_device_name(Some(name.to_string()));
        self
    }

    /// Set the blob time-to-live in seconds.
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the Argon2id cost.
    pub fn with_kdf_params(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Replace the relay list, re-running relay validation.
    pub fn with_relay_addresses<I, S>(mut self, relay_addresses: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relay_addresses = normalize_relays(relay_addresses)?;
        Ok(self)
    }

    /// Resolve the group secret for this config.
    pub fn resolve_secret(&self) -> Result<DeriveResult, DeriveError> {
        self.source.resolve(self.kdf)
    }
}

impl TryFrom<SessionConfigBuilder> for SessionConfig {
    type Error = ConfigError;

    fn try_from(builder: SessionConfigBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

/// Unvalidated session parameters.
///
/// Mirrors what callers (or config files) naturally provide: every field
/// optional, no cross-field guarantees. Turn it into a [`SessionConfig`]
/// with [`build`](Self::build).
#[derive(Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfigBuilder {
    /// Passphrase for Argon2id derivation.
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Salt for Argon2id derivation (bytes, or text taken as UTF-8).
    #[serde(default, deserialize_with = "bytes_or_text")]
    pub salt: Option<Vec<u8>>,
    /// Pre-derived 32-byte secret.
    #[serde(default)]
    pub secret_bytes: Option<Vec<u8>>,
    /// Relay addresses; the first is preferred.
    #[serde(default)]
    pub relay_addresses: Vec<String>,
    /// Human-readable device name.
    #[serde(default)]
    pub device_name: Option<String>,
    /// Blob time-to-live in seconds.
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Argon2id cost; defaults to [`KdfParams::INTERACTIVE`].
    #[serde(default)]
    pub kdf: Option<KdfParams>,
}

impl SessionConfigBuilder {
    /// Set the passphrase.
    pub fn passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(passphrase.to_string());
        self
    }

    /// Set the salt.
    pub fn salt(mut self, salt: &[u8]) -> Self {
        self.salt = Some(salt.to_vec());
        self
    }

    /// Set raw secret bytes.
    pub fn secret_bytes(mut self, secret_bytes: &[u8]) -> Self {
        self.secret_bytes = Some(secret_bytes.to_vec());
        self
    }

    /// Append one relay address.
    pub fn relay_address(mut self, address: impl Into<String>) -> Self {
        self.relay_addresses.push(address.into());
        self
    }

    /// Append several relay addresses.
    pub fn relay_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relay_addresses
            .extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Set the device name.
    pub fn device_name(mut self, name: &str) -> Self {
        self.device_name = Some(name.to_string());
        self
    }

    /// Set the blob time-to-live in seconds.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the Argon2id cost.
    pub fn kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = Some(kdf);
        self
    }

    /// Validate and normalize into a [`SessionConfig`].
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let source = match (self.passphrase, self.salt, self.secret_bytes) {
            (Some(_), _, Some(_)) => return Err(ConfigError::BothSecretSources),
            (None, None, None) => return Err(ConfigError::MissingSecretSource),
            (Some(_), None, None) => return Err(ConfigError::MissingSalt),
            (None, Some(_), _) => return Err(ConfigError::SaltWithoutPassphrase),
            (Some(passphrase), Some(salt), None) => SecretSource::FromPassphrase {
                passphrase: Zeroizing::new(passphrase),
                salt,
            },
            (None, None, Some(bytes)) => {
                let bytes = Zeroizing::new(bytes);
                let secret = GroupSecret::from_slice(&bytes)
                    .ok_or(ConfigError::InvalidSecretLength(bytes.len()))?;
                SecretSource::FromSecret { secret }
            }
        };

        Ok(SessionConfig {
            source,
            relay_addresses: normalize_relays(self.relay_addresses)?,
            device_name: normalize_device_name(self.device_name),
            ttl: self.ttl,
            kdf: self.kdf.unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for SessionConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfigBuilder")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("salt_len", &self.salt.as_ref().map(Vec::len))
            .field("secret_bytes", &self.secret_bytes.as_ref().map(|_| "[REDACTED]"))
            .field("relay_addresses", &self.relay_addresses)
            .field("device_name", &self.device_name)
            .field("ttl", &self.ttl)
            .field("kdf", &self.kdf)
            .finish()
    }
}

/// Trim, reject blanks, drop exact duplicates (first one wins).
pub(crate) fn normalize_relays<I, S>(addresses: I) -> Result<Vec<String>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut relays: Vec<String> = Vec::new();
    for (index, address) in addresses.into_iter().enumerate() {
        let address = address.into();
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::BlankRelayAddress(index));
        }
        if !relays.iter().any(|r| r == trimmed) {
            relays.push(trimmed.to_string());
        }
    }

    if relays.is_empty() {
        return Err(ConfigError::EmptyRelayList);
    }
    Ok(relays)
}

fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ByteInput {
    Text(String),
    Bytes(Vec<u8>),
}

fn bytes_or_text<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let input = Option::<ByteInput>::deserialize(deserializer)?;
    Ok(input.map(|input| match input {
        ByteInput::Text(text) => text.into_bytes(),
        ByteInput::Bytes(bytes) => bytes,
    }))
}
