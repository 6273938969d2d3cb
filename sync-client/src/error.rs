//! Client errors.

use std::fmt;
use sync_core::{ConfigError, DeriveError, InviteError};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Errors returned by [`SyncSession`](crate::SyncSession).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Push or pull outside the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// The transport failed; the session is unchanged and can be retried.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every configured relay refused or failed the connection.
    #[error("all relays failed: {}", RelayFailures(.0))]
    AllRelaysFailed(Vec<RelayFailure>),

    /// The session was shut down (before or during the call).
    #[error("session has been shut down")]
    ShutDown,

    /// Sealing a payload failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The relay answered with something that does not fit the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid session configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Passphrase derivation failed.
    #[error("key derivation failed: {0}")]
    Derive(#[from] DeriveError),

    /// Building an invite failed.
    #[error("invite error: {0}")]
    Invite(#[from] InviteError),
}

/// One relay's connection failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFailure {
    /// The relay address.
    pub relay: String,
    /// What went wrong.
    pub error: TransportError,
}

struct RelayFailures<'a>(&'a [RelayFailure]);

impl fmt::Display for RelayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.relay, failure.error)?;
        }
        Ok(())
    }
}
