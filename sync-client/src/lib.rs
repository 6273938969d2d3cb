//! # sync-client
//!
//! Client library for sealsync, a zero-knowledge encrypted sync protocol.
//!
//! Applications hand a [`SyncSession`] opaque payloads; the session seals
//! them with a key only group members hold and stores them on a relay that
//! never sees plaintext.
//!
//! ## Features
//!
//! - **E2E Encryption**: XChaCha20-Poly1305 with 192-bit nonces
//! - **Passphrase or Raw Secrets**: Argon2id with fixed parameters, so every
//!   device derives the same group
//! - **Relay Failover**: relays are tried in configured order
//! - **Transport Abstraction**: pluggable [`Transport`], in-memory relay included
//! - **Pure State Machine**: lifecycle and cursor logic live in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{MemoryRelay, MemoryTransport, SessionConfig, SyncSession};
//!
//! let config = SessionConfig::from_passphrase("correct horse", b"salt", ["relay-a"])?;
//! let session = SyncSession::create(config, MemoryTransport::new(&MemoryRelay::new()))?;
//!
//! session.connect().await?;
//! session.push(b"my data").await?;
//! let blobs = session.pull().await?;
//! session.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod error;
mod scope;
pub mod session;
pub mod transport;

pub use crypto::{CryptoError, GroupKey};
pub use error::{ClientError, RelayFailure};
pub use session::{PushResult, SyncBlob, SyncSession, CLOSE_TIMEOUT, PULL_BATCH_SIZE};
pub use transport::{MemoryLink, MemoryRelay, MemoryTransport, Transport, TransportError};

// Re-export what applications need to configure and join sessions.
pub use sync_core::{
    derive_secret, generate_salt, invite_from_qr, DecodeError, DeriveResult, GroupSecret,
    KdfParams, SessionConfig, SessionConfigBuilder, SessionStatus, ShortCode, SyncInvite,
};
pub use sync_types::{BlobId, Cursor, GroupId};
