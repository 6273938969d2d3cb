//! # sync-core
//!
//! Pure logic for sealsync (no network, no async, instant tests).
//!
//! - [`derive`]: group secrets from passphrases (Argon2id) or raw bytes
//! - [`config`]: validated [`SessionConfig`] and its TOML-friendly builder
//! - [`invite`]: QR payloads and short codes for joining a group
//! - [`cursor`]: the session's monotonic cursor
//! - [`state`]: the session lifecycle state machine
//!
//! The actual I/O is performed by `sync-client`, which interprets the
//! actions these modules produce.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cursor;
pub mod derive;
pub mod invite;
pub mod state;

pub use config::{ConfigError, SecretSource, SessionConfig, SessionConfigBuilder};
pub use cursor::{Advance, CursorTracker, Gap};
pub use derive::{
    derive_secret, derive_secret_with_params, generate_salt, DeriveError, DeriveResult,
    GroupSecret, KdfParams, SALT_SIZE, SECRET_SIZE,
};
pub use invite::{
    invite_from_qr, DecodeError, InviteError, ShortCode, SyncInvite, INVITE_VERSION,
    SHORT_CODE_LEN,
};
pub use state::{Action, Event, SessionState, SessionStatus};
