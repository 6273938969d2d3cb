//! Transport abstraction for sealsync.
//!
//! The session never speaks a wire protocol itself. It hands ciphertext to a
//! [`Transport`], which owns framing, authentication with the relay, and
//! retries below the level of a single call.
//!
//! # Design
//!
//! The trait is async and link-oriented:
//! - `connect()` opens a link to one relay and greets it with a [`Hello`]
//! - `send()` stores one sealed blob and returns the relay's acknowledgement
//! - `receive()` fetches stored blobs strictly after a cursor
//! - `close()` consumes the link
//!
//! # Example
//!
//! ```ignore
//! let relay = MemoryRelay::new();
//! let transport = MemoryTransport::new(&relay);
//! let link = transport.connect("relay-a", &hello).await?;
//! let ack = transport.send(&link, &blob).await?;
//! let blobs = transport.receive(&link, Cursor::zero(), 100).await?;
//! transport.close(link).await?;
//! ```

mod memory;

pub use memory::{MemoryLink, MemoryRelay, MemoryTransport};

use async_trait::async_trait;
use sync_types::{Cursor, Hello, OutboundBlob, PushAck, RelayBlob};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The relay could not be reached or refused the link.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The link was closed underneath the caller.
    #[error("connection closed")]
    ConnectionClosed,

    /// The relay did not store the blob.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The relay did not return blobs.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,
}

/// Transport for sealed sync blobs.
///
/// Implementations handle the underlying connection mechanism (QUIC,
/// WebSocket, in-memory, etc).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// An open link to one relay.
    type Link: Send + Sync + 'static;

    /// Open a link to the relay at `relay`.
    async fn connect(&self, relay: &str, hello: &Hello) -> Result<Self::Link, TransportError>;

    /// Store one blob. The relay assigns its cursor.
    async fn send(&self, link: &Self::Link, blob: &OutboundBlob)
        -> Result<PushAck, TransportError>;

    /// Fetch up to `limit` blobs with cursors strictly after `after`, in
    /// cursor order.
    async fn receive(
        &self,
        link: &Self::Link,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<RelayBlob>, TransportError>;

    /// Close the link.
    async fn close(&self, link: Self::Link) -> Result<(), TransportError>;
}
