//! # sync-types
//!
//! Foundational types shared by every sealsync crate:
//! - [`GroupId`], [`BlobId`], [`Cursor`] - identity and ordering
//! - [`Hello`], [`OutboundBlob`], [`PushAck`], [`RelayBlob`] - records that
//!   cross the client/relay boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

mod ids;
mod relay;

pub use ids::{BlobId, Cursor, GroupId};
pub use relay::{Hello, OutboundBlob, PushAck, RelayBlob};
