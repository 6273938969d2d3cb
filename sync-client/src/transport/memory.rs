//! In-process relay and transport.
//!
//! [`MemoryRelay`] stores blobs per group and assigns cursors the way a real
//! relay does (per-group, starting at 1, strictly increasing). Several
//! [`MemoryTransport`]s can share one relay, which lets two sessions in the
//! same process sync with each other.
//!
//! Both sides support failure injection for testing error paths.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use sync_types::{BlobId, Cursor, GroupId, Hello, OutboundBlob, PushAck, RelayBlob};

/// Blob retention when a push asks for the relay default (7 days).
pub const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Largest payload the relay accepts by default (1 MiB).
pub const DEFAULT_MAX_BLOB_SIZE: usize = 1024 * 1024;

/// A shared in-memory relay.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<RelayState>>,
}

#[derive(Debug)]
struct RelayState {
    groups: HashMap<GroupId, GroupLog>,
    refused: HashSet<String>,
    open_links: HashMap<u64, String>,
    max_blob_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
            refused: HashSet::new(),
            open_links: HashMap::new(),
            max_blob_size: DEFAULT_MAX_BLOB_SIZE,
        }
    }
}

#[derive(Debug, Default)]
struct GroupLog {
    last_cursor: u64,
    blobs: BTreeMap<u64, StoredBlob>,
}

#[derive(Debug)]
struct StoredBlob {
    blob_id: BlobId,
    payload: Vec<u8>,
    timestamp: u64,
    expires_at: u64,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Change the largest accepted payload.
    pub fn with_max_blob_size(self, max_blob_size: usize) -> Self {
        self.state().max_blob_size = max_blob_size;
        self
    }

    /// Make connections to `address` fail until [`accept_relay`](Self::accept_relay).
    pub fn refuse_relay(&self, address: &str) {
        self.state().refused.insert(address.to_string());
    }

    /// Undo [`refuse_relay`](Self::refuse_relay).
    pub fn accept_relay(&self, address: &str) {
        self.state().refused.remove(address);
    }

    /// Drop every open link, as if the relay restarted.
    pub fn drop_all_links(&self) {
        self.state().open_links.clear();
    }

    /// Number of links currently open.
    pub fn open_links(&self) -> usize {
        self.state().open_links.len()
    }

    /// Number of blobs stored for a group, counting expired blobs that have
    /// not been pruned yet.
    pub fn blob_count(&self, group_id: &GroupId) -> usize {
        self.state()
            .groups
            .get(group_id)
            .map_or(0, |log| log.blobs.len())
    }

    /// Highest cursor ever assigned in a group.
    pub fn max_cursor(&self, group_id: &GroupId) -> Cursor {
        Cursor::new(
            self.state()
                .groups
                .get(group_id)
                .map_or(0, |log| log.last_cursor),
        )
    }

    /// Stored payloads for a group, as the relay sees them.
    pub fn stored_payloads(&self, group_id: &GroupId) -> Vec<Vec<u8>> {
        self.state()
            .groups
            .get(group_id)
            .map(|log| log.blobs.values().map(|b| b.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Remove one stored blob, leaving a hole in the cursor sequence.
    pub fn evict(&self, group_id: &GroupId, cursor: Cursor) -> bool {
        self.state()
            .groups
            .get_mut(group_id)
            .map_or(false, |log| log.blobs.remove(&cursor.value()).is_some())
    }

    /// Store a raw payload directly, bypassing any client. Returns its cursor.
    pub fn inject(&self, group_id: &GroupId, payload: Vec<u8>) -> Cursor {
        let blob = OutboundBlob {
            blob_id: BlobId::new(),
            payload,
            ttl: 0,
        };
        self.state().store(group_id, &blob, unix_now()).cursor
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RelayState {
    fn store(&mut self, group_id: &GroupId, blob: &OutboundBlob, now: u64) -> PushAck {
        let ttl = match blob.ttl {
            0 => DEFAULT_TTL_SECS,
            secs => u64::from(secs),
        };
        let log = self.groups.entry(*group_id).or_default();
        log.prune_expired(now);
        log.last_cursor += 1;
        log.blobs.insert(
            log.last_cursor,
            StoredBlob {
                blob_id: blob.blob_id,
                payload: blob.payload.clone(),
                timestamp: now,
                expires_at: now.saturating_add(ttl),
            },
        );

        PushAck {
            blob_id: blob.blob_id,
            cursor: Cursor::new(log.last_cursor),
        }
    }

    fn fetch(&mut self, group_id: &GroupId, after: Cursor, limit: usize, now: u64) -> Vec<RelayBlob> {
        let Some(log) = self.groups.get_mut(group_id) else {
            return Vec::new();
        };
        log.prune_expired(now);

        log.blobs
            .range(after.value().saturating_add(1)..)
            .take(limit)
            .map(|(&cursor, blob)| RelayBlob {
                blob_id: blob.blob_id,
                cursor: Cursor::new(cursor),
                payload: blob.payload.clone(),
                timestamp: blob.timestamp,
            })
            .collect()
    }
}

impl GroupLog {
    /// Drop blobs whose retention has run out. Cursors are never reused.
    fn prune_expired(&mut self, now: u64) {
        self.blobs.retain(|_, blob| blob.expires_at > now);
    }
}

/// An open link to a [`MemoryRelay`].
#[derive(Debug)]
pub struct MemoryLink {
    id: u64,
    relay: String,
    group_id: GroupId,
}

impl MemoryLink {
    /// Address the link was opened to.
    pub fn relay(&self) -> &str {
        &self.relay
    }
}

/// Transport backed by a [`MemoryRelay`].
///
/// Clones share the relay and the failure-injection state.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    relay: MemoryRelay,
    faults: Arc<Mutex<Faults>>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_receive: Option<String>,
    stall_next_send: bool,
    stall_next_close: bool,
    connect_attempts: Vec<String>,
    sent: usize,
}

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

impl MemoryTransport {
    /// Create a transport talking to `relay`.
    pub fn new(relay: &MemoryRelay) -> Self {
        Self {
            relay: relay.clone(),
            faults: Arc::default(),
        }
    }

    /// The relay behind this transport.
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.faults().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.faults().fail_next_send = Some(error.to_string());
    }

    /// Cause the next receive() to fail with the given error.
    pub fn fail_next_receive(&self, error: &str) {
        self.faults().fail_next_receive = Some(error.to_string());
    }

    /// Make the next send() hang until its future is dropped.
    pub fn stall_next_send(&self) {
        self.faults().stall_next_send = true;
    }

    /// Make the next close() hang until its future is dropped.
    pub fn stall_next_close(&self) {
        self.faults().stall_next_close = true;
    }

    /// Every address connect() was called with, in order.
    pub fn connect_attempts(&self) -> Vec<String> {
        self.faults().connect_attempts.clone()
    }

    /// Number of blobs successfully stored through this transport.
    pub fn sent_count(&self) -> usize {
        self.faults().sent
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self, link: &MemoryLink) -> Result<(), TransportError> {
        if self.relay.state().open_links.contains_key(&link.id) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Link = MemoryLink;

    async fn connect(&self, relay: &str, hello: &Hello) -> Result<MemoryLink, TransportError> {
        {
            let mut faults = self.faults();
            faults.connect_attempts.push(relay.to_string());
            if let Some(error) = faults.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
        }

        let mut state = self.relay.state();
        if state.refused.contains(relay) {
            return Err(TransportError::ConnectionFailed(format!(
                "{} refused the connection",
                relay
            )));
        }

        let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        state.open_links.insert(id, relay.to_string());
        Ok(MemoryLink {
            id,
            relay: relay.to_string(),
            group_id: hello.group_id,
        })
    }

    async fn send(&self, link: &MemoryLink, blob: &OutboundBlob) -> Result<PushAck, TransportError> {
        let stall = {
            let mut faults = self.faults();
            if let Some(error) = faults.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }
            std::mem::take(&mut faults.stall_next_send)
        };
        if stall {
            std::future::pending::<()>().await;
        }

        self.check_open(link)?;
        let ack = {
            let mut state = self.relay.state();
            if blob.payload.len() > state.max_blob_size {
                return Err(TransportError::SendFailed(format!(
                    "blob too large: {} > {}",
                    blob.payload.len(),
                    state.max_blob_size
                )));
            }
            state.store(&link.group_id, blob, unix_now())
        };
        self.faults().sent += 1;
        Ok(ack)
    }

    async fn receive(
        &self,
        link: &MemoryLink,
        after: Cursor,
        limit: usize,
    ) -> Result<Vec<RelayBlob>, TransportError> {
        if let Some(error) = self.faults().fail_next_receive.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        self.check_open(link)?;
        Ok(self
            .relay
            .state()
            .fetch(&link.group_id, after, limit, unix_now()))
    }

    async fn close(&self, link: MemoryLink) -> Result<(), TransportError> {
        let stall = std::mem::take(&mut self.faults().stall_next_close);
        if stall {
            std::future::pending::<()>().await;
        }

        match self.relay.state().open_links.remove(&link.id) {
            Some(_) => Ok(()),
            None => Err(TransportError::ConnectionClosed),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
