//! SyncSession - the main interface for sealsync.
//!
//! A session owns one group secret, the payload key derived from it, a
//! transport, and the session cursor. Applications push and pull opaque
//! payloads; the relay only ever sees ciphertext.
//!
//! # Architecture
//!
//! The lifecycle is the pure state machine from `sync-core`; the session
//! interprets its actions and performs the I/O through [`Transport`].
//!
//! ```text
//! Application → SyncSession → Transport → Relay
//!                   ↓
//!              sync-core (state machine, cursor, config)
//! ```
//!
//! # Concurrency
//!
//! `connect`, `disconnect`, `push` and `pull` queue on one async mutex, so at
//! most one of them talks to the transport at a time and the cursor never
//! races. `shutdown` raises a signal first; whatever call holds the mutex
//! abandons its transport future and returns [`ClientError::ShutDown`].
//!
//! # Example
//!
//! ```ignore
//! use sync_client::{MemoryRelay, MemoryTransport, SessionConfig, SyncSession};
//!
//! let config = SessionConfig::from_passphrase("passphrase", b"salt", ["relay-a"])?;
//! let session = SyncSession::create(config, MemoryTransport::new(&MemoryRelay::new()))?;
//!
//! session.connect().await?;
//! session.push(b"hello").await?;
//! let blobs = session.pull().await?;
//! session.shutdown().await;
//! ```

use std::future::Future;
use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_core::{
    Action, CursorTracker, Event, GroupSecret, SecretSource, SessionConfig, SessionConfigBuilder,
    SessionState, SessionStatus, SyncInvite,
};
use sync_types::{BlobId, Cursor, GroupId, Hello, OutboundBlob};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::crypto::GroupKey;
use crate::error::{ClientError, RelayFailure};
use crate::transport::{Transport, TransportError};

/// Maximum number of blobs requested per pull.
pub const PULL_BATCH_SIZE: usize = 100;

/// How long `shutdown` waits for the transport to close a link.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of a successful push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushResult {
    /// Identifier of the stored blob.
    pub blob_id: BlobId,
    /// Cursor the relay assigned to it.
    pub cursor: Cursor,
}

/// A blob received from the sync group.
#[derive(Clone, PartialEq, Eq)]
pub struct SyncBlob {
    /// The blob identifier.
    pub blob_id: BlobId,
    /// The decrypted payload.
    pub data: Vec<u8>,
    /// The cursor position of this blob.
    pub cursor: Cursor,
    /// When the relay stored it (unix seconds).
    pub timestamp: u64,
}

impl std::fmt::Debug for SyncBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBlob")
            .field("blob_id", &self.blob_id)
            .field("data", &format!("[{} bytes REDACTED]", self.data.len()))
            .field("cursor", &self.cursor)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

struct Shared {
    state: SessionState,
    cursor: CursorTracker,
}

/// An encrypted sync session with one group.
pub struct SyncSession<T: Transport> {
    config: SessionConfig,
    secret: GroupSecret,
    key: GroupKey,
    transport: T,
    /// Serializes transport calls; holds the open link.
    link: Mutex<Option<T::Link>>,
    shared: StdMutex<Shared>,
    shutdown: watch::Sender<bool>,
    status: watch::Sender<SessionStatus>,
}

impl<T: Transport> SyncSession<T> {
    /// Create a session from a validated config.
    ///
    /// On the passphrase path this runs Argon2id, which takes tens of
    /// milliseconds with the default cost.
    pub fn create(config: SessionConfig, transport: T) -> Result<Self, ClientError> {
        let resolved = config.resolve_secret()?;
        let key = GroupKey::derive(&resolved.secret_bytes);

        info!(
            group_id = %resolved.group_id,
            relays = config.relay_addresses().len(),
            passphrase = config.source().is_passphrase(),
            "session created"
        );

        let (shutdown, _) = watch::channel(false);
        let (status, _) = watch::channel(SessionStatus::Created);
        Ok(Self {
            config,
            secret: resolved.secret_bytes,
            key,
            transport,
            link: Mutex::new(None),
            shared: StdMutex::new(Shared {
                state: SessionState::new(),
                cursor: CursorTracker::new(),
            }),
            shutdown,
            status,
        })
    }

    /// Validate a builder and create a session in one step.
    pub fn create_from(builder: SessionConfigBuilder, transport: T) -> Result<Self, ClientError> {
        Self::create(builder.build()?, transport)
    }

    /// Join the group an invite describes, using the invite's relays.
    pub fn from_invite(invite: &SyncInvite, transport: T) -> Result<Self, ClientError> {
        let config = SessionConfig::from_secret_bytes(
            invite.group_secret().as_bytes(),
            invite.relay_addresses().iter().cloned(),
        )?;
        Self::create(config, transport)
    }

    /// Connect to the first relay that accepts, in configured order.
    ///
    /// A no-op when already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut link = self.link.lock().await;
        {
            let shared = self.shared();
            if shared.state.is_shut_down() {
                return Err(ClientError::ShutDown);
            }
            if let Some(relay) = shared.state.active_relay() {
                debug!(relay, "already connected");
                return Ok(());
            }
        }

        let hello = Hello {
            group_id: *self.key.group_id(),
            device_name: self.config.device_name().map(str::to_string),
            last_cursor: self.current_cursor(),
        };

        let mut failures = Vec::new();
        for relay in self.config.relay_addresses() {
            debug!(relay = %relay, "connecting");
            match self
                .interruptible(self.transport.connect(relay, &hello))
                .await
            {
                Ok(opened) => {
                    *link = Some(opened);
                    let actions = self.apply(Event::Connected {
                        relay: relay.clone(),
                    });
                    self.execute(actions, &mut link).await;
                    info!(relay = %relay, group_id = %hello.group_id, "connected");
                    return Ok(());
                }
                Err(ClientError::Transport(error)) => {
                    warn!(relay = %relay, %error, "relay connection failed");
                    failures.push(RelayFailure {
                        relay: relay.clone(),
                        error,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        Err(ClientError::AllRelaysFailed(failures))
    }

    /// Close the relay link. The session can connect again later.
    ///
    /// A close still in progress when `shutdown` is called is abandoned.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        let actions = self.apply(Event::DisconnectRequested);
        if !actions.is_empty() {
            info!("disconnected");
        }
        self.execute(actions, &mut link).await;
    }

    /// Shut the session down.
    ///
    /// Never fails and may be called any number of times, from any state,
    /// concurrently with other operations. An operation in flight returns
    /// [`ClientError::ShutDown`]. Closing the link is given
    /// [`CLOSE_TIMEOUT`].
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let mut link = self.link.lock().await;
        let actions = self.apply(Event::ShutdownRequested);
        if !actions.is_empty() {
            info!(cursor = %self.current_cursor(), "session shut down");
        }
        self.execute(actions, &mut link).await;
    }

    /// Encrypt and push a payload.
    ///
    /// If the relay has closed the link the session moves to
    /// `Disconnected`, so a later `connect` opens a fresh one.
    pub async fn push(&self, data: &[u8]) -> Result<PushResult, ClientError> {
        let mut link = self.link.lock().await;
        let result = self.push_on(self.connected_link(&link)?, data).await;
        if link_lost(&result) {
            self.drop_lost_link(&mut link).await;
        }
        result
    }

    async fn push_on(&self, link: &T::Link, data: &[u8]) -> Result<PushResult, ClientError> {
        let blob = OutboundBlob {
            blob_id: BlobId::new(),
            payload: self.key.seal(data)?,
            ttl: self.config.ttl().unwrap_or(0),
        };
        let ack = self
            .interruptible(self.transport.send(link, &blob))
            .await?;

        if ack.blob_id != blob.blob_id {
            return Err(ClientError::Protocol(format!(
                "push ack for {} while pushing {}",
                ack.blob_id, blob.blob_id
            )));
        }

        let advanced = self.shared().cursor.acknowledge(ack.cursor);
        debug!(
            blob_id = %blob.blob_id,
            cursor = %ack.cursor,
            bytes = data.len(),
            advanced,
            "pushed"
        );

        Ok(PushResult {
            blob_id: blob.blob_id,
            cursor: ack.cursor,
        })
    }

    /// Pull blobs after the session cursor.
    pub async fn pull(&self) -> Result<Vec<SyncBlob>, ClientError> {
        self.pull_from(None).await
    }

    /// Pull blobs strictly after `after`.
    ///
    /// The session cursor only moves forward; pulling after an old cursor
    /// re-reads history without rewinding it.
    pub async fn pull_after(&self, after: Cursor) -> Result<Vec<SyncBlob>, ClientError> {
        self.pull_from(Some(after)).await
    }

    async fn pull_from(&self, after: Option<Cursor>) -> Result<Vec<SyncBlob>, ClientError> {
        let mut link = self.link.lock().await;
        let after = after.unwrap_or_else(|| self.current_cursor());
        let result = self.pull_on(self.connected_link(&link)?, after).await;
        if link_lost(&result) {
            self.drop_lost_link(&mut link).await;
        }
        result
    }

    async fn pull_on(&self, link: &T::Link, after: Cursor) -> Result<Vec<SyncBlob>, ClientError> {
        let fetched = self
            .interruptible(self.transport.receive(link, after, PULL_BATCH_SIZE))
            .await?;

        let mut seen = Vec::with_capacity(fetched.len());
        let mut blobs = Vec::with_capacity(fetched.len());
        for blob in fetched {
            if blob.cursor <= after {
                warn!(cursor = %blob.cursor, %after, "relay returned an already-seen cursor");
                continue;
            }
            seen.push(blob.cursor);

            match self.key.open(&blob.payload) {
                Ok(data) => blobs.push(SyncBlob {
                    blob_id: blob.blob_id,
                    data,
                    cursor: blob.cursor,
                    timestamp: blob.timestamp,
                }),
                Err(error) => {
                    warn!(blob_id = %blob.blob_id, cursor = %blob.cursor, %error, "skipping blob")
                }
            }
        }
        blobs.sort_by_key(|b| b.cursor);
        blobs.dedup_by_key(|b| b.cursor);

        let advance = self.shared().cursor.observe(after, seen);
        for gap in &advance.gaps {
            warn!(after = %gap.after, before = %gap.before, missing = gap.missing(), "gap in cursor sequence");
        }
        debug!(%after, received = blobs.len(), cursor = %advance.to, moved = advance.moved(), "pulled");

        Ok(blobs)
    }

    /// Build an invite to this session's group.
    pub fn create_invite<I, S>(&self, relay_addresses: I) -> Result<SyncInvite, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_group_salt(SyncInvite::create(&self.secret, relay_addresses)?)
    }

    /// Build an invite that expires after `ttl`.
    pub fn create_invite_with_ttl<I, S>(
        &self,
        relay_addresses: I,
        ttl: Duration,
    ) -> Result<SyncInvite, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_group_salt(SyncInvite::create_with_ttl(
            &self.secret,
            relay_addresses,
            ttl,
        )?)
    }

    fn with_group_salt(&self, invite: SyncInvite) -> Result<SyncInvite, ClientError> {
        match self.config.source() {
            SecretSource::FromPassphrase { salt, .. } => Ok(invite.with_salt(salt)?),
            SecretSource::FromSecret { .. } => Ok(invite),
        }
    }

    /// True only while connected.
    pub fn is_connected(&self) -> bool {
        self.shared().state.is_connected()
    }

    /// The session cursor (0 until something is synced).
    pub fn current_cursor(&self) -> Cursor {
        self.shared().cursor.position()
    }

    /// The relay in use, only while connected.
    pub fn active_relay(&self) -> Option<String> {
        self.shared().state.active_relay().map(str::to_string)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// The group this session syncs.
    pub fn group_id(&self) -> GroupId {
        *self.key.group_id()
    }

    /// Configured relays, in preference order.
    pub fn relay_addresses(&self) -> &[String] {
        self.config.relay_addresses()
    }

    /// Configured device name.
    pub fn device_name(&self) -> Option<&str> {
        self.config.device_name()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, event: Event) -> Vec<Action> {
        let mut shared = self.shared();
        let state = std::mem::take(&mut shared.state);
        let (next, actions) = state.on_event(event);
        shared.state = next;
        actions
    }

    async fn execute(&self, actions: Vec<Action>, link: &mut Option<T::Link>) {
        for action in actions {
            match action {
                Action::CloseLink => {
                    if let Some(open) = link.take() {
                        self.close_link(open).await;
                    }
                }
                Action::Publish(status) => {
                    self.status.send_replace(status);
                }
            }
        }
    }

    /// Close a link without letting a hung transport block the session.
    ///
    /// Bounded by [`CLOSE_TIMEOUT`]; outside shutdown it is also abandoned
    /// as soon as shutdown is signalled.
    async fn close_link(&self, open: T::Link) {
        let close = async {
            tokio::time::timeout(CLOSE_TIMEOUT, self.transport.close(open))
                .await
                .unwrap_or(Err(TransportError::Timeout))
        };
        let result = if *self.shutdown.borrow() {
            close.await.map_err(ClientError::from)
        } else {
            self.interruptible(close).await
        };
        if let Err(error) = result {
            warn!(%error, "failed to close relay link");
        }
    }

    /// The relay closed the link under us: forget it and fall back to
    /// `Disconnected`.
    async fn drop_lost_link(&self, link: &mut Option<T::Link>) {
        link.take();
        let actions = self.apply(Event::DisconnectRequested);
        if !actions.is_empty() {
            warn!("relay link closed, session disconnected");
        }
        self.execute(actions, link).await;
    }

    fn connected_link<'a>(&self, link: &'a Option<T::Link>) -> Result<&'a T::Link, ClientError> {
        match link {
            Some(link) if self.is_connected() => Ok(link),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Run a transport call, abandoning it if shutdown is signalled.
    async fn interruptible<F, R>(&self, call: F) -> Result<R, ClientError>
    where
        F: Future<Output = Result<R, TransportError>>,
    {
        let signal = self.shutdown.subscribe();
        tokio::select! {
            biased;
            _ = shutdown_signalled(signal) => Err(ClientError::ShutDown),
            result = call => result.map_err(ClientError::from),
        }
    }
}

fn link_lost<R>(result: &Result<R, ClientError>) -> bool {
    matches!(
        result,
        Err(ClientError::Transport(TransportError::ConnectionClosed))
    )
}

async fn shutdown_signalled(mut signal: watch::Receiver<bool>) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl<T: Transport> std::fmt::Debug for SyncSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared();
        f.debug_struct("SyncSession")
            .field("group_id", self.key.group_id())
            .field("state", &shared.state)
            .field("cursor", &shared.cursor.position())
            .finish_non_exhaustive()
    }
}
