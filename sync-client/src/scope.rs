//! Scoped use of a session.
//!
//! [`SyncSession::scoped`] runs a closure with the session and shuts the
//! session down on every exit path: normal return, error, panic, or the
//! scope future being dropped.

use std::future::Future;
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::session::SyncSession;
use crate::transport::Transport;

impl<T: Transport> SyncSession<T> {
    /// Run `f` with the session, then shut the session down.
    ///
    /// The closure runs as its own task. If it panics the panic is resumed
    /// after shutdown completes. If the task is cancelled (the runtime is
    /// shutting down) the result is [`ClientError::ShutDown`]. If the
    /// returned future is dropped before the closure finishes, the task is
    /// aborted and shutdown is spawned on the current runtime.
    ///
    /// ```ignore
    /// let session = Arc::new(SyncSession::create(config, transport)?);
    /// let pulled = session
    ///     .scoped(|s| async move {
    ///         s.connect().await?;
    ///         s.pull().await
    ///     })
    ///     .await?;
    /// ```
    pub async fn scoped<F, Fut, V, E>(self: Arc<Self>, f: F) -> Result<V, E>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        V: Send + 'static,
        E: From<ClientError> + Send + 'static,
    {
        let task = tokio::spawn(f(Arc::clone(&self)));
        let mut guard = ShutdownGuard {
            session: Some(Arc::clone(&self)),
            task: task.abort_handle(),
        };

        let joined = task.await;
        guard.disarm();
        self.shutdown().await;
        debug!("scoped session finished");

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                warn!(error = %e, "scoped task cancelled");
                Err(ClientError::ShutDown.into())
            }
        }
    }
}

struct ShutdownGuard<T: Transport> {
    session: Option<Arc<SyncSession<T>>>,
    task: AbortHandle,
}

impl<T: Transport> ShutdownGuard<T> {
    fn disarm(&mut self) {
        self.session = None;
    }
}

impl<T: Transport> Drop for ShutdownGuard<T> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.task.abort();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { session.shutdown().await });
            }
            Err(_) => debug!("no runtime to shut down a dropped scope"),
        }
    }
}
