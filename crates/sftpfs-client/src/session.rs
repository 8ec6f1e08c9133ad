//! Remote session and per-worker channel manager.
//!
//! One authenticated connection backs many protocol channels. Each worker
//! gets its own channel, opened lazily on first use and kept until the
//! session is torn down or reconnected. A transport fault marks the session
//! faulted; [`RemoteSession::reconnect`] rebuilds the connection once no
//! matter how many workers observed the fault.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use sftpfs_vfs::WorkerId;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RemoteResult;
use crate::transport::{ChannelOf, Connection, RemoteChannel, Transport};

struct SessionState<T: Transport> {
    connection: Option<Arc<T::Connection>>,
    channels: HashMap<WorkerId, Arc<ChannelOf<T>>>,
}

/// Owns the shared connection and the worker -> channel map.
pub struct RemoteSession<T: Transport> {
    transport: T,
    state: Mutex<SessionState<T>>,
    reconnect_lock: Mutex<()>,
    faulted: AtomicBool,
    retries: AtomicU64,
    /// Reconnect sequences finished so far, and whether the last one worked.
    completed: AtomicU64,
    last_reconnect_ok: AtomicBool,
}

impl<T: Transport> RemoteSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: Mutex::new(SessionState {
                connection: None,
                channels: HashMap::new(),
            }),
            reconnect_lock: Mutex::new(()),
            faulted: AtomicBool::new(false),
            retries: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            last_reconnect_ok: AtomicBool::new(true),
        }
    }

    /// The transport this session connects through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Establish the shared connection now instead of on first use.
    pub async fn connect(&self) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        if state.connection.is_none() {
            state.connection = Some(Arc::new(self.transport.connect().await?));
            info!("remote session established");
        }
        Ok(())
    }

    /// The calling worker's channel, opened on first use.
    pub async fn channel_for(&self, worker: WorkerId) -> RemoteResult<Arc<ChannelOf<T>>> {
        let mut state = self.state.lock().await;
        if let Some(channel) = state.channels.get(&worker) {
            return Ok(channel.clone());
        }

        let connection = match &state.connection {
            Some(connection) => connection.clone(),
            None => {
                let connection = Arc::new(self.transport.connect().await?);
                info!("remote session established");
                state.connection = Some(connection.clone());
                connection
            }
        };

        let channel = Arc::new(connection.open_channel().await?);
        state.channels.insert(worker, channel.clone());
        debug!(%worker, channels = state.channels.len(), "opened channel");
        Ok(channel)
    }

    /// Record a transport-level failure.
    pub fn mark_faulted(&self) {
        if !self.faulted.swap(true, Ordering::SeqCst) {
            warn!("remote session faulted");
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    /// Number of reconnect attempts made so far.
    pub fn retry_count(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }

    /// Number of workers currently holding a channel.
    pub async fn channel_count(&self) -> usize {
        self.state.lock().await.channels.len()
    }

    /// Rebuild the connection if the session is faulted.
    ///
    /// Callers that queued up behind an in-flight attempt share its outcome
    /// instead of starting another one. Channels are not reopened here; each
    /// worker reopens its own on next use. The state lock is held until the
    /// new connection is installed, so a worker asking for a channel meanwhile
    /// waits for it instead of connecting on its own.
    pub async fn reconnect(&self) -> bool {
        let seen = self.completed.load(Ordering::SeqCst);
        let _guard = self.reconnect_lock.lock().await;

        if self.completed.load(Ordering::SeqCst) != seen {
            return self.last_reconnect_ok.load(Ordering::SeqCst);
        }
        if !self.is_faulted() {
            return true;
        }

        let mut state = self.state.lock().await;
        Self::close_all(&mut state).await;
        let attempt = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt, "reconnecting remote session");

        let ok = match self.transport.connect().await {
            Ok(connection) => {
                state.connection = Some(Arc::new(connection));
                self.faulted.store(false, Ordering::SeqCst);
                info!(attempt, "remote session re-established");
                true
            }
            Err(e) => {
                warn!(attempt, error = %e, "reconnect failed");
                false
            }
        };
        drop(state);

        self.last_reconnect_ok.store(ok, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        ok
    }

    /// Disconnect every channel and the connection. Used at unmount.
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        Self::close_all(&mut state).await;
        info!("remote session torn down");
    }

    /// Best-effort close of everything; failures are logged.
    async fn close_all(state: &mut SessionState<T>) {
        let connection = state.connection.take();
        for (worker, channel) in state.channels.drain() {
            if let Err(e) = channel.close().await {
                debug!(%worker, error = %e, "channel close failed");
            }
        }
        if let Some(connection) = connection
            && let Err(e) = connection.disconnect().await
        {
            warn!(error = %e, "disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_per_worker_reused() {
        let remote = MemoryRemote::new();
        let session = RemoteSession::new(remote.clone());

        let a1 = session.channel_for(WorkerId(1)).await.unwrap();
        let a2 = session.channel_for(WorkerId(1)).await.unwrap();
        let b = session.channel_for(WorkerId(2)).await.unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(remote.connects(), 1);
        assert_eq!(remote.channels_opened(), 2);
        assert_eq!(session.channel_count().await, 2);
    }

    #[tokio::test]
    async fn test_reconnect_is_noop_when_healthy() {
        let remote = MemoryRemote::new();
        let session = RemoteSession::new(remote.clone());
        session.connect().await.unwrap();

        assert!(session.reconnect().await);
        assert_eq!(remote.connects(), 1);
        assert_eq!(session.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_drops_channels() {
        let remote = MemoryRemote::new();
        let session = RemoteSession::new(remote.clone());
        session.channel_for(WorkerId(1)).await.unwrap();

        session.mark_faulted();
        assert!(session.reconnect().await);
        assert!(!session.is_faulted());
        assert_eq!(session.retry_count(), 1);
        assert_eq!(session.channel_count().await, 0);
        assert_eq!(remote.disconnects(), 1);

        session.channel_for(WorkerId(1)).await.unwrap();
        assert_eq!(remote.connects(), 2);
        assert_eq!(remote.channels_opened(), 2);
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_fault() {
        let remote = MemoryRemote::new();
        let session = RemoteSession::new(remote.clone());
        session.connect().await.unwrap();

        remote.refuse_connections(true);
        session.mark_faulted();
        assert!(!session.reconnect().await);
        assert!(session.is_faulted());

        remote.refuse_connections(false);
        assert!(session.reconnect().await);
        assert_eq!(session.retry_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconnect_runs_once() {
        let remote = MemoryRemote::new();
        let session = Arc::new(RemoteSession::new(remote.clone()));
        session.connect().await.unwrap();
        remote.set_connect_delay(Duration::from_millis(200));
        session.mark_faulted();

        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let session = session.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                session.reconnect().await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(remote.connects(), 2);
        assert_eq!(session.retry_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconnect_failure_shared() {
        let remote = MemoryRemote::new();
        let session = Arc::new(RemoteSession::new(remote.clone()));
        session.connect().await.unwrap();
        remote.set_connect_delay(Duration::from_millis(200));
        remote.refuse_connections(true);
        session.mark_faulted();

        let barrier = Arc::new(tokio::sync::Barrier::new(6));
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let session = session.clone();
            let barrier = barrier.clone();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                session.reconnect().await
            }));
        }

        for task in tasks {
            assert!(!task.await.unwrap());
        }
        assert_eq!(remote.connect_attempts(), 2);
        assert_eq!(session.retry_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_channel_waits_for_inflight_reconnect() {
        let remote = MemoryRemote::new();
        let session = Arc::new(RemoteSession::new(remote.clone()));
        session.channel_for(WorkerId(1)).await.unwrap();
        remote.set_connect_delay(Duration::from_millis(200));
        session.mark_faulted();

        let reconnecting = {
            let session = session.clone();
            tokio::spawn(async move { session.reconnect().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.channel_for(WorkerId(2)).await.unwrap();
        assert!(reconnecting.await.unwrap());
        assert_eq!(remote.connects(), 2);
        assert_eq!(session.channel_count().await, 1);

        session.teardown().await;
        assert_eq!(remote.disconnects(), remote.connects());
    }

    #[tokio::test]
    async fn test_teardown_clears_everything() {
        let remote = MemoryRemote::new();
        let session = RemoteSession::new(remote.clone());
        session.channel_for(WorkerId(1)).await.unwrap();
        session.channel_for(WorkerId(2)).await.unwrap();

        session.teardown().await;
        assert_eq!(session.channel_count().await, 0);
        assert_eq!(remote.channels_closed(), 2);
        assert_eq!(remote.disconnects(), 1);
    }
}
