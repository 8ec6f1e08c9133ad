//! In-memory remote host.
//!
//! A [`Transport`] whose connections and channels operate on a shared
//! in-process file map. Used for tests: it counts connects, channels and
//! primitive calls, and can inject transport faults.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sftpfs_vfs::path;

use crate::error::{RemoteError, RemoteResult, StatusKind};
use crate::transport::{
    Connection, RemoteAttrs, RemoteChannel, RemoteEntry, S_IFDIR, S_IFREG, SetAttrs, Transport,
};

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    attrs: RemoteAttrs,
}

impl Node {
    fn file(mode: u32) -> Self {
        Self {
            data: Vec::new(),
            attrs: RemoteAttrs {
                permissions: S_IFREG | mode,
                atime: now_secs(),
                mtime: now_secs(),
                size: 0,
            },
        }
    }

    fn dir(mode: u32) -> Self {
        Self {
            data: Vec::new(),
            attrs: RemoteAttrs {
                permissions: S_IFDIR | mode,
                atime: now_secs(),
                mtime: now_secs(),
                size: 0,
            },
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Default)]
struct RemoteState {
    nodes: Mutex<HashMap<String, Node>>,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    channels_opened: AtomicUsize,
    channels_closed: AtomicUsize,
    primitive_calls: AtomicUsize,
    pending_faults: AtomicUsize,
    refuse: AtomicBool,
    connect_delay: Mutex<Duration>,
}

impl RemoteState {
    /// Count a primitive call, failing it if a fault is queued.
    fn begin(&self) -> RemoteResult<()> {
        self.primitive_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RemoteError::transport("injected connection reset"));
        }
        Ok(())
    }

    fn check_parent(nodes: &HashMap<String, Node>, p: &str) -> RemoteResult<()> {
        match nodes.get(path::parent(p)) {
            Some(node) if node.attrs.is_dir() => Ok(()),
            Some(_) => Err(RemoteError::status(StatusKind::Failure, "parent is not a directory")),
            None => Err(RemoteError::not_found(path::parent(p))),
        }
    }
}

/// Shared handle to an in-memory remote host.
#[derive(Debug, Clone)]
pub struct MemoryRemote {
    state: Arc<RemoteState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let state = RemoteState::default();
        state.nodes.lock().insert("/".to_string(), Node::dir(0o755));
        Self {
            state: Arc::new(state),
        }
    }

    /// Seed a file, creating missing parent directories.
    pub fn insert_file(&self, p: &str, data: &[u8], mode: u32) {
        let mut nodes = self.state.nodes.lock();
        Self::ensure_parents(&mut nodes, p);
        let mut node = Node::file(mode);
        node.data = data.to_vec();
        node.attrs.size = data.len() as u64;
        nodes.insert(p.to_string(), node);
    }

    /// Seed a directory, creating missing parents.
    pub fn insert_dir(&self, p: &str) {
        let mut nodes = self.state.nodes.lock();
        Self::ensure_parents(&mut nodes, p);
        nodes.entry(p.to_string()).or_insert_with(|| Node::dir(0o755));
    }

    fn ensure_parents(nodes: &mut HashMap<String, Node>, p: &str) {
        let mut current = String::new();
        for segment in path::segments(path::parent(p)) {
            current.push('/');
            current.push_str(segment);
            nodes
                .entry(current.clone())
                .or_insert_with(|| Node::dir(0o755));
        }
    }

    /// Attributes of `p` as stored, bypassing counters and faults.
    pub fn attrs(&self, p: &str) -> Option<RemoteAttrs> {
        self.state.nodes.lock().get(p).map(|n| n.attrs)
    }

    /// Contents of `p` as stored.
    pub fn contents(&self, p: &str) -> Option<Vec<u8>> {
        self.state.nodes.lock().get(p).map(|n| n.data.clone())
    }

    pub fn exists(&self, p: &str) -> bool {
        self.state.nodes.lock().contains_key(p)
    }

    /// Fail the next `n` primitive calls with a transport error.
    pub fn inject_faults(&self, n: usize) {
        self.state.pending_faults.store(n, Ordering::SeqCst);
    }

    /// Make every connect attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Delay every connect attempt, successful or not.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Successful connects.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.state.channels_opened.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.state.channels_closed.load(Ordering::SeqCst)
    }

    /// Primitive calls issued over any channel.
    pub fn primitive_calls(&self) -> usize {
        self.state.primitive_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryRemote {
    type Connection = MemoryConnection;

    async fn connect(&self) -> RemoteResult<MemoryConnection> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(RemoteError::transport("connection refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            state: self.state.clone(),
        })
    }
}

/// Connection to a [`MemoryRemote`].
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<RemoteState>,
}

#[async_trait]
impl Connection for MemoryConnection {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> RemoteResult<MemoryChannel> {
        self.state.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryChannel {
            state: self.state.clone(),
        })
    }

    async fn disconnect(&self) -> RemoteResult<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Channel to a [`MemoryRemote`].
#[derive(Debug)]
pub struct MemoryChannel {
    state: Arc<RemoteState>,
}

#[async_trait]
impl RemoteChannel for MemoryChannel {
    async fn stat(&self, p: &str) -> RemoteResult<RemoteAttrs> {
        self.state.begin()?;
        self.state
            .nodes
            .lock()
            .get(p)
            .map(|n| n.attrs)
            .ok_or_else(|| RemoteError::not_found(p))
    }

    async fn list(&self, p: &str) -> RemoteResult<Vec<RemoteEntry>> {
        self.state.begin()?;
        let nodes = self.state.nodes.lock();
        match nodes.get(p) {
            Some(node) if node.attrs.is_dir() => {}
            Some(_) => return Err(RemoteError::status(StatusKind::Failure, "not a directory")),
            None => return Err(RemoteError::not_found(p)),
        }

        let mut entries = vec![
            RemoteEntry {
                name: ".".into(),
                attrs: nodes[p].attrs,
            },
            RemoteEntry {
                name: "..".into(),
                attrs: nodes[path::parent(p)].attrs,
            },
        ];
        entries.extend(
            nodes
                .iter()
                .filter(|(k, _)| k.as_str() != p && path::parent(k) == p)
                .map(|(k, n)| RemoteEntry {
                    name: path::file_name(k).to_string(),
                    attrs: n.attrs,
                }),
        );
        Ok(entries)
    }

    async fn read(&self, p: &str, offset: u64, len: u32) -> RemoteResult<Vec<u8>> {
        self.state.begin()?;
        let nodes = self.state.nodes.lock();
        let node = nodes.get(p).ok_or_else(|| RemoteError::not_found(p))?;
        let start = (offset as usize).min(node.data.len());
        let end = (start + len as usize).min(node.data.len());
        Ok(node.data[start..end].to_vec())
    }

    async fn write(&self, p: &str, offset: u64, data: &[u8]) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        let node = nodes.get_mut(p).ok_or_else(|| RemoteError::not_found(p))?;
        let offset = offset as usize;
        if offset + data.len() > node.data.len() {
            node.data.resize(offset + data.len(), 0);
        }
        node.data[offset..offset + data.len()].copy_from_slice(data);
        node.attrs.size = node.data.len() as u64;
        node.attrs.mtime = now_secs();
        Ok(())
    }

    async fn create(&self, p: &str) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        RemoteState::check_parent(&nodes, p)?;
        nodes.insert(p.to_string(), Node::file(0o644));
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        if !nodes.contains_key(from) {
            return Err(RemoteError::not_found(from));
        }
        if nodes.contains_key(to) {
            return Err(RemoteError::status(StatusKind::Failure, "target exists"));
        }
        RemoteState::check_parent(&nodes, to)?;

        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| k.as_str() == from || k.starts_with(&format!("{from}/")))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                nodes.insert(format!("{to}{}", &old[from.len()..]), node);
            }
        }
        Ok(())
    }

    async fn remove(&self, p: &str) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        match nodes.get(p) {
            Some(node) if node.attrs.is_dir() => {
                Err(RemoteError::status(StatusKind::Failure, "is a directory"))
            }
            Some(_) => {
                nodes.remove(p);
                Ok(())
            }
            None => Err(RemoteError::not_found(p)),
        }
    }

    async fn mkdir(&self, p: &str) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        if nodes.contains_key(p) {
            return Err(RemoteError::status(StatusKind::Failure, "already exists"));
        }
        RemoteState::check_parent(&nodes, p)?;
        nodes.insert(p.to_string(), Node::dir(0o755));
        Ok(())
    }

    async fn rmdir(&self, p: &str) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        match nodes.get(p) {
            Some(node) if node.attrs.is_dir() => {}
            Some(_) => return Err(RemoteError::status(StatusKind::Failure, "not a directory")),
            None => return Err(RemoteError::not_found(p)),
        }
        if nodes.keys().any(|k| k.as_str() != p && path::parent(k) == p) {
            return Err(RemoteError::status(StatusKind::Failure, "directory not empty"));
        }
        nodes.remove(p);
        Ok(())
    }

    async fn set_attrs(&self, p: &str, attrs: SetAttrs) -> RemoteResult<()> {
        self.state.begin()?;
        let mut nodes = self.state.nodes.lock();
        let node = nodes.get_mut(p).ok_or_else(|| RemoteError::not_found(p))?;
        if let Some(size) = attrs.size {
            node.data.resize(size as usize, 0);
            node.attrs.size = size;
        }
        if let Some(mode) = attrs.permissions {
            node.attrs.permissions = (node.attrs.permissions & !0o7777) | (mode & 0o7777);
        }
        if let Some((atime, mtime)) = attrs.times {
            node.attrs.atime = atime;
            node.attrs.mtime = mtime;
        }
        Ok(())
    }

    async fn close(&self) -> RemoteResult<()> {
        self.state.channels_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
