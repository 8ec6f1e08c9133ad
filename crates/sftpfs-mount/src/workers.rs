//! Fixed pool of worker tokens.
//!
//! Every FUSE callback runs while holding one token. The token's
//! [`WorkerId`] is what the remote session keys its channels on, so the pool
//! size bounds both concurrent remote calls and open channels.

use std::sync::Arc;

use parking_lot::Mutex;
use sftpfs_vfs::WorkerId;
use tokio::sync::Notify;

pub struct WorkerPool {
    free: Mutex<Vec<WorkerId>>,
    available: Notify,
    size: usize,
}

impl WorkerPool {
    /// A pool of `size` tokens, at least one.
    pub fn new(size: usize) -> Arc<Self> {
        let size = size.max(1);
        let free = (0..size as u32).rev().map(WorkerId).collect();
        Arc::new(Self {
            free: Mutex::new(free),
            available: Notify::new(),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tokens not currently handed out.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Wait for a free token.
    pub async fn acquire(self: &Arc<Self>) -> WorkerToken {
        loop {
            let popped = {
                let mut free = self.free.lock();
                free.pop().map(|id| (id, !free.is_empty()))
            };
            if let Some((id, more)) = popped {
                // A release stores at most one wakeup; pass it on while
                // tokens remain so no waiter is stranded.
                if more {
                    self.available.notify_one();
                }
                return WorkerToken {
                    id,
                    pool: self.clone(),
                };
            }
            self.available.notified().await;
        }
    }

    fn release(&self, id: WorkerId) {
        self.free.lock().push(id);
        self.available.notify_one();
    }
}

/// A held worker identity. Returned to the pool on drop.
pub struct WorkerToken {
    id: WorkerId,
    pool: Arc<WorkerPool>,
}

impl WorkerToken {
    pub fn id(&self) -> WorkerId {
        self.id
    }
}

impl Drop for WorkerToken {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}
