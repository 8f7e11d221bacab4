//! # ProxyDirectory: one consumer queue per remote identity.
//!
//! All consumers living in the same remote process share one [`ConsumerQueue`] and
//! therefore one worker, so a dead process stalls only its own queue.
//!
//! ```text
//! get_or_create(identity)
//!   ├─ present ──► Arc<ConsumerQueue>
//!   └─ absent  ──► new queue + runtime.spawn(run_worker) ──► Arc<ConsumerQueue>
//!
//! remove_queue(identity)
//!   └─ entry out ──► set_state(false) ──► release directory holder ──► worker exits
//! ```
//!
//! ## Rules
//! - Lookup and creation happen under one mutex hold; two callers never create two
//!   queues for the same identity.
//! - The directory owns one holder reference on each queue it stores.
//! - Workers are spawned on the runtime captured at construction, so any thread
//!   may create a queue, in or out of that runtime.
//! - Lock order: registry, then directory, then queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::consumer::ServerIdentity;
use crate::error::HubError;
use crate::events::Bus;
use crate::queue::{ConsumerQueue, UnregisterRequest};

struct Entry {
    queue: Arc<ConsumerQueue>,
    worker: JoinHandle<()>,
}

struct Inner {
    entries: HashMap<ServerIdentity, Entry>,
    closed: bool,
}

/// Map from server identity to its consumer queue and worker.
pub struct ProxyDirectory {
    inner: Mutex<Inner>,
    cfg: Config,
    bus: Bus,
    reports: mpsc::UnboundedSender<UnregisterRequest>,
    token: CancellationToken,
    runtime: Handle,
}

impl ProxyDirectory {
    /// Creates an empty directory.
    ///
    /// Queues report dead consumers on `reports`; their workers run on `runtime` and
    /// stop when `token` is cancelled.
    pub fn new(
        cfg: Config,
        bus: Bus,
        reports: mpsc::UnboundedSender<UnregisterRequest>,
        token: CancellationToken,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                closed: false,
            }),
            cfg,
            bus,
            reports,
            token,
            runtime,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the directory for a check-then-act sequence.
    pub fn lock(&self) -> DirectoryGuard<'_> {
        DirectoryGuard { inner: self.inner() }
    }

    /// Returns the queue for `identity`, creating it and spawning its worker if needed.
    ///
    /// # Errors
    /// - [`HubError::ShuttingDown`] once [`close`](Self::close) has run.
    /// - [`HubError::OutOfMemory`] if the map cannot grow.
    pub fn get_or_create(&self, identity: &ServerIdentity) -> Result<Arc<ConsumerQueue>, HubError> {
        let mut inner = self.inner();
        if inner.closed {
            return Err(HubError::ShuttingDown);
        }
        if let Some(entry) = inner.entries.get(identity) {
            return Ok(Arc::clone(&entry.queue));
        }

        inner.entries.try_reserve(1).map_err(|_| HubError::OutOfMemory {
            context: "growing the proxy directory",
        })?;

        let queue = Arc::new(ConsumerQueue::new(
            identity.clone(),
            &self.cfg,
            self.bus.clone(),
            self.reports.clone(),
            self.token.child_token(),
        ));
        let worker = self.runtime.spawn(Arc::clone(&queue).run_worker());
        inner.entries.insert(
            identity.clone(),
            Entry {
                queue: Arc::clone(&queue),
                worker,
            },
        );
        drop(inner);

        tracing::debug!(%identity, "consumer queue created");
        Ok(queue)
    }

    /// Removes and invalidates the queue for `identity`. Returns `false` if absent.
    pub fn remove_queue(&self, identity: &ServerIdentity) -> bool {
        self.lock().remove(identity).is_some()
    }

    /// Current identities and their queues.
    pub fn snapshot(&self) -> Vec<(ServerIdentity, Arc<ConsumerQueue>)> {
        self.inner()
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), Arc::clone(&e.queue)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().entries.is_empty()
    }

    /// Refuses further creation and hands every entry (with its worker) to the caller.
    ///
    /// Queues are returned still valid and still holding the directory's reference;
    /// the caller tears them down.
    pub fn close(&self) -> Vec<(ServerIdentity, Arc<ConsumerQueue>, JoinHandle<()>)> {
        let mut inner = self.inner();
        inner.closed = true;
        inner
            .entries
            .drain()
            .map(|(id, e)| (id, e.queue, e.worker))
            .collect()
    }
}

/// Exclusive access to the directory, for atomic check-then-act.
pub struct DirectoryGuard<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl DirectoryGuard<'_> {
    pub fn contains(&self, identity: &ServerIdentity) -> bool {
        self.inner.entries.contains_key(identity)
    }

    pub fn get(&self, identity: &ServerIdentity) -> Option<Arc<ConsumerQueue>> {
        self.inner.entries.get(identity).map(|e| Arc::clone(&e.queue))
    }

    /// Removes the entry, invalidates its queue and drops the directory's holder
    /// reference. Items still queued are abandoned. The worker exits on its next
    /// wake and is left detached.
    pub fn remove(&mut self, identity: &ServerIdentity) -> Option<Arc<ConsumerQueue>> {
        let Entry { queue, worker } = self.inner.entries.remove(identity)?;
        queue.set_state(false);
        queue.release();
        let abandoned = queue.clear();
        drop(worker);

        tracing::debug!(%identity, abandoned, "consumer queue removed");
        Some(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (ProxyDirectory, mpsc::UnboundedReceiver<UnregisterRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dir = ProxyDirectory::new(
            Config::default(),
            Bus::new(16),
            tx,
            CancellationToken::new(),
            Handle::current(),
        );
        (dir, rx)
    }

    #[tokio::test]
    async fn same_identity_shares_one_queue() {
        let (dir, _rx) = directory();
        let id = ServerIdentity::from("rip-01:4410");

        let a = dir.get_or_create(&id).unwrap();
        let b = dir.get_or_create(&id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = dir.get_or_create(&ServerIdentity::from("rip-02:4410")).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(dir.len(), 2);
    }

    #[tokio::test]
    async fn remove_invalidates_and_forgets() {
        let (dir, _rx) = directory();
        let id = ServerIdentity::from("rip-01:4410");
        let q = dir.get_or_create(&id).unwrap();

        assert!(dir.remove_queue(&id));
        assert!(!q.have_valid_state());
        assert_eq!(q.queue().holders(), 0);
        assert!(!dir.lock().contains(&id));
        assert!(!dir.remove_queue(&id));

        let fresh = dir.get_or_create(&id).unwrap();
        assert!(!Arc::ptr_eq(&q, &fresh));
    }

    #[tokio::test]
    async fn closed_directory_refuses_creation() {
        let (dir, _rx) = directory();
        dir.get_or_create(&ServerIdentity::from("a")).unwrap();

        let entries = dir.close();
        assert_eq!(entries.len(), 1);
        assert!(dir.is_empty());
        assert_eq!(
            dir.get_or_create(&ServerIdentity::from("b")).unwrap_err(),
            HubError::ShuttingDown
        );
        for (_, q, worker) in entries {
            q.set_state(false);
            worker.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queues_can_be_created_off_the_runtime() {
        let (dir, _rx) = directory();
        let dir = Arc::new(dir);

        let created = {
            let dir = Arc::clone(&dir);
            std::thread::spawn(move || dir.get_or_create(&ServerIdentity::from("rip-01:4410")).is_ok())
                .join()
                .unwrap()
        };
        assert!(created);

        let entries = dir.close();
        for (_, q, worker) in entries {
            q.set_state(false);
            worker.await.unwrap();
        }
    }
}
