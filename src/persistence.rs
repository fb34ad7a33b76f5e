//! Snapshot writes to the persistence collaborator.
//!
//! All writes of a session go through one [`WriteQueue`], which starts each
//! write only after the previous one has finished, so the backend never sees
//! an older snapshot land after a newer one.
//!
//! A [`DebouncedWriter`] holds at most one pending timer per step.
//! Scheduling again before the timer fires aborts it and starts a new one, so
//! a burst of edits produces a single write carrying the last payload. Once
//! the timer has fired the write is queued and is never cut short.

use crate::gateway::{PersistenceGateway, Snapshot, SnapshotStep};
use crate::notification::Notification;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// Writes a snapshot and reports failure as a notification. Returns whether
/// the write succeeded.
pub async fn write_snapshot(
    gateway: &dyn PersistenceGateway,
    session_id: &str,
    snapshot: Snapshot,
    notifications: &UnboundedSender<Notification>,
) -> bool {
    let step = snapshot.step;
    match gateway.persist(session_id, snapshot).await {
        Ok(()) => {
            debug!("Persisted {:?} snapshot for session {}", step, session_id);
            true
        }
        Err(e) => {
            warn!(
                "Failed to persist {:?} snapshot for session {}: {}",
                step, session_id, e
            );
            if let Some(notification) = Notification::from_error(&e) {
                let _ = notifications.send(notification);
            }
            false
        }
    }
}

type WriteTail = Shared<BoxFuture<'static, ()>>;

/// Ordered, detached writes for one session.
#[derive(Clone)]
pub struct WriteQueue {
    session_id: Arc<str>,
    gateway: Arc<dyn PersistenceGateway>,
    notifications: UnboundedSender<Notification>,
    runtime: Handle,
    tail: Arc<Mutex<WriteTail>>,
}

impl WriteQueue {
    pub fn new(
        session_id: Arc<str>,
        gateway: Arc<dyn PersistenceGateway>,
        notifications: UnboundedSender<Notification>,
        runtime: Handle,
    ) -> Self {
        Self {
            session_id,
            gateway,
            notifications,
            runtime,
            tail: Arc::new(Mutex::new(future::ready(()).boxed().shared())),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Queues `snapshot` behind every write enqueued before it. Returns
    /// without waiting for the backend.
    pub fn enqueue(&self, snapshot: Snapshot) {
        let gateway = Arc::clone(&self.gateway);
        let session_id = Arc::clone(&self.session_id);
        let notifications = self.notifications.clone();

        let mut tail = self.tail.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = tail.clone();
        let handle = self.runtime.spawn(async move {
            previous.await;
            write_snapshot(gateway.as_ref(), &session_id, snapshot, &notifications).await;
        });
        *tail = handle.map(|_| ()).boxed().shared();
    }

    /// Resolves once every write enqueued so far has finished.
    pub async fn flush(&self) {
        let tail = self
            .tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        tail.await;
    }
}

pub struct DebouncedWriter {
    step: SnapshotStep,
    delay: Duration,
    queue: WriteQueue,
    pending: Option<JoinHandle<()>>,
}

impl DebouncedWriter {
    pub fn new(step: SnapshotStep, delay: Duration, queue: WriteQueue) -> Self {
        Self {
            step,
            delay,
            queue,
            pending: None,
        }
    }

    pub fn step(&self) -> SnapshotStep {
        self.step
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)starts the quiet period; `payload` is written when it elapses.
    pub fn schedule(&mut self, payload: serde_json::Value) {
        self.cancel();

        let snapshot = Snapshot {
            step: self.step,
            payload,
        };
        let delay = self.delay;
        let queue = self.queue.clone();

        self.pending = Some(self.queue.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(snapshot);
        }));
    }

    /// Drops any pending timer and queues `payload` right away.
    pub fn write_now(&mut self, payload: serde_json::Value) {
        self.cancel();
        self.queue.enqueue(Snapshot {
            step: self.step,
            payload,
        });
    }

    /// True while a timer is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            if !handle.is_finished() {
                debug!(
                    "Cancelled pending {:?} write for session {}",
                    self.step,
                    self.queue.session_id()
                );
            }
            handle.abort();
        }
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        self.cancel();
    }
}
