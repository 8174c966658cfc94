//! Blocking FIFO of admitted work items.

use std::collections::{HashSet, VecDeque};

use tokio::sync::{Mutex, Notify};
use tracing::debug;
use vision_core::{RequestId, Specialization, WorkItem};

use crate::error::{QueueError, QueueResult};

#[derive(Default)]
struct QueueInner {
    items: VecDeque<WorkItem>,
    /// Request ids queued or in flight. An id appears here at most once.
    live: HashSet<RequestId>,
    in_flight: usize,
    closed: bool,
}

#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    /// Wakes consumers blocked in `pop`.
    available: Notify,
    /// Wakes callers blocked in `join`.
    drained: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Fails once the queue is closed, or if the request
    /// already has a live item.
    pub async fn push(&self, item: WorkItem) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if !inner.live.insert(item.request_id.clone()) {
            return Err(QueueError::Duplicate(item.request_id));
        }
        debug!(request_id = %item.request_id, depth = inner.items.len() + 1, "work item queued");
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Take the next item, waiting while the queue is empty. Returns `None`
    /// once the queue is closed and drained.
    pub async fn pop(&self) -> Option<WorkItem> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.items.pop_front() {
                    inner.in_flight += 1;
                    let more = !inner.items.is_empty();
                    drop(inner);
                    if more {
                        self.available.notify_one();
                    }
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a popped item finished. Unblocks `join` once nothing is queued
    /// or in flight.
    pub async fn task_done(&self, request_id: &str) {
        let mut inner = self.inner.lock().await;
        if inner.live.remove(request_id) {
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        let idle = inner.items.is_empty() && inner.in_flight == 0;
        drop(inner);
        if idle {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every pushed item has been popped and marked done.
    pub async fn join(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().await;
                if inner.items.is_empty() && inner.in_flight == 0 {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting items and wake every blocked consumer.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.available.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Items waiting to be popped.
    pub async fn depth(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Queued plus in-flight items.
    pub async fn outstanding(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.items.len() + inner.in_flight
    }

    /// Specialization of the item at the head of the queue.
    pub async fn peek_specialization(&self) -> Option<Specialization> {
        let inner = self.inner.lock().await;
        inner.items.front().map(|item| item.specialization.clone())
    }
}
