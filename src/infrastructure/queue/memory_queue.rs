use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::domain::job::CrawlJob;

/// Items that carry their own queue priority; higher runs first.
pub trait Prioritized {
    fn priority(&self) -> i32;
}

impl Prioritized for CrawlJob {
    fn priority(&self) -> i32 {
        self.priority
    }
}

struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence number
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

/// Bounded in-process priority queue, FIFO within a priority.
///
/// The lock is held only to push or pop; consumers park on a `Notify`.
pub struct JobQueue<T> {
    inner: Mutex<Inner<T>>,
    notify: Notify,
    capacity: usize,
}

impl<T: Prioritized> JobQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push without waiting. A full queue hands the item back.
    pub async fn try_enqueue(&self, item: T) -> Result<(), T> {
        {
            let mut inner = self.inner.lock().await;
            if inner.heap.len() >= self.capacity {
                return Err(item);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry {
                priority: item.priority(),
                seq,
                item,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Next item, or `None` once `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(entry) = self.inner.lock().await.heap.pop() {
                return Some(entry.item);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Remove everything still queued, highest priority first.
    pub async fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock().await;
        let mut items = Vec::with_capacity(inner.heap.len());
        while let Some(entry) = inner.heap.pop() {
            items.push(entry.item);
        }
        items
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
