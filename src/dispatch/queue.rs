use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::{
        Mutex,
        atomic::{self, AtomicU64},
    },
    time::Duration,
};

use tokio::sync::Notify;

use crate::models::MessageId;

/// Heap entry ordered by (priority, enqueue sequence), so equal priorities
/// drain in FIFO order.
#[derive(Debug)]
struct QueueEntry {
    priority: i64,
    seq: u64,
    message_id: MessageId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Producer-consumer priority queue feeding the worker pool. Priority 1 is
/// the most urgent; within a priority messages leave in enqueue order.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<Reverse<QueueEntry>>>,
    seq: AtomicU64,
    notify: Notify,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, priority: i64, message_id: MessageId) {
        let seq = self.seq.fetch_add(1, atomic::Ordering::Relaxed);

        self.heap
            .lock()
            .expect("queue lock poisoned")
            .push(Reverse(QueueEntry {
                priority,
                seq,
                message_id,
            }));
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<(i64, MessageId)> {
        self.heap
            .lock()
            .expect("queue lock poisoned")
            .pop()
            .map(|Reverse(entry)| (entry.priority, entry.message_id))
    }

    /// Wait up to `wait` for an entry. The pop itself is atomic; no entry is
    /// ever handed to two consumers.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<(i64, MessageId)> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            // register for a wakeup before checking, so a concurrent push
            // between the check and the await is not lost
            let notified = self.notify.notified();

            if let Some(entry) = self.try_pop() {
                return Some(entry);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
