//! The corrective dispatch queue.
//!
//! A min-priority queue of [`CorrectiveTask`]s: lower priority value
//! dequeues first, FIFO within equal priorities (a monotonic sequence
//! number breaks ties deterministically). `enqueue` never blocks and never
//! rejects — duplicate coordinates are allowed and absorbed downstream by
//! the workers' already-correct check. `dequeue` parks the caller until a
//! task is available.
//!
//! Internally: a binary heap under a short `std::sync::Mutex` (never held
//! across an await) plus a `tokio::sync::Notify` to wake parked consumers.
//! Depth is unbounded by construction; it is naturally bounded by the
//! guarded-region size times the redundancy of at-least-once delivery.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::guard::CorrectiveTask;

#[derive(Debug)]
struct QueueState {
    // Reverse turns the max-heap into a min-heap on (priority, seq).
    heap: BinaryHeap<Reverse<Entry>>,
    next_seq: u64,
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    priority: i32,
    seq: u64,
    task: CorrectiveTask,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered queue of corrective tasks.
#[derive(Debug)]
pub struct ReconcileQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl Default for ReconcileQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Notify::new(),
        }
    }

    /// Enqueue a task. Never blocks, never rejects.
    pub fn enqueue(&self, task: CorrectiveTask) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Reverse(Entry {
                priority: task.priority,
                seq,
                task,
            }));
        }
        self.available.notify_one();
    }

    /// Pop the most urgent task if one is available.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<CorrectiveTask> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.heap.pop().map(|Reverse(entry)| entry.task)
    }

    /// Pop the most urgent task, waiting until one is enqueued.
    pub async fn dequeue(&self) -> CorrectiveTask {
        loop {
            // Register interest before the emptiness check so an enqueue
            // that lands in between still wakes us.
            let notified = self.available.notified();
            if let Some(task) = self.try_dequeue() {
                // Pass any stored wakeup on to the next parked consumer;
                // there may be more tasks than notifications.
                self.available.notify_one();
                return task;
            }
            notified.await;
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
