use crate::types::{Task, TaskPriority};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Notify;
use tracing::warn;

/// Heap entry ordering tasks by priority band, FIFO within a band.
///
/// Equal-priority tasks are served in arrival order via a monotonic
/// sequence number assigned at enqueue time. A re-queued task receives a
/// fresh sequence number and so re-enters at the back of its band.
#[derive(Debug)]
struct QueuedTask {
    task: Task,
    priority: TaskPriority,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the earlier arrival.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Bounded, concurrency-safe priority queue of pending tasks.
///
/// `push` rejects when the queue is at capacity (backpressure rather than
/// unbounded growth); `pop` awaits a wakeup when the queue is empty so the
/// routing loop never busy-waits.
pub struct TaskQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    capacity: usize,
    seq: AtomicU64,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue a task. Returns `false` (and logs) when the queue is full.
    pub fn push(&self, task: Task) -> bool {
        {
            let mut heap = self.heap.lock();
            if heap.len() >= self.capacity {
                warn!(
                    task_id = %task.id,
                    depth = heap.len(),
                    capacity = self.capacity,
                    "Task queue full, rejecting task"
                );
                return false;
            }
            let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            heap.push(QueuedTask {
                priority: task.priority,
                task,
                seq,
            });
        }
        self.notify.notify_one();
        true
    }

    /// Dequeue the highest-priority task without waiting.
    pub fn try_pop(&self) -> Option<Task> {
        self.heap.lock().pop().map(|q| q.task)
    }

    /// Dequeue the highest-priority task, waiting until one is available.
    pub async fn pop(&self) -> Task {
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_pop() {
                return task;
            }
            notified.await;
        }
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
