//! Queue entry wrapper giving `Task` a priority-then-FIFO ordering inside
//! a `BinaryHeap` (which pops the greatest element first, not insertion
//! order, hence the explicit `Ord` impl below).

use std::cmp::Ordering;

use crate::types::Task;

#[derive(Debug, Clone)]
pub struct PendingTask {
    task: Task,
    /// Overrides the task's own sequence for a requeue-at-head, so a
    /// task bounced back by `select_bot` jumps ahead of same-priority
    /// tasks submitted after it without mutating its original sequence.
    order_key: i128,
}

impl PendingTask {
    pub fn new(task: Task) -> Self {
        let order_key = task.sequence as i128;
        Self { task, order_key }
    }

    /// Re-inserts a task that couldn't be assigned this cycle at the
    /// head of its priority band.
    pub fn requeue_head(task: Task) -> Self {
        Self {
            task,
            order_key: i128::MIN,
        }
    }

    pub fn priority(&self) -> u8 {
        self.task.priority
    }

    pub fn deadline(&self) -> chrono::DateTime<chrono::Utc> {
        self.task.deadline
    }

    pub fn into_task(self) -> Task {
        self.task
    }
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.order_key == other.order_key
    }
}

impl Eq for PendingTask {}

impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.order_key.cmp(&self.order_key))
    }
}
