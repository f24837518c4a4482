//! FIFO task queue drained when a gate clears

use std::collections::VecDeque;

/// Typed queue of deferred tasks
#[derive(Debug, Clone)]
pub struct TaskQueue<T> {
    tasks: VecDeque<T>,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub fn enqueue(&mut self, task: T) {
        self.tasks.push_back(task);
    }

    /// Take the oldest task
    pub fn dequeue(&mut self) -> Option<T> {
        self.tasks.pop_front()
    }

    /// The oldest task, left in place
    pub fn front(&self) -> Option<&T> {
        self.tasks.front()
    }

    /// Take every queued task, oldest first
    pub fn drain(&mut self) -> Vec<T> {
        self.tasks.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}
