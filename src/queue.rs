//! Hand-off queue between the watcher and the aggregator.
//!
//! The queue is an unbounded FIFO guarded by a [`Mutex`], with a [`Condvar`]
//! so a consumer can block until an entry arrives instead of checking
//! [`WorkQueue::is_empty`] and then popping. Any number of producers and
//! consumers may share it; [`WorkQueue::wait_pop`] and [`WorkQueue::try_pop`]
//! are atomic with respect to each other.
//!
//! There is no capacity bound and so no backpressure: a burst of creations
//! simply grows the queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry at the tail and wake one waiting consumer.
    pub fn push(&self, item: T) {
        self.lock().items.push_back(item);
        self.available.notify_one();
    }

    /// Remove and return the head.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty. Use [`WorkQueue::try_pop`] or
    /// [`WorkQueue::wait_pop`] unless emptiness is already known.
    pub fn pop(&self) -> T {
        match self.try_pop() {
            Some(item) => item,
            None => panic!("pop called on an empty WorkQueue"),
        }
    }

    /// Remove and return the head, or `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Block until an entry is available, the queue is closed, or `timeout`
    /// elapses.
    ///
    /// Entries queued before [`WorkQueue::close`] are still handed out;
    /// `None` means the wait timed out or the queue is closed and empty.
    pub fn wait_pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Close the queue and wake every waiting consumer.
    ///
    /// Consumers drain what is left and then stop waiting.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new();
        queue.push("a");
        queue.push("b");
        queue.push("c");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), "a");
        assert_eq!(queue.try_pop(), Some("b"));
        assert_eq!(queue.wait_pop(Duration::ZERO), Some("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_no_deduplication() {
        let queue = WorkQueue::new();
        queue.push("/in/core.a.0.lz4");
        queue.push("/in/core.a.0.lz4");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    #[should_panic(expected = "empty WorkQueue")]
    fn test_pop_empty_fails_fast() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        queue.pop();
    }

    #[test]
    fn test_wait_pop_times_out() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let start = Instant::now();
        assert_eq!(queue.wait_pop(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_pop_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(7u32);
        assert_eq!(consumer.join().unwrap(), Some(7));
    }

    #[test]
    fn test_close_wakes_waiters() {
        let queue: Arc<WorkQueue<u32>> = Arc::new(WorkQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.wait_pop(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        queue.close();
        assert_eq!(consumer.join().unwrap(), None);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(queue.is_closed());
    }

    #[test]
    fn test_closed_queue_hands_out_remaining_entries() {
        let queue = WorkQueue::new();
        queue.push(1u32);
        queue.push(2u32);
        queue.close();

        let start = Instant::now();
        assert_eq!(queue.wait_pop(Duration::from_secs(10)), Some(1));
        assert_eq!(queue.wait_pop(Duration::from_secs(10)), Some(2));
        assert_eq!(queue.wait_pop(Duration::from_secs(10)), None);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(WorkQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(p * 1000 + i);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut drained = Vec::new();
        while let Some(item) = queue.try_pop() {
            drained.push(item);
        }
        assert_eq!(drained.len(), 1000);
    }
}
