use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Bounded blocking FIFO used as the log sink's cross-thread handoff.
///
/// `push` refuses when the queue is at capacity rather than blocking the
/// producer; the caller decides what to do with the rejected item (the
/// logger falls back to a synchronous write).
pub struct BlockQueue<T> {
    inner: Mutex<VecDeque<T>>,
    cv: Condvar,
    capacity: usize,
}

impl<T> BlockQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            cv: Condvar::new(),
            capacity,
        }
    }

    /// Hands the item back when the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= self.capacity {
            return Err(item);
        }
        q.push_back(item);
        self.cv.notify_one();
        Ok(())
    }

    /// Block until an item is available.
    pub fn pop(&self) -> T {
        let mut q = self.inner.lock().unwrap();
        loop {
            if let Some(item) = q.pop_front() {
                return item;
            }
            q = self.cv.wait(q).unwrap();
        }
    }

    /// Block up to `timeout`; None on expiry.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut q = self.inner.lock().unwrap();
        if let Some(item) = q.pop_front() {
            return Some(item);
        }
        let (mut q, _expired) = self.cv.wait_timeout(q, timeout).unwrap();
        q.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q = BlockQueue::new(4);
        assert!(q.push(1).is_ok());
        assert!(q.push(2).is_ok());
        assert!(q.push(3).is_ok());
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
    }

    #[test]
    fn push_hands_item_back_when_full() {
        let q = BlockQueue::new(2);
        assert!(q.push("a").is_ok());
        assert!(q.push("b").is_ok());
        assert_eq!(q.push("c"), Err("c"));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(BlockQueue::new(1));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(50));
        q.push(42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn pop_timeout_expires_on_empty() {
        let q: BlockQueue<u8> = BlockQueue::new(1);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), None);
    }
}
