use std::sync::{Condvar, Mutex};

/// Counting semaphore over a mutex and condvar.
///
/// The standard library has no semaphore; the pool and work queue both
/// need one whose value mirrors an external count (free handles, queued
/// items), so the classic construction is used directly.
pub struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Increment the count and wake one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }

    #[cfg(test)]
    pub fn value(&self) -> usize {
        *self.count.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_decrements_post_increments() {
        let sem = Semaphore::new(2);
        sem.wait();
        sem.wait();
        assert_eq!(sem.value(), 0);
        sem.post();
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn wait_blocks_until_post() {
        let sem = Arc::new(Semaphore::new(0));
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            sem2.wait();
            true
        });
        thread::sleep(std::time::Duration::from_millis(50));
        sem.post();
        assert!(handle.join().unwrap());
    }
}
