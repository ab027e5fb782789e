//! Database connection pool and the in-memory credential cache.
//!
//! The pool hands out live handles under a counting semaphore whose value
//! always equals the free-list length; a [`PooledConn`] guard returns its
//! handle on every exit path. The credential cache has its own lock,
//! independent of anything else in the process.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, RwLock};

use crate::pg::{PgConfig, PgConnection, PgResult};
use crate::sync::Semaphore;

/// Fixed-size pool of handles of type `T`, acquisition gated by a
/// semaphore so waiters block instead of spinning.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    reserve: Semaphore,
    size: usize,
}

impl<T> Pool<T> {
    pub fn new(handles: Vec<T>) -> Self {
        let size = handles.len();
        Self {
            free: Mutex::new(handles),
            reserve: Semaphore::new(size),
            size,
        }
    }

    /// Block until a handle is free, then borrow it. The guard releases
    /// on drop.
    pub fn acquire(&self) -> PooledConn<'_, T> {
        self.reserve.wait();
        let handle = self
            .free
            .lock()
            .unwrap()
            .pop()
            .expect("semaphore admitted past an empty free list");
        PooledConn {
            handle: Some(handle),
            pool: self,
        }
    }

    fn release(&self, handle: T) {
        self.free.lock().unwrap().push(handle);
        self.reserve.post();
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn free_count(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    /// Drop every pooled handle. Outstanding borrows still return
    /// afterwards; they just land in a pool nobody acquires from again.
    pub fn destroy(&self) {
        self.free.lock().unwrap().clear();
    }
}

/// Scoped borrow of a pooled handle (C5): `Deref`s to the handle and
/// returns it to the pool when dropped, whatever the exit path.
pub struct PooledConn<'a, T> {
    handle: Option<T>,
    pool: &'a Pool<T>,
}

impl<T> Deref for PooledConn<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.handle.as_ref().unwrap()
    }
}

impl<T> DerefMut for PooledConn<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.handle.as_mut().unwrap()
    }
}

impl<T> Drop for PooledConn<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

pub type DbPool = Pool<PgConnection>;

/// Open `size` connections up front; any failure is fatal to startup.
pub fn connect_pool(config: &PgConfig, size: usize) -> PgResult<DbPool> {
    let mut handles = Vec::with_capacity(size);
    for _ in 0..size {
        handles.push(PgConnection::connect(config)?);
    }
    Ok(Pool::new(handles))
}

/// In-memory username/password map backing the login and registration
/// endpoints. Reads are the common case; registration is rare.
pub struct UserTable {
    users: RwLock<HashMap<String, String>>,
}

impl UserTable {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Prime the cache from the user table at startup.
    pub fn prime(&self, pool: &DbPool) -> PgResult<()> {
        let mut conn = pool.acquire();
        let rows = conn.query_simple("SELECT username, passwd FROM \"user\"")?;
        let mut users = self.users.write().unwrap();
        for row in rows {
            if let (Some(name), Some(pw)) = (row.get(0), row.get(1)) {
                users.insert(name.to_string(), pw.to_string());
            }
        }
        log::info!("primed {} user credentials", users.len());
        Ok(())
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .read()
            .unwrap()
            .get(username)
            .map(|pw| pw == password)
            .unwrap_or(false)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.read().unwrap().contains_key(username)
    }

    /// Insert into the database (when one is attached), then publish to
    /// the cache. Returns false for duplicates and database failures.
    pub fn register(&self, username: &str, password: &str, pool: Option<&DbPool>) -> bool {
        if self.contains(username) {
            return false;
        }
        if let Some(pool) = pool {
            let mut conn = pool.acquire();
            if let Err(e) = conn.execute(
                "INSERT INTO \"user\" (username, passwd) VALUES ($1, $2)",
                &[username, password],
            ) {
                log::error!("registration insert failed for {}: {}", username, e);
                return false;
            }
        }
        self.users
            .write()
            .unwrap()
            .insert(username.to_string(), password.to_string());
        true
    }

    #[cfg(test)]
    pub fn insert_for_test(&self, username: &str, password: &str) {
        self.users
            .write()
            .unwrap()
            .insert(username.to_string(), password.to_string());
    }
}

impl Default for UserTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pool_accounting_holds() {
        let pool = Pool::new(vec![1, 2, 3]);
        assert_eq!(pool.free_count(), 3);
        {
            let a = pool.acquire();
            let b = pool.acquire();
            assert_eq!(pool.free_count(), 1);
            assert_eq!(*a + *b, 5);
        }
        // The scoped-handle law: both guards dropped, counts restored.
        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.free_count(), pool.size());
    }

    #[test]
    fn guard_returns_on_panic_path() {
        let pool = Arc::new(Pool::new(vec![7]));
        let pool2 = Arc::clone(&pool);
        let result = thread::spawn(move || {
            let _guard = pool2.acquire();
            panic!("handler fault");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn acquire_blocks_until_release() {
        let pool = Arc::new(Pool::new(vec![0u8]));
        let held = pool.acquire();
        let pool2 = Arc::clone(&pool);
        let waiter = thread::spawn(move || {
            let _h = pool2.acquire();
        });
        thread::sleep(std::time::Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
    }

    #[test]
    fn user_table_verify_and_register() {
        let users = UserTable::new();
        users.insert_for_test("alice", "pw");
        assert!(users.verify("alice", "pw"));
        assert!(!users.verify("alice", "wrong"));
        assert!(!users.verify("bob", "pw"));

        assert!(users.register("bob", "secret", None));
        assert!(users.verify("bob", "secret"));
        // Duplicate registration is refused.
        assert!(!users.register("bob", "other", None));
        assert!(users.verify("bob", "secret"));
    }
}
