//! Fixed worker pool draining a bounded FIFO of connection slots.
//!
//! In the reactor model workers own the socket I/O for the phase the
//! reactor tagged, then advance the state machine and complete the
//! per-connection handshake. In the proactor model the reactor performs
//! the I/O and workers only advance the machine.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::ActorModel;
use crate::conn::{ConnSlot, WorkPhase};
use crate::error::{ServerError, ServerResult};
use crate::sync::Semaphore;
use crate::syscalls;

struct PoolInner {
    queue: Mutex<VecDeque<Arc<ConnSlot>>>,
    stat: Semaphore,
    max_requests: usize,
    model: ActorModel,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Spawn `thread_count` detached workers. Threads are named and
    /// pinned round-robin across the available cores.
    pub fn new(model: ActorModel, thread_count: usize, max_requests: usize) -> ServerResult<Self> {
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(VecDeque::with_capacity(max_requests)),
            stat: Semaphore::new(0),
            max_requests,
            model,
        });

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        for i in 0..thread_count {
            let inner = Arc::clone(&inner);
            let core_id = core_ids.get(i % core_ids.len().max(1)).copied();
            thread::Builder::new()
                .name(format!("ravel-worker-{}", i))
                .spawn(move || {
                    if let Some(id) = core_id {
                        core_affinity::set_for_current(id);
                    }
                    worker_loop(inner);
                })
                .map_err(|e| ServerError::Init(format!("spawn worker {}: {}", i, e)))?;
        }

        Ok(Self { inner })
    }

    /// Reactor-model enqueue: tag the I/O phase, then hand the slot over.
    pub fn append(&self, slot: Arc<ConnSlot>, phase: WorkPhase) -> ServerResult<()> {
        slot.conn.lock().unwrap().set_phase(phase);
        self.push(slot)
    }

    /// Proactor-model enqueue: the reactor already did the I/O.
    pub fn append_p(&self, slot: Arc<ConnSlot>) -> ServerResult<()> {
        self.push(slot)
    }

    fn push(&self, slot: Arc<ConnSlot>) -> ServerResult<()> {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.len() >= self.inner.max_requests {
                return Err(ServerError::QueueFull);
            }
            queue.push_back(slot);
        }
        self.inner.stat.post();
        Ok(())
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        inner.stat.wait();
        let slot = {
            let mut queue = inner.queue.lock().unwrap();
            match queue.pop_front() {
                Some(slot) => slot,
                // Spurious wakeup: go back to the semaphore.
                None => continue,
            }
        };
        match inner.model {
            ActorModel::Reactor => run_reactor_item(&slot),
            ActorModel::Proactor => run_proactor_item(&slot),
        }
    }
}

fn run_reactor_item(slot: &ConnSlot) {
    let mut conn = slot.conn.lock().unwrap();
    let teardown = match conn.phase() {
        WorkPhase::Read => {
            if conn.read_once() {
                !conn.process()
            } else {
                true
            }
        }
        WorkPhase::Write => !conn.write(),
    };
    drop(conn);
    slot.handshake.complete(teardown);
}

fn run_proactor_item(slot: &ConnSlot) {
    let mut conn = slot.conn.lock().unwrap();
    if !conn.process() {
        // Nobody is waiting on the handshake in this model; shut the
        // socket down so the reactor's hangup path reclaims the slot.
        let fd = conn.fd();
        drop(conn);
        syscalls::shutdown_fd(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{ConnContext, Connection};
    use crate::db::UserTable;
    use crate::syscalls::Epoll;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn idle_slot() -> Arc<ConnSlot> {
        let ctx = Arc::new(ConnContext {
            epoll: Epoll::new().unwrap(),
            doc_root: std::env::temp_dir(),
            users: UserTable::new(),
            db: None,
            conn_edge_triggered: false,
        });
        Arc::new(ConnSlot::new(Connection::new(
            -1,
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            ctx,
        )))
    }

    #[test]
    fn enqueue_respects_capacity() {
        // Zero workers: nothing drains, so the bound is observable.
        let pool = WorkerPool::new(ActorModel::Reactor, 0, 2).unwrap();
        assert!(pool.append(idle_slot(), WorkPhase::Read).is_ok());
        assert!(pool.append(idle_slot(), WorkPhase::Write).is_ok());
        assert!(matches!(
            pool.append(idle_slot(), WorkPhase::Read),
            Err(ServerError::QueueFull)
        ));
        assert_eq!(pool.queued(), 2);
    }
}
