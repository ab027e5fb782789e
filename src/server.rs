//! The reactor: one thread driving the listener, every client socket,
//! the signal socketpair, and the periodic expiry tick.

use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{ActorModel, ServerConfig};
use crate::conn::{ConnContext, ConnSlot, Connection, WorkPhase};
use crate::db::{self, UserTable};
use crate::error::{ServerError, ServerResult};
use crate::http::BUSY_MESSAGE;
use crate::pg::PgConfig;
use crate::syscalls::{
    self, epoll_event, Epoll, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP,
};
use crate::timer::ExpiryList;
use crate::workers::WorkerPool;

/// Connection table size; accepted fds index straight into it.
pub const MAX_FD: usize = 65536;
/// Events drained per readiness wait.
pub const MAX_EVENT_NUMBER: usize = 10000;
/// Base tick interval in seconds; idle connections live 3 ticks.
pub const TIMESLOT: u64 = 5;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub struct Server {
    config: ServerConfig,
    ctx: Arc<ConnContext>,
    pool: WorkerPool,
    listen_fd: i32,
    pipe_read: i32,
    pipe_write: i32,
    slots: Vec<Option<Arc<ConnSlot>>>,
    timer_handles: Vec<Option<usize>>,
    timers: ExpiryList,
    user_count: usize,
    listen_et: bool,
    tick_pending: bool,
    stop: bool,
}

impl Server {
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let (listen_et, conn_et) = config.trigger_modes();

        let users = UserTable::new();
        let db = if config.db_pool_size > 0 {
            let pg = PgConfig::new(
                &config.db_host,
                config.db_port,
                &config.db_user,
                &config.db_password,
                &config.db_name,
            );
            let pool = db::connect_pool(&pg, config.db_pool_size)?;
            users.prime(&pool)?;
            Some(pool)
        } else {
            log::warn!("running without a database; registrations stay in memory");
            None
        };

        let doc_root = if config.doc_root.is_absolute() {
            config.doc_root.clone()
        } else {
            std::env::current_dir()?.join(&config.doc_root)
        };

        let epoll = Epoll::new()?;
        let listen_fd = syscalls::create_listen_socket(config.port, config.opt_linger)?;
        let mut listen_mask = EPOLLIN | EPOLLRDHUP;
        if listen_et {
            listen_mask |= syscalls::EPOLLET;
        }
        epoll.add(listen_fd, listen_mask)?;

        let (pipe_read, pipe_write) = syscalls::create_socketpair()?;
        syscalls::set_nonblocking(pipe_write)?;
        syscalls::set_nonblocking(pipe_read)?;
        syscalls::set_signal_pipe(pipe_write);
        epoll.add(pipe_read, EPOLLIN)?;

        syscalls::ignore_signal(libc::SIGPIPE)?;
        syscalls::install_pipe_signal(libc::SIGALRM, false)?;
        syscalls::install_pipe_signal(libc::SIGTERM, false)?;
        syscalls::schedule_alarm(TIMESLOT);

        let pool = WorkerPool::new(config.actor_model, config.workers, config.max_requests)?;

        let ctx = Arc::new(ConnContext {
            epoll,
            doc_root,
            users,
            db,
            conn_edge_triggered: conn_et,
        });

        let mut slots = Vec::with_capacity(MAX_FD);
        slots.resize_with(MAX_FD, || None);

        log::info!(
            "listening on port {} ({} workers, {:?} model)",
            config.port,
            config.workers,
            config.actor_model
        );

        Ok(Self {
            config,
            ctx,
            pool,
            listen_fd,
            pipe_read,
            pipe_write,
            slots,
            timer_handles: vec![None; MAX_FD],
            timers: ExpiryList::with_capacity(1024),
            user_count: 0,
            listen_et,
            tick_pending: false,
            stop: false,
        })
    }

    /// Run until SIGTERM arrives through the self-pipe.
    pub fn run(&mut self) -> ServerResult<()> {
        let mut events = vec![epoll_event { events: 0, u64: 0 }; MAX_EVENT_NUMBER];

        while !self.stop {
            let number = match self.ctx.epoll.wait(&mut events, -1) {
                Ok(n) => n,
                Err(e) => {
                    log::error!("epoll failure: {}", e);
                    return Err(ServerError::Io(e));
                }
            };

            for event in &events[..number] {
                let fd = event.u64 as i32;
                let bits = event.events;

                if fd == self.listen_fd {
                    self.deal_client_data();
                } else if bits & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0 {
                    self.deal_timer(fd);
                } else if fd == self.pipe_read && bits & EPOLLIN != 0 {
                    self.deal_signal();
                } else if bits & EPOLLIN != 0 {
                    self.deal_read(fd);
                } else if bits & EPOLLOUT != 0 {
                    self.deal_write(fd);
                }
            }

            if self.tick_pending {
                self.timer_tick();
                log::info!("timer tick");
                self.tick_pending = false;
            }
        }

        log::info!("SIGTERM received, shutting down");
        Ok(())
    }

    fn deal_client_data(&mut self) {
        if !self.listen_et {
            // Level-triggered: exactly one accept per readiness.
            self.accept_one();
        } else {
            while self.accept_one() {}
        }
    }

    fn accept_one(&mut self) -> bool {
        match syscalls::accept_connection(self.listen_fd) {
            Ok(Some((fd, peer))) => {
                self.register_client(fd, peer);
                true
            }
            Ok(None) => false,
            Err(e) => {
                log::error!("accept failure: {}", e);
                false
            }
        }
    }

    fn register_client(&mut self, fd: i32, peer: SocketAddrV4) {
        if self.user_count >= MAX_FD || fd as usize >= MAX_FD {
            let _ = syscalls::send_fd(fd, BUSY_MESSAGE.as_bytes());
            syscalls::close_fd(fd);
            log::warn!("refused {}: connection table full", peer);
            return;
        }

        let mask = syscalls::client_mask(EPOLLIN, self.ctx.conn_edge_triggered);
        if let Err(e) = self.ctx.epoll.add(fd, mask) {
            log::error!("register fd {} failed: {}", fd, e);
            syscalls::close_fd(fd);
            return;
        }

        let conn = Connection::new(fd, peer, Arc::clone(&self.ctx));
        self.slots[fd as usize] = Some(Arc::new(ConnSlot::new(conn)));
        let handle = self.timers.add(now_secs() + 3 * TIMESLOT, fd as usize);
        self.timer_handles[fd as usize] = Some(handle);
        self.user_count += 1;
        log::info!("client {} connected on fd {}", peer, fd);
    }

    /// Drain the signal socketpair; each byte is a signal number.
    fn deal_signal(&mut self) {
        let mut buf = [0u8; 1024];
        match syscalls::read_fd(self.pipe_read, &mut buf) {
            Ok(n) if n > 0 => {
                for &byte in &buf[..n] {
                    if byte == libc::SIGALRM as u8 {
                        self.tick_pending = true;
                    } else if byte == libc::SIGTERM as u8 {
                        self.stop = true;
                    }
                }
            }
            Ok(_) => log::error!("signal pipe closed"),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("signal pipe read failed: {}", e),
        }
    }

    fn deal_read(&mut self, fd: i32) {
        let slot = match self.slot(fd) {
            Some(s) => s,
            None => return,
        };
        self.bump_timer(fd);

        match self.config.actor_model {
            ActorModel::Reactor => {
                if self.pool.append(Arc::clone(&slot), WorkPhase::Read).is_err() {
                    log::warn!("work queue full, dropping fd {}", fd);
                    self.deal_timer(fd);
                    return;
                }
                // The worker owns the fd until it reports back.
                if slot.handshake.wait() {
                    self.deal_timer(fd);
                }
            }
            ActorModel::Proactor => {
                let survived = slot.conn.lock().unwrap().read_once();
                if !survived {
                    self.deal_timer(fd);
                    return;
                }
                if self.pool.append_p(Arc::clone(&slot)).is_err() {
                    log::warn!("work queue full, dropping fd {}", fd);
                    self.deal_timer(fd);
                }
            }
        }
    }

    fn deal_write(&mut self, fd: i32) {
        let slot = match self.slot(fd) {
            Some(s) => s,
            None => return,
        };
        self.bump_timer(fd);

        match self.config.actor_model {
            ActorModel::Reactor => {
                if self.pool.append(Arc::clone(&slot), WorkPhase::Write).is_err() {
                    log::warn!("work queue full, dropping fd {}", fd);
                    self.deal_timer(fd);
                    return;
                }
                if slot.handshake.wait() {
                    self.deal_timer(fd);
                }
            }
            ActorModel::Proactor => {
                let survived = slot.conn.lock().unwrap().write();
                if !survived {
                    self.deal_timer(fd);
                }
            }
        }
    }

    fn slot(&self, fd: i32) -> Option<Arc<ConnSlot>> {
        self.slots
            .get(fd as usize)
            .and_then(|s| s.as_ref())
            .map(Arc::clone)
    }

    fn bump_timer(&mut self, fd: i32) {
        if let Some(handle) = self.timer_handles[fd as usize] {
            self.timers.adjust(handle, now_secs() + 3 * TIMESLOT);
        }
    }

    /// Deregister, close, and forget a connection plus its deadline.
    fn deal_timer(&mut self, fd: i32) {
        if fd < 0 || fd as usize >= MAX_FD {
            return;
        }
        if let Some(handle) = self.timer_handles[fd as usize].take() {
            self.timers.remove(handle);
        }
        self.close_client(fd);
    }

    fn close_client(&mut self, fd: i32) {
        if let Some(slot) = self.slots[fd as usize].take() {
            let peer = slot.conn.lock().unwrap().peer();
            let _ = self.ctx.epoll.delete(fd);
            syscalls::close_fd(fd);
            self.user_count -= 1;
            log::info!("closed connection from {} (fd {})", peer, fd);
        }
    }

    /// Reap every connection whose deadline passed, then re-arm the alarm.
    fn timer_tick(&mut self) {
        let now = now_secs();
        let mut expired = Vec::new();
        self.timers.tick(now, |client| expired.push(client));
        for client in expired {
            log::info!("idle timeout on fd {}", client);
            self.timer_handles[client] = None;
            self.close_client(client as i32);
        }
        syscalls::schedule_alarm(TIMESLOT);
    }

    pub fn user_count(&self) -> usize {
        self.user_count
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        syscalls::close_fd(self.listen_fd);
        syscalls::close_fd(self.pipe_read);
        syscalls::close_fd(self.pipe_write);
        for fd in 0..self.slots.len() {
            if self.slots[fd].is_some() {
                syscalls::close_fd(fd as i32);
            }
        }
    }
}
