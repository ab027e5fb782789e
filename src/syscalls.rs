//! Thin libc wrappers: epoll, the listening socket, the signal
//! socketpair, and non-blocking I/O. Everything returns `io::Error`
//! straight off errno so callers can match on `ErrorKind`.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use libc::{c_int, c_void, socklen_t};

pub use libc::epoll_event;

pub const EPOLLIN: u32 = libc::EPOLLIN as u32;
pub const EPOLLOUT: u32 = libc::EPOLLOUT as u32;
pub const EPOLLET: u32 = libc::EPOLLET as u32;
pub const EPOLLONESHOT: u32 = libc::EPOLLONESHOT as u32;
pub const EPOLLRDHUP: u32 = libc::EPOLLRDHUP as u32;
pub const EPOLLHUP: u32 = libc::EPOLLHUP as u32;
pub const EPOLLERR: u32 = libc::EPOLLERR as u32;

pub struct Epoll {
    pub fd: c_int,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    pub fn add(&self, fd: c_int, events: u32) -> io::Result<()> {
        let mut event = epoll_event {
            events,
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_ADD, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn modify(&self, fd: c_int, events: u32) -> io::Result<()> {
        let mut event = epoll_event {
            events,
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_MOD, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn delete(&self, fd: c_int) -> io::Result<()> {
        if unsafe { libc::epoll_ctl(self.fd, libc::EPOLL_CTL_DEL, fd, ptr::null_mut()) } < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Blocks until readiness; EINTR surfaces as zero events so the loop
    /// can fall through to its signal handling.
    pub fn wait(&self, events: &mut [epoll_event], timeout_ms: i32) -> io::Result<usize> {
        let res = unsafe {
            libc::epoll_wait(self.fd, events.as_mut_ptr(), events.len() as c_int, timeout_ms)
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(res as usize)
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Compose a client registration mask: read-side interest, hangup
/// detection, mandatory one-shot, optional edge trigger.
pub fn client_mask(direction: u32, edge_triggered: bool) -> u32 {
    let mut events = direction | EPOLLRDHUP | EPOLLONESHOT;
    if edge_triggered {
        events |= EPOLLET;
    }
    events
}

/// Non-blocking TCP listener on all interfaces with `SO_REUSEADDR` and
/// the configured linger behavior.
pub fn create_listen_socket(port: u16, linger_on: bool) -> io::Result<c_int> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let tmp = libc::linger {
            l_onoff: if linger_on { 1 } else { 0 },
            l_linger: 1,
        };
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &tmp as *const _ as *const c_void,
            mem::size_of_val(&tmp) as socklen_t,
        );

        let one: c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const c_void,
            mem::size_of_val(&one) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr {
                s_addr: libc::INADDR_ANY.to_be(),
            },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &sin as *const _ as *const libc::sockaddr,
            mem::size_of_val(&sin) as socklen_t,
        ) < 0
        {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        if libc::listen(fd, libc::SOMAXCONN) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(fd)
    }
}

/// Accept one connection non-blocking; `Ok(None)` when the queue is
/// drained.
pub fn accept_connection(listen_fd: c_int) -> io::Result<Option<(c_int, SocketAddrV4)>> {
    unsafe {
        let mut addr: libc::sockaddr_in = mem::zeroed();
        let mut len = mem::size_of::<libc::sockaddr_in>() as socklen_t;
        let fd = libc::accept4(
            listen_fd,
            &mut addr as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK,
        );
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(None);
            }
            return Err(err);
        }
        let peer = SocketAddrV4::new(
            Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
            u16::from_be(addr.sin_port),
        );
        Ok(Some((fd, peer)))
    }
}

pub fn close_fd(fd: c_int) {
    unsafe {
        libc::close(fd);
    }
}

pub fn shutdown_fd(fd: c_int) {
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }
}

pub fn set_nonblocking(fd: c_int) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Unix-domain socketpair for folding signals into the reactor.
/// Returns (read_end, write_end).
pub fn create_socketpair() -> io::Result<(c_int, c_int)> {
    let mut fds = [0 as c_int; 2];
    unsafe {
        if libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((fds[0], fds[1]))
}

pub fn read_fd(fd: c_int, buf: &mut [u8]) -> io::Result<usize> {
    let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(res as usize)
}

pub fn send_fd(fd: c_int, buf: &[u8]) -> io::Result<usize> {
    let res = unsafe { libc::send(fd, buf.as_ptr() as *const c_void, buf.len(), 0) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(res as usize)
}

/// Gathered write of up to two segments in one syscall.
pub fn writev_fd(fd: c_int, bufs: &[&[u8]]) -> io::Result<usize> {
    let mut iovecs: [libc::iovec; 2] = unsafe { mem::zeroed() };
    let count = bufs.len().min(2);
    for i in 0..count {
        iovecs[i] = libc::iovec {
            iov_base: bufs[i].as_ptr() as *mut c_void,
            iov_len: bufs[i].len(),
        };
    }
    let res = unsafe { libc::writev(fd, iovecs.as_ptr(), count as c_int) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(res as usize)
}

// ---- Signal plumbing ----

static SIGNAL_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);

/// Async-signal-safe handler: push the signal number's low byte into the
/// socketpair and restore errno.
extern "C" fn signal_to_pipe(sig: c_int) {
    let fd = SIGNAL_PIPE_WRITE.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    unsafe {
        let saved = *libc::__errno_location();
        let byte = sig as u8;
        libc::send(fd, &byte as *const u8 as *const c_void, 1, 0);
        *libc::__errno_location() = saved;
    }
}

/// Route `sig` into the write end registered via [`set_signal_pipe`].
pub fn install_pipe_signal(sig: c_int, restart: bool) -> io::Result<()> {
    install_handler(sig, signal_to_pipe as usize, restart)
}

pub fn ignore_signal(sig: c_int) -> io::Result<()> {
    install_handler(sig, libc::SIG_IGN, false)
}

fn install_handler(sig: c_int, handler: usize, restart: bool) -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = handler;
        if restart {
            sa.sa_flags |= libc::SA_RESTART;
        }
        libc::sigfillset(&mut sa.sa_mask);
        if libc::sigaction(sig, &sa, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn set_signal_pipe(write_fd: c_int) {
    SIGNAL_PIPE_WRITE.store(write_fd, Ordering::Relaxed);
}

pub fn schedule_alarm(secs: u64) {
    unsafe {
        libc::alarm(secs as libc::c_uint);
    }
}
