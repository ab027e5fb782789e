//! Per-connection HTTP/1.1 state: incremental parsing, request
//! dispatch, and the gathered write that pairs the header buffer with a
//! memory-mapped file body.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::net::SocketAddrV4;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use memmap2::Mmap;

use crate::db::{DbPool, UserTable};
use crate::http::{
    CheckState, Method, RequestOutcome, ERROR_400_FORM, ERROR_400_TITLE, ERROR_403_FORM,
    ERROR_403_TITLE, ERROR_404_FORM, ERROR_404_TITLE, ERROR_500_FORM, ERROR_500_TITLE,
    OK_200_TITLE,
};
use crate::parser::{self, HeaderField, LineStatus};
use crate::syscalls::{self, Epoll, EPOLLIN, EPOLLOUT};

pub const READ_BUFFER_SIZE: usize = 2048;
pub const WRITE_BUFFER_SIZE: usize = 1024;

/// Which side of the connection the reactor saw readiness on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkPhase {
    Read,
    Write,
}

/// Worker-to-reactor completion signal. The reactor must observe
/// completion before it touches the connection again; the boolean says
/// whether the connection has to be torn down.
pub struct Handshake {
    state: Mutex<Option<bool>>,
    cv: Condvar,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    pub fn complete(&self, teardown: bool) {
        let mut state = self.state.lock().unwrap();
        *state = Some(teardown);
        self.cv.notify_one();
    }

    /// Block until the worker reports; returns the teardown flag and
    /// resets for the next round.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(teardown) = state.take() {
                return teardown;
            }
            state = self.cv.wait(state).unwrap();
        }
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide collaborators every connection needs.
pub struct ConnContext {
    pub epoll: Epoll,
    pub doc_root: PathBuf,
    pub users: UserTable,
    pub db: Option<DbPool>,
    pub conn_edge_triggered: bool,
}

/// One table slot: the connection plus its completion handshake. The
/// mutex is uncontended by construction (the reactor hands the slot to
/// at most one worker and waits), it just makes the sharing sound.
pub struct ConnSlot {
    pub conn: Mutex<Connection>,
    pub handshake: Handshake,
}

impl ConnSlot {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            handshake: Handshake::new(),
        }
    }
}

pub struct Connection {
    fd: i32,
    peer: SocketAddrV4,
    ctx: Arc<ConnContext>,

    read_buf: [u8; READ_BUFFER_SIZE],
    /// Bytes received so far; `scanned <= filled <= READ_BUFFER_SIZE`.
    filled: usize,
    /// Parse cursor.
    scanned: usize,
    /// Start of the line currently being assembled.
    line_start: usize,
    /// Offset of the request body once headers are done.
    body_start: usize,

    check_state: CheckState,
    method: Method,
    target: String,
    content_length: usize,
    host: Option<String>,
    keep_alive: bool,
    cgi: bool,

    write_buf: [u8; WRITE_BUFFER_SIZE],
    write_len: usize,
    file: Option<Mmap>,
    file_len: usize,
    bytes_to_send: usize,
    bytes_have_send: usize,

    phase: WorkPhase,
}

impl Connection {
    pub fn new(fd: i32, peer: SocketAddrV4, ctx: Arc<ConnContext>) -> Self {
        Self {
            fd,
            peer,
            ctx,
            read_buf: [0; READ_BUFFER_SIZE],
            filled: 0,
            scanned: 0,
            line_start: 0,
            body_start: 0,
            check_state: CheckState::RequestLine,
            method: Method::Get,
            target: String::new(),
            content_length: 0,
            host: None,
            keep_alive: false,
            cgi: false,
            write_buf: [0; WRITE_BUFFER_SIZE],
            write_len: 0,
            file: None,
            file_len: 0,
            bytes_to_send: 0,
            bytes_have_send: 0,
            phase: WorkPhase::Read,
        }
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn set_phase(&mut self, phase: WorkPhase) {
        self.phase = phase;
    }

    pub fn phase(&self) -> WorkPhase {
        self.phase
    }

    /// Clear everything request-scoped so a kept-alive connection is
    /// indistinguishable from a fresh one.
    fn reset(&mut self) {
        self.read_buf = [0; READ_BUFFER_SIZE];
        self.filled = 0;
        self.scanned = 0;
        self.line_start = 0;
        self.body_start = 0;
        self.check_state = CheckState::RequestLine;
        self.method = Method::Get;
        self.target = String::new();
        self.content_length = 0;
        self.host = None;
        self.keep_alive = false;
        self.cgi = false;
        self.write_buf = [0; WRITE_BUFFER_SIZE];
        self.write_len = 0;
        self.file = None;
        self.file_len = 0;
        self.bytes_to_send = 0;
        self.bytes_have_send = 0;
        self.phase = WorkPhase::Read;
    }

    fn rearm(&self, direction: u32) -> bool {
        let mask = syscalls::client_mask(direction, self.ctx.conn_edge_triggered);
        match self.ctx.epoll.modify(self.fd, mask) {
            Ok(()) => true,
            Err(e) => {
                log::error!("rearm failed for fd {}: {}", self.fd, e);
                false
            }
        }
    }

    // ---- Input side ----

    /// Pull whatever the socket has into the tail of the read buffer.
    /// False means the connection is dead (EOF or a hard error).
    pub fn read_once(&mut self) -> bool {
        if self.filled >= READ_BUFFER_SIZE {
            return false;
        }
        if !self.ctx.conn_edge_triggered {
            match syscalls::read_fd(self.fd, &mut self.read_buf[self.filled..]) {
                Ok(0) => false,
                Ok(n) => {
                    self.filled += n;
                    true
                }
                Err(e) => is_transient(&e),
            }
        } else {
            loop {
                match syscalls::read_fd(self.fd, &mut self.read_buf[self.filled..]) {
                    Ok(0) => return false,
                    Ok(n) => {
                        self.filled += n;
                        if self.filled >= READ_BUFFER_SIZE {
                            return true;
                        }
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                    Err(_) => return false,
                }
            }
        }
    }

    /// Advance the request state machine over the buffered bytes.
    fn process_read(&mut self) -> RequestOutcome {
        let mut line_status = LineStatus::Ok;
        loop {
            if !(self.check_state == CheckState::Content && line_status == LineStatus::Ok) {
                let (status, cursor) = parser::split_line(&self.read_buf, self.scanned, self.filled);
                line_status = status;
                match status {
                    LineStatus::Ok => self.scanned = cursor,
                    LineStatus::Open => return RequestOutcome::NoRequest,
                    LineStatus::Bad => return RequestOutcome::BadRequest,
                }
            }

            match self.check_state {
                CheckState::RequestLine => {
                    let line = &self.read_buf[self.line_start..self.scanned - 2];
                    log::info!("{}", String::from_utf8_lossy(line));
                    let parsed = match parser::parse_request_line(line) {
                        Some(p) => p,
                        None => return RequestOutcome::BadRequest,
                    };
                    self.line_start = self.scanned;
                    self.method = parsed.method;
                    self.cgi = parsed.method == Method::Post;
                    self.target = parsed.target;
                    self.check_state = CheckState::Header;
                }
                CheckState::Header => {
                    let line_range = self.line_start..self.scanned - 2;
                    self.line_start = self.scanned;
                    match parser::parse_header(&self.read_buf[line_range.clone()]) {
                        HeaderField::End => {
                            if self.content_length != 0 {
                                self.check_state = CheckState::Content;
                                self.body_start = self.scanned;
                            } else {
                                return self.do_request();
                            }
                        }
                        HeaderField::KeepAlive(k) => self.keep_alive = k,
                        HeaderField::ContentLength(n) => self.content_length = n,
                        HeaderField::Host(h) => self.host = Some(h),
                        HeaderField::Other => {
                            log::info!(
                                "unknown header: {}",
                                String::from_utf8_lossy(&self.read_buf[line_range])
                            );
                        }
                    }
                }
                CheckState::Content => {
                    if self.filled >= self.body_start + self.content_length {
                        return self.do_request();
                    }
                    return RequestOutcome::NoRequest;
                }
            }
        }
    }

    /// Route the parsed request: the byte after the leading `/` selects
    /// the handler, form endpoints rewrite the target, and whatever
    /// target remains is resolved against the document root.
    fn do_request(&mut self) -> RequestOutcome {
        let route = self.target.as_bytes().get(1).copied();

        if self.cgi && (route == Some(b'2') || route == Some(b'3')) {
            let body = &self.read_buf[self.body_start..self.body_start + self.content_length];
            let creds = parser::parse_form(body);
            self.target = match (route, creds) {
                (Some(b'3'), Some((user, password))) => {
                    if self
                        .ctx
                        .users
                        .register(&user, &password, self.ctx.db.as_ref())
                    {
                        "/log.html".to_string()
                    } else {
                        "/registerError.html".to_string()
                    }
                }
                (Some(b'2'), Some((user, password))) => {
                    if self.ctx.users.verify(&user, &password) {
                        "/welcome.html".to_string()
                    } else {
                        "/logError.html".to_string()
                    }
                }
                (Some(b'3'), None) => "/registerError.html".to_string(),
                _ => "/logError.html".to_string(),
            };
        } else {
            match route {
                Some(b'0') => self.target = "/register.html".to_string(),
                Some(b'1') => self.target = "/log.html".to_string(),
                Some(b'5') => self.target = "/picture.html".to_string(),
                Some(b'6') => self.target = "/video.html".to_string(),
                Some(b'7') => self.target = "/fans.html".to_string(),
                _ => {}
            }
        }

        let path = self.ctx.doc_root.join(&self.target[1..]);
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => return RequestOutcome::NoResource,
        };
        if meta.permissions().mode() & 0o004 == 0 {
            return RequestOutcome::Forbidden;
        }
        if meta.is_dir() {
            return RequestOutcome::BadRequest;
        }

        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return RequestOutcome::NoResource,
        };
        self.file_len = meta.len() as usize;
        if self.file_len > 0 {
            // Safety: the mapping is read-only and private to this
            // connection; the fd closes as soon as `file` drops.
            self.file = match unsafe { Mmap::map(&file) } {
                Ok(m) => Some(m),
                Err(_) => return RequestOutcome::InternalError,
            };
        }
        RequestOutcome::FileRequest
    }

    // ---- Output side ----

    fn add_response(&mut self, args: fmt::Arguments) -> bool {
        use io::Write;
        let mut cursor = io::Cursor::new(&mut self.write_buf[self.write_len..]);
        if cursor.write_fmt(args).is_err() {
            log::error!("write buffer overflow for fd {}", self.fd);
            return false;
        }
        self.write_len += cursor.position() as usize;
        true
    }

    fn add_status_line(&mut self, status: u16, title: &str) -> bool {
        self.add_response(format_args!("HTTP/1.1 {} {}\r\n", status, title))
    }

    fn add_headers(&mut self, content_length: usize) -> bool {
        let linger = if self.keep_alive { "keep-alive" } else { "close" };
        self.add_response(format_args!(
            "Content-Length:{}\r\nConnection:{}\r\n\r\n",
            content_length, linger
        ))
    }

    fn add_content(&mut self, content: &str) -> bool {
        self.add_response(format_args!("{}", content))
    }

    /// Build the response plan for the parse outcome. False only when
    /// the plan does not fit the write buffer.
    fn process_write(&mut self, outcome: RequestOutcome) -> bool {
        match outcome {
            RequestOutcome::InternalError => {
                if !(self.add_status_line(500, ERROR_500_TITLE)
                    && self.add_headers(ERROR_500_FORM.len())
                    && self.add_content(ERROR_500_FORM))
                {
                    return false;
                }
            }
            RequestOutcome::BadRequest => {
                if !(self.add_status_line(400, ERROR_400_TITLE)
                    && self.add_headers(ERROR_400_FORM.len())
                    && self.add_content(ERROR_400_FORM))
                {
                    return false;
                }
            }
            RequestOutcome::NoResource => {
                if !(self.add_status_line(404, ERROR_404_TITLE)
                    && self.add_headers(ERROR_404_FORM.len())
                    && self.add_content(ERROR_404_FORM))
                {
                    return false;
                }
            }
            RequestOutcome::Forbidden => {
                if !(self.add_status_line(403, ERROR_403_TITLE)
                    && self.add_headers(ERROR_403_FORM.len())
                    && self.add_content(ERROR_403_FORM))
                {
                    return false;
                }
            }
            RequestOutcome::FileRequest => {
                if !self.add_status_line(200, OK_200_TITLE) {
                    return false;
                }
                if self.file_len > 0 {
                    if !self.add_headers(self.file_len) {
                        return false;
                    }
                    self.bytes_to_send = self.write_len + self.file_len;
                    return true;
                }
                const EMPTY_BODY: &str = "<html><body></body></html>";
                if !(self.add_headers(EMPTY_BODY.len()) && self.add_content(EMPTY_BODY)) {
                    return false;
                }
            }
            _ => return false,
        }
        self.bytes_to_send = self.write_len;
        true
    }

    /// Drain the response plan with gathered writes. True keeps the
    /// connection registered (reset for keep-alive, or re-armed to
    /// finish later); false means tear it down.
    pub fn write(&mut self) -> bool {
        if self.bytes_to_send == 0 {
            self.reset();
            return self.rearm(EPOLLIN);
        }
        loop {
            let written = match self.gathered_write() {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return self.rearm(EPOLLOUT);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => {
                    self.file = None;
                    return false;
                }
            };
            self.bytes_have_send += written;
            self.bytes_to_send -= written;
            if self.bytes_to_send == 0 {
                self.file = None;
                if self.keep_alive {
                    self.reset();
                    return self.rearm(EPOLLIN);
                }
                return false;
            }
        }
    }

    fn gathered_write(&self) -> io::Result<usize> {
        if self.bytes_have_send < self.write_len {
            let header = &self.write_buf[self.bytes_have_send..self.write_len];
            match &self.file {
                Some(m) => syscalls::writev_fd(self.fd, &[header, &m[..]]),
                None => syscalls::writev_fd(self.fd, &[header]),
            }
        } else {
            let file_off = self.bytes_have_send - self.write_len;
            match &self.file {
                Some(m) => syscalls::writev_fd(self.fd, &[&m[file_off..]]),
                // Plan accounting said more bytes remain but there is no
                // body segment left; fail loudly rather than spin.
                None => Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "response plan exhausted",
                )),
            }
        }
    }

    /// One full pass of the state machine after readable input, run on a
    /// worker. True keeps the connection alive; false requests teardown.
    pub fn process(&mut self) -> bool {
        let outcome = self.process_read();
        if outcome == RequestOutcome::NoRequest {
            return self.rearm(EPOLLIN);
        }
        if !self.process_write(outcome) {
            return false;
        }
        self.rearm(EPOLLOUT)
    }

    #[cfg(test)]
    pub fn feed_for_test(&mut self, bytes: &[u8]) {
        self.read_buf[self.filled..self.filled + bytes.len()].copy_from_slice(bytes);
        self.filled += bytes.len();
    }

    #[cfg(test)]
    pub fn process_read_for_test(&mut self) -> RequestOutcome {
        self.process_read()
    }

    #[cfg(test)]
    pub fn target_for_test(&self) -> &str {
        &self.target
    }

    #[cfg(test)]
    pub fn plan_for_test(&mut self, outcome: RequestOutcome) -> Option<(Vec<u8>, usize)> {
        if !self.process_write(outcome) {
            return None;
        }
        Some((self.write_buf[..self.write_len].to_vec(), self.bytes_to_send))
    }

    #[cfg(test)]
    pub fn keep_alive_for_test(&self) -> bool {
        self.keep_alive
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::Ipv4Addr;
    use std::path::Path;

    fn test_ctx(doc_root: &Path, users: UserTable) -> Arc<ConnContext> {
        Arc::new(ConnContext {
            epoll: Epoll::new().unwrap(),
            doc_root: doc_root.to_path_buf(),
            users,
            db: None,
            conn_edge_triggered: false,
        })
    }

    fn test_conn(ctx: Arc<ConnContext>) -> Connection {
        Connection::new(-1, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), ctx)
    }

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ravel-conn-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn parses_complete_get_and_maps_file() {
        let root = temp_root("get");
        let mut f = File::create(root.join("judge.html")).unwrap();
        f.write_all(b"hello from the judge page").unwrap();
        drop(f);

        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        assert_eq!(conn.target_for_test(), "/judge.html");

        let (headers, total) = conn.plan_for_test(RequestOutcome::FileRequest).unwrap();
        let text = String::from_utf8(headers).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length:25\r\n"));
        assert!(text.contains("Connection:close\r\n"));
        assert_eq!(total, text.len() + 25);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn partial_request_reports_no_request() {
        let root = temp_root("partial");
        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET /x HTTP/1.1\r\nHos");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::NoRequest);
        // The rest arrives and the machine picks up where it stopped.
        conn.feed_for_test(b"t: h\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::NoResource);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn missing_file_is_no_resource() {
        let root = temp_root("missing");
        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET /nope HTTP/1.1\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::NoResource);
        let (headers, _) = conn.plan_for_test(RequestOutcome::NoResource).unwrap();
        let text = String::from_utf8(headers).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("not found"));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn unreadable_file_is_forbidden() {
        let root = temp_root("forbidden");
        let path = root.join("secret.html");
        File::create(&path).unwrap().write_all(b"x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET /secret.html HTTP/1.1\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::Forbidden);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn directory_target_is_bad_request() {
        let root = temp_root("dir");
        fs::create_dir_all(root.join("sub")).unwrap();
        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET /sub HTTP/1.1\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::BadRequest);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn stray_line_terminator_is_bad_request() {
        let root = temp_root("bad");
        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET / HTTP/1.1\nHost: h\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::BadRequest);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn login_rewrites_target_by_outcome() {
        let root = temp_root("login");
        for page in ["welcome.html", "logError.html"] {
            File::create(root.join(page)).unwrap().write_all(b"p").unwrap();
        }
        let users = UserTable::new();
        users.insert_for_test("alice", "pw");
        let ctx = test_ctx(&root, users);

        let mut conn = test_conn(Arc::clone(&ctx));
        conn.feed_for_test(
            b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 22\r\n\r\nuser=alice&password=pw",
        );
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        assert_eq!(conn.target_for_test(), "/welcome.html");

        let mut conn = test_conn(ctx);
        conn.feed_for_test(
            b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 25\r\n\r\nuser=alice&password=wrong",
        );
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        assert_eq!(conn.target_for_test(), "/logError.html");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn register_inserts_then_duplicate_fails() {
        let root = temp_root("register");
        for page in ["log.html", "registerError.html"] {
            File::create(root.join(page)).unwrap().write_all(b"p").unwrap();
        }
        let ctx = test_ctx(&root, UserTable::new());

        let mut conn = test_conn(Arc::clone(&ctx));
        conn.feed_for_test(
            b"POST /3CGISQL.cgi HTTP/1.1\r\nContent-Length: 21\r\n\r\nuser=bob&password=abc",
        );
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        assert_eq!(conn.target_for_test(), "/log.html");
        assert!(ctx.users.verify("bob", "abc"));

        let mut conn = test_conn(ctx);
        conn.feed_for_test(
            b"POST /3CGISQL.cgi HTTP/1.1\r\nContent-Length: 21\r\n\r\nuser=bob&password=xyz",
        );
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        assert_eq!(conn.target_for_test(), "/registerError.html");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn body_split_across_reads_completes() {
        let root = temp_root("body");
        File::create(root.join("logError.html"))
            .unwrap()
            .write_all(b"p")
            .unwrap();
        let ctx = test_ctx(&root, UserTable::new());
        let mut conn = test_conn(ctx);
        conn.feed_for_test(b"POST /2CGISQL.cgi HTTP/1.1\r\nContent-Length: 22\r\n\r\nuser=al");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::NoRequest);
        conn.feed_for_test(b"ice&password=pw");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        // Unknown user: login fails onto the error page.
        assert_eq!(conn.target_for_test(), "/logError.html");
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn keep_alive_header_is_recorded() {
        let root = temp_root("ka");
        File::create(root.join("a.html")).unwrap().write_all(b"x").unwrap();
        let mut conn = test_conn(test_ctx(&root, UserTable::new()));
        conn.feed_for_test(b"GET /a.html HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
        assert_eq!(conn.process_read_for_test(), RequestOutcome::FileRequest);
        assert!(conn.keep_alive_for_test());
        let (headers, _) = conn.plan_for_test(RequestOutcome::FileRequest).unwrap();
        assert!(String::from_utf8(headers).unwrap().contains("Connection:keep-alive"));
        let _ = fs::remove_dir_all(&root);
    }
}
