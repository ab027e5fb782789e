//! Blocking PostgreSQL client, pared down to what the server issues:
//! the startup handshake with cleartext-password auth, a simple query
//! for priming the credential cache, and the extended protocol for the
//! parameterized registration INSERT.

pub mod codec;
pub mod protocol;
pub mod row;

use std::io::{Read, Write};
use std::net::TcpStream;

use protocol::{AuthType, BackendTag, TransactionStatus};
pub use row::Row;

#[derive(Debug)]
pub enum PgError {
    Io(std::io::Error),
    ConnectionClosed,
    Protocol(String),
    Auth(String),
    Server {
        severity: String,
        code: String,
        message: String,
    },
}

impl std::fmt::Display for PgError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgError::Io(e) => write!(f, "I/O error: {}", e),
            PgError::ConnectionClosed => write!(f, "connection closed by server"),
            PgError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            PgError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            PgError::Server {
                severity,
                code,
                message,
            } => write!(f, "{} {}: {}", severity, code, message),
        }
    }
}

impl std::error::Error for PgError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PgError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;

/// Connection parameters for one database.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl PgConfig {
    pub fn new(host: &str, port: u16, user: &str, password: &str, database: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        }
    }
}

pub struct PgConnection {
    stream: TcpStream,
    read_buf: Vec<u8>,
    read_pos: usize,
    tx_status: TransactionStatus,
}

impl PgConnection {
    /// Connect and complete the authentication handshake.
    pub fn connect(config: &PgConfig) -> PgResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&addr).map_err(PgError::Io)?;
        let mut conn = Self {
            stream,
            read_buf: vec![0u8; 16 * 1024],
            read_pos: 0,
            tx_status: TransactionStatus::Idle,
        };
        conn.startup(config)?;
        Ok(conn)
    }

    fn startup(&mut self, config: &PgConfig) -> PgResult<()> {
        let msg = codec::encode_startup(&config.user, &config.database);
        self.stream.write_all(&msg).map_err(PgError::Io)?;

        loop {
            if codec::message_complete(&self.read_buf[..self.read_pos]).is_none() {
                self.fill_read_buf()?;
            }
            while let Some(msg_len) = codec::message_complete(&self.read_buf[..self.read_pos]) {
                let tag = BackendTag::from(self.read_buf[0]);
                match tag {
                    BackendTag::AuthenticationRequest => {
                        let auth_type = codec::read_i32(&self.read_buf, 5);
                        match AuthType::from_i32(auth_type) {
                            Some(AuthType::Ok) => {}
                            Some(AuthType::CleartextPassword) => {
                                let reply = codec::encode_password(&config.password);
                                self.stream.write_all(&reply).map_err(PgError::Io)?;
                            }
                            Some(AuthType::Md5Password) | Some(AuthType::Sasl) => {
                                return Err(PgError::Auth(
                                    "server requires an unsupported auth method; \
                                     enable password authentication"
                                        .to_string(),
                                ));
                            }
                            None => {
                                return Err(PgError::Auth(format!(
                                    "unsupported auth type: {}",
                                    auth_type
                                )));
                            }
                        }
                    }
                    BackendTag::ParameterStatus | BackendTag::BackendKeyData => {}
                    BackendTag::ReadyForQuery => {
                        self.tx_status = TransactionStatus::from(self.read_buf[5]);
                        self.consume_read(msg_len);
                        return Ok(());
                    }
                    BackendTag::ErrorResponse => {
                        let err = parse_error(&self.read_buf[5..msg_len]);
                        return Err(err);
                    }
                    _ => {}
                }
                self.consume_read(msg_len);
            }
        }
    }

    /// Execute a simple query and collect every result row.
    pub fn query_simple(&mut self, sql: &str) -> PgResult<Vec<Row>> {
        let msg = codec::encode_query(sql);
        self.stream.write_all(&msg).map_err(PgError::Io)?;

        let mut rows = Vec::new();
        let mut columns: Vec<codec::ColumnDesc> = Vec::new();
        loop {
            self.fill_read_buf()?;
            while let Some(msg_len) = codec::message_complete(&self.read_buf[..self.read_pos]) {
                let tag = BackendTag::from(self.read_buf[0]);
                let body = &self.read_buf[5..msg_len];
                match tag {
                    BackendTag::RowDescription => {
                        columns = codec::parse_row_description(body);
                    }
                    BackendTag::DataRow => {
                        rows.push(Row::new(columns.clone(), codec::parse_data_row(body)));
                    }
                    BackendTag::ReadyForQuery => {
                        self.tx_status = TransactionStatus::from(body[0]);
                        self.consume_read(msg_len);
                        return Ok(rows);
                    }
                    BackendTag::ErrorResponse => {
                        let err = parse_error(body);
                        self.consume_read(msg_len);
                        self.drain_to_ready()?;
                        return Err(err);
                    }
                    _ => {}
                }
                self.consume_read(msg_len);
            }
        }
    }

    /// Run a parameterized statement through Parse/Bind/Execute/Sync.
    /// Parameters travel in text format; no rows are collected.
    pub fn execute(&mut self, sql: &str, params: &[&str]) -> PgResult<()> {
        let mut msg = codec::encode_parse(sql);
        msg.extend_from_slice(&codec::encode_bind(params));
        msg.extend_from_slice(&codec::encode_execute());
        msg.extend_from_slice(&codec::encode_sync());
        self.stream.write_all(&msg).map_err(PgError::Io)?;

        let mut result = Ok(());
        loop {
            self.fill_read_buf()?;
            while let Some(msg_len) = codec::message_complete(&self.read_buf[..self.read_pos]) {
                let tag = BackendTag::from(self.read_buf[0]);
                let body = &self.read_buf[5..msg_len];
                match tag {
                    BackendTag::ReadyForQuery => {
                        self.tx_status = TransactionStatus::from(body[0]);
                        self.consume_read(msg_len);
                        return result;
                    }
                    BackendTag::ErrorResponse => {
                        if result.is_ok() {
                            result = Err(parse_error(body));
                        }
                    }
                    _ => {}
                }
                self.consume_read(msg_len);
            }
        }
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    fn fill_read_buf(&mut self) -> PgResult<()> {
        if self.read_pos == self.read_buf.len() {
            self.read_buf.resize(self.read_buf.len() * 2, 0);
        }
        let n = self
            .stream
            .read(&mut self.read_buf[self.read_pos..])
            .map_err(PgError::Io)?;
        if n == 0 {
            return Err(PgError::ConnectionClosed);
        }
        self.read_pos += n;
        Ok(())
    }

    fn consume_read(&mut self, n: usize) {
        self.read_buf.copy_within(n..self.read_pos, 0);
        self.read_pos -= n;
    }

    fn drain_to_ready(&mut self) -> PgResult<()> {
        loop {
            while let Some(msg_len) = codec::message_complete(&self.read_buf[..self.read_pos]) {
                let tag = BackendTag::from(self.read_buf[0]);
                if tag == BackendTag::ReadyForQuery {
                    self.tx_status = TransactionStatus::from(self.read_buf[5]);
                    self.consume_read(msg_len);
                    return Ok(());
                }
                self.consume_read(msg_len);
            }
            self.fill_read_buf()?;
        }
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        let _ = self.stream.write_all(&codec::encode_terminate());
    }
}

fn parse_error(body: &[u8]) -> PgError {
    let fields = codec::parse_error_fields(body);
    let mut severity = String::new();
    let mut code = String::new();
    let mut message = String::new();
    for (field_type, value) in fields {
        match field_type {
            b'S' => severity = value,
            b'C' => code = value,
            b'M' => message = value,
            _ => {}
        }
    }
    PgError::Server {
        severity,
        code,
        message,
    }
}
