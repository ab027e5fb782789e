//! Server configuration: parsed from flags and environment by the
//! binary, constructed directly by library users and tests.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Who performs the socket I/O for a ready connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActorModel {
    /// Workers read/write and advance the state machine.
    Reactor,
    /// The reactor does the I/O; workers only advance the machine.
    Proactor,
}

/// How log lines reach the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogWrite {
    Sync,
    Async,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "ravel", about = "Multiplexed HTTP/1.1 server", version)]
pub struct ServerConfig {
    /// TCP port to listen on
    #[arg(short, long, default_value = "9006", env = "RAVEL_PORT")]
    pub port: u16,

    /// Document root for static files
    #[arg(long, default_value = "root", env = "RAVEL_ROOT")]
    pub doc_root: PathBuf,

    /// Database host
    #[arg(long, default_value = "localhost", env = "RAVEL_DB_HOST")]
    pub db_host: String,

    /// Database port
    #[arg(long, default_value = "5432", env = "RAVEL_DB_PORT")]
    pub db_port: u16,

    /// Database user
    #[arg(long, default_value = "root", env = "RAVEL_DB_USER")]
    pub db_user: String,

    /// Database password
    #[arg(long, default_value = "", env = "RAVEL_DB_PASSWORD")]
    pub db_password: String,

    /// Database name
    #[arg(long, default_value = "webserver", env = "RAVEL_DB_NAME")]
    pub db_name: String,

    /// Database connection pool size; 0 runs without a database
    #[arg(long, default_value = "8", env = "RAVEL_DB_POOL")]
    pub db_pool_size: usize,

    /// Worker thread count; defaults to one per core
    #[arg(long, default_value_t = num_cpus::get(), env = "RAVEL_WORKERS")]
    pub workers: usize,

    /// Work queue capacity
    #[arg(long, default_value = "10000", env = "RAVEL_MAX_REQUESTS")]
    pub max_requests: usize,

    /// Trigger mode: 0 LT+LT, 1 LT+ET, 2 ET+LT, 3 ET+ET
    /// (listener trigger first, connection trigger second)
    #[arg(long, default_value = "0", env = "RAVEL_TRIG_MODE")]
    pub trig_mode: u8,

    /// Enable SO_LINGER on the listener
    #[arg(long, env = "RAVEL_LINGER")]
    pub opt_linger: bool,

    /// Log write mode
    #[arg(long, value_enum, default_value = "sync", env = "RAVEL_LOG_WRITE")]
    pub log_write: LogWrite,

    /// Async log queue capacity
    #[arg(long, default_value = "800", env = "RAVEL_LOG_QUEUE")]
    pub log_queue_size: usize,

    /// Lines per log file before splitting
    #[arg(long, default_value = "800000", env = "RAVEL_LOG_SPLIT")]
    pub log_split_lines: u64,

    /// Log directory
    #[arg(long, default_value = "./ServerLog", env = "RAVEL_LOG_DIR")]
    pub log_dir: PathBuf,

    /// Disable logging entirely
    #[arg(long, env = "RAVEL_CLOSE_LOG")]
    pub close_log: bool,

    /// Concurrency model
    #[arg(long, value_enum, default_value = "proactor", env = "RAVEL_ACTOR_MODEL")]
    pub actor_model: ActorModel,
}

impl ServerConfig {
    /// (listener edge-triggered, connection edge-triggered)
    pub fn trigger_modes(&self) -> (bool, bool) {
        (self.trig_mode & 0b10 != 0, self.trig_mode & 0b01 != 0)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be >= 1".to_string());
        }
        if self.max_requests == 0 {
            return Err("max-requests must be >= 1".to_string());
        }
        if self.trig_mode > 3 {
            return Err("trig-mode must be 0..=3".to_string());
        }
        if self.log_write == LogWrite::Async && self.log_queue_size == 0 {
            return Err("async log mode needs a queue size >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9006,
            doc_root: PathBuf::from("root"),
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: "root".to_string(),
            db_password: String::new(),
            db_name: "webserver".to_string(),
            db_pool_size: 8,
            workers: num_cpus::get(),
            max_requests: 10000,
            trig_mode: 0,
            opt_linger: false,
            log_write: LogWrite::Sync,
            log_queue_size: 800,
            log_split_lines: 800_000,
            log_dir: PathBuf::from("./ServerLog"),
            close_log: false,
            actor_model: ActorModel::Proactor,
        }
    }
}
