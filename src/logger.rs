//! Rotating file sink behind the `log` facade.
//!
//! One background consumer drains a bounded queue of pre-formatted lines
//! and writes them to a dated file under the log mutex. Files rotate on
//! day change and every `split_lines` lines. When the queue is full (or
//! the sink was configured synchronous) the producing thread writes the
//! line itself under the same mutex.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Datelike, Local};
use log::{LevelFilter, Metadata, Record};

use crate::error::{ServerError, ServerResult};
use crate::queue::BlockQueue;

/// How the sink hands lines to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Every call writes under the mutex on the calling thread.
    Sync,
    /// Lines go through the bounded queue to the consumer thread.
    Async { queue_size: usize },
}

struct SinkState {
    file: File,
    today: u32,
    count: u64,
    dir: PathBuf,
    base: String,
    split_lines: u64,
}

impl SinkState {
    fn open(dir: &Path, base: &str) -> ServerResult<Self> {
        fs::create_dir_all(dir)?;
        let today = Local::now();
        let name = format!("{}_{}", today.format("%Y_%m_%d"), base);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(name))?;
        Ok(Self {
            file,
            today: today.day(),
            count: 0,
            dir: dir.to_path_buf(),
            base: base.to_string(),
            split_lines: 0,
        })
    }

    /// Rotate before the write when the day flipped or the split fills.
    fn rotate_if_due(&mut self) {
        let now = Local::now();
        let day_changed = now.day() != self.today;
        let split_due = self.split_lines > 0 && self.count % self.split_lines == 0;
        if !day_changed && !split_due {
            return;
        }
        let _ = self.file.flush();
        let stem = format!("{}_{}", now.format("%Y_%m_%d"), self.base);
        let name = if day_changed {
            self.today = now.day();
            self.count = 0;
            stem
        } else {
            format!("{}.{}", stem, self.count / self.split_lines)
        };
        // If the new file cannot be opened, keep writing to the old one.
        if let Ok(f) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(name))
        {
            self.file = f;
        }
    }

    fn write_line(&mut self, line: &str) {
        self.count += 1;
        self.rotate_if_due();
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.write_all(b"\n");
    }
}

pub struct Logger {
    state: std::sync::Mutex<SinkState>,
    queue: Option<Arc<BlockQueue<String>>>,
}

impl Logger {
    /// Build the sink and install it as the global `log` backend.
    ///
    /// `disabled` compiles every macro call down to a level check that
    /// always fails, matching the close-log switch.
    pub fn init(
        dir: &Path,
        base: &str,
        split_lines: u64,
        mode: LogMode,
        disabled: bool,
    ) -> ServerResult<()> {
        let mut state = SinkState::open(dir, base)?;
        state.split_lines = split_lines;

        let queue = match mode {
            LogMode::Async { queue_size } if queue_size > 0 => {
                Some(Arc::new(BlockQueue::new(queue_size)))
            }
            _ => None,
        };

        let logger: &'static Logger = Box::leak(Box::new(Logger {
            state: std::sync::Mutex::new(state),
            queue: queue.clone(),
        }));

        if let Some(q) = queue {
            thread::Builder::new()
                .name("ravel-log".to_string())
                .spawn(move || loop {
                    match q.pop_timeout(Duration::from_secs(1)) {
                        Some(line) => logger.state.lock().unwrap().write_line(&line),
                        None => {
                            let _ = logger.state.lock().unwrap().file.flush();
                        }
                    }
                })
                .map_err(|e| ServerError::Init(format!("log consumer: {}", e)))?;
        }

        log::set_logger(logger)
            .map_err(|e| ServerError::Init(format!("logger already set: {}", e)))?;
        log::set_max_level(if disabled {
            LevelFilter::Off
        } else {
            LevelFilter::Debug
        });
        Ok(())
    }

    fn format_line(record: &Record) -> String {
        let now = Local::now();
        format!(
            "{} [{}] {}",
            now.format("%Y-%m-%d %H:%M:%S%.6f"),
            match record.level() {
                log::Level::Error => "error",
                log::Level::Warn => "warn",
                log::Level::Info => "info",
                _ => "debug",
            },
            record.args()
        )
    }
}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let mut line = Self::format_line(record);
        if let Some(q) = &self.queue {
            match q.push(line) {
                Ok(()) => return,
                // Queue full: write synchronously so the line still lands.
                Err(rejected) => line = rejected,
            }
        }
        self.state.lock().unwrap().write_line(&line);
    }

    fn flush(&self) {
        let _ = self.state.lock().unwrap().file.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_writes_and_splits() {
        let dir = std::env::temp_dir().join(format!("ravel-log-test-{}", std::process::id()));
        let mut state = SinkState::open(&dir, "split.log").unwrap();
        state.split_lines = 2;
        for i in 0..5 {
            state.write_line(&format!("line {}", i));
        }
        let _ = state.file.flush();
        // Lines 1-2 in the base file are preceded by a split at count 2 and 4.
        let stem = format!("{}_{}", Local::now().format("%Y_%m_%d"), "split.log");
        assert!(dir.join(format!("{}.1", stem)).exists());
        assert!(dir.join(format!("{}.2", stem)).exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
