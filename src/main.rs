use clap::Parser;

use ravel::config::LogWrite;
use ravel::logger::{LogMode, Logger};
use ravel::{Server, ServerConfig};

fn main() {
    let config = ServerConfig::parse();
    if let Err(msg) = config.validate() {
        eprintln!("invalid configuration: {}", msg);
        std::process::exit(2);
    }

    let log_mode = match config.log_write {
        LogWrite::Sync => LogMode::Sync,
        LogWrite::Async => LogMode::Async {
            queue_size: config.log_queue_size,
        },
    };
    if let Err(e) = Logger::init(
        &config.log_dir,
        "server.log",
        config.log_split_lines,
        log_mode,
        config.close_log,
    ) {
        eprintln!("logger init failed: {}", e);
        std::process::exit(1);
    }

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("startup failed: {}", e);
            eprintln!("startup failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        log::error!("server exited with error: {}", e);
        std::process::exit(1);
    }
}
