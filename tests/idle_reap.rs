//! Idle-connection reaping runs in its own test binary: the alarm and
//! the signal pipe are process-wide, so this server must be the only one
//! in the process.

use std::fs;
use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use ravel::config::ActorModel;
use ravel::{Server, ServerConfig};

#[test]
fn silent_connection_is_reaped_after_three_ticks() {
    let root = std::env::temp_dir().join(format!("ravel-reap-{}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(&root).unwrap();

    let config = ServerConfig {
        port: 19440,
        doc_root: root.clone(),
        db_pool_size: 0,
        workers: 1,
        actor_model: ActorModel::Proactor,
        ..ServerConfig::default()
    };
    thread::spawn(move || {
        Server::new(config).unwrap().run().unwrap();
    });
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", 19440)).is_ok() {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let mut stream = TcpStream::connect(("127.0.0.1", 19440)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // Send nothing. The deadline is 3 ticks (15 s); ticks fire every 5 s,
    // so the server should close us well inside 30 s.
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut buf = [0u8; 16];
    loop {
        match stream.read(&mut buf) {
            // EOF: the reactor closed the idle socket.
            Ok(0) => return,
            Ok(_) => panic!("server sent unsolicited data"),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                assert!(Instant::now() < deadline, "idle connection never reaped");
            }
            // RST also counts as the server dropping us.
            Err(_) => return,
        }
    }
}
