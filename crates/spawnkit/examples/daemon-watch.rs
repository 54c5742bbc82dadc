//! Spawn a named daemon, read one status message, and leave it running.
//!
//! Run with:
//!   cargo run --example daemon-watch
//!
//! Afterwards, inspect the detached process:
//!   ps -o pid,sid,comm -p <printed pid>

use std::time::Duration;

use spawnkit::process::{Worker, WorkerOptions};
use spawnkit::transport::ChannelKind;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut worker = Worker::new(
        |w: &mut Worker, _args: &[String]| {
            let pid = w.pid().expect("worker image knows its pid");
            w.write(&format!("daemon {pid} detached")).unwrap();
            std::thread::sleep(Duration::from_secs(30));
        },
        WorkerOptions {
            daemonize: true,
            kind: ChannelKind::Socket,
        },
    );
    worker.set_name("spawnkit-daemon");

    let pid = worker.run(&[])?;
    let status: String = worker.read()?;

    eprintln!("launcher got pid {pid}; daemon says: {status}");
    eprintln!("the daemon exits on its own in ~30s");

    Ok(())
}
