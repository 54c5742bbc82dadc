//! Spawn one worker per transport and bounce a message through it.
//!
//! Run with:
//!   cargo run --example ping-pong

use spawnkit::process::{Worker, WorkerOptions};
use spawnkit::transport::ChannelKind;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    for kind in [ChannelKind::Socket, ChannelKind::Fifo] {
        let mut worker = Worker::new(
            |w: &mut Worker, _args: &[String]| {
                let ping: String = w.read().unwrap();
                w.write(&format!("pong ({ping})")).unwrap();
            },
            WorkerOptions {
                daemonize: false,
                kind,
            },
        );

        let pid = worker.run(&[])?;
        eprintln!("spawned worker {pid} over {kind:?}");

        worker.write(&"ping")?;
        let reply: String = worker.read()?;
        eprintln!("worker {pid} replied: {reply}");

        worker.wait()?;
        worker.clear_ipc()?;
    }

    Ok(())
}
