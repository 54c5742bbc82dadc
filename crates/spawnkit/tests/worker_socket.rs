//! Socket-transport worker lifecycle, exercised across a real fork.

#![cfg(unix)]

use spawnkit::process::{WaitStatus, Worker, WorkerOptions};
use spawnkit::transport::ChannelKind;

fn socket_options() -> WorkerOptions {
    WorkerOptions {
        daemonize: false,
        kind: ChannelKind::Socket,
    }
}

#[test]
fn roundtrip_and_pid_match() {
    let mut worker = Worker::new(
        |w: &mut Worker, args: &[String]| {
            let greeting: String = w.read().unwrap();
            let own_pid = w.pid().unwrap().as_raw();
            w.write(&(own_pid, format!("{greeting}, from {}", args[0])))
                .unwrap();
        },
        socket_options(),
    );

    let pid = worker.run(&["worker-1".to_string()]).unwrap();
    assert_eq!(worker.pid(), Some(pid));

    worker.write(&"hello").unwrap();
    let (worker_pid, reply): (i32, String) = worker.read().unwrap();

    // The pid run() returned is the pid that actually ran the callback.
    assert_eq!(worker_pid, pid.as_raw());
    assert_eq!(reply, "hello, from worker-1");

    let status = worker.wait().unwrap();
    assert!(matches!(status, WaitStatus::Exited(p, 0) if p == pid));
}

#[test]
fn raw_bytes_bypass_framing() {
    let mut worker = Worker::new(
        |w: &mut Worker, _args: &[String]| {
            let bytes = w.read_raw(true).unwrap();
            assert_eq!(bytes, b"PING");
            w.write_raw(b"PONG").unwrap();
        },
        socket_options(),
    );

    let pid = worker.run(&[]).unwrap();

    let n = worker.write_raw(b"PING").unwrap();
    assert_eq!(n, 4);
    let reply = worker.read_raw(true).unwrap();
    assert_eq!(reply, b"PONG");

    let status = worker.wait().unwrap();
    assert!(matches!(status, WaitStatus::Exited(p, 0) if p == pid));
}

#[test]
fn nonblocking_raw_read_is_empty_while_worker_waits() {
    let mut worker = Worker::new(
        |w: &mut Worker, _args: &[String]| {
            // Worker sends nothing until told to.
            let _: String = w.read().unwrap();
        },
        socket_options(),
    );

    worker.run(&[]).unwrap();

    let pending = worker.read_raw(false).unwrap();
    assert!(pending.is_empty());

    worker.write(&"finish").unwrap();
    worker.wait().unwrap();
}

#[test]
fn close_ipc_is_idempotent_after_bind() {
    let mut worker = Worker::new(
        |_w: &mut Worker, _args: &[String]| {},
        socket_options(),
    );

    worker.run(&[]).unwrap();
    worker.write(&"bind-now").ok();

    worker.close_ipc().unwrap();
    worker.close_ipc().unwrap();
    worker.clear_ipc().unwrap();

    // I/O after close is an error, not a hang.
    assert!(worker.read::<String>().is_err());

    worker.wait().unwrap();
}
