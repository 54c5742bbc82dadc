//! Daemon-mode spawning: double fork, session detachment, and the
//! blocking pid handshake.

#![cfg(unix)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::getsid;
use spawnkit::process::{Worker, WorkerOptions};
use spawnkit::transport::ChannelKind;

#[test]
fn daemon_detaches_and_reports_true_pid() {
    let mut worker = Worker::new(
        |w: &mut Worker, _args: &[String]| {
            w.write(&"daemon-ready").unwrap();
            // Stay alive until the launcher kills us.
            std::thread::sleep(std::time::Duration::from_secs(30));
        },
        WorkerOptions {
            daemonize: true,
            kind: ChannelKind::Socket,
        },
    );

    let daemon = worker.run(&[]).unwrap();
    assert!(daemon.as_raw() > 0);
    assert_eq!(worker.pid(), Some(daemon));

    // The channel keeps working launcher↔daemon after the handshake.
    let ready: String = worker.read().unwrap();
    assert_eq!(ready, "daemon-ready");

    // Alive and detached: a different session than the launcher, and not
    // a session leader itself (the intermediate was).
    kill(daemon, None).unwrap();
    let launcher_sid = getsid(None).unwrap();
    let daemon_sid = getsid(Some(daemon)).unwrap();
    assert_ne!(daemon_sid, launcher_sid);
    assert_ne!(daemon_sid, daemon);

    kill(daemon, Signal::SIGKILL).unwrap();
}
