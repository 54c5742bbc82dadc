//! Shared-memory slots are visible across a fork boundary through the
//! same token key.

#![cfg(unix)]

use spawnkit::process::{WaitStatus, Worker, WorkerOptions};
use spawnkit::shm::ShmStore;

#[test]
fn values_cross_the_process_boundary() {
    let token = format!("it-{}", std::process::id());

    let mut store = ShmStore::attach(&token, false).unwrap();
    store.set(1, &"from-master".to_string()).unwrap();

    let worker_token = token.clone();
    let mut worker = Worker::new(
        move |_w: &mut Worker, _args: &[String]| {
            let mut store = ShmStore::attach(&worker_token, false).unwrap();

            let seen: Option<String> = store.get(1).unwrap();
            assert_eq!(seen.as_deref(), Some("from-master"));

            store.set(2, &"from-worker".to_string()).unwrap();
            store.delete(1).unwrap();
        },
        WorkerOptions::default(),
    );

    let pid = worker.run(&[]).unwrap();
    let status = worker.wait().unwrap();
    assert!(matches!(status, WaitStatus::Exited(p, 0) if p == pid));

    // The worker's writes and deletes are visible here, never stale.
    let fresh: Option<String> = store.get(2).unwrap();
    assert_eq!(fresh.as_deref(), Some("from-worker"));
    assert_eq!(store.get::<String>(1).unwrap(), None);

    store.release().unwrap();
    assert!(!store.token_path().exists());
}
