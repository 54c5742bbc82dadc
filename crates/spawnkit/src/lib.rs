//! Process orchestration and inter-process communication.
//!
//! spawnkit spawns worker subprocesses from a running process (optionally
//! as detached daemons), supervises and reaps them, and exchanges framed
//! messages between master and worker over a selectable transport.
//!
//! # Crate Structure
//!
//! - [`transport`] — Fork-aware channel transports (socketpair, FIFOs)
//! - [`frame`] — Marker-validated message framing and value codec
//! - [`process`] — Worker supervision, daemonization, child reaping
//! - [`shm`] — Token-keyed shared-memory key/value store

/// Re-export transport types.
pub mod transport {
    pub use spawnkit_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use spawnkit_frame::*;
}

/// Re-export process supervision types.
pub mod process {
    pub use spawnkit_process::*;
}

/// Re-export shared-memory store types.
pub mod shm {
    pub use spawnkit_shm::*;
}
