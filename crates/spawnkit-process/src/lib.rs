//! Fork-based worker supervision.
//!
//! A [`Worker`] is configured with a callback, a daemonize flag, and a
//! transport kind; [`Worker::run`] forks and the two images diverge: the
//! master gets the worker's pid back immediately, the worker image runs
//! the callback and terminates through a single exit routine. Both images
//! inherit one channel resource and bind it with opposite roles to
//! exchange framed messages.
//!
//! The [`reaper`] module owns the process-wide `SIGCHLD` disposition for
//! collecting terminated children.

#![cfg(unix)]

pub mod error;
pub mod reaper;
pub mod title;
pub mod worker;

pub use error::{ProcessError, Result};
pub use worker::{Pid, WaitStatus, Worker, WorkerOptions};

pub use spawnkit_transport::{ChannelKind, Role};
