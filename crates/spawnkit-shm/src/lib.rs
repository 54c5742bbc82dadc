//! Token-file-keyed shared-memory key/value store.
//!
//! A [`ShmStore`] attaches a shared-memory segment identified by a token
//! file under the system temporary directory; every process attaching
//! the same token addresses the same memory. Values live in
//! integer-keyed slots behind a cross-process mutex.
//!
//! Designed for a small set of cooperating processes (typically one
//! master and its workers), not as a general-purpose database.

#![cfg(unix)]

pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{ShmStore, StoreConfig};
