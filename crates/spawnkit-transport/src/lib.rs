//! Fork-aware IPC channel transports.
//!
//! A [`Channel`] is created in the parent image *before* fork so both
//! resulting images inherit the underlying resource, then bound exactly
//! once per image with that image's [`Role`]. Binding differentiates the
//! shared resource into a point-to-point [`Endpoint`]:
//!
//! - Socket channels wrap a connected `socketpair`; binding keeps the
//!   role's descriptor end and closes the other.
//! - Fifo channels wrap two named FIFOs under a private directory; binding
//!   opens one per direction in a fixed, role-complementary order so the
//!   two blocking opens interleave instead of deadlocking.
//!
//! Channels are strictly two-party. There is no contract for a third
//! writer on the same resource.

#![cfg(unix)]

pub mod channel;
pub mod endpoint;
pub mod error;

pub use channel::{Channel, ChannelKind, ChannelStorage, Role};
pub use endpoint::{Endpoint, EndpointHalf};
pub use error::{ChannelError, Result};
