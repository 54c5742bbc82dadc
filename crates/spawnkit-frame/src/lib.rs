//! Marker-validated message framing for stream transports.
//!
//! Every message crossing a spawnkit channel is framed with:
//! - A 4-byte marker derived at compile time from a stable constant,
//!   catching cross-version and cross-protocol traffic early
//! - A 4-byte little-endian payload length
//!
//! The framing contract is fixed; the payload codec (serde_json via
//! [`Framer`]) sits on top and can be bypassed for raw byte moves.

pub mod codec;
pub mod error;
pub mod framer;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MARKER};
pub use error::{FrameError, Result};
pub use framer::Framer;
pub use reader::FrameReader;
pub use writer::FrameWriter;
