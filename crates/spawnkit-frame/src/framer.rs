use bytes::BytesMut;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{decode_frame, encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Value codec: serde values in and out of self-validating frames.
///
/// `serialize`/`deserialize` work on whole buffers; `seal`/`open` are the
/// halves used on a streaming path where [`crate::FrameReader`] and
/// [`crate::FrameWriter`] own the wire side.
#[derive(Debug, Clone, Default)]
pub struct Framer {
    config: FrameConfig,
}

impl Framer {
    /// Create a framer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self { config }
    }

    /// Serialize a value into one complete frame.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let payload = self.seal(value)?;
        let mut buf = BytesMut::with_capacity(payload.len() + crate::HEADER_SIZE);
        encode_frame(&payload, &mut buf)?;
        Ok(buf.to_vec())
    }

    /// Deserialize a value from one complete frame.
    ///
    /// Fails with [`FrameError::BadMarker`] if the buffer does not start
    /// with the expected marker, and [`FrameError::Incomplete`] if it ends
    /// before the declared payload length.
    pub fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let mut buf = BytesMut::from(bytes);
        match decode_frame(&mut buf, self.config.max_payload_size)? {
            Some(frame) => self.open(&frame),
            None => Err(FrameError::Incomplete {
                have: bytes.len(),
                need: crate::HEADER_SIZE,
            }),
        }
    }

    /// Encode a value into payload bytes (no frame header).
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(value)?;
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }
        Ok(payload)
    }

    /// Decode a received frame's payload into a value.
    pub fn open<T: DeserializeOwned>(&self, frame: &Frame) -> Result<T> {
        Ok(serde_json::from_slice(&frame.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::codec::MARKER;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        id: u32,
        task: String,
    }

    #[test]
    fn value_roundtrip() {
        let framer = Framer::new();
        let job = Job {
            id: 7,
            task: "resize".into(),
        };

        let bytes = framer.serialize(&job).unwrap();
        assert_eq!(&bytes[..4], &MARKER);

        let back: Job = framer.deserialize(&bytes).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn rejects_missing_marker() {
        let framer = Framer::new();
        let mut bytes = framer.serialize(&"hello").unwrap();
        bytes[0] ^= 0xFF;

        let result = framer.deserialize::<String>(&bytes);
        assert!(matches!(result, Err(FrameError::BadMarker)));
    }

    #[test]
    fn rejects_unframed_bytes() {
        let framer = Framer::new();
        let result = framer.deserialize::<String>(b"\"not a frame\"");
        assert!(matches!(result, Err(FrameError::BadMarker)));
    }

    #[test]
    fn rejects_truncated_frame() {
        let framer = Framer::new();
        let bytes = framer.serialize(&"truncate me").unwrap();

        let result = framer.deserialize::<String>(&bytes[..3]);
        assert!(matches!(result, Err(FrameError::Incomplete { .. })));
    }

    #[test]
    fn seal_respects_payload_cap() {
        let framer = Framer::with_config(FrameConfig {
            max_payload_size: 8,
        });
        let result = framer.seal(&"far too long for eight bytes");
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[test]
    fn open_surfaces_codec_errors() {
        let framer = Framer::new();
        let frame = Frame::new(&b"not json"[..]);
        let result = framer.open::<Job>(&frame);
        assert!(matches!(result, Err(FrameError::Codec(_))));
    }
}
