//! Wire framing: `Frame { header, payload }` as a single JSON text value.
//!
//! One UDP datagram carries exactly one `Frame` — datagram boundaries give
//! "one logical message per frame" for free, so there is no length prefix
//! the way TCP-based framing needs one.

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum ProtocolError {
    TooShort(usize),
    SerializeError(serde_json::Error),
    DeserializeError(serde_json::Error),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort(len) => write!(f, "message too short: {len} bytes"),
            Self::SerializeError(e) => write!(f, "serialize: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub header: String,
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn new(header: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            header: header.into(),
            payload,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(frame).map_err(ProtocolError::SerializeError)
}

pub fn decode_frame(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::TooShort(data.len()));
    }
    serde_json::from_slice(data).map_err(ProtocolError::DeserializeError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let frame = Frame::new("stor_item_list", serde_json::json!({"torch/0": 4}));
        let bytes = encode_frame(&frame).unwrap();
        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.header, "stor_item_list");
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn empty_input_is_too_short() {
        assert!(matches!(decode_frame(&[]), Err(ProtocolError::TooShort(0))));
    }
}
