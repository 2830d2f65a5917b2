//! NUL-terminated frame codec
//!
//! Outbound commands are encoded as `"{verb} {path}[ {value}]\0"`. Inbound
//! bytes arrive in arbitrary chunks and are accumulated until a terminator is
//! seen, then parsed as a `{ "path": ..., "data": ... }` JSON frame.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Byte terminating every protocol message
pub const FRAME_TERMINATOR: u8 = 0;

/// Default accumulator capacity (16 KiB)
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Frame decoding errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// No terminator within the accumulator capacity. Fatal for the connection.
    #[error("frame exceeds {capacity} bytes without terminator")]
    Overflow { capacity: usize },

    /// Frame bytes are not UTF-8. The frame is dropped.
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Frame text is not a `{path, data}` JSON object. The frame is dropped.
    #[error("frame is not a valid JSON message: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Whether the connection can no longer be trusted after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::Overflow { .. })
    }
}

/// Inbound protocol frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Frame {
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

/// Outbound protocol command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { path: String },
    Set { path: String, value: String },
    Subscribe { path: String },
}

impl Command {
    pub fn get(path: impl Into<String>) -> Self {
        Command::Get { path: path.into() }
    }

    /// Build a `set` command. Strings are sent verbatim, any other JSON value
    /// as its JSON text (`0.5`, `true`).
    pub fn set(path: impl Into<String>, value: &Value) -> Self {
        let value = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Command::Set {
            path: path.into(),
            value,
        }
    }

    pub fn subscribe(path: impl Into<String>) -> Self {
        Command::Subscribe { path: path.into() }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Command::Get { .. } => "get",
            Command::Set { .. } => "set",
            Command::Subscribe { .. } => "subscribe",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Command::Get { path } | Command::Set { path, .. } | Command::Subscribe { path } => path,
        }
    }

    /// Encode as wire bytes, terminator included
    pub fn encode(&self) -> Bytes {
        let text = self.to_string();
        let mut buf = BytesMut::with_capacity(text.len() + 1);
        buf.put_slice(text.as_bytes());
        buf.put_u8(FRAME_TERMINATOR);
        buf.freeze()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Set { path, value } => write!(f, "set {} {}", path, value),
            other => write!(f, "{} {}", other.verb(), other.path()),
        }
    }
}

/// Accumulates inbound chunks and splits them into frames
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    capacity: usize,
}

impl FrameDecoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity.min(DEFAULT_BUFFER_CAPACITY)),
            capacity,
        }
    }

    /// Bytes of the current partial frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed one inbound chunk.
    ///
    /// Returns every frame completed by this chunk, in order. Frames that fail
    /// to parse are returned as errors in their slot so the caller can report
    /// them and carry on. The outer error is an overflow, after which the
    /// decoder state is reset and the connection should be dropped.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Result<Frame, CodecError>>, CodecError> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == FRAME_TERMINATOR) {
            self.append(&rest[..pos])?;
            let raw = self.buf.split();
            frames.push(Self::parse(&raw));
            rest = &rest[pos + 1..];
        }

        self.append(rest)?;
        Ok(frames)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if self.buf.len() + bytes.len() > self.capacity {
            self.buf.clear();
            return Err(CodecError::Overflow {
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn parse(raw: &[u8]) -> Result<Frame, CodecError> {
        let text = std::str::from_utf8(raw)?;
        Ok(serde_json::from_str(text)?)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn wire(text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(FRAME_TERMINATOR);
        bytes
    }

    #[test]
    fn test_encode_get() {
        let cmd = Command::get("/devices");
        assert_eq!(&cmd.encode()[..], b"get /devices\0");
    }

    #[test]
    fn test_encode_subscribe() {
        let cmd = Command::subscribe("/devices/1/inputs/3/Mute");
        assert_eq!(&cmd.encode()[..], b"subscribe /devices/1/inputs/3/Mute\0");
    }

    #[test]
    fn test_encode_set_values() {
        let path = "/devices/1/inputs/3/sends/2/GainTapered";
        assert_eq!(
            &Command::set(path, &json!(0.5)).encode()[..],
            b"set /devices/1/inputs/3/sends/2/GainTapered 0.5\0"
        );
        assert_eq!(
            Command::set("/devices/1/inputs/3/Mute", &json!(true)).to_string(),
            "set /devices/1/inputs/3/Mute true"
        );
        assert_eq!(
            Command::set("/devices/1/inputs/3/Name", &json!("Kick")).to_string(),
            "set /devices/1/inputs/3/Name Kick"
        );
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::default();
        let frames = decoder
            .decode(&wire(r#"{"path":"/devices","data":{"children":{}}}"#))
            .unwrap();

        assert_eq!(frames.len(), 1);
        let frame = frames.into_iter().next().unwrap().unwrap();
        assert_eq!(frame.path, "/devices");
        assert_eq!(frame.data, json!({"children": {}}));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_frame_split_across_chunks() {
        let mut decoder = FrameDecoder::default();
        let bytes = wire(r#"{"path":"/devices/1/inputs/0/Mute/value","data":true}"#);
        let (head, tail) = bytes.split_at(17);

        assert!(decoder.decode(head).unwrap().is_empty());
        assert_eq!(decoder.buffered(), 17);

        let frames = decoder.decode(tail).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].as_ref().unwrap().path,
            "/devices/1/inputs/0/Mute/value"
        );
    }

    #[test]
    fn test_decode_multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::default();
        let mut bytes = wire(r#"{"path":"/a","data":1}"#);
        bytes.extend(wire(r#"{"path":"/b","data":2}"#));
        bytes.extend(br#"{"path":"/c""#);

        let frames = decoder.decode(&bytes).unwrap();
        let paths: Vec<_> = frames
            .iter()
            .map(|f| f.as_ref().unwrap().path.as_str())
            .collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert!(decoder.buffered() > 0);
    }

    #[test]
    fn test_malformed_frame_is_reported_and_next_frame_survives() {
        let mut decoder = FrameDecoder::default();
        let mut bytes = wire("not json");
        bytes.extend(wire(r#"{"path":"/ok","data":null}"#));

        let frames = decoder.decode(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(CodecError::Json(_))));
        assert_eq!(frames[1].as_ref().unwrap().path, "/ok");
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let mut decoder = FrameDecoder::default();
        let frames = decoder.decode(&[0xFF, 0xFE, FRAME_TERMINATOR]).unwrap();
        assert!(matches!(frames[0], Err(CodecError::Utf8(_))));
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut decoder = FrameDecoder::new(8);
        assert!(decoder.decode(b"12345").unwrap().is_empty());

        let err = decoder.decode(b"6789").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_frame_at_exact_capacity_fits() {
        let text = r#"{"path":"/a","data":1}"#;
        let mut decoder = FrameDecoder::new(text.len());
        let frames = decoder.decode(&wire(text)).unwrap();
        assert_eq!(frames.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_chunking_preserves_frames(cuts in proptest::collection::vec(1usize..24, 0..64)) {
            let texts = [
                r#"{"path":"/devices","data":{"children":{"1":{}}}}"#,
                r#"{"path":"/devices/1","data":{"properties":{"DeviceName":{"value":"Console A"}}}}"#,
                r#"{"path":"/devices/1/inputs/0/FaderLevel/value","data":-12.5}"#,
            ];
            let bytes: Vec<u8> = texts.iter().flat_map(|t| wire(t)).collect();

            let mut decoder = FrameDecoder::default();
            let mut paths = Vec::new();
            let mut offset = 0;
            for cut in cuts {
                if offset >= bytes.len() {
                    break;
                }
                let end = (offset + cut).min(bytes.len());
                for frame in decoder.decode(&bytes[offset..end]).unwrap() {
                    paths.push(frame.unwrap().path);
                }
                offset = end;
            }
            for frame in decoder.decode(&bytes[offset..]).unwrap() {
                paths.push(frame.unwrap().path);
            }

            prop_assert_eq!(
                paths,
                vec![
                    "/devices".to_string(),
                    "/devices/1".to_string(),
                    "/devices/1/inputs/0/FaderLevel/value".to_string(),
                ]
            );
        }
    }
}
