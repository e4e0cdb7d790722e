//! Discord IPC framing.
//!
//! Every message is an 8 byte little-endian header (`opcode: i32`,
//! `length: i32`) followed by exactly `length` bytes of JSON.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::IpcError;

const HEADER_LEN: usize = 8;
const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl TryFrom<i32> for Opcode {
    type Error = IpcError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Handshake),
            1 => Ok(Self::Frame),
            2 => Ok(Self::Close),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Pong),
            other => Err(IpcError::protocol(format!("unknown opcode {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Value,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: Value) -> Self {
        Self { opcode, payload }
    }

    /// Builds a frame from any serializable payload.
    pub fn json<T: Serialize>(opcode: Opcode, payload: &T) -> Result<Self, IpcError> {
        Ok(Self::new(opcode, serde_json::to_value(payload)?))
    }

    /// String field of the payload, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IpcCodec;

impl Decoder for IpcCodec {
    type Item = Frame;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, IpcError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let opcode = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let length = i32::from_le_bytes([src[4], src[5], src[6], src[7]]);
        let length = usize::try_from(length)
            .map_err(|_| IpcError::protocol(format!("negative frame length {}", length)))?;
        if length > MAX_PAYLOAD_LEN {
            return Err(IpcError::protocol(format!("frame too large ({} bytes)", length)));
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(length);
        let opcode = Opcode::try_from(opcode)?;
        let payload = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body)?
        };

        Ok(Some(Frame { opcode, payload }))
    }
}

impl Encoder<Frame> for IpcCodec {
    type Error = IpcError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), IpcError> {
        let body = serde_json::to_vec(&frame.payload)?;
        let length = i32::try_from(body.len())
            .map_err(|_| IpcError::protocol(format!("frame too large ({} bytes)", body.len())))?;

        dst.reserve(HEADER_LEN + body.len());
        dst.put_i32_le(frame.opcode as i32);
        dst.put_i32_le(length);
        dst.put_slice(&body);
        Ok(())
    }
}
