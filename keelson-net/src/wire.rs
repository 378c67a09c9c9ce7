//! Paired integer codec for the frame header.
//!
//! Both halves of every field live in this module so sender and receiver
//! cannot drift: the opcode is an unsigned 16-bit value, the payload size an
//! unsigned 64-bit value, both little-endian.

use crate::error::{NetError, NetResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encoded width of the opcode field.
pub const OPCODE_LEN: usize = 2;
/// Encoded width of the payload-size field.
pub const SIZE_LEN: usize = 8;

#[must_use]
pub fn encode_opcode(opcode: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(OPCODE_LEN);
    buf.put_u16_le(opcode);
    buf.freeze()
}

pub fn decode_opcode(data: &[u8]) -> NetResult<u16> {
    if data.len() < OPCODE_LEN {
        return Err(NetError::FrameIncomplete(format!(
            "opcode needs {OPCODE_LEN} bytes, got {}",
            data.len()
        )));
    }
    Ok((&data[..OPCODE_LEN]).get_u16_le())
}

#[must_use]
pub fn encode_size(size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(SIZE_LEN);
    buf.put_u64_le(size);
    buf.freeze()
}

pub fn decode_size(data: &[u8]) -> NetResult<u64> {
    if data.len() < SIZE_LEN {
        return Err(NetError::FrameIncomplete(format!(
            "payload size needs {SIZE_LEN} bytes, got {}",
            data.len()
        )));
    }
    Ok((&data[..SIZE_LEN]).get_u64_le())
}
