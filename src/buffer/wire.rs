//! Buffer wire format
//!
//! ```text
//! item_size:          i32
//! item_type:          i32   (element type char code)
//! size:               i64   (payload bytes)
//! ndim:               i32
//! dimensions:         i64 x 32
//! is_shared_manager:  u8
//! payload:            size bytes, only if size > 0
//! ```
//!
//! All integers are little-endian. A decoded buffer always owns its
//! memory exclusively.

use super::{AlignedBytes, Backing, Buffer, ElementType, Ownership};
use crate::extent::Extent;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::debug;

/// Fixed number of dimension slots in the header
pub const WIRE_MAX_DIMS: usize = 32;

/// Header size in bytes
pub const WIRE_HEADER_LEN: usize = 4 + 4 + 8 + 4 + 8 * WIRE_MAX_DIMS + 1;

impl Buffer {
    /// Encode the whole buffer
    pub fn to_wire(&self) -> Bytes {
        let payload = self.as_bytes();
        let mut out = BytesMut::with_capacity(WIRE_HEADER_LEN + payload.len());

        out.put_i32_le(self.dtype.size() as i32);
        out.put_i32_le(self.dtype.as_char() as i32);
        out.put_i64_le(payload.len() as i64);
        out.put_i32_le(self.dimensions.len() as i32);
        for slot in 0..WIRE_MAX_DIMS {
            out.put_i64_le(self.dimensions.get(slot).map_or(0, |&d| d as i64));
        }
        out.put_u8((self.ownership() == Ownership::Shared) as u8);
        if !payload.is_empty() {
            out.put_slice(payload);
        }

        debug!(
            dtype = %self.dtype,
            ndim = self.dimensions.len(),
            size = payload.len(),
            "encoded buffer"
        );
        out.freeze()
    }

    /// Encode only the sub-region `extent` (buffer coordinates)
    pub fn to_wire_slice(&self, extent: &Extent) -> Result<Bytes> {
        Ok(self.copy_slice(extent)?.to_wire())
    }

    /// Decode a buffer. The payload length must match the header exactly.
    pub fn from_wire(data: &[u8]) -> Result<Buffer> {
        let mut buf = data;
        if buf.remaining() < WIRE_HEADER_LEN {
            return Err(Error::Framing(format!(
                "header truncated: {} of {} bytes",
                buf.remaining(),
                WIRE_HEADER_LEN
            )));
        }

        let item_size = buf.get_i32_le();
        let type_code = buf.get_i32_le();
        let size = buf.get_i64_le();
        let ndim = buf.get_i32_le();
        let mut slots = [0i64; WIRE_MAX_DIMS];
        for slot in slots.iter_mut() {
            *slot = buf.get_i64_le();
        }
        let _is_shared_manager = buf.get_u8() != 0;

        let dtype = u32::try_from(type_code)
            .ok()
            .and_then(char::from_u32)
            .and_then(ElementType::from_char)
            .ok_or_else(|| Error::Framing(format!("unknown element type code {}", type_code)))?;
        if item_size as usize != dtype.size() {
            return Err(Error::Framing(format!(
                "item size {} does not match element type {}",
                item_size, dtype
            )));
        }
        if ndim < 0 || ndim as usize > WIRE_MAX_DIMS {
            return Err(Error::Framing(format!("invalid rank {}", ndim)));
        }
        let dims = &slots[..ndim as usize];
        if dims.iter().any(|&d| d < 0) {
            return Err(Error::Framing(format!("negative dimension in {:?}", dims)));
        }
        let dimensions: Vec<usize> = dims.iter().map(|&d| d as usize).collect();

        let expected = super::checked_nbytes(&dimensions, dtype).ok_or_else(|| {
            Error::Framing(format!("dimensions {:?} of {} overflow", dimensions, dtype))
        })?;
        if size < 0 || size as usize != expected {
            return Err(Error::Framing(format!(
                "declared size {} does not match dimensions {:?} of {}",
                size, dimensions, dtype
            )));
        }
        if buf.remaining() != expected {
            return Err(Error::Framing(format!(
                "payload has {} bytes, header declares {}",
                buf.remaining(),
                expected
            )));
        }

        Ok(Buffer {
            dtype,
            dimensions,
            backing: Backing::Exclusive(AlignedBytes::from_slice(buf)),
        })
    }
}

impl Serialize for Buffer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_bytes(WireVisitor)
    }
}

struct WireVisitor;

impl<'de> Visitor<'de> for WireVisitor {
    type Value = Buffer;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a wire-encoded buffer")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Buffer, E> {
        Buffer::from_wire(v).map_err(E::custom)
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<Buffer, E> {
        self.visit_bytes(&v)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Buffer, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        self.visit_bytes(&bytes)
    }
}
