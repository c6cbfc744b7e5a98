//! Element types
//!
//! The closed set of element kinds a buffer can hold, each with a
//! one-character tag (used on the wire) and a fixed byte size.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl ElementType {
    pub const ALL: [ElementType; 13] = [
        ElementType::Bool,
        ElementType::Int8,
        ElementType::UInt8,
        ElementType::Int16,
        ElementType::UInt16,
        ElementType::Int32,
        ElementType::UInt32,
        ElementType::Int64,
        ElementType::UInt64,
        ElementType::Float32,
        ElementType::Float64,
        ElementType::Complex64,
        ElementType::Complex128,
    ];

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::Bool | ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float32 => 4,
            ElementType::Int64
            | ElementType::UInt64
            | ElementType::Float64
            | ElementType::Complex64 => 8,
            ElementType::Complex128 => 16,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            ElementType::Bool => '?',
            ElementType::Int8 => 'b',
            ElementType::UInt8 => 'B',
            ElementType::Int16 => 'h',
            ElementType::UInt16 => 'H',
            ElementType::Int32 => 'i',
            ElementType::UInt32 => 'I',
            ElementType::Int64 => 'l',
            ElementType::UInt64 => 'L',
            ElementType::Float32 => 'f',
            ElementType::Float64 => 'd',
            ElementType::Complex64 => 'F',
            ElementType::Complex128 => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        ElementType::ALL.into_iter().find(|t| t.as_char() == c)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, ElementType::Complex64 | ElementType::Complex128)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A plain-old-data element that can be read out of a buffer
///
/// Implemented for the primitive types backing the real-valued
/// [`ElementType`]s.
pub trait Element: Copy + Default + PartialOrd + Send + Sync + 'static {
    const DTYPE: ElementType;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, out: &mut [u8]);
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: ElementType = ElementType::$dtype;

                fn read(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }

                fn write(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_element! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

impl Element for bool {
    const DTYPE: ElementType = ElementType::Bool;

    fn read(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
}
