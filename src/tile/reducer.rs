//! Reduction operators for overlapping updates

use crate::buffer::{Element, ElementType};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an update combines with the data already in a tile
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reducer {
    /// Overwrite (no reducer)
    #[default]
    Replace,
    Sum,
    Prod,
    Max,
    Min,
    /// Logical and, bool tiles only
    And,
    /// Logical or, bool tiles only
    Or,
}

impl Reducer {
    pub fn name(&self) -> &'static str {
        match self {
            Reducer::Replace => "replace",
            Reducer::Sum => "sum",
            Reducer::Prod => "prod",
            Reducer::Max => "max",
            Reducer::Min => "min",
            Reducer::And => "and",
            Reducer::Or => "or",
        }
    }

    /// Parse a reducer name. Empty and `none` mean [`Reducer::Replace`].
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "replace" => Ok(Reducer::Replace),
            "sum" | "add" => Ok(Reducer::Sum),
            "prod" | "multiply" => Ok(Reducer::Prod),
            "max" | "maximum" => Ok(Reducer::Max),
            "min" | "minimum" => Ok(Reducer::Min),
            "and" => Ok(Reducer::And),
            "or" => Ok(Reducer::Or),
            other => Err(Error::Unsupported(format!("unknown reducer '{}'", other))),
        }
    }

    /// Combine `src` into `dst` element-wise. Both hold `dtype` values.
    pub(crate) fn combine(&self, dtype: ElementType, dst: &mut [u8], src: &[u8]) -> Result<()> {
        debug_assert_eq!(dst.len(), src.len());
        if *self == Reducer::Replace {
            dst.copy_from_slice(src);
            return Ok(());
        }

        match dtype {
            ElementType::Bool => combine_with::<bool>(dst, src, self.bool_op()?),
            ElementType::Int8 => combine_with::<i8>(dst, src, self.numeric_op()?),
            ElementType::UInt8 => combine_with::<u8>(dst, src, self.numeric_op()?),
            ElementType::Int16 => combine_with::<i16>(dst, src, self.numeric_op()?),
            ElementType::UInt16 => combine_with::<u16>(dst, src, self.numeric_op()?),
            ElementType::Int32 => combine_with::<i32>(dst, src, self.numeric_op()?),
            ElementType::UInt32 => combine_with::<u32>(dst, src, self.numeric_op()?),
            ElementType::Int64 => combine_with::<i64>(dst, src, self.numeric_op()?),
            ElementType::UInt64 => combine_with::<u64>(dst, src, self.numeric_op()?),
            ElementType::Float32 => combine_with::<f32>(dst, src, self.numeric_op()?),
            ElementType::Float64 => combine_with::<f64>(dst, src, self.numeric_op()?),
            ElementType::Complex64 | ElementType::Complex128 => {
                return Err(Error::Unsupported(format!(
                    "reducer '{}' on complex elements",
                    self
                )))
            }
        }
        Ok(())
    }

    fn numeric_op<T: Arith>(&self) -> Result<fn(T, T) -> T> {
        let op: fn(T, T) -> T = match self {
            Reducer::Sum => T::sum,
            Reducer::Prod => T::prod,
            Reducer::Max => max_of,
            Reducer::Min => min_of,
            Reducer::Replace => |_, b| b,
            Reducer::And | Reducer::Or => {
                return Err(Error::Unsupported(format!(
                    "reducer '{}' requires bool elements",
                    self
                )))
            }
        };
        Ok(op)
    }

    fn bool_op(&self) -> Result<fn(bool, bool) -> bool> {
        let op: fn(bool, bool) -> bool = match self {
            Reducer::Sum | Reducer::Max | Reducer::Or => |a, b| a | b,
            Reducer::Prod | Reducer::Min | Reducer::And => |a, b| a & b,
            Reducer::Replace => |_, b| b,
        };
        Ok(op)
    }
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arithmetic used by the numeric reducers. Integers wrap.
trait Arith: Element {
    fn sum(a: Self, b: Self) -> Self;
    fn prod(a: Self, b: Self) -> Self;
}

macro_rules! impl_arith_int {
    ($($ty:ty),*) => {
        $(
            impl Arith for $ty {
                fn sum(a: Self, b: Self) -> Self { a.wrapping_add(b) }
                fn prod(a: Self, b: Self) -> Self { a.wrapping_mul(b) }
            }
        )*
    };
}

macro_rules! impl_arith_float {
    ($($ty:ty),*) => {
        $(
            impl Arith for $ty {
                fn sum(a: Self, b: Self) -> Self { a + b }
                fn prod(a: Self, b: Self) -> Self { a * b }
            }
        )*
    };
}

impl_arith_int!(i8, u8, i16, u16, i32, u32, i64, u64);
impl_arith_float!(f32, f64);

fn max_of<T: PartialOrd>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

fn min_of<T: PartialOrd>(a: T, b: T) -> T {
    if b < a {
        b
    } else {
        a
    }
}

fn combine_with<T: Element>(dst: &mut [u8], src: &[u8], op: fn(T, T) -> T) {
    let size = T::DTYPE.size();
    for (d, s) in dst.chunks_exact_mut(size).zip(src.chunks_exact(size)) {
        let merged = op(T::read(d), T::read(s));
        merged.write(d);
    }
}
