//! Typed array buffers with explicit ownership
//!
//! A [`Buffer`] is a contiguous block of elements of one [`ElementType`]
//! laid out row-major over its dimensions. The memory is held in exactly
//! one of three ways:
//!
//! - **Exclusive**: allocated by the buffer and freed with it.
//! - **Borrowed**: owned by a [`HostArray`]; the buffer holds a host
//!   reference for as long as it lives.
//! - **Shared**: owned by a [`Source`] tracked in a [`MemoryRegistry`];
//!   several buffers (possibly at different offsets) share it and the
//!   last one out frees or releases it.

mod dtype;
mod host;
mod registry;
mod wire;

pub use dtype::{Element, ElementType};
pub use host::{HostArray, NdHostArray};
pub use registry::{
    AlignedBytes, MemoryRegistry, RegistryObserver, Source, SourceKey, SourceKind,
};
pub use wire::{WIRE_HEADER_LEN, WIRE_MAX_DIMS};

use crate::extent::{ravelled_pos, unravelled_pos, Extent};
use crate::{Error, Result};
use ndarray::{ArrayD, IxDyn};
use registry::{Released, Retained};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// How a buffer holds its memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ownership {
    Exclusive,
    Borrowed,
    Shared,
}

/// A typed, row-major array buffer
#[derive(Clone)]
pub struct Buffer {
    dtype: ElementType,
    dimensions: Vec<usize>,
    backing: Backing,
}

#[derive(Clone)]
enum Backing {
    Exclusive(AlignedBytes),
    Borrowed(HostBorrow),
    Shared(SharedRef),
}

/// One host reference, taken on creation and clone, dropped on drop
struct HostBorrow(Arc<dyn HostArray>);

impl HostBorrow {
    fn new(host: Arc<dyn HostArray>) -> Self {
        host.acquire();
        HostBorrow(host)
    }
}

impl Clone for HostBorrow {
    fn clone(&self) -> Self {
        HostBorrow::new(self.0.clone())
    }
}

impl Drop for HostBorrow {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A registered reference to a shared source
struct SharedRef {
    registry: Arc<MemoryRegistry>,
    source: Arc<Source>,
    key: SourceKey,
    offset: usize,
    len: usize,
}

impl SharedRef {
    fn new(
        registry: Arc<MemoryRegistry>,
        source: Arc<Source>,
        offset: usize,
        len: usize,
    ) -> Self {
        let key = source.key();
        if registry.retain(key) == Retained::First {
            // The registry mutex is not held here.
            if let Source::Host(host) = source.as_ref() {
                host.acquire();
            }
        }
        SharedRef {
            registry,
            source,
            key,
            offset,
            len,
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.source.bytes()[self.offset..self.offset + self.len]
    }
}

impl Clone for SharedRef {
    fn clone(&self) -> Self {
        SharedRef::new(
            self.registry.clone(),
            self.source.clone(),
            self.offset,
            self.len,
        )
    }
}

impl Drop for SharedRef {
    fn drop(&mut self) {
        match self.registry.release(self.key) {
            Released::Last => {
                let kind = self.source.kind();
                match self.source.as_ref() {
                    Source::Host(host) => {
                        debug!(key = self.key, "releasing host reference of shared source");
                        host.release();
                    }
                    Source::Heap(_) => {
                        debug!(key = self.key, "freeing shared heap source");
                    }
                }
                self.registry.notify_final_release(self.key, kind);
            }
            Released::Remaining(_) | Released::Untracked => {}
        }
    }
}

impl Buffer {
    /// Allocate a zero-filled buffer
    pub fn zeros(dimensions: &[usize], dtype: ElementType) -> Self {
        let len = element_count(dimensions) * dtype.size();
        Buffer {
            dtype,
            dimensions: dimensions.to_vec(),
            backing: Backing::Exclusive(AlignedBytes::zeroed(len)),
        }
    }

    /// Take a caller-supplied block of raw bytes
    ///
    /// The block is moved into aligned storage owned by the buffer.
    pub fn from_bytes(dimensions: &[usize], dtype: ElementType, bytes: &[u8]) -> Result<Self> {
        check_len(dimensions, dtype, bytes.len())?;
        Ok(Buffer {
            dtype,
            dimensions: dimensions.to_vec(),
            backing: Backing::Exclusive(AlignedBytes::from_slice(bytes)),
        })
    }

    /// Build an exclusive buffer from typed values
    pub fn from_elements<T: Element>(dimensions: &[usize], values: &[T]) -> Result<Self> {
        let size = T::DTYPE.size();
        check_len(dimensions, T::DTYPE, values.len() * size)?;
        let mut bytes = AlignedBytes::zeroed(values.len() * size);
        for (value, out) in values.iter().zip(bytes.as_mut_slice().chunks_exact_mut(size)) {
            value.write(out);
        }
        Ok(Buffer {
            dtype: T::DTYPE,
            dimensions: dimensions.to_vec(),
            backing: Backing::Exclusive(bytes),
        })
    }

    /// Borrow a host array's memory without copying
    pub fn borrow_host(host: Arc<dyn HostArray>) -> Self {
        Buffer {
            dtype: host.dtype(),
            dimensions: host.dimensions(),
            backing: Backing::Borrowed(HostBorrow::new(host)),
        }
    }

    /// Reference `dimensions` worth of elements at byte `offset` of a
    /// shared source
    pub fn shared(
        registry: &Arc<MemoryRegistry>,
        source: Arc<Source>,
        offset: usize,
        dimensions: &[usize],
        dtype: ElementType,
    ) -> Result<Self> {
        let available = source.bytes().len();
        let len = checked_nbytes(dimensions, dtype)
            .filter(|len| offset.checked_add(*len).is_some_and(|end| end <= available))
            .ok_or_else(|| {
                Error::contract(format!(
                    "{:?} elements of {} at offset {} exceed source of {} bytes",
                    dimensions, dtype, offset, available
                ))
            })?;
        Ok(Buffer {
            dtype,
            dimensions: dimensions.to_vec(),
            backing: Backing::Shared(SharedRef::new(registry.clone(), source, offset, len)),
        })
    }

    /// Move an exclusive buffer's memory into a shared source so views
    /// can alias it. Other modes are returned unchanged.
    pub fn into_shared(self, registry: &Arc<MemoryRegistry>) -> Self {
        match self.backing {
            Backing::Exclusive(bytes) => {
                let len = bytes.len();
                let source = Source::heap(bytes);
                Buffer {
                    dtype: self.dtype,
                    dimensions: self.dimensions,
                    backing: Backing::Shared(SharedRef::new(registry.clone(), source, 0, len)),
                }
            }
            backing => Buffer { backing, ..self },
        }
    }

    /// The empty marker: one axis of length zero
    pub fn empty_marker(dtype: ElementType) -> Self {
        Buffer::zeros(&[0], dtype)
    }

    pub fn is_empty_marker(&self) -> bool {
        self.dimensions.len() == 1 && self.dimensions[0] == 0
    }

    pub fn dtype(&self) -> ElementType {
        self.dtype
    }

    pub fn dimensions(&self) -> &[usize] {
        &self.dimensions
    }

    pub fn ndim(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        element_count(&self.dimensions)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size in bytes
    pub fn nbytes(&self) -> usize {
        self.len() * self.dtype.size()
    }

    pub fn ownership(&self) -> Ownership {
        match self.backing {
            Backing::Exclusive(_) => Ownership::Exclusive,
            Backing::Borrowed(_) => Ownership::Borrowed,
            Backing::Shared(_) => Ownership::Shared,
        }
    }

    /// Registry key of the shared source, if in shared mode
    pub fn source_key(&self) -> Option<SourceKey> {
        match &self.backing {
            Backing::Shared(r) => Some(r.key),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Exclusive(b) => b.as_slice(),
            Backing::Borrowed(h) => h.0.bytes(),
            Backing::Shared(r) => r.bytes(),
        }
    }

    /// Mutable access to the bytes
    ///
    /// Borrowed and shared memory is never written through: the buffer
    /// first copies it into exclusive storage.
    pub fn make_mut(&mut self) -> &mut [u8] {
        if !matches!(self.backing, Backing::Exclusive(_)) {
            let owned = AlignedBytes::from_slice(self.as_bytes());
            self.backing = Backing::Exclusive(owned);
        }
        match &mut self.backing {
            Backing::Exclusive(b) => b.as_mut_slice(),
            _ => unreachable!("backing was made exclusive above"),
        }
    }

    /// View the elements in place
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_dtype::<T>()?;
        let bytes = self.as_bytes();
        if bytes.as_ptr() as usize % std::mem::align_of::<T>() != 0 {
            return Err(Error::Unsupported(
                "buffer is not aligned for in-place access".into(),
            ));
        }
        // Raw bytes come from callers, hosts and the wire; only 0 and 1
        // are valid `bool`s.
        if self.dtype == ElementType::Bool && bytes.iter().any(|&b| b > 1) {
            return Err(Error::Unsupported(
                "bool buffer holds bytes other than 0 or 1, read it with to_vec".into(),
            ));
        }
        // SAFETY: dtype matches `T`, the length is a whole number of
        // elements, alignment was checked, every bit pattern of the
        // numeric element types is valid and bool bytes were checked above.
        Ok(unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const T, self.len()) })
    }

    /// Copy the elements out
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_dtype::<T>()?;
        Ok(self
            .as_bytes()
            .chunks_exact(self.dtype.size())
            .map(T::read)
            .collect())
    }

    /// Materialize as a host-native `ndarray`
    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>> {
        let values = self.to_vec::<T>()?;
        ArrayD::from_shape_vec(IxDyn(&self.dimensions), values)
            .map_err(|e| Error::contract(format!("shape error: {}", e)))
    }

    /// Copy the sub-region `extent` (in buffer coordinates) into a new
    /// exclusive buffer
    pub fn copy_slice(&self, extent: &Extent) -> Result<Buffer> {
        self.check_region(extent)?;
        let size = self.dtype.size();
        let src = self.as_bytes();
        let mut out = AlignedBytes::zeroed(extent.size() as usize * size);
        let dst = out.as_mut_slice();
        for run in runs(&self.dimensions, extent) {
            let from = run.outer * size;
            let to = run.inner * size;
            let n = run.len * size;
            dst[to..to + n].copy_from_slice(&src[from..from + n]);
        }
        Ok(Buffer {
            dtype: self.dtype,
            dimensions: extent_dims(extent),
            backing: Backing::Exclusive(out),
        })
    }

    /// The sub-region `extent` without copying when possible
    ///
    /// A shared buffer whose region is contiguous in row-major order
    /// yields another reference into the same source. Anything else is
    /// copied.
    pub fn view(&self, extent: &Extent) -> Result<Buffer> {
        self.check_region(extent)?;
        match (&self.backing, contiguous_start(&self.dimensions, extent)) {
            (Backing::Shared(r), Some(start)) => {
                let offset = r.offset + start * self.dtype.size();
                let len = extent.size() as usize * self.dtype.size();
                Ok(Buffer {
                    dtype: self.dtype,
                    dimensions: extent_dims(extent),
                    backing: Backing::Shared(SharedRef::new(
                        r.registry.clone(),
                        r.source.clone(),
                        offset,
                        len,
                    )),
                })
            }
            _ => self.copy_slice(extent),
        }
    }

    /// Copy of the buffer collapsed to one axis
    pub fn flatten(&self) -> Buffer {
        Buffer {
            dtype: self.dtype,
            dimensions: vec![self.len()],
            backing: Backing::Exclusive(AlignedBytes::from_slice(self.as_bytes())),
        }
    }

    fn check_dtype<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.dtype {
            return Err(Error::contract(format!(
                "element type mismatch: buffer holds {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(())
    }

    pub(crate) fn check_region(&self, extent: &Extent) -> Result<()> {
        let bounds = Extent::from_shape(&shape_i64(&self.dimensions));
        if extent.ndim() != self.ndim() || !bounds.contains(extent) {
            return Err(Error::contract(format!(
                "{} is outside buffer of dimensions {:?}",
                extent, self.dimensions
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("dtype", &self.dtype)
            .field("dimensions", &self.dimensions)
            .field("ownership", &self.ownership())
            .finish()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.dimensions == other.dimensions
            && self.as_bytes() == other.as_bytes()
    }
}

/// A contiguous run of elements shared by a buffer region and its
/// row-major copy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Run {
    /// Element offset in the enclosing buffer
    pub outer: usize,
    /// Element offset in the region
    pub inner: usize,
    pub len: usize,
}

/// Contiguous runs (one per last-axis row) covering `extent` inside an
/// array of `dims`
pub(crate) fn runs(dims: &[usize], extent: &Extent) -> Vec<Run> {
    let ndim = dims.len();
    if ndim == 0 {
        return vec![Run {
            outer: 0,
            inner: 0,
            len: 1,
        }];
    }
    if extent.is_empty() {
        return Vec::new();
    }

    let dims = shape_i64(dims);
    let row_len = extent.shape()[ndim - 1];
    let lead = &extent.shape()[..ndim - 1];
    let rows: i64 = lead.iter().product();

    (0..rows)
        .map(|row| {
            let mut coord = unravelled_pos(row, lead);
            for (c, u) in coord.iter_mut().zip(extent.ul()) {
                *c += u;
            }
            coord.push(extent.ul()[ndim - 1]);
            Run {
                outer: ravelled_pos(&coord, &dims) as usize,
                inner: (row * row_len) as usize,
                len: row_len as usize,
            }
        })
        .collect()
}

/// Start element of `extent` if it is one contiguous block of `dims`
fn contiguous_start(dims: &[usize], extent: &Extent) -> Option<usize> {
    let dims = shape_i64(dims);
    let first_wide = extent.shape().iter().position(|&s| s != 1);
    if let Some(axis) = first_wide {
        let trailing_full = (axis + 1..dims.len())
            .all(|i| extent.ul()[i] == 0 && extent.lr()[i] == dims[i]);
        if !trailing_full {
            return None;
        }
    }
    Some(ravelled_pos(extent.ul(), &dims) as usize)
}

pub(crate) fn shape_i64(dims: &[usize]) -> Vec<i64> {
    dims.iter().map(|&d| d as i64).collect()
}

fn extent_dims(extent: &Extent) -> Vec<usize> {
    extent.shape().iter().map(|&s| s as usize).collect()
}

fn element_count(dimensions: &[usize]) -> usize {
    dimensions.iter().product()
}

/// Byte length of `dimensions` elements of `dtype`, or `None` on overflow
pub(crate) fn checked_nbytes(dimensions: &[usize], dtype: ElementType) -> Option<usize> {
    dimensions
        .iter()
        .try_fold(dtype.size(), |acc, &d| acc.checked_mul(d))
}

fn check_len(dimensions: &[usize], dtype: ElementType, len: usize) -> Result<()> {
    let expected = checked_nbytes(dimensions, dtype).ok_or_else(|| {
        Error::contract(format!("dimensions {:?} of {} overflow", dimensions, dtype))
    })?;
    if expected != len {
        return Err(Error::contract(format!(
            "{} bytes supplied for dimensions {:?} of {} (expected {})",
            len, dimensions, dtype, expected
        )));
    }
    Ok(())
}
