//! Host array adapter
//!
//! A host array is a dense array owned by some other runtime. Buffers
//! borrow its memory without copying and keep it alive through the
//! host's own reference counting, exposed here as `acquire`/`release`.

use super::dtype::{Element, ElementType};
use ndarray::{ArcArray, IxDyn};
use parking_lot::Mutex;
use tracing::warn;

/// A dense, contiguous array owned by a host runtime
pub trait HostArray: Send + Sync {
    fn dtype(&self) -> ElementType;

    fn dimensions(&self) -> Vec<usize>;

    /// The array's memory in row-major order
    fn bytes(&self) -> &[u8];

    /// Take a host-side reference, under the host's lock
    fn acquire(&self);

    /// Drop a host-side reference, under the host's lock
    fn release(&self);
}

/// [`HostArray`] backed by an `ndarray` shared array
///
/// The host lock is held only while the reference count is adjusted.
pub struct NdHostArray<T: Element> {
    array: ArcArray<T, IxDyn>,
    host_lock: Mutex<usize>,
}

impl<T: Element> NdHostArray<T> {
    /// Wrap an array. Non-standard layouts are made contiguous first.
    pub fn new(array: ArcArray<T, IxDyn>) -> Self {
        let array = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned().into_shared()
        };
        NdHostArray {
            array,
            host_lock: Mutex::new(0),
        }
    }

    /// Number of references currently held through this adapter
    pub fn host_refs(&self) -> usize {
        *self.host_lock.lock()
    }

    pub fn array(&self) -> &ArcArray<T, IxDyn> {
        &self.array
    }
}

impl<T: Element> HostArray for NdHostArray<T> {
    fn dtype(&self) -> ElementType {
        T::DTYPE
    }

    fn dimensions(&self) -> Vec<usize> {
        self.array.shape().to_vec()
    }

    fn bytes(&self) -> &[u8] {
        let elems = self
            .array
            .as_slice()
            .expect("standard layout is enforced at construction");
        // SAFETY: `T` is a primitive without padding, so its memory is a
        // valid byte slice for the lifetime of the borrow.
        unsafe {
            std::slice::from_raw_parts(elems.as_ptr() as *const u8, std::mem::size_of_val(elems))
        }
    }

    fn acquire(&self) {
        let mut refs = self.host_lock.lock();
        *refs += 1;
    }

    fn release(&self) {
        let mut refs = self.host_lock.lock();
        match refs.checked_sub(1) {
            Some(n) => *refs = n,
            None => warn!("release on host array with no outstanding references"),
        }
    }
}
