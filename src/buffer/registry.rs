//! Shared-source reference registry
//!
//! Buffers in shared-manager mode do not own their memory directly.
//! Instead they reference a [`Source`] and register themselves in a
//! [`MemoryRegistry`], which counts live references per source pointer.
//! The first reference to a host-owned source takes a host reference;
//! the last one to go away releases it (host source) or lets the heap
//! block be freed.
//!
//! All three table operations (insert-if-absent, increment,
//! decrement-and-erase) run under one mutex.

use super::host::HostArray;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Pointer identity of a source
pub type SourceKey = usize;

/// Word-aligned heap storage
///
/// Backed by `u64` words so every element type up to 8-byte alignment
/// can be viewed in place.
#[derive(Clone, Debug, Default)]
pub struct AlignedBytes {
    words: Box<[u64]>,
    len: usize,
}

impl AlignedBytes {
    pub fn zeroed(len: usize) -> Self {
        AlignedBytes {
            words: vec![0u64; len.div_ceil(8)].into_boxed_slice(),
            len,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut out = AlignedBytes::zeroed(bytes.len());
        out.as_mut_slice().copy_from_slice(bytes);
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `words` owns at least `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }
}

/// Memory a shared-manager buffer can point into
pub enum Source {
    /// Allocated independently; freed with the last reference
    Heap(AlignedBytes),
    /// Borrowed from a host runtime; released with the last reference
    Host(Arc<dyn HostArray>),
}

impl Source {
    pub fn heap(bytes: AlignedBytes) -> Arc<Source> {
        Arc::new(Source::Heap(bytes))
    }

    pub fn host(array: Arc<dyn HostArray>) -> Arc<Source> {
        Arc::new(Source::Host(array))
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Source::Heap(b) => b.as_slice(),
            Source::Host(h) => h.bytes(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Heap(_) => SourceKind::Heap,
            Source::Host(_) => SourceKind::Host,
        }
    }

    /// Registry key: the address of the host handle for host sources (so
    /// independent wrappers of one handle agree), the address of the
    /// source itself otherwise.
    ///
    /// Memory addresses are not usable here: empty host arrays all report
    /// the same dangling pointer.
    pub fn key(self: &Arc<Self>) -> SourceKey {
        match self.as_ref() {
            Source::Host(h) => Arc::as_ptr(h) as *const () as SourceKey,
            Source::Heap(_) => Arc::as_ptr(self) as *const () as SourceKey,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Heap,
    Host,
}

/// Hook notified whenever a source loses its last reference
pub trait RegistryObserver: Send + Sync {
    fn on_final_release(&self, key: SourceKey, kind: SourceKind);
}

/// Outcome of [`MemoryRegistry::retain`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Retained {
    First,
    Again(usize),
}

/// Outcome of [`MemoryRegistry::release`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Released {
    Last,
    Remaining(usize),
    /// The key was detached or never registered
    Untracked,
}

/// Reference counts for shared sources
pub struct MemoryRegistry {
    counts: Mutex<HashMap<SourceKey, usize>>,
    observer: Option<Arc<dyn RegistryObserver>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        MemoryRegistry {
            counts: Mutex::new(HashMap::new()),
            observer: None,
        }
    }

    pub fn with_observer(observer: Arc<dyn RegistryObserver>) -> Self {
        MemoryRegistry {
            counts: Mutex::new(HashMap::new()),
            observer: Some(observer),
        }
    }

    /// The process-wide default registry
    pub fn global() -> Arc<MemoryRegistry> {
        static GLOBAL: OnceLock<Arc<MemoryRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(MemoryRegistry::new())).clone()
    }

    /// Insert `key` with count 1, or increment it
    pub(crate) fn retain(&self, key: SourceKey) -> Retained {
        let mut counts = self.counts.lock();
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        if *count == 1 {
            Retained::First
        } else {
            Retained::Again(*count)
        }
    }

    /// Decrement `key`, erasing it when the count reaches zero
    pub(crate) fn release(&self, key: SourceKey) -> Released {
        let mut counts = self.counts.lock();
        match counts.get_mut(&key) {
            None => Released::Untracked,
            Some(count) if *count <= 1 => {
                counts.remove(&key);
                Released::Last
            }
            Some(count) => {
                *count -= 1;
                Released::Remaining(*count)
            }
        }
    }

    pub(crate) fn notify_final_release(&self, key: SourceKey, kind: SourceKind) {
        if let Some(observer) = &self.observer {
            observer.on_final_release(key, kind);
        }
    }

    /// Live reference count for `key`, or `None` if it is not tracked
    pub fn refcount(&self, key: SourceKey) -> Option<usize> {
        self.counts.lock().get(&key).copied()
    }

    /// Forget `key` without freeing or releasing its memory.
    ///
    /// Dangerous: only for handing a source over to another allocator.
    /// Buffers still referencing it will not trigger a final release.
    pub fn detach(&self, key: SourceKey) -> bool {
        let removed = self.counts.lock().remove(&key).is_some();
        if removed {
            debug!(key = format_args!("{:#x}", key), "detached shared source");
        }
        removed
    }

    /// Number of tracked sources
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
