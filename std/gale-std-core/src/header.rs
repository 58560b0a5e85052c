//!
//! Heap Object Header
//!
//! Every runtime object handed to script code starts with a `HeapHeader`:
//! an atomic reference count plus a type tag. The script compiler emits
//! matching incref/decref calls; the last decref drops and frees the object.
//!

use std::alloc::{Layout, alloc, dealloc};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Type tags for heap objects allocated by the gale runtime crates.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapTag {
    String = 0,
    Thread = 1,
    Mutex = 2,
    CondVar = 3,
}

/// Header for all heap-allocated runtime objects.
#[repr(C)]
pub struct HeapHeader {
    pub refcount: AtomicUsize,
    pub tag: HeapTag,
    pub _pad: [u8; 7],
}

impl HeapHeader {
    pub fn new(tag: HeapTag) -> Self {
        Self {
            refcount: AtomicUsize::new(1),
            tag,
            _pad: [0; 7],
        }
    }

    pub fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true when this was the last reference and the object
    /// must be dropped and freed by the caller.
    pub fn decref(&self) -> bool {
        if self.refcount.fetch_sub(1, Ordering::Release) == 1 {
            std::sync::atomic::fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Relaxed)
    }
}

/// Allocate uninitialized storage for a fixed-size runtime object.
/// The caller must `std::ptr::write` a fully initialized value before use.
pub unsafe fn alloc_object<T>() -> *mut T {
    unsafe {
        let layout = Layout::new::<T>();
        let ptr = alloc(layout) as *mut T;
        if ptr.is_null() {
            panic!("gale runtime: out of memory allocating {}", std::any::type_name::<T>());
        }
        ptr
    }
}

/// Drop and free a fixed-size runtime object allocated with `alloc_object`.
pub unsafe fn release_object<T>(ptr: *mut T) {
    unsafe {
        std::ptr::drop_in_place(ptr);
        dealloc(ptr as *mut u8, Layout::new::<T>());
    }
}
