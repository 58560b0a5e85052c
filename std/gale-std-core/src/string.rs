//!
//! Heap-Allocated Strings
//!
//! Strings returned from the runtime to script code are heap objects with
//! inline UTF-8 data. Allocation size depends on the string length, so
//! strings have their own alloc/free paths instead of `alloc_object`.
//!

use std::alloc::{Layout, alloc, dealloc};

use crate::header::{HeapHeader, HeapTag};

/// A heap-allocated string with inline data.
#[repr(C)]
pub struct GaleString {
    pub header: HeapHeader,
    pub len: usize,
    pub data: [u8; 0],
}

impl GaleString {
    pub fn as_str(&self) -> &str {
        unsafe {
            let slice = std::slice::from_raw_parts(self.data.as_ptr(), self.len);
            std::str::from_utf8_unchecked(slice)
        }
    }
}

fn string_layout(len: usize) -> Layout {
    Layout::from_size_align(
        std::mem::size_of::<GaleString>() + len,
        std::mem::align_of::<GaleString>(),
    )
    .expect("string layout overflow")
}

/// Allocate a new string on the heap, copying `len` bytes from `data`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_string_new(data: *const u8, len: usize) -> *mut GaleString {
    unsafe {
        let ptr = alloc(string_layout(len)) as *mut GaleString;
        if ptr.is_null() {
            panic!("gale runtime: out of memory allocating string");
        }

        (*ptr).header = HeapHeader::new(HeapTag::String);
        (*ptr).len = len;

        if !data.is_null() && len > 0 {
            std::ptr::copy_nonoverlapping(data, (*ptr).data.as_mut_ptr(), len);
        }

        ptr
    }
}

/// Allocate a heap string from a Rust string slice.
pub fn gale_string_from(s: &str) -> *mut GaleString {
    unsafe { gale_string_new(s.as_ptr(), s.len()) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_string_incref(s: *mut GaleString) {
    if !s.is_null() {
        unsafe { (*s).header.incref() };
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_string_decref(s: *mut GaleString) {
    if !s.is_null() {
        unsafe {
            if (*s).header.decref() {
                let layout = string_layout((*s).len);
                dealloc(s as *mut u8, layout);
            }
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn gale_string_len(s: *const GaleString) -> usize {
    if s.is_null() { 0 } else { unsafe { (*s).len } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let s = gale_string_from("hello gale");
        assert!(!s.is_null());
        unsafe {
            assert_eq!((*s).as_str(), "hello gale");
            assert_eq!(gale_string_len(s), 10);
            gale_string_decref(s);
        }
    }

    #[test]
    fn test_empty_string() {
        let s = gale_string_from("");
        unsafe {
            assert_eq!((*s).len, 0);
            assert_eq!((*s).as_str(), "");
            gale_string_decref(s);
        }
    }
}
