//!
//! gale-std-core - Core Runtime Types
//!
//! This crate provides the fundamental types shared across the gale runtime
//! support crates:
//!
//! - `HeapHeader` and `HeapTag` for reference-counted heap objects
//! - `GaleString` for heap-allocated strings handed back to script code
//! - Raw allocation helpers for repr(C) runtime objects
//!
//! All heap objects use atomic reference counting so they can be shared
//! freely between the main script thread and spawned worker threads.
//!

pub mod header;
pub mod string;

pub use header::*;
pub use string::*;
