//!
//! gale-std-threads - Concurrency Primitives
//!
//! Provides the threading primitives exposed to gale scripts. There is no
//! scheduler here: every thread handle owns exactly one OS thread, and
//! mutexes and condition variables wrap their `std::sync` counterparts.
//!
//! ## Thread Handles
//!
//! A handle is created unstarted with a run body and optional captured data.
//! `start` spawns the OS thread, `join` blocks until the body has returned,
//! `cancel` sets an advisory flag the body may poll. Lifecycle misuse
//! (double start, join before start) degrades to a no-op at the script
//! surface; the Rust API reports it as `LifecycleError`.
//!
//! ## Mutexes and Condition Variables
//!
//! Scripts issue unpaired `lock`/`unlock` calls, so acquired guards are
//! parked in thread-local storage between calls. A condition variable
//! borrows the parked guard for the duration of a wait, giving the classic
//! atomic release-and-reacquire contract.
//!
//! ## Cancellation
//!
//! Cancellation is cooperative only. Nothing in this crate interrupts a
//! running body; a cancelled thread keeps executing until its body returns,
//! and `join` still waits for that natural completion.
//!

pub mod condvar;
pub mod lifecycle;
pub mod mutex;
pub mod thread;

pub use condvar::*;
pub use lifecycle::*;
pub use mutex::*;
pub use thread::*;
