//!
//! Thread Lifecycle Flags
//!
//! The state machine shared by every thread handle:
//!
//! ```text
//! unstarted --start--> running --body returns--> finished
//!                         |
//!                      cancel (advisory; body keeps running)
//! ```
//!
//! `started` transitions false to true at most once. `finished` is set
//! exactly once, by the trampoline, after the run body returns. `cancelled`
//! is a cooperative marker only and never stops the underlying execution.
//!

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Lifecycle misuse reported by the Rust API. The script-facing FFI layer
/// downgrades these to logged no-ops.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("thread was already started")]
    AlreadyStarted,
    #[error("thread has already finished")]
    AlreadyFinished,
    #[error("thread was cancelled")]
    Cancelled,
    #[error("thread was never started")]
    NotStarted,
}

#[derive(Debug, Default)]
pub struct LifecycleFlags {
    started: AtomicBool,
    finished: AtomicBool,
    cancelled: AtomicBool,
}

impl LifecycleFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the single start transition. The compare-exchange guarantees
    /// at most one caller ever spawns the OS thread.
    pub fn begin_start(&self) -> Result<(), LifecycleError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(LifecycleError::Cancelled);
        }
        if self.finished.load(Ordering::Acquire) {
            return Err(LifecycleError::AlreadyFinished);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LifecycleError::AlreadyStarted);
        }
        Ok(())
    }

    /// Called exactly once by the trampoline, after the run body returns.
    /// The release store publishes the body's side effects to joiners.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Request cooperative cancellation. Valid only while running; the flag
    /// never stops the body, it is state for the body to poll.
    pub fn request_cancel(&self) -> Result<(), LifecycleError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(LifecycleError::NotStarted);
        }
        if self.finished.load(Ordering::Acquire) {
            return Err(LifecycleError::AlreadyFinished);
        }
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return Err(LifecycleError::Cancelled);
        }
        Ok(())
    }

    /// Unconditional cancel marker, used by the trampoline when a run body
    /// panics (the thread did not complete its work normally).
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.is_started() && !self.is_finished() && !self.is_cancelled()
    }
}
