// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Crate-wide error type.
//!
//! Operations that hand back a [`crate::executor::Future`] never fail
//! synchronously for logical reasons: the future fails instead. Precondition
//! violations (bad index, illegal state) return `Err` directly. Buffer leaks
//! are reported out-of-band through the leak detector and never surface here.

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by skiff operations.
///
/// Each kind is distinguishable so callers can route on it: bounds problems,
/// capacity problems, reference-count misuse, promise/executor state, task
/// rejection, and wrapped transport I/O.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Buffer index / bounds
    // ========================================================================
    /// Absolute index or (index, length) pair outside the buffer.
    IndexOutOfBounds {
        /// Offending index.
        index: usize,
        /// Requested length at that index.
        length: usize,
        /// Buffer capacity at the time of the access.
        capacity: usize,
    },
    /// Cursor read past `writer_index`.
    InsufficientReadableBytes {
        /// Bytes requested.
        requested: usize,
        /// Bytes readable.
        readable: usize,
    },

    // ========================================================================
    // Capacity
    // ========================================================================
    /// `new_capacity` would exceed `max_capacity`.
    CapacityExceeded {
        /// Capacity that was required.
        required: usize,
        /// Hard ceiling configured for the buffer.
        max_capacity: usize,
    },
    /// Allocation request larger than the allocator supports.
    AllocationTooLarge(usize),

    // ========================================================================
    // Reference count
    // ========================================================================
    /// Retain/release on a destroyed object, or a count over/underflow.
    IllegalReferenceCount {
        /// Logical count observed when the operation failed.
        count: u32,
        /// Increment or decrement that was attempted.
        delta: u32,
    },

    // ========================================================================
    // Promise / executor state
    // ========================================================================
    /// `set_success`/`set_failure`/`cancel` on an already completed promise.
    PromiseAlreadyComplete,
    /// Blocking `await`/`sync` invoked from the promise's own event loop.
    BlockingFromEventLoop,
    /// Operation illegal in the current state (message names the state).
    IllegalState(String),
    /// Task submitted after the executor began shutting down.
    ExecutorShutdown,
    /// Task queue full and the rejection policy refused the task.
    RejectedExecution(String),

    // ========================================================================
    // Outcome signals
    // ========================================================================
    /// Operation was cancelled before completion.
    Cancelled,
    /// Timed wait elapsed without the condition becoming true.
    Timeout,
    /// A failure recorded on a promise, as text (the original error may have
    /// crossed a thread boundary).
    Failed(String),

    // ========================================================================
    // Transport
    // ========================================================================
    /// Wrapped transport failure.
    Io(std::io::Error),
    /// Requested operation not supported by this channel or buffer kind.
    Unsupported(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IndexOutOfBounds {
                index,
                length,
                capacity,
            } => write!(
                f,
                "index out of bounds: index {} length {} exceeds capacity {}",
                index, length, capacity
            ),
            Error::InsufficientReadableBytes {
                requested,
                readable,
            } => write!(
                f,
                "insufficient readable bytes: need {}, have {}",
                requested, readable
            ),
            Error::CapacityExceeded {
                required,
                max_capacity,
            } => write!(
                f,
                "capacity {} exceeds max_capacity {}",
                required, max_capacity
            ),
            Error::AllocationTooLarge(size) => {
                write!(f, "allocation request too large: {} bytes", size)
            }
            Error::IllegalReferenceCount { count, delta } => write!(
                f,
                "illegal reference count: count {} delta {}",
                count, delta
            ),
            Error::PromiseAlreadyComplete => write!(f, "promise already complete"),
            Error::BlockingFromEventLoop => {
                write!(f, "blocking operation invoked from its own event loop")
            }
            Error::IllegalState(msg) => write!(f, "illegal state: {}", msg),
            Error::ExecutorShutdown => write!(f, "executor already shut down"),
            Error::RejectedExecution(msg) => write!(f, "task rejected: {}", msg),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Failed(msg) => write!(f, "operation failed: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Unsupported(what) => write!(f, "unsupported operation: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl Clone for Error {
    // io::Error is not Clone; a cloned failure keeps the message and kind.
    fn clone(&self) -> Self {
        match self {
            Error::IndexOutOfBounds {
                index,
                length,
                capacity,
            } => Error::IndexOutOfBounds {
                index: *index,
                length: *length,
                capacity: *capacity,
            },
            Error::InsufficientReadableBytes {
                requested,
                readable,
            } => Error::InsufficientReadableBytes {
                requested: *requested,
                readable: *readable,
            },
            Error::CapacityExceeded {
                required,
                max_capacity,
            } => Error::CapacityExceeded {
                required: *required,
                max_capacity: *max_capacity,
            },
            Error::AllocationTooLarge(size) => Error::AllocationTooLarge(*size),
            Error::IllegalReferenceCount { count, delta } => Error::IllegalReferenceCount {
                count: *count,
                delta: *delta,
            },
            Error::PromiseAlreadyComplete => Error::PromiseAlreadyComplete,
            Error::BlockingFromEventLoop => Error::BlockingFromEventLoop,
            Error::IllegalState(msg) => Error::IllegalState(msg.clone()),
            Error::ExecutorShutdown => Error::ExecutorShutdown,
            Error::RejectedExecution(msg) => Error::RejectedExecution(msg.clone()),
            Error::Cancelled => Error::Cancelled,
            Error::Timeout => Error::Timeout,
            Error::Failed(msg) => Error::Failed(msg.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Unsupported(what) => Error::Unsupported(what),
        }
    }
}
