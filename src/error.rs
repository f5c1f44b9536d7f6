//! Shared error taxonomy for the routing memory core.
//!
//! Each component defines its own `thiserror`-derived error enum, following
//! the convention of one error type per module rather than a single
//! crate-wide error. Every variant maps to one of the cross-cutting
//! [`ErrorKind`]s below, so callers can branch on "is this backpressure, a
//! timeout, or a hard IO fault" without matching every component-specific
//! variant.

/// Cross-cutting classification for every error a routing-memory component can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input violated a data-model invariant.
    Validation,
    /// A bounded queue was full; the caller may retry or drop the write.
    Backpressure,
    /// An operation did not complete within its deadline.
    Timeout,
    /// Filesystem fault, including the disk-space precondition.
    Io,
    /// The call arrived after the owning component began shutting down.
    ShuttingDown,
    /// The referenced entity (provider, user, log file) does not exist.
    NotFound,
    /// A bounded retry or recovery-attempt budget is exhausted.
    Exhausted,
    /// The operation was rejected because it falls within a backoff window.
    Backoff,
    /// The operation conflicts with the component's current state.
    Conflict,
}

/// Implemented by every component error enum so callers can classify an
/// error without matching on component-specific variants.
pub trait ErrorClass {
    /// The cross-cutting kind this error belongs to.
    fn kind(&self) -> ErrorKind;
}
