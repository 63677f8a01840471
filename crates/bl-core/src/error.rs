//! Failures reported by the host document boundary.

use crate::id::ObjectId;

/// Error raised by a `Document` or one of its units of work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DbError {
    /// The handle is stale (erased) or was never allocated.
    #[error("object {0} not found or erased")]
    NotFound(ObjectId),

    /// The handle resolved to a different kind of object.
    #[error("object {id} is a {found}, expected a {expected}")]
    WrongType {
        id: ObjectId,
        expected: &'static str,
        found: &'static str,
    },

    /// A write was attempted through a read-scoped unit of work.
    #[error("unit of work is read-only")]
    ReadOnlyScope,

    /// The unit of work could not be committed; nothing it wrote was kept.
    #[error("commit failed: {0}")]
    CommitFailed(String),
}

pub type DbResult<T> = Result<T, DbError>;
