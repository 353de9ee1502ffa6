//! Byte-range lock kind mapping.
//!
//! Record locking is delegated to the OS advisory facility, which refuses
//! a lock kind that disagrees with the descriptor's open mode. The request
//! is degraded to the nearest kind the open mode allows before it is
//! handed to the filesystem collaborator.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// The lock kind actually requested from the OS for a handle opened with
/// `mode`: a write lock on a read-only descriptor degrades to a read lock,
/// and a read lock on a write-only descriptor upgrades to a write lock.
pub fn effective_lock_kind(requested: LockKind, mode: OpenMode) -> LockKind {
    match (requested, mode) {
        (LockKind::Write, OpenMode::ReadOnly) => LockKind::Read,
        (LockKind::Read, OpenMode::WriteOnly) => LockKind::Write,
        (kind, _) => kind,
    }
}
