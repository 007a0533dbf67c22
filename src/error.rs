use thiserror::Error;

/// Errors produced while checking and recovering the journal.
///
/// The consistency resolver branches on the kind: `BadInode` and
/// `CorruptSuperblock` are offered to the problem channel and may be repaired
/// locally, everything else is surfaced to the caller.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The journal inode fails structural validation, or the superblock
    /// names an inode that is not a journal at all.
    #[error("invalid journal inode")]
    BadInode,

    /// The journal superblock is structurally unusable.
    #[error("corrupt journal superblock")]
    CorruptSuperblock,

    /// Unknown journal format or an incompatible feature bit we do not know.
    #[error("journal has unsupported features")]
    Unsupported,

    /// An unknown read-only-compatible feature bit; the journal can be read
    /// but must not be written.
    #[error("journal has unsupported read-only features")]
    ReadOnlyUnsupported,

    /// A write was required but the image is opened read-only.
    #[error("file system is opened read-only")]
    ReadOnly,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] bincode::Error),
}
