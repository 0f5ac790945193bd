use std::path::PathBuf;

use thiserror::Error;

/// Failures decoding, inspecting or encoding a single class file.
#[derive(Debug, Error)]
pub(crate) enum ClassFileError {
    #[error("cannot decode class: {0}")]
    Decode(String),
    #[error("cannot encode class: {0}")]
    Encode(String),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("constant pool entry {index} is not a {expected}")]
    ConstantPoolTypeMismatch { index: u16, expected: &'static str },
    #[error("constant pool is full")]
    ConstantPoolFull,
    #[error("malformed {0} attribute")]
    MalformedAttribute(&'static str),
}

/// Error categories surfaced by a desugar run.
///
/// Every variant except `UnresolvedNestReference` aborts the run.
#[derive(Debug, Error)]
pub(crate) enum DesugarError {
    #[error("ArchiveReadError: cannot read archive {}", .path.display())]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("ArchiveReadError: entry {entry} in {} escapes the archive root", .path.display())]
    UnsafeEntry { path: PathBuf, entry: String },
    #[error("SkipListReadError: cannot read skip list {}", .path.display())]
    SkipListRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("MalformedClassError: {entry}")]
    MalformedClass {
        entry: String,
        #[source]
        source: ClassFileError,
    },
    #[error("UnresolvedNestReferenceError: {class} names nest host {host}, which is not in the archive")]
    UnresolvedNestReference { class: String, host: String },
    #[error("StubGenerationError: cannot stub {class}.{method}{descriptor}: {reason}")]
    StubGeneration {
        class: String,
        method: String,
        descriptor: String,
        reason: String,
    },
    #[error("StagingWriteError: cannot write {}", .path.display())]
    StagingWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ArchiveWriteError: cannot write archive {}", .path.display())]
    ArchiveWrite {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("VerificationError: rewritten {class} failed the class-file cross-check: {reason}")]
    Verification { class: String, reason: String },
}

impl DesugarError {
    /// Whether the run may continue after this error.
    pub(crate) fn is_recoverable(&self) -> bool {
        matches!(self, DesugarError::UnresolvedNestReference { .. })
    }
}
