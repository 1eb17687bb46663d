use std::sync::Arc;

use crate::module::SectionId;

/// An error from the binary buffer reader (C1).
///
/// Every variant carries the byte offset, relative to the start of the
/// section being read, at which the failure was detected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BufferError {
    #[error("unexpected end of section at offset {offset:#x} (needed {needed} more byte(s))")]
    Eof { offset: usize, needed: usize },

    #[error("malformed uleb128 at offset {offset:#x}")]
    MalformedUleb128 { offset: usize },

    #[error("malformed sleb128 at offset {offset:#x}")]
    MalformedSleb128 { offset: usize },

    #[error("unterminated string at offset {offset:#x}")]
    UnterminatedString { offset: usize },
}

impl BufferError {
    pub fn offset(&self) -> usize {
        match *self {
            BufferError::Eof { offset, .. } => offset,
            BufferError::MalformedUleb128 { offset } => offset,
            BufferError::MalformedSleb128 { offset } => offset,
            BufferError::UnterminatedString { offset } => offset,
        }
    }
}

/// A [`BufferError`] enriched with the section and owning module it came
/// from, per spec §7 ("Buffer errors are enriched with a module name and
/// byte offset from the section start").
#[derive(Debug, Clone, thiserror::Error)]
#[error("{module}:{section:?}: {source}")]
pub struct SectionError {
    pub module: Arc<str>,
    pub section: SectionId,
    #[source]
    pub source: BufferError,
}

/// The crate-wide error type.
///
/// `NotFound` is a control-flow sentinel (spec §7: "missing register"
/// collapses to `not_found`, not a hard error) rather than a sign that
/// anything is structurally wrong; callers that care about the distinction
/// match on it instead of treating every `Err` the same way.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A well-known sentinel used for control flow: absent type, missing
    /// register, PC outside all FDEs, no location covering a PC.
    #[error("not found")]
    NotFound,

    /// Type-construction or DIE-ancestor recursion exceeded its bound.
    #[error("recursion limit exceeded ({0} levels)")]
    Recursion(usize),

    /// Arithmetic on CFI factors or ranges overflowed.
    #[error("arithmetic overflow: {0}")]
    Overflow(&'static str),

    /// A malformed buffer read, enriched with section/module context.
    #[error(transparent)]
    Buffer(#[from] SectionError),

    /// Every other structural DWARF/CFI error: invalid attribute form,
    /// out-of-bounds offset, malformed CFI, unsupported opcode or
    /// augmentation. Reported loudly per spec §7, never swallowed.
    #[error("{0}")]
    Other(Arc<str>),
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(Arc::from(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
