use std::io;

use thiserror::Error;

/// Errors returned by chunk cursor operations, readers and writers.
///
/// Ownership violations (double release, recycling a shared chunk, linking
/// over an existing successor) are bugs in the calling code and panic
/// instead of returning a variant here.
#[derive(Debug, Error)]
pub enum Error {
    /// Discard past the readable bytes of a chunk.
    #[error("cannot discard {requested} bytes: only {available} readable")]
    Discard { requested: usize, available: usize },
    /// Commit past the writable limit of a chunk.
    #[error("cannot commit {requested} bytes: only {available} writable")]
    Commit { requested: usize, available: usize },
    /// Rewind before the start gap of a chunk.
    #[error("cannot rewind {requested} bytes: only {available} behind the read position")]
    Rewind { requested: usize, available: usize },
    /// Start gap reservation conflicts with live content or the end gap.
    #[error("cannot reserve a {gap} byte start gap: {reason}")]
    StartGap { gap: usize, reason: &'static str },
    /// End gap reservation conflicts with live content or capacity.
    #[error("cannot reserve a {gap} byte end gap: {reason}")]
    EndGap { gap: usize, reason: &'static str },
    /// Not enough contiguous bytes in the current chunk for a fixed-width value.
    #[error("need {requested} contiguous bytes in the current chunk, only {available}")]
    InsufficientSpace { requested: usize, available: usize },
    /// The input genuinely ended before the request was satisfied.
    ///
    /// Distinct from the cursor errors above: this is "short packet", not
    /// "misused chunk".
    #[error("unexpected end of input: requested {requested} bytes, {available} available")]
    Underrun { requested: usize, available: u64 },
    /// A source or sink hook failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
