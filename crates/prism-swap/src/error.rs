use thiserror::Error;

use prism_gem::GemError;
use prism_kms::{DrawableId, KmsError};

use crate::buffer::BufferId;

pub type Result<T> = std::result::Result<T, SwapError>;

/// Error type for swap-engine operations.
///
/// No variant is fatal to the server: allocation failures unwind partial
/// state and degrade the drawable to fewer buffers or blit-only swaps, and a
/// rejected flip still runs the normal completion path with the
/// client-visible steps skipped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwapError {
    /// A surface, slot ring, or buffer-object handle could not be obtained.
    #[error("allocation failed: {0}")]
    Allocation(&'static str),

    #[error("unknown drawable {0}")]
    UnknownDrawable(DrawableId),

    #[error("unknown swap buffer {0}")]
    UnknownBuffer(BufferId),

    /// The display interface rejected the page-flip request. The swap command
    /// still completes (and releases its references); only the buffer
    /// exchange and scanout publication are skipped.
    #[error("page flip was rejected by the display interface")]
    FlipFailed,

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error(
        "extension core {major}.{minor} is older than the minimum supported \
         {min_major}.{min_minor}"
    )]
    UnsupportedCoreVersion {
        major: u32,
        minor: u32,
        min_major: u32,
        min_minor: u32,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Gem(#[from] GemError),

    #[error(transparent)]
    Kms(#[from] KmsError),
}
