//! Error taxonomy
//!
//! Data-path errors are handled where they occur (log + skip frame); only
//! setup-path failures surface to the host, either as a `Result` during
//! construction or as the synthesizer's unusable flag. Pool exhaustion is
//! deliberately not an error: it is backpressure and producers block on it.

use thiserror::Error;

/// Host-visible severity for the error event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Transient condition, playback continues (e.g. a segment fetch
    /// timeout upstream).
    Warning,
    /// Unrecoverable for the current session.
    Fatal,
}

/// Callback handed in by the host; invoked with a severity and the raw
/// upstream error code.
pub type ErrorCallback = Box<dyn Fn(Severity, u32) + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transient network error (streamer code {0})")]
    TransientNetwork(u16),

    #[error("bad frame metadata: {0}")]
    BadMetadata(String),

    #[error("gpu error during {stage}: {message}")]
    Gpu {
        stage: &'static str,
        message: String,
    },

    #[error("truncated chunk: {0}")]
    TruncatedChunk(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}
