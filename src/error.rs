//! Error types for EVC entropy decoding

use core::fmt;
use enough::StopReason;
use whereat::At;

/// Result type for the public API, with error location tracking.
///
/// Errors carry a trace of where they were created and propagated,
/// accessible via [`At::full_trace()`] or [`At::last_error_trace()`].
pub type Result<T> = core::result::Result<T, At<EvcError>>;

/// Errors that can occur while decoding an EVC bitstream.
///
/// The set of distinguishable conditions matches the reference decoder:
/// exhaustion of the backing buffer, grammar or range violations, and
/// unrecognized supplemental payload types. Every decode operation
/// signals failure through its return value; there are no sentinel
/// values.
#[derive(Debug)]
#[non_exhaustive]
pub enum EvcError {
    /// The bit cursor ran out of bytes before a read could complete
    EndOfStream,
    /// Grammar or range violation in the bitstream
    MalformedBitstream(&'static str),
    /// Unrecognized supplemental metadata payload type
    UnexpectedPayload(u8),
    /// Operation was cancelled via cooperative cancellation
    Cancelled(StopReason),
}

impl fmt::Display for EvcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "unexpected end of bitstream"),
            Self::MalformedBitstream(msg) => write!(f, "malformed bitstream: {msg}"),
            Self::UnexpectedPayload(ty) => write!(f, "unexpected SEI payload type {ty}"),
            Self::Cancelled(reason) => write!(f, "{reason}"),
        }
    }
}

impl core::error::Error for EvcError {}

impl From<StopReason> for EvcError {
    fn from(r: StopReason) -> Self {
        Self::Cancelled(r)
    }
}

/// Check a `Stop` token, mapping cancellation into the decoder's error set.
pub(crate) fn check_stop(stop: &dyn enough::Stop) -> core::result::Result<(), EvcError> {
    stop.check().map_err(EvcError::Cancelled)
}
