use std::collections::TryReserveError;
use std::fmt;

/// Error codes
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// [`set_quality()`][crate::Attributes::set_quality] was used with a minimum quality, and the minimum could not be achieved
    QualityTooLow,
    /// A setting or parameter is outside of its documented range
    ValueOutOfRange,
    /// Pixel buffer doesn't match the dimensions, or an image was already released when it was needed
    InvalidArgument,
    /// Either the system/process really hit a limit, or some data like image size was ridiculously wrong
    OutOfMemory,
    /// The backend gave up on this input
    Aborted,
    /// Some terrible inconsistency happened, most likely in a custom backend
    InternalError,
    /// Slice needs to be bigger, or width/height needs to be smaller
    BufferTooSmall,
    /// The image this result was bound to has been released
    UseAfterFree,
    /// The result has no image to remap yet. See [`QuantizationResult::bind_image`][crate::QuantizationResult::bind_image]
    NotReady,
    /// Palette index is not below the palette's count
    IndexOutOfBounds,
    /// Congratulations, you've discovered an edge case
    Unsupported,
}

/// Broad class of an [`Error`], for callers that only care about what to do next
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Bad configuration or arguments. Fix the call.
    Validation,
    /// An object could not be created from the given input
    Creation,
    /// The requested minimum quality was not reached. Lower it or allow more colors.
    Quality,
    /// Memory or backend trouble. May succeed with different parameters.
    Resource,
    /// An image was used after it had been released
    UseAfterFree,
    /// Palette index out of range
    Bounds,
}

impl Error {
    /// Which class of failure this is
    #[must_use]
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::ValueOutOfRange | Self::BufferTooSmall | Self::NotReady => ErrorKind::Validation,
            Self::InvalidArgument | Self::Unsupported => ErrorKind::Creation,
            Self::QualityTooLow => ErrorKind::Quality,
            Self::OutOfMemory | Self::Aborted | Self::InternalError => ErrorKind::Resource,
            Self::UseAfterFree => ErrorKind::UseAfterFree,
            Self::IndexOutOfBounds => ErrorKind::Bounds,
        }
    }

    /// Backends only get to report resource-type failures. Anything else is their bug.
    #[cold]
    pub(crate) fn from_backend(self) -> Self {
        match self {
            Self::OutOfMemory | Self::Aborted | Self::Unsupported |
            Self::BufferTooSmall | Self::QualityTooLow | Self::InternalError => self,
            Self::ValueOutOfRange | Self::InvalidArgument | Self::UseAfterFree |
            Self::NotReady | Self::IndexOutOfBounds => Self::InternalError,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Self::QualityTooLow => "QUALITY_TOO_LOW",
            Self::ValueOutOfRange => "VALUE_OUT_OF_RANGE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::Aborted => "ABORTED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::BufferTooSmall => "BUFFER_TOO_SMALL",
            Self::UseAfterFree => "USE_AFTER_FREE",
            Self::NotReady => "NOT_READY",
            Self::IndexOutOfBounds => "INDEX_OUT_OF_BOUNDS",
            Self::Unsupported => "UNSUPPORTED",
        })
    }
}

impl From<TryReserveError> for Error {
    #[cold]
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

#[test]
fn kinds() {
    use Error::*;
    assert_eq!(ErrorKind::Validation, ValueOutOfRange.kind());
    assert_eq!(ErrorKind::Creation, InvalidArgument.kind());
    assert_eq!(ErrorKind::Quality, QualityTooLow.kind());
    assert_eq!(ErrorKind::Resource, Aborted.kind());
    assert_eq!(ErrorKind::UseAfterFree, UseAfterFree.kind());
    assert_eq!(ErrorKind::Bounds, IndexOutOfBounds.kind());
    assert_eq!("USE_AFTER_FREE", UseAfterFree.to_string());
}

#[test]
fn backend_codes_are_contained() {
    use Error::*;
    assert_eq!(Aborted, Aborted.from_backend());
    assert_eq!(BufferTooSmall, BufferTooSmall.from_backend());
    assert_eq!(InternalError, UseAfterFree.from_backend());
    assert_eq!(InternalError, IndexOutOfBounds.from_backend());
    assert_eq!(InternalError, ValueOutOfRange.from_backend());
}
