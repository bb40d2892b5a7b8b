use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// The capture source handle is missing or has already been released.
    /// The session cannot recover; the caller must open a new one.
    SourceUnavailable,

    /// The destination buffer is smaller than the frame footprint.
    /// Nothing was written.
    InsufficientBuffer { required: usize, actual: usize },

    /// Source or destination geometry does not match what the copy needs.
    GeometryMismatch(String),

    /// The duplication interface was invalidated by the OS (mode change,
    /// secure desktop, fullscreen exclusive app).
    AccessLost,

    BufferOverflow,

    InvalidConfig(String),

    /// A frame, metadata, pointer-shape or mapping query failed. The inner
    /// error carries the sub-operation as context and the native cause.
    SourceFailure(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InsufficientBuffer { .. } | Self::InvalidConfig(_) => {
                CaptureErrorClass::InvalidInput
            }
            Self::AccessLost | Self::SourceFailure(_) => CaptureErrorClass::Transient,
            Self::SourceUnavailable | Self::GeometryMismatch(_) | Self::BufferOverflow => {
                CaptureErrorClass::Fatal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), CaptureErrorClass::Transient)
    }

    pub fn requires_session_reset(&self) -> bool {
        matches!(self, Self::SourceUnavailable | Self::AccessLost)
    }

    pub(crate) fn source_failure(
        error: impl Into<anyhow::Error>,
        operation: &'static str,
    ) -> Self {
        Self::SourceFailure(error.into().context(operation))
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable => write!(f, "capture source is not available"),
            Self::InsufficientBuffer { required, actual } => write!(
                f,
                "destination buffer too small: {actual} bytes, frame needs {required}"
            ),
            Self::GeometryMismatch(message) => write!(f, "frame geometry mismatch: {message}"),
            Self::AccessLost => write!(f, "desktop duplication access lost"),
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::InvalidConfig(message) => {
                write!(f, "invalid duplication configuration: {message}")
            }
            Self::SourceFailure(inner) => write!(f, "{inner:#}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SourceFailure(inner) => Some(&**inner),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_buffer_is_caller_input() {
        let err = CaptureError::InsufficientBuffer {
            required: 16,
            actual: 4,
        };
        assert_eq!(err.class(), CaptureErrorClass::InvalidInput);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "destination buffer too small: 4 bytes, frame needs 16"
        );
    }

    #[test]
    fn source_failure_keeps_operation_and_cause() {
        let err = CaptureError::source_failure(
            anyhow::anyhow!("E_INVALIDARG"),
            "failed to query dirty rects",
        );
        assert!(err.is_retryable());
        let rendered = err.to_string();
        assert!(rendered.contains("failed to query dirty rects"));
        assert!(rendered.contains("E_INVALIDARG"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn lost_sources_require_reset() {
        assert!(CaptureError::SourceUnavailable.requires_session_reset());
        assert!(CaptureError::AccessLost.requires_session_reset());
        assert!(!CaptureError::BufferOverflow.requires_session_reset());
    }
}
