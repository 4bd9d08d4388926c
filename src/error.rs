use crate::interop::InteropState;

#[derive(Debug)]
pub enum SortError {
    NoCompatibleDevice {
        reason: String,
    },
    RegistrationFailed {
        reason: String,
    },
    CommandBufferFailed {
        stage: &'static str,
    },
    InvalidState {
        operation: &'static str,
        state: InteropState,
    },
    ReadOnlyView,
    SizeMismatch {
        expected_bytes: usize,
        actual_bytes: usize,
    },
    ScratchMismatch {
        scratch_elements: usize,
        element_count: usize,
    },
    DeviceMismatch {
        operation: &'static str,
    },
    UnknownResource,
    ResourceMapped,
    ResourceNotMapped,
    Disposed,
    Other(String),
}

impl std::fmt::Display for SortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCompatibleDevice { reason } => {
                write!(f, "no compatible compute device: {reason}")
            }
            Self::RegistrationFailed { reason } => {
                write!(f, "external resource registration failed: {reason}")
            }
            Self::CommandBufferFailed { stage } => {
                write!(f, "device command buffer failed at {stage}")
            }
            Self::InvalidState { operation, state } => {
                write!(f, "{operation} is not valid while the index buffer is {state}")
            }
            Self::ReadOnlyView => {
                f.write_str("index buffer was registered read-only and cannot be written by compute")
            }
            Self::SizeMismatch {
                expected_bytes,
                actual_bytes,
            } => write!(
                f,
                "mapped index buffer size mismatch (expected={expected_bytes} bytes, actual={actual_bytes} bytes)"
            ),
            Self::ScratchMismatch {
                scratch_elements,
                element_count,
            } => write!(
                f,
                "sort scratch sized for {scratch_elements} elements used with {element_count}"
            ),
            Self::DeviceMismatch { operation } => {
                write!(f, "{operation}: buffer belongs to a different device")
            }
            Self::UnknownResource => f.write_str("external resource is not registered"),
            Self::ResourceMapped => f.write_str("external resource is still mapped for compute"),
            Self::ResourceNotMapped => f.write_str("external resource is not mapped for compute"),
            Self::Disposed => f.write_str("point cloud sorter resources have been released"),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for SortError {}

impl SortError {
    /// Errors after which the pipeline has no meaningful way to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoCompatibleDevice { .. }
                | Self::RegistrationFailed { .. }
                | Self::CommandBufferFailed { .. }
        )
    }
}

impl From<&str> for SortError {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<String> for SortError {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<std::num::TryFromIntError> for SortError {
    fn from(err: std::num::TryFromIntError) -> Self {
        Self::Other(err.to_string())
    }
}
