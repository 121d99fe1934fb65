use crate::types::DeviceKind;

pub type Result<T> = std::result::Result<T, BitgradError>;

#[derive(Debug, thiserror::Error)]
pub enum BitgradError {
    #[error("cannot find compressor {name:?} in registry")]
    UnknownCompressor { name: String },

    #[error("invalid parameter {key:?}: {reason}")]
    InvalidParameter { key: &'static str, reason: String },

    #[error("malformed parameter string: {reason}")]
    MalformedParamString { reason: String },

    #[error("{operand} operand has undefined shape")]
    UndefinedShape { operand: &'static str },

    #[error("{operand} size mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        operand: &'static str,
        expected: i64,
        actual: i64,
    },

    #[error("{operand} is on {actual} but {expected} was required")]
    DeviceMismatch {
        operand: &'static str,
        expected: DeviceKind,
        actual: DeviceKind,
    },

    #[error("accelerator support is not enabled")]
    AccelDisabled,

    #[error("{scheme} does not support fast aggregation")]
    FastAggregateUnsupported { scheme: &'static str },

    #[error("gradient compression has not been initialized")]
    NotInitialized,

    #[error("accelerator error: {reason}")]
    Accel { reason: String },
}

impl BitgradError {
    /// Create an `Accel` error with just a message.
    pub fn accel(reason: impl Into<String>) -> Self {
        Self::Accel {
            reason: reason.into(),
        }
    }
}
