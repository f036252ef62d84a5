//! Error types for the GrowNet engine

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, GrowNetError>;

/// Errors that can occur in the GrowNet engine
#[derive(Error, Debug)]
pub enum GrowNetError {
    /// Invalid parameter value
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Invalid engine configuration
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for invalid configuration
        reason: String,
    },

    /// A port name that was never bound
    #[error("Unknown port '{port}'")]
    UnknownPort {
        /// Port name that was not found
        port: String,
    },

    /// Index outside a layer or neuron range
    #[error("Index {index} out of range for {what} (len {len})")]
    IndexOutOfRange {
        /// What was being indexed
        what: String,
        /// Offending index
        index: usize,
        /// Valid length
        len: usize,
    },

    /// Tensor or frame shape mismatch
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape description
        actual: String,
    },
}

impl GrowNetError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an unknown port error
    pub fn unknown_port(port: impl Into<String>) -> Self {
        Self::UnknownPort { port: port.into() }
    }

    /// Create an index out of range error
    pub fn index_out_of_range(what: impl Into<String>, index: usize, len: usize) -> Self {
        Self::IndexOutOfRange {
            what: what.into(),
            index,
            len,
        }
    }

    /// Create a shape mismatch error
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
