use parley_memory::{GeoError, MemoryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported to the caller. Stage failures never surface here.
#[derive(Debug, Error)]
pub enum ConsultationError {
    /// Query text was empty after trimming.
    #[error("query must not be empty")]
    EmptyQuery,
    /// Coordinates outside the valid range.
    #[error(transparent)]
    InvalidLocation(#[from] GeoError),
    /// Configuration rejected on validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Reading a configuration file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration file is not valid TOML for the expected schema.
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<MemoryError> for ConsultationError {
    fn from(err: MemoryError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Failure of a single text-generation call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// The call did not finish within its bound.
    #[error("inference timed out after {elapsed_ms} ms")]
    Timeout {
        /// Time spent before giving up.
        elapsed_ms: u64,
    },
    /// Network, HTTP status or decoding failure.
    #[error("inference transport error: {0}")]
    Transport(String),
    /// The backend answered with no usable text.
    #[error("inference returned an empty completion")]
    EmptyCompletion,
}

/// Why a stage produced a fallback value instead of generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageFailure {
    /// A specialist call hit its timeout.
    SpecialistTimeout,
    /// A specialist call failed or returned nothing.
    SpecialistTransportError,
    /// The synthesis call hit its timeout.
    SynthesisTimeout,
    /// The synthesis call failed or returned nothing.
    SynthesisTransportError,
    /// Synthesis had no fused specialist text to work from.
    NoSpecialistInput,
}

impl StageFailure {
    /// Classifies a specialist call failure.
    #[must_use]
    pub const fn specialist(err: &InferenceError) -> Self {
        match err {
            InferenceError::Timeout { .. } => Self::SpecialistTimeout,
            InferenceError::Transport(_) | InferenceError::EmptyCompletion => {
                Self::SpecialistTransportError
            }
        }
    }

    /// Classifies a synthesis call failure.
    #[must_use]
    pub const fn synthesis(err: &InferenceError) -> Self {
        match err {
            InferenceError::Timeout { .. } => Self::SynthesisTimeout,
            InferenceError::Transport(_) | InferenceError::EmptyCompletion => {
                Self::SynthesisTransportError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_completion_counts_as_transport_failure() {
        assert_eq!(
            StageFailure::specialist(&InferenceError::EmptyCompletion),
            StageFailure::SpecialistTransportError
        );
        assert_eq!(
            StageFailure::synthesis(&InferenceError::Timeout { elapsed_ms: 10 }),
            StageFailure::SynthesisTimeout
        );
    }

    #[test]
    fn memory_config_errors_become_config_errors() {
        let err: ConsultationError = MemoryError::InvalidConfig("bad".into()).into();
        assert!(matches!(err, ConsultationError::InvalidConfig(msg) if msg.contains("bad")));
    }
}
