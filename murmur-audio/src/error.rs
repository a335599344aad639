use thiserror::Error;

use crate::types::UtteranceId;

/// Errors surfaced by the synchronization core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Malformed audio block reached the classifier
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Forwarding audio or control signals downstream failed
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The speech synthesis source failed for an utterance
    #[error("Synthesis failed for {utterance}: {reason}")]
    SynthesisFailure {
        utterance: UtteranceId,
        reason: String,
    },

    /// Audio device could not be opened or configured
    #[error("Audio device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
