use thiserror::Error;

use crate::common::error::NegotiatorError::GenericError;

#[derive(Debug, Error)]
pub enum NegotiatorError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Matchmaker error: {0}")]
    MatchmakerError(#[from] matchmaker::Error),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for NegotiatorError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for NegotiatorError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<anyhow::Error> for NegotiatorError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<String> for NegotiatorError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
