use thiserror::Error;

/// Errors produced by the matchmaker.
///
/// Only [`MatchmakerError::Config`] is considered fatal; every other kind is
/// handled by excluding the offending entity from the rest of the cycle.
#[derive(Debug, Error)]
pub enum MatchmakerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Inventory error: {0}")]
    Inventory(String),
    #[error("Session error: {0}")]
    Session(String),
    #[error("Evaluation error: {0}")]
    Evaluation(String),
    #[error("Error: {0}")]
    Generic(String),
}

impl MatchmakerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MatchmakerError::Config(_))
    }

    /// Errors caused by a single malformed entity or a single broken session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MatchmakerError::Session(_) | MatchmakerError::Evaluation(_)
        )
    }
}

impl From<bincode::Error> for MatchmakerError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::error::Error> for MatchmakerError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<String> for MatchmakerError {
    fn from(e: String) -> Self {
        Self::Generic(e)
    }
}

impl From<&str> for MatchmakerError {
    fn from(e: &str) -> Self {
        Self::Generic(e.to_string())
    }
}
