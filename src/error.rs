use thiserror::Error;

/// Errors produced by the playback engine and its collaborators.
///
/// The first group (`UnsupportedQuery`, `NotFound`, `InvalidPosition`,
/// `StateConflict`) are precondition failures: commands report them to the
/// user as a plain notice and nothing else happens. The rest abort at most
/// one worker run and are logged with the guild they belong to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("unsupported query: {0}")]
    UnsupportedQuery(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid position {position} (valid range is 1..={upcoming})")]
    InvalidPosition { position: usize, upcoming: usize },

    #[error("{0}")]
    StateConflict(String),

    #[error("failed to fetch media: {0}")]
    FetchFailed(String),

    #[error("failed to encode media: {0}")]
    EncodeFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("voice transport error: {0}")]
    Transport(String),

    #[error("catalog request failed: {0}")]
    Catalog(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PlaybackError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict(message.into())
    }

    /// True for failures that are reported to the user as a benign notice.
    pub fn is_notice(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedQuery(_)
                | Self::NotFound(_)
                | Self::InvalidPosition { .. }
                | Self::StateConflict(_)
        )
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PlaybackError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for PlaybackError {
    fn from(e: reqwest::Error) -> Self {
        Self::Catalog(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_are_notices() {
        assert!(PlaybackError::conflict("nothing is playing").is_notice());
        assert!(PlaybackError::InvalidPosition { position: 9, upcoming: 2 }.is_notice());
        assert!(PlaybackError::NotFound("playlist `road trip`".into()).is_notice());
        assert!(!PlaybackError::FetchFailed("timeout".into()).is_notice());
        assert!(!PlaybackError::EncodeFailed("bad header".into()).is_notice());
    }

    #[test]
    fn invalid_position_message_names_the_range() {
        let e = PlaybackError::InvalidPosition { position: 7, upcoming: 3 };
        assert_eq!(e.to_string(), "invalid position 7 (valid range is 1..=3)");
    }
}
