use thiserror::Error;

/// Broad error categories the HTTP front end maps to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad credentials, user-correctable (403).
    Authentication,
    /// Story or chapter does not exist, user-correctable (404).
    NotFound,
    /// Transport failure, timeout, non-2xx or malformed response (500, retryable by the caller).
    Upstream,
    /// Pipeline invariant violation, non-retryable (500).
    Internal,
}

#[derive(Error, Debug)]
pub enum WattbookError {
    #[error("Authentication failure: {0}")]
    AuthenticationFailed(String),
    #[error("Story not found: {0}")]
    NotFound(String),
    #[error("Upstream request failed: {0}")]
    Upstream(String),
    #[error("Request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("Incomplete pipeline input: {0}")]
    IncompleteInput(String),
    #[error("Failed to serialize EPUB: {0}")]
    Serialization(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WattbookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WattbookError::AuthenticationFailed(_) => ErrorKind::Authentication,
            WattbookError::NotFound(_) => ErrorKind::NotFound,
            WattbookError::Upstream(_) | WattbookError::HttpRequest(_) => ErrorKind::Upstream,
            WattbookError::IncompleteInput(_)
            | WattbookError::Serialization(_)
            | WattbookError::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = anyhow::Result<T, WattbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_front_end_categories() {
        assert_eq!(
            WattbookError::AuthenticationFailed("bad".into()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            WattbookError::NotFound("story 1".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WattbookError::Upstream("timeout".into()).kind(),
            ErrorKind::Upstream
        );
        assert_eq!(
            WattbookError::IncompleteInput("missing chapter".into()).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            WattbookError::Serialization("zip".into()).kind(),
            ErrorKind::Internal
        );
    }
}
