use thiserror::Error;

pub type Result<T> = std::result::Result<T, LakeFsError>;

#[derive(Debug, Error)]
pub enum LakeFsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Nothing to commit on {repository}/{branch}")]
    NoChanges { repository: String, branch: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for LakeFsError {
    fn from(err: reqwest::Error) -> Self {
        LakeFsError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for LakeFsError {
    fn from(err: serde_json::Error) -> Self {
        LakeFsError::Parse(err.to_string())
    }
}
