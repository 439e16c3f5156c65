use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagwatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid target URL for tag {tag:?}")]
    TargetUrl {
        tag: String,
        #[source]
        source: url::ParseError,
    },
}
