#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollaboratorError::Decode(err.to_string())
        } else {
            CollaboratorError::Http(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("response synthesis failed: {0}")]
    Synthesis(#[source] CollaboratorError),

    #[error("search cancelled")]
    Cancelled,

    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("progress sink closed")]
pub struct SinkClosed;
