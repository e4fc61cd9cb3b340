//! Errors raised while loading, validating and saving configuration, and by
//! the range checks applied to request parameters.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configured value is out of range or inconsistent
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// A caller-supplied parameter is out of range
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Source layering or deserialization failed
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// HTTP status for errors that reach the API boundary
    pub fn to_http_status(&self) -> u16 {
        match self {
            Error::InvalidConfiguration(_) | Error::InvalidRequest(_) => 400,
            _ => 500,
        }
    }
}
