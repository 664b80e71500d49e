use thiserror::Error;

/// Failures of the message parser collaborator. All of them drop the message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Parser request failed: {0}")]
    Transport(String),

    #[error("Parser returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Parser reply contained no JSON object")]
    NoJson,

    #[error("Parser reply was not a valid signal: {0}")]
    InvalidJson(String),

    #[error("Parser timed out after {0}s")]
    Timeout(u64),
}

/// Settings loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
