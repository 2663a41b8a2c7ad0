use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    /// A correlated call was rejected by the other side; carries its message.
    #[error("{0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Launch error: {0}")]
    Launch(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Session disposed: {0}")]
    Disposed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The plain message delivered to a correlated caller on rejection.
    pub fn message(&self) -> String {
        match self {
            Error::Remote(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_message_is_verbatim() {
        let err = Error::Remote("Invalid params".to_string());
        assert_eq!(err.message(), "Invalid params");
        assert_eq!(err.to_string(), "Invalid params");
    }

    #[test]
    fn test_disposed_is_flagged() {
        assert!(Error::Disposed("session disposed".into()).is_disposed());
        assert!(!Error::Timeout("x".into()).is_disposed());
    }
}
