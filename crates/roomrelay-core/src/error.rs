use thiserror::Error;

/// Errors produced by the relay protocol layer and its collaborators.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Codec(e.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let err = RelayError::NotFound("no room behind link abc".into());
        assert_eq!(err.to_string(), "not found: no room behind link abc");
        assert_eq!(RelayError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn json_errors_become_codec_errors() {
        let err: RelayError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, RelayError::Codec(_)));
    }
}
