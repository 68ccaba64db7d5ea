/// Failures talking to the upstream bus.
///
/// Everything except [`BusError::Config`] is transient from the consumer's
/// point of view and ends in a reconnect.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BusError {
    #[error("invalid bus configuration: {0}")]
    Config(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscription closed")]
    Closed,
}

impl BusError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connect(_) => "connect",
            Self::Subscribe(_) => "subscribe",
            Self::Receive(_) => "receive",
            Self::Commit(_) => "commit",
            Self::Publish(_) => "publish",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_config_is_fatal() {
        assert!(!BusError::Config("bad".into()).is_retryable());
        assert!(BusError::Connect("refused".into()).is_retryable());
        assert!(BusError::Receive("reset".into()).is_retryable());
        assert!(BusError::Closed.is_retryable());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(BusError::Subscribe("x".into()).error_kind(), "subscribe");
        assert_eq!(BusError::Closed.error_kind(), "closed");
    }

    #[test]
    fn display() {
        let err = BusError::Connect("broker down".into());
        assert_eq!(err.to_string(), "connect failed: broker down");
    }
}
