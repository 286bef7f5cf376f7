use crate::types::PairKey;

/// Error kinds surfaced across the discovery, pipeline, pool, and service
/// layers. The HTTP façade maps each variant to a status code (see
/// `apt-gateway`'s response module); this enum intentionally stays free of
/// any HTTP dependency so lower layers can be tested and reused without it.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("mode descriptor not found: {0}")]
    ModeNotFound(String),

    #[error("malformed mode descriptor {path}: {reason}")]
    ParseError { path: String, reason: String },

    #[error("no installed pair for {0}")]
    UnknownPair(PairKey),

    #[error("failed to spawn pipeline stage '{program}': {reason}")]
    SpawnError { program: String, reason: String },

    #[error("translation deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    #[error("pipe broken for {pair}: {reason}")]
    PipeBroken { pair: PairKey, reason: String },

    #[error("pipeline output was not valid UTF-8: {0}")]
    DecodeError(#[from] std::string::FromUtf8Error),

    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("payload of {actual} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { actual: usize, limit: usize },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("route not found")]
    RouteNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Human-readable explanation carried in every error response body, per
    /// the response envelope contract.
    pub fn explanation(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LangCode;

    fn pair(src: &str, tgt: &str) -> PairKey {
        PairKey::new(LangCode::parse(src).unwrap(), LangCode::parse(tgt).unwrap())
    }

    #[test]
    fn unknown_pair_message_includes_dashed_pair() {
        let err = GatewayError::UnknownPair(pair("eng", "spa"));
        assert_eq!(err.to_string(), "no installed pair for eng-spa");
    }

    #[test]
    fn pipe_broken_message_includes_pair_and_reason() {
        let err = GatewayError::PipeBroken {
            pair: pair("idn", "idn"),
            reason: "child exited".into(),
        };
        assert_eq!(err.to_string(), "pipe broken for idn-idn: child exited");
    }

    #[test]
    fn deadline_exceeded_message_contains_duration() {
        let err = GatewayError::DeadlineExceeded(std::time::Duration::from_secs(10));
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn explanation_matches_display() {
        let err = GatewayError::MissingArgument("langpair");
        assert_eq!(err.explanation(), err.to_string());
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
    }
}
