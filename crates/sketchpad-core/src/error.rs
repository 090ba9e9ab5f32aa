use thiserror::Error;

/// Default sentence shown when a request fails for a reason we can't describe better.
pub const GENERIC_FAILURE_MESSAGE: &str =
    "Sorry, there was an error processing your message. Please try again.";

/// Sentence shown for every rate-limit failure, regardless of tier.
pub const RATE_LIMIT_MESSAGE: &str =
    "You have exceeded your maximum number of messages for the day. Please try again later.";

const OFFLINE_MESSAGE: &str = "We're having trouble sending your message. Please check your internet connection and try again.";

const MALFORMED_STREAM_MESSAGE: &str =
    "The response stream was interrupted. Part of the reply may be missing. Please try again.";

/// Failure taxonomy shared by the client and the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimit,
    /// Transport failure: the service could not be reached at all.
    Offline,
    /// The byte stream could not be decoded into document chunks.
    UpstreamMalformed,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::RateLimit => 429,
            ErrorKind::Offline => 503,
            ErrorKind::UpstreamMalformed => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// Map an HTTP status back onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => ErrorKind::BadRequest,
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimit,
            503 => ErrorKind::Offline,
            502 => ErrorKind::UpstreamMalformed,
            _ => ErrorKind::Internal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Offline => "offline",
            ErrorKind::UpstreamMalformed => "upstream_malformed",
            ErrorKind::Internal => "internal",
        }
    }
}

/// A failed exchange with the backend, carrying a message that is safe to show.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ChatError {
    kind: ErrorKind,
    message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error from a non-success HTTP status and the `{message}` body, if any.
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let kind = ErrorKind::from_status(status);
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| default_message(kind).to_string());
        Self { kind, message }
    }

    pub fn offline(cause: impl std::fmt::Display) -> Self {
        tracing::debug!(cause = %cause, "Transport failure");
        Self::new(ErrorKind::Offline, OFFLINE_MESSAGE)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamMalformed, detail)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Plain-language text appended to the conversation when an exchange fails.
    ///
    /// Rate-limit failures always read the same, whichever tier produced them.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::RateLimit => RATE_LIMIT_MESSAGE.to_string(),
            ErrorKind::Offline => OFFLINE_MESSAGE.to_string(),
            ErrorKind::UpstreamMalformed => MALFORMED_STREAM_MESSAGE.to_string(),
            ErrorKind::Internal => GENERIC_FAILURE_MESSAGE.to_string(),
            _ => self.message.clone(),
        }
    }
}

/// Failure of the byte transport underneath a streamed reply.
#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError(err.to_string())
    }
}

fn default_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimit => RATE_LIMIT_MESSAGE,
        ErrorKind::Offline => OFFLINE_MESSAGE,
        ErrorKind::UpstreamMalformed => MALFORMED_STREAM_MESSAGE,
        ErrorKind::NotFound => "The requested chat was not found.",
        ErrorKind::Unauthorized => "You need to sign in before continuing.",
        ErrorKind::Forbidden => "Your account does not have access to this chat.",
        ErrorKind::BadRequest | ErrorKind::Internal => GENERIC_FAILURE_MESSAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_without_body_uses_daily_sentence() {
        let err = ChatError::from_status(429, None);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.user_message().contains("exceeded your maximum"));
    }

    #[test]
    fn test_rate_limit_message_is_tier_independent() {
        let err = ChatError::from_status(429, Some("guest quota used".into()));
        assert_eq!(err.user_message(), RATE_LIMIT_MESSAGE);
    }

    #[test]
    fn test_server_message_is_kept_for_client_errors() {
        let err = ChatError::from_status(404, Some("Chat not found".into()));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.user_message(), "Chat not found");
    }

    #[test]
    fn test_blank_body_message_falls_back() {
        let err = ChatError::from_status(500, Some("   ".into()));
        assert_eq!(err.message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn test_status_round_trip_for_taxonomy() {
        for kind in [
            ErrorKind::BadRequest,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::RateLimit,
            ErrorKind::Offline,
        ] {
            assert_eq!(ErrorKind::from_status(kind.status_code()), kind);
        }
    }
}
