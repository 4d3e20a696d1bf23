use thiserror::Error;

/// Longest message accepted for sending, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

const GENERIC_FAILURE: &str = "Sorry, something went wrong. Please try again.";
const NETWORK_FAILURE: &str = "Network error. Please check your connection and try again.";

/// Known server error phrases and the message shown for each.
/// Matched by substring, first match wins.
const REASON_MESSAGES: &[(&str, &str)] = &[
    (
        "Rate limit",
        "Too many requests. Please wait a moment and try again.",
    ),
    (
        "Service temporarily unavailable",
        "Service is temporarily unavailable. Please try again later.",
    ),
    ("Network", NETWORK_FAILURE),
];

/// Input rejected locally; never sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message cannot be empty")]
    Empty,

    #[error("Message is too long (maximum {max} characters)")]
    TooLong { len: usize, max: usize },
}

/// Failures of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {reason}")]
    Server { status: u16, reason: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ChatError {
    /// Whether a retry may succeed. A timeout aborts the request and is final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ChatError::Timeout)
    }

    /// Human-readable reason shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Timeout => "Request timed out. Please try again.".to_string(),
            ChatError::Network(reason) => {
                message_for_reason(reason).unwrap_or(NETWORK_FAILURE).to_string()
            }
            ChatError::Server { reason, .. } | ChatError::InvalidResponse(reason) => {
                message_for_reason(reason).unwrap_or(GENERIC_FAILURE).to_string()
            }
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else if e.is_decode() {
            ChatError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            ChatError::Server {
                status: status.as_u16(),
                reason: e.to_string(),
            }
        } else {
            ChatError::Network(e.to_string())
        }
    }
}

fn message_for_reason(reason: &str) -> Option<&'static str> {
    REASON_MESSAGES
        .iter()
        .find(|(phrase, _)| reason.contains(phrase))
        .map(|(_, message)| *message)
}

/// Local storage failures. Logged and swallowed by the conversation store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(reason: &str) -> ChatError {
        ChatError::Server {
            status: 500,
            reason: reason.to_string(),
        }
    }

    #[test]
    fn test_known_reasons_map_to_friendly_messages() {
        assert_eq!(
            server("Rate limit exceeded for model").user_message(),
            "Too many requests. Please wait a moment and try again."
        );
        assert_eq!(
            server("Service temporarily unavailable").user_message(),
            "Service is temporarily unavailable. Please try again later."
        );
        assert_eq!(
            server("Network unreachable upstream").user_message(),
            "Network error. Please check your connection and try again."
        );
    }

    #[test]
    fn test_unknown_reason_falls_back_to_generic() {
        assert_eq!(server("boom").user_message(), GENERIC_FAILURE);
        assert_eq!(
            ChatError::InvalidResponse("missing field".into()).user_message(),
            GENERIC_FAILURE
        );
    }

    #[test]
    fn test_timeout_message_and_retryability() {
        assert_eq!(
            ChatError::Timeout.user_message(),
            "Request timed out. Please try again."
        );
        assert!(!ChatError::Timeout.is_retryable());
        assert!(ChatError::Network("reset".into()).is_retryable());
        assert!(server("boom").is_retryable());
    }

    #[test]
    fn test_network_errors_always_read_as_network() {
        assert_eq!(
            ChatError::Network("connection refused".into()).user_message(),
            "Network error. Please check your connection and try again."
        );
    }

    #[test]
    fn test_validation_messages() {
        assert_eq!(ValidationError::Empty.to_string(), "Message cannot be empty");
        assert_eq!(
            ValidationError::TooLong { len: 4001, max: 4000 }.to_string(),
            "Message is too long (maximum 4000 characters)"
        );
    }
}
