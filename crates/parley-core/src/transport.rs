//! Chat request/response shapes, the retry policy, and the backend seam.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::state::{ExecutionResult, SessionDetail, SessionSummary, Turn, User};

/// Total attempts per request, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// Delay unit; attempt `n` waits `n * BASE_DELAY` before the next one.
pub const BASE_DELAY: Duration = Duration::from_millis(2000);
/// Per-attempt request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body of `POST /api/chat`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Turn>>,
    /// Serialized as `null` for a fresh server-backed conversation.
    #[serde(skip_serializing_if = "SessionField::is_absent")]
    pub session_id: SessionField,
    pub model: String,
}

/// How a request refers to the server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionField {
    /// Local history mode; the field is omitted.
    #[default]
    Absent,
    /// Server mode, no session yet.
    New,
    Existing(i64),
}

impl SessionField {
    fn is_absent(&self) -> bool {
        matches!(self, SessionField::Absent)
    }
}

impl Serialize for SessionField {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SessionField::Existing(id) => serializer.serialize_some(id),
            _ => serializer.serialize_none(),
        }
    }
}

/// Successful reply from `POST /api/chat`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Linear backoff: a fixed number of sequential attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last failure is returned.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ChatError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChatError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Request failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(attempt, error = %e, "Request failed, giving up");
                return Err(e);
            }
        }
    }
}

/// Everything the session controller needs from the server.
pub trait Backend: Send + Sync {
    /// Send a chat message, retrying per the backend's policy.
    fn send_chat(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, ChatError>> + Send;

    fn current_user(&self) -> impl Future<Output = Result<User, ChatError>> + Send;

    fn list_sessions(&self) -> impl Future<Output = Result<Vec<SessionSummary>, ChatError>> + Send;

    fn get_session(&self, id: i64) -> impl Future<Output = Result<SessionDetail, ChatError>> + Send;

    fn delete_session(&self, id: i64) -> impl Future<Output = Result<(), ChatError>> + Send;

    fn execute_code(
        &self,
        code: &str,
        language: &str,
    ) -> impl Future<Output = Result<ExecutionResult, ChatError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn request(session_id: SessionField, history: Option<Vec<Turn>>) -> ChatRequest {
        ChatRequest {
            message: "Hello".to_string(),
            history,
            session_id,
            model: "m".to_string(),
        }
    }

    #[test]
    fn test_request_shapes() {
        let local = serde_json::to_value(request(SessionField::Absent, Some(vec![]))).unwrap();
        assert_eq!(
            local,
            serde_json::json!({"message": "Hello", "history": [], "model": "m"})
        );

        let fresh = serde_json::to_value(request(SessionField::New, None)).unwrap();
        assert_eq!(
            fresh,
            serde_json::json!({"message": "Hello", "session_id": null, "model": "m"})
        );

        let existing = serde_json::to_value(request(SessionField::Existing(42), None)).unwrap();
        assert_eq!(existing["session_id"], 42);
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let started = Mutex::new(Vec::new());
        let origin = Instant::now();

        let result = with_retry(RetryPolicy::default(), |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            started.lock().unwrap().push(origin.elapsed());
            async move {
                if attempt < 3 {
                    Err(ChatError::Network("reset".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let started = started.into_inner().unwrap();
        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 2);
        assert!(gaps[0] >= Duration::from_millis(2000));
        assert!(gaps[1] >= gaps[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_failure_propagates() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::default(), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ChatError::Server {
                    status: 503,
                    reason: "Service temporarily unavailable".to_string(),
                })
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ChatError::Server { status: 503, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(RetryPolicy::default(), |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ChatError::Timeout) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(result, Err(ChatError::Timeout));
    }
}
