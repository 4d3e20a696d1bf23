use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ChatError;
use crate::state::{ExecutionResult, ModelInfo, SessionDetail, SessionSummary, User};
use crate::transport::{with_retry, Backend, ChatRequest, ChatResponse, RetryPolicy, REQUEST_TIMEOUT};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    code: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    user: Option<User>,
}

/// HTTP client for the chat server. Holds a cookie jar so a login carries
/// over to later calls.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_policy(base_url, REQUEST_TIMEOUT, RetryPolicy::default())
    }

    pub fn with_policy(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        let client = match Client::builder().cookie_store(true).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "HTTP client without cookie store, login will not persist");
                Client::new()
            }
        };

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            retry,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_policy(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
            RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// One attempt at `POST /api/chat`, bounded by the request timeout.
    pub async fn chat_once(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        let send = self.client.post(self.url("/api/chat")).json(request).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ChatError::Timeout)??;

        let body: ChatResponse = tokio::time::timeout(self.timeout, decode(response))
            .await
            .map_err(|_| ChatError::Timeout)??;
        Ok(body)
    }

    /// `POST /api/chat` with retries.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        debug!(model = %request.model, chars = request.message.chars().count(), "Sending chat message");
        with_retry(self.retry, |_| self.chat_once(request)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Option<User>, ChatError> {
        let response = self
            .client
            .post(self.url("/api/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let body: LoginResponse = decode(response).await?;
        info!(username, "Logged in");
        Ok(body.user)
    }

    pub async fn logout(&self) -> Result<(), ChatError> {
        let response = self.client.post(self.url("/api/logout")).send().await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn current_user(&self) -> Result<User, ChatError> {
        self.get_json("/api/user").await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.get_json("/api/sessions").await
    }

    pub async fn get_session(&self, id: i64) -> Result<SessionDetail, ChatError> {
        self.get_json(&format!("/api/sessions/{}", id)).await
    }

    pub async fn delete_session(&self, id: i64) -> Result<(), ChatError> {
        let response = self
            .client
            .delete(self.url(&format!("/api/sessions/{}", id)))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    pub async fn execute_code(&self, code: &str, language: &str) -> Result<ExecutionResult, ChatError> {
        let send = self
            .client
            .post(self.url("/api/execute-code"))
            .json(&ExecuteRequest { code, language })
            .send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ChatError::Timeout)??;
        decode(response).await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ChatError> {
        self.get_json("/api/models").await
    }

    pub async fn health(&self) -> Result<bool, ChatError> {
        let response = self.client.get(self.url("/api/health")).send().await?;
        Ok(response.status().is_success())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChatError> {
        let response = self.client.get(self.url(path)).send().await?;
        decode(response).await
    }
}

/// Map a non-2xx response to `ChatError::Server` using the `{error}` body when present.
async fn check_status(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    Err(ChatError::Server {
        status: status.as_u16(),
        reason,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ChatError> {
    let response = check_status(response).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| ChatError::InvalidResponse(e.to_string()))
}

impl Backend for ApiClient {
    async fn send_chat(&self, request: &ChatRequest) -> Result<ChatResponse, ChatError> {
        self.chat(request).await
    }

    async fn current_user(&self) -> Result<User, ChatError> {
        ApiClient::current_user(self).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        ApiClient::list_sessions(self).await
    }

    async fn get_session(&self, id: i64) -> Result<SessionDetail, ChatError> {
        ApiClient::get_session(self, id).await
    }

    async fn delete_session(&self, id: i64) -> Result<(), ChatError> {
        ApiClient::delete_session(self, id).await
    }

    async fn execute_code(&self, code: &str, language: &str) -> Result<ExecutionResult, ChatError> {
        ApiClient::execute_code(self, code, language).await
    }
}
