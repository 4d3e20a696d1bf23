//! UI-agnostic conversation and account types
//!
//! These are shared between the controller, the HTTP client, and any surface
//! that renders a conversation (terminal, HTML export).

use serde::{Deserialize, Serialize};

/// The role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "ai")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }

    pub fn avatar(&self) -> char {
        match self {
            Role::User => 'U',
            Role::Assistant => 'A',
        }
    }
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Entry in the server-side session list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    #[serde(default)]
    pub share_hash: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A session together with its messages, as returned by `GET /api/sessions/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session: SessionInfo,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

impl SessionDetail {
    pub fn turns(&self) -> Vec<Turn> {
        self.messages
            .iter()
            .map(|m| Turn {
                role: m.role,
                content: m.content.clone(),
            })
            .collect()
    }
}

/// Identifies the server session currently open in the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub id: i64,
    pub share_hash: Option<String>,
}

impl SessionRef {
    /// Client-side route for this session
    pub fn route(&self) -> String {
        match &self.share_hash {
            Some(hash) if !hash.is_empty() => format!("/c/{}", hash),
            _ => format!("/c/{}", self.id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
}

/// Case-insensitive filter over model name, id, and provider.
pub fn filter_models<'a>(models: &'a [ModelInfo], term: &str) -> Vec<&'a ModelInfo> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return models.iter().collect();
    }

    models
        .iter()
        .filter(|m| {
            m.name.to_lowercase().contains(&term)
                || m.id.to_lowercase().contains(&term)
                || m.provider.to_lowercase().contains(&term)
        })
        .collect()
}

/// Result of `POST /api/execute-code`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "anthropic.claude-3-haiku".to_string(),
                name: "Claude 3 Haiku".to_string(),
                provider: "Anthropic".to_string(),
            },
            ModelInfo {
                id: "meta.llama3-3-70b".to_string(),
                name: "Llama 3.3 70B".to_string(),
                provider: "Meta".to_string(),
            },
        ]
    }

    #[test]
    fn test_role_reads_legacy_ai_alias() {
        let turn: Turn = serde_json::from_str(r#"{"role":"ai","content":"hi"}"#).unwrap();
        assert_eq!(turn.role, Role::Assistant);

        let json = serde_json::to_string(&turn).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_filter_models_matches_provider_and_name() {
        let models = models();
        assert_eq!(filter_models(&models, "").len(), 2);
        assert_eq!(filter_models(&models, "META")[0].name, "Llama 3.3 70B");
        assert_eq!(filter_models(&models, "haiku")[0].provider, "Anthropic");
        assert!(filter_models(&models, "gpt").is_empty());
    }

    #[test]
    fn test_session_route_prefers_share_hash() {
        let with_hash = SessionRef {
            id: 7,
            share_hash: Some("ab12".to_string()),
        };
        let without = SessionRef {
            id: 7,
            share_hash: None,
        };
        assert_eq!(with_hash.route(), "/c/ab12");
        assert_eq!(without.route(), "/c/7");
    }

    #[test]
    fn test_session_detail_turns() {
        let detail: SessionDetail = serde_json::from_str(
            r#"{"session":{"id":3,"title":"t"},
                "messages":[{"role":"user","content":"q","created_at":null},
                            {"role":"assistant","content":"a"}]}"#,
        )
        .unwrap();
        assert_eq!(detail.turns(), vec![Turn::user("q"), Turn::assistant("a")]);
    }
}
