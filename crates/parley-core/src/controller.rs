//! Session controller: the send flow and conversation-level actions.
//!
//! Send states are `Idle -> Sending -> (Success | Failed) -> Idle`. While
//! `Sending`, input is disabled and further sends are rejected, so at most one
//! request is in flight. A failed send rolls the provisional user turn back
//! out of both the store and the view.

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Mode;
use crate::error::{ChatError, ValidationError, MAX_MESSAGE_CHARS};
use crate::render::{BannerId, CodeOutput, PendingHandle, RenderPipeline, View};
use crate::state::{Role, SessionRef, SessionSummary, Turn, User};
use crate::store::{ConversationStore, Exchange};
use crate::transport::{Backend, ChatRequest, ChatResponse, SessionField};

pub const NEW_CHAT_ROUTE: &str = "/chat";

const CODE_FAILURE: &str = "Failed to execute code. Please try again.";
const SESSION_LOAD_FAILURE: &str = "Failed to load conversation. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Sending,
    Success,
    Failed,
}

/// Everything the controller tracks besides the conversation itself.
#[derive(Debug, Clone)]
pub struct AppState {
    pub user: Option<User>,
    pub session: Option<SessionRef>,
    pub sessions: Vec<SessionSummary>,
    pub loading: bool,
    pub phase: Phase,
    pub model: String,
    pub mode: Mode,
    pub route: String,
    /// Text of the most recent failed send, for the retry action.
    pub last_failed: Option<String>,
}

impl AppState {
    pub fn new(model: impl Into<String>, mode: Mode) -> Self {
        Self {
            user: None,
            session: None,
            sessions: Vec::new(),
            loading: false,
            phase: Phase::Idle,
            model: model.into(),
            mode,
            route: NEW_CHAT_ROUTE.to_string(),
            last_failed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("A message is already being sent")]
    Busy,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// An in-flight send. Hand `request` to the backend, then pass the result to
/// [`SessionController::finish_send`].
#[derive(Debug)]
pub struct PendingSend {
    pub request: ChatRequest,
    exchange: Exchange,
    handle: PendingHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success {
        reply: String,
        /// A server session was created by this exchange.
        session_created: bool,
    },
    Failed {
        reason: String,
    },
}

/// Trim and bound-check a message.
pub fn validate_message(text: &str) -> Result<String, ValidationError> {
    let message = text.trim();
    if message.is_empty() {
        return Err(ValidationError::Empty);
    }

    let len = message.chars().count();
    if len > MAX_MESSAGE_CHARS {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_MESSAGE_CHARS,
        });
    }

    Ok(message.to_string())
}

pub struct SessionController<B: Backend, V: View> {
    backend: B,
    store: ConversationStore,
    pipeline: RenderPipeline<V>,
    state: AppState,
}

impl<B: Backend, V: View> SessionController<B, V> {
    pub fn new(backend: B, store: ConversationStore, view: V, state: AppState) -> Self {
        let mut pipeline = RenderPipeline::new(view);
        pipeline.set_route(&state.route);
        Self {
            backend,
            store,
            pipeline,
            state,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn pipeline(&self) -> &RenderPipeline<V> {
        &self.pipeline
    }

    pub fn view(&self) -> &V {
        self.pipeline.view()
    }

    pub fn view_mut(&mut self) -> &mut V {
        self.pipeline.view_mut()
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.state.model = model.into();
        info!(model = %self.state.model, "Model selected");
    }

    fn transition(&mut self, phase: Phase) {
        debug!(from = ?self.state.phase, to = ?phase, "Send phase");
        self.state.phase = phase;
    }

    fn set_route(&mut self, route: String) {
        self.pipeline.set_route(&route);
        self.state.route = route;
    }

    /// Render whatever the store restored from disk. Server sessions are
    /// never restored from local history.
    pub fn restore(&mut self) -> usize {
        if self.state.mode == Mode::Server {
            debug!("Server mode, skipping local history");
            return 0;
        }
        let turns = self.store.restore().to_vec();
        for turn in &turns {
            self.pipeline.show_turn(turn);
        }
        if !turns.is_empty() {
            info!(turns = turns.len(), "Restored saved conversation");
        }
        turns.len()
    }

    /// Validate and start a send: the user turn is appended provisionally and
    /// rendered, and the loading indicator shown.
    pub fn begin_send(&mut self, text: &str) -> Result<PendingSend, SendRejected> {
        if self.state.loading {
            return Err(SendRejected::Busy);
        }

        let message = match validate_message(text) {
            Ok(message) => message,
            Err(e) => {
                self.pipeline.show_notice(&e.to_string());
                return Err(e.into());
            }
        };

        self.transition(Phase::Sending);
        self.state.loading = true;
        self.pipeline.set_input_enabled(false);

        let user_turn = Turn::user(message.clone());
        self.pipeline.show_turn(&user_turn);
        let exchange = self.store.begin(user_turn);
        let handle = self.pipeline.show_pending();

        let request = match self.state.mode {
            Mode::Local => ChatRequest {
                message,
                history: Some(self.store.history_before(&exchange).to_vec()),
                session_id: SessionField::Absent,
                model: self.state.model.clone(),
            },
            Mode::Server => ChatRequest {
                message,
                history: None,
                session_id: self
                    .state
                    .session
                    .as_ref()
                    .map(|s| SessionField::Existing(s.id))
                    .unwrap_or(SessionField::New),
                model: self.state.model.clone(),
            },
        };

        Ok(PendingSend {
            request,
            exchange,
            handle,
        })
    }

    /// Commit or roll back a send once the backend has answered.
    pub fn finish_send(
        &mut self,
        pending: PendingSend,
        result: Result<ChatResponse, ChatError>,
        now: Instant,
    ) -> SendOutcome {
        let PendingSend {
            request,
            exchange,
            handle,
        } = pending;
        self.pipeline.clear_pending(handle);

        let outcome = match result {
            Ok(response) => {
                self.transition(Phase::Success);
                let reply = Turn::assistant(response.response);
                self.pipeline.show_turn(&reply);
                self.store.commit(exchange, reply.clone());
                self.state.last_failed = None;

                let fresh = self.state.session.is_none();
                let session_created = match (self.state.mode, fresh, response.session_id) {
                    (Mode::Server, true, Some(id)) => {
                        info!(session_id = id, "Session created");
                        self.state.session = Some(SessionRef {
                            id,
                            share_hash: None,
                        });
                        true
                    }
                    _ => false,
                };

                SendOutcome::Success {
                    reply: reply.content,
                    session_created,
                }
            }
            Err(e) => {
                self.transition(Phase::Failed);
                warn!(error = %e, "Send failed");
                self.store.abort(exchange);
                self.pipeline.unshow_last_turn();

                let reason = e.user_message();
                self.pipeline
                    .show_failure(&reason, Some(request.message.clone()), now);
                self.state.last_failed = Some(request.message);

                SendOutcome::Failed { reason }
            }
        };

        self.state.loading = false;
        self.pipeline.set_input_enabled(true);
        self.transition(Phase::Idle);
        outcome
    }

    /// Full send: validate, call the backend, commit or roll back.
    pub async fn submit(&mut self, text: &str) -> Result<SendOutcome, SendRejected> {
        let pending = self.begin_send(text)?;
        let result = self.backend.send_chat(&pending.request).await;
        let outcome = self.finish_send(pending, result, Instant::now());

        if let SendOutcome::Success {
            session_created: true,
            ..
        } = outcome
        {
            let _ = self.refresh_sessions().await;
        }
        Ok(outcome)
    }

    /// Resend the last failed message, dropping its banner.
    pub async fn retry_last(&mut self) -> Option<Result<SendOutcome, SendRejected>> {
        let text = self.state.last_failed.clone()?;
        let stale: Vec<BannerId> = self
            .pipeline
            .banners()
            .iter()
            .filter(|b| b.retry.is_some())
            .map(|b| b.id)
            .collect();
        for id in stale {
            self.pipeline.dismiss(id);
        }
        Some(self.submit(&text).await)
    }

    pub fn dismiss_banner(&mut self, id: BannerId) -> bool {
        self.pipeline.dismiss(id)
    }

    /// Expire due banners.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.pipeline.expire(now)
    }

    /// Start over. A non-empty conversation is only cleared if `confirm`
    /// agrees. Returns whether the reset happened.
    pub fn start_new_chat(&mut self, confirm: impl FnOnce() -> bool) -> bool {
        if self.state.loading {
            return false;
        }
        if !self.store.is_empty() && !confirm() {
            return false;
        }
        self.reset();
        true
    }

    fn reset(&mut self) {
        self.store.clear();
        self.pipeline.clear();
        self.state.session = None;
        self.state.last_failed = None;
        self.set_route(NEW_CHAT_ROUTE.to_string());
        self.pipeline.render_sessions(&self.state.sessions, None);
        debug!("Started new chat");
    }

    pub async fn load_user(&mut self) -> Result<(), ChatError> {
        let user = self.backend.current_user().await?;
        info!(username = %user.username, "Loaded user");
        self.state.user = Some(user);
        self.refresh_sessions().await
    }

    pub async fn refresh_sessions(&mut self) -> Result<(), ChatError> {
        let sessions = match self.backend.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Failed to load sessions");
                return Err(e);
            }
        };

        if let Some(current) = self.state.session.as_mut() {
            if current.share_hash.is_none() {
                current.share_hash = sessions
                    .iter()
                    .find(|s| s.id == current.id)
                    .and_then(|s| s.share_hash.clone());
            }
        }

        self.state.sessions = sessions;
        let active = self.state.session.as_ref().map(|s| s.id);
        self.pipeline.render_sessions(&self.state.sessions, active);
        Ok(())
    }

    /// Replace the conversation with a saved server session.
    pub async fn load_session(&mut self, id: i64) -> Result<bool, ChatError> {
        if self.state.loading {
            return Ok(false);
        }

        let detail = match self.backend.get_session(id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(session_id = id, error = %e, "Failed to load session");
                self.pipeline
                    .show_failure(SESSION_LOAD_FAILURE, None, Instant::now());
                return Err(e);
            }
        };

        let turns = detail.turns();
        self.pipeline.clear();
        for turn in &turns {
            self.pipeline.show_turn(turn);
        }
        self.store.replace(turns);

        let share_hash = self
            .state
            .sessions
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.share_hash.clone());
        let session = SessionRef { id, share_hash };
        self.set_route(session.route());
        self.state.session = Some(session);
        self.state.last_failed = None;

        self.pipeline.render_sessions(&self.state.sessions, Some(id));
        self.pipeline.close_navigation();
        info!(session_id = id, turns = self.store.len(), "Loaded session");
        Ok(true)
    }

    /// Delete a server session after confirmation. Deleting the open session
    /// starts a new chat.
    pub async fn delete_session(
        &mut self,
        id: i64,
        confirm: impl FnOnce() -> bool,
    ) -> Result<bool, ChatError> {
        if !confirm() {
            return Ok(false);
        }

        self.backend.delete_session(id).await?;
        info!(session_id = id, "Deleted session");

        if self.state.session.as_ref().map(|s| s.id) == Some(id) && !self.state.loading {
            self.reset();
        }
        let _ = self.refresh_sessions().await;
        Ok(true)
    }

    /// Text of the most recent assistant reply, for the copy action.
    pub fn last_reply(&self) -> Option<&str> {
        self.store
            .turns()
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }

    /// Code of a rendered block, for the copy action.
    pub fn code_for_copy(&self, turn_index: usize, block_index: usize) -> Option<String> {
        self.pipeline
            .code_block(turn_index, block_index)
            .map(|b| b.code.clone())
    }

    /// Run a rendered code block through the execution endpoint and show the
    /// result beneath it. Returns false for unknown or non-runnable blocks.
    pub async fn run_code(&mut self, turn_index: usize, block_index: usize) -> bool {
        let Some(block) = self.pipeline.code_block(turn_index, block_index) else {
            return false;
        };
        let Some(language) = block.execution_language() else {
            return false;
        };
        let code = block.code.clone();

        match self.backend.execute_code(&code, language).await {
            Ok(result) => {
                let text = if result.success {
                    result.output.unwrap_or_default()
                } else {
                    result.error.unwrap_or_default()
                };
                self.pipeline.show_code_output(&CodeOutput {
                    turn_index,
                    block_index,
                    success: result.success,
                    text,
                });
            }
            Err(e) => {
                warn!(error = %e, "Code execution failed");
                self.pipeline.show_failure(CODE_FAILURE, None, Instant::now());
            }
        }
        true
    }
}
