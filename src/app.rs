use std::time::{Duration, Instant};

use ratatui::widgets::ListState;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use parley_core::controller::{PendingSend, SendOutcome, SendRejected};
use parley_core::formatter::display_text;
use parley_core::store::FileStorage;
use parley_core::{
    filter_models, ApiClient, AppState, Backend, ChatError, ChatResponse, Config,
    ConversationStore, ModelInfo, SessionController,
};

use crate::view::TerminalView;

/// Prompts offered on the welcome screen (keys 1-3).
pub const EXAMPLE_PROMPTS: [&str; 3] = [
    "Explain how async/await works in Rust",
    "Write a Python function that checks whether a number is prime",
    "Summarize the CAP theorem in three sentences",
];

/// Delay between typed characters of an example prompt.
pub const TYPING_INTERVAL: Duration = Duration::from_millis(50);
/// Pause after the example is fully typed before it is sent.
pub const AUTO_SEND_DELAY: Duration = Duration::from_secs(1);

pub type Controller = SessionController<ApiClient, TerminalView>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Input,
    Sidebar,
}

/// Action waiting on a yes/no answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirm {
    NewChat,
    DeleteSession(i64),
}

impl Confirm {
    pub fn prompt(&self) -> &'static str {
        match self {
            Confirm::NewChat => "Start a new chat? Current conversation will be cleared.",
            Confirm::DeleteSession(_) => "Delete this conversation?",
        }
    }
}

/// An example prompt being typed into the input.
#[derive(Debug, Clone)]
pub struct TypingDemo {
    text: String,
    typed: usize,
    last_step: Instant,
    finished_at: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TypingStep {
    /// Append this character to the input.
    Type(char),
    Wait,
    /// Typing is done and the pause elapsed: send if the input still matches.
    Send(String),
}

impl TypingDemo {
    pub fn new(text: &str, now: Instant) -> Self {
        Self {
            text: text.to_string(),
            typed: 0,
            last_step: now,
            finished_at: None,
        }
    }

    pub fn step(&mut self, now: Instant) -> TypingStep {
        if let Some(finished) = self.finished_at {
            if now.duration_since(finished) >= AUTO_SEND_DELAY {
                return TypingStep::Send(self.text.clone());
            }
            return TypingStep::Wait;
        }

        if self.typed > 0 && now.duration_since(self.last_step) < TYPING_INTERVAL {
            return TypingStep::Wait;
        }

        match self.text.chars().nth(self.typed) {
            Some(c) => {
                self.typed += 1;
                self.last_step = now;
                if self.typed == self.text.chars().count() {
                    self.finished_at = Some(now);
                }
                TypingStep::Type(c)
            }
            None => {
                self.finished_at = Some(now);
                TypingStep::Wait
            }
        }
    }
}

pub struct App {
    pub should_quit: bool,
    pub config: Config,
    pub controller: Controller,

    // Input box
    pub input: String,
    pub input_cursor: usize,
    pub focus: Focus,

    // Chat pane
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_lines: u16,

    // In-flight send
    pub send_task: Option<JoinHandle<Result<ChatResponse, ChatError>>>,
    pub pending: Option<PendingSend>,

    // Sidebar
    pub sidebar_state: ListState,

    // Model picker
    pub show_model_picker: bool,
    pub models: Vec<ModelInfo>,
    pub model_filter: String,
    pub model_picker_state: ListState,

    pub confirm: Option<Confirm>,
    pub typing: Option<TypingDemo>,
    /// Short-lived status line message (e.g. "Copied").
    pub status: Option<(String, Instant)>,

    pub animation_frame: u8,
    tick_count: u32,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = ApiClient::from_config(&config);
        let store = chat_store(&config)?;
        let state = AppState::new(config.model(), config.mode);
        let mut controller = SessionController::new(client, store, TerminalView::new(), state);
        controller.restore();

        Ok(Self {
            should_quit: false,
            config,
            controller,

            input: String::new(),
            input_cursor: 0,
            focus: Focus::Input,

            chat_scroll: 0,
            chat_height: 0,
            chat_lines: 0,

            send_task: None,
            pending: None,

            sidebar_state: ListState::default(),

            show_model_picker: false,
            models: Vec::new(),
            model_filter: String::new(),
            model_picker_state: ListState::default(),

            confirm: None,
            typing: None,
            status: None,

            animation_frame: 0,
            tick_count: 0,
        })
    }

    pub fn view(&self) -> &TerminalView {
        self.controller.view()
    }

    pub fn is_loading(&self) -> bool {
        self.controller.state().loading
    }

    /// Log in and load the session list when running against server sessions.
    pub async fn connect(&mut self) {
        if let (Some(username), Some(password)) = (self.config.username.clone(), Config::password()) {
            if let Err(e) = self.controller.backend().login(&username, &password).await {
                warn!(error = %e, "Login failed");
                self.set_status("Login failed");
                return;
            }
        }
        if let Err(e) = self.controller.load_user().await {
            warn!(error = %e, "Not signed in");
        }
    }

    pub fn set_status(&mut self, message: &str) {
        self.status = Some((message.to_string(), Instant::now()));
    }

    /// Start sending the input box contents. The request runs on its own task
    /// and is collected by [`App::poll_send`].
    pub fn submit_input(&mut self) {
        let text = self.input.clone();
        self.send_text(&text);
    }

    fn send_text(&mut self, text: &str) {
        self.typing = None;
        match self.controller.begin_send(text) {
            Ok(pending) => {
                self.input.clear();
                self.input_cursor = 0;

                let backend = self.controller.backend().clone();
                let request = pending.request.clone();
                self.send_task = Some(tokio::spawn(async move {
                    backend.send_chat(&request).await
                }));
                self.pending = Some(pending);
            }
            Err(SendRejected::Busy) => {}
            Err(SendRejected::Invalid(e)) => {
                info!(reason = %e, "Message rejected");
            }
        }
    }

    /// Collect a finished send, if any.
    pub async fn poll_send(&mut self) {
        let finished = self
            .send_task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(false);
        if !finished {
            return;
        }

        let (Some(task), Some(pending)) = (self.send_task.take(), self.pending.take()) else {
            return;
        };
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(ChatError::Network(e.to_string())),
        };

        let outcome = self.controller.finish_send(pending, result, Instant::now());
        if let SendOutcome::Success {
            session_created: true,
            ..
        } = outcome
        {
            let _ = self.controller.refresh_sessions().await;
        }
    }

    pub async fn retry(&mut self) {
        if self.is_loading() {
            return;
        }
        if let Some(text) = self.controller.state().last_failed.clone() {
            if let Some(id) = self.view().latest_error() {
                self.controller.dismiss_banner(id);
            }
            self.send_text(&text);
        }
    }

    pub fn dismiss_error(&mut self) {
        if let Some(id) = self.view().latest_error() {
            self.controller.dismiss_banner(id);
        }
    }

    /// Ask before clearing a non-empty conversation.
    pub fn request_new_chat(&mut self) {
        if self.controller.store().is_empty() {
            self.controller.start_new_chat(|| true);
            self.reset_input();
        } else {
            self.confirm = Some(Confirm::NewChat);
        }
    }

    pub async fn answer_confirm(&mut self, yes: bool) {
        let Some(action) = self.confirm.take() else {
            return;
        };
        match action {
            Confirm::NewChat => {
                if self.controller.start_new_chat(|| yes) {
                    self.reset_input();
                }
            }
            Confirm::DeleteSession(id) => {
                if let Err(e) = self.controller.delete_session(id, || yes).await {
                    warn!(session_id = id, error = %e, "Failed to delete session");
                    self.set_status("Failed to delete conversation");
                }
            }
        }
    }

    fn reset_input(&mut self) {
        self.input.clear();
        self.input_cursor = 0;
        self.chat_scroll = 0;
        self.typing = None;
        self.focus = Focus::Input;
    }

    pub fn start_example(&mut self, index: usize) {
        if self.is_loading() {
            return;
        }
        if let Some(text) = EXAMPLE_PROMPTS.get(index) {
            self.input.clear();
            self.input_cursor = 0;
            self.typing = Some(TypingDemo::new(text, Instant::now()));
        }
    }

    pub async fn tick(&mut self) {
        let now = Instant::now();
        self.tick_count = self.tick_count.wrapping_add(1);
        if self.tick_count % 6 == 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }

        self.controller.tick(now);
        self.poll_send().await;

        if let Some((_, at)) = &self.status {
            if now.duration_since(*at) >= Duration::from_secs(2) {
                self.status = None;
            }
        }

        if let Some(typing) = self.typing.as_mut() {
            match typing.step(now) {
                TypingStep::Type(c) => {
                    self.input.push(c);
                    self.input_cursor = self.input.chars().count();
                }
                TypingStep::Wait => {}
                TypingStep::Send(text) => {
                    self.typing = None;
                    if self.input == text {
                        self.send_text(&text);
                    }
                }
            }
        }
    }

    // Chat scrolling
    pub fn max_scroll(&self) -> u16 {
        self.chat_lines.saturating_sub(self.chat_height)
    }

    pub fn scroll_page_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(self.chat_height.max(1));
    }

    pub fn scroll_page_down(&mut self) {
        self.chat_scroll = (self.chat_scroll + self.chat_height.max(1)).min(self.max_scroll());
    }

    // Sidebar
    pub fn toggle_sidebar(&mut self) {
        let view = self.controller.view_mut();
        view.sidebar_open = !view.sidebar_open;
        if !view.sidebar_open && self.focus == Focus::Sidebar {
            self.focus = Focus::Input;
        }
    }

    pub fn sidebar_down(&mut self) {
        let len = self.view().sessions.len();
        if len > 0 {
            let i = self.sidebar_state.selected().map(|i| i + 1).unwrap_or(0);
            self.sidebar_state.select(Some(i.min(len - 1)));
        }
    }

    pub fn sidebar_up(&mut self) {
        let i = self.sidebar_state.selected().unwrap_or(0);
        self.sidebar_state.select(Some(i.saturating_sub(1)));
    }

    pub fn selected_session(&self) -> Option<i64> {
        self.sidebar_state
            .selected()
            .and_then(|i| self.view().sessions.get(i))
            .map(|s| s.id)
    }

    pub async fn open_selected_session(&mut self) {
        let Some(id) = self.selected_session() else {
            return;
        };
        self.open_session(id).await;
    }

    /// Replace the conversation with a saved server session.
    pub async fn open_session(&mut self, id: i64) {
        match self.controller.load_session(id).await {
            Ok(true) => {
                self.focus = Focus::Input;
                self.chat_scroll = 0;
            }
            Ok(false) => {}
            Err(e) => warn!(session_id = id, error = %e, "Failed to open session"),
        }
    }

    // Model picker
    pub async fn open_model_picker(&mut self) {
        if self.models.is_empty() {
            match self.controller.backend().list_models().await {
                Ok(models) => self.models = models,
                Err(e) => {
                    warn!(error = %e, "Failed to load models");
                    self.set_status("Failed to load models");
                    return;
                }
            }
        }
        self.model_filter.clear();
        let current = self.controller.state().model.clone();
        let selected = self.filtered_models().iter().position(|m| m.id == current);
        self.model_picker_state.select(selected.or(Some(0)));
        self.show_model_picker = true;
    }

    pub fn filtered_models(&self) -> Vec<&ModelInfo> {
        filter_models(&self.models, &self.model_filter)
    }

    pub fn model_picker_down(&mut self) {
        let len = self.filtered_models().len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        let chosen = self
            .model_picker_state
            .selected()
            .and_then(|i| self.filtered_models().get(i).map(|m| m.id.clone()));
        if let Some(model) = chosen {
            if let Err(e) = Config::save_default_model(&model) {
                warn!(error = %e, "Failed to save default model");
            }
            self.controller.set_model(model);
        }
        self.show_model_picker = false;
    }

    // Code blocks
    pub fn copy_last_code(&mut self) {
        let code = self
            .controller
            .pipeline()
            .last_code_block(false)
            .map(|(_, _, block)| block.code.clone());
        match code {
            Some(code) if copy_to_clipboard(&code) => self.set_status("Copied"),
            Some(_) => self.set_status("Clipboard unavailable"),
            None => self.set_status("No code block to copy"),
        }
    }

    pub fn copy_last_reply(&mut self) {
        let reply = self.controller.last_reply().map(display_text);
        match reply {
            Some(text) if copy_to_clipboard(&text) => self.set_status("Copied reply"),
            Some(_) => self.set_status("Clipboard unavailable"),
            None => self.set_status("No reply to copy"),
        }
    }

    pub async fn run_last_code(&mut self) {
        let target = self
            .controller
            .pipeline()
            .last_code_block(true)
            .map(|(turn, block, _)| (turn, block));
        match target {
            Some((turn, block)) => {
                self.set_status("Running...");
                self.controller.run_code(turn, block).await;
            }
            None => self.set_status("No runnable code block"),
        }
    }
}

/// Store for the chat the TUI and `send` drive. Only local mode keeps a
/// history file.
pub fn chat_store(config: &Config) -> anyhow::Result<ConversationStore> {
    if !config.keeps_local_history() {
        return Ok(ConversationStore::new());
    }
    let storage = FileStorage::new(Config::data_dir()?)?;
    Ok(ConversationStore::with_storage(Box::new(storage)))
}

/// Pipe text to the first clipboard tool that starts.
pub fn copy_to_clipboard(text: &str) -> bool {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let tools: [(&str, &[&str]); 3] = [
        ("pbcopy", &[]),
        ("wl-copy", &[]),
        ("xclip", &["-selection", "clipboard"]),
    ];

    for (program, args) in tools {
        if let Ok(mut child) = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .spawn()
        {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(text.as_bytes());
            }
            return child.wait().map(|s| s.success()).unwrap_or(false);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Mode;

    #[test]
    fn test_typing_demo_types_then_waits_then_sends() {
        let start = Instant::now();
        let mut demo = TypingDemo::new("hi", start);

        assert_eq!(demo.step(start), TypingStep::Type('h'));
        assert_eq!(demo.step(start + Duration::from_millis(10)), TypingStep::Wait);
        let second = start + TYPING_INTERVAL;
        assert_eq!(demo.step(second), TypingStep::Type('i'));

        assert_eq!(demo.step(second + Duration::from_millis(500)), TypingStep::Wait);
        assert_eq!(
            demo.step(second + AUTO_SEND_DELAY),
            TypingStep::Send("hi".to_string())
        );
    }

    #[test]
    fn test_typing_demo_handles_multibyte_text() {
        let start = Instant::now();
        let mut demo = TypingDemo::new("é!", start);
        assert_eq!(demo.step(start), TypingStep::Type('é'));
        assert_eq!(demo.step(start + TYPING_INTERVAL), TypingStep::Type('!'));
    }

    #[test]
    fn test_server_mode_chat_store_is_not_persistent() {
        let mut config = Config::new();
        config.mode = Mode::Server;
        assert!(!chat_store(&config).unwrap().is_persistent());

        config.mode = Mode::Local;
        config.persist_history = false;
        assert!(!chat_store(&config).unwrap().is_persistent());
    }

    #[test]
    fn test_confirm_prompts() {
        assert!(Confirm::NewChat.prompt().contains("new chat"));
        assert!(Confirm::DeleteSession(1).prompt().contains("Delete"));
    }
}
