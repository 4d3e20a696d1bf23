use parley_core::formatter::{display_text, CodeBlock};
use parley_core::render::{
    BannerId, CodeOutput, ErrorBanner, PendingHandle, RenderedTurn, View,
};
use parley_core::{Role, SessionSummary};

/// One element of the chat pane.
#[derive(Debug, Clone)]
pub enum ChatItem {
    Message {
        index: usize,
        role: Role,
        text: String,
        code_blocks: Vec<CodeBlock>,
    },
    Pending(PendingHandle),
    Error {
        id: BannerId,
        message: String,
        retry: bool,
    },
    Notice(String),
    Output(CodeOutput),
}

/// Terminal display surface. Drawn by `ui::render` every frame.
#[derive(Debug)]
pub struct TerminalView {
    pub items: Vec<ChatItem>,
    pub welcome_visible: bool,
    pub input_enabled: bool,
    pub route: String,
    pub sessions: Vec<SessionSummary>,
    pub active_session: Option<i64>,
    pub sidebar_open: bool,
    /// Set when new content arrives; the ui snaps the scroll offset and clears it.
    pub follow_bottom: bool,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            welcome_visible: true,
            input_enabled: true,
            route: "/chat".to_string(),
            sessions: Vec::new(),
            active_session: None,
            sidebar_open: false,
            follow_bottom: false,
        }
    }

    pub fn latest_error(&self) -> Option<BannerId> {
        self.items.iter().rev().find_map(|item| match item {
            ChatItem::Error { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.items.iter().any(|i| matches!(i, ChatItem::Pending(_)))
    }
}

impl View for TerminalView {
    fn render_turn(&mut self, turn: &RenderedTurn) {
        let text = match turn.role {
            Role::User => turn.content.clone(),
            Role::Assistant => display_text(&turn.content),
        };
        self.items.push(ChatItem::Message {
            index: turn.index,
            role: turn.role,
            text,
            code_blocks: turn.formatted.code_blocks.clone(),
        });
    }

    fn remove_turn(&mut self, index: usize) {
        self.items.retain(|item| match item {
            ChatItem::Message { index: i, .. } => *i != index,
            ChatItem::Output(o) => o.turn_index != index,
            _ => true,
        });
    }

    fn show_pending(&mut self, handle: PendingHandle) {
        self.items.push(ChatItem::Pending(handle));
    }

    fn remove_pending(&mut self, handle: PendingHandle) {
        self.items
            .retain(|i| !matches!(i, ChatItem::Pending(h) if *h == handle));
    }

    fn show_error(&mut self, banner: &ErrorBanner) {
        self.items.push(ChatItem::Error {
            id: banner.id,
            message: banner.message.clone(),
            retry: banner.retry.is_some(),
        });
    }

    fn remove_error(&mut self, id: BannerId) {
        self.items
            .retain(|i| !matches!(i, ChatItem::Error { id: other, .. } if *other == id));
    }

    fn show_notice(&mut self, message: &str) {
        // Only the latest validation notice is kept
        self.items.retain(|i| !matches!(i, ChatItem::Notice(_)));
        self.items.push(ChatItem::Notice(message.to_string()));
    }

    fn clear_all(&mut self) {
        self.items.clear();
    }

    fn set_welcome_visible(&mut self, visible: bool) {
        self.welcome_visible = visible;
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
    }

    fn scroll_to_bottom(&mut self) {
        self.follow_bottom = true;
    }

    fn show_code_output(&mut self, output: &CodeOutput) {
        let at = self
            .items
            .iter()
            .position(|i| matches!(i, ChatItem::Message { index, .. } if *index == output.turn_index))
            .map(|pos| pos + 1)
            .unwrap_or(self.items.len());
        // Replace a previous run of the same block
        self.items.retain(|i| {
            !matches!(i, ChatItem::Output(o)
                if o.turn_index == output.turn_index && o.block_index == output.block_index)
        });
        let at = at.min(self.items.len());
        self.items.insert(at, ChatItem::Output(output.clone()));
    }

    fn set_route(&mut self, route: &str) {
        self.route = route.to_string();
    }

    fn render_sessions(&mut self, sessions: &[SessionSummary], active: Option<i64>) {
        self.sessions = sessions.to_vec();
        self.active_session = active;
    }

    fn close_navigation(&mut self) {
        self.sidebar_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{RenderPipeline, Turn};

    #[test]
    fn test_assistant_text_has_reasoning_stripped() {
        let mut pipeline = RenderPipeline::new(TerminalView::new());
        pipeline.show_turn(&Turn::assistant(
            "<reasoning>think first</reasoning>Here is **the** answer",
        ));

        match &pipeline.view().items[0] {
            ChatItem::Message { text, .. } => {
                assert!(!text.contains("think first"));
                assert!(text.contains("**the** answer"));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_notice_replaces_previous_notice() {
        let mut view = TerminalView::new();
        view.show_notice("one");
        view.show_notice("two");
        assert_eq!(view.items.len(), 1);
        assert!(matches!(&view.items[0], ChatItem::Notice(m) if m == "two"));
    }

    #[test]
    fn test_rerun_replaces_output() {
        let mut pipeline = RenderPipeline::new(TerminalView::new());
        pipeline.show_turn(&Turn::assistant("```python\nprint(1)\n```"));
        for text in ["1", "2"] {
            pipeline.show_code_output(&CodeOutput {
                turn_index: 0,
                block_index: 0,
                success: true,
                text: text.to_string(),
            });
        }

        let outputs: Vec<_> = pipeline
            .view()
            .items
            .iter()
            .filter_map(|i| match i {
                ChatItem::Output(o) => Some(o.text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(outputs, vec!["2"]);
    }
}
