//! A [`View`] that keeps an element list and serializes it to HTML.
//!
//! Used to export conversations and as the display surface in tests.

use crate::formatter::escape_html;
use crate::state::{Role, SessionSummary, Turn};

use super::{BannerId, CodeOutput, ErrorBanner, PendingHandle, RenderPipeline, RenderedTurn, View};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlNode {
    Message { index: usize, role: Role, html: String },
    Pending(PendingHandle),
    Error { id: BannerId, message: String, retry: bool },
    Notice(String),
    CodeOutput(CodeOutput),
}

#[derive(Debug, Clone)]
pub struct HtmlView {
    nodes: Vec<HtmlNode>,
    welcome_visible: bool,
    input_enabled: bool,
    route: String,
    sessions: Vec<SessionSummary>,
    active_session: Option<i64>,
    navigation_open: bool,
}

impl Default for HtmlView {
    fn default() -> Self {
        Self::new()
    }
}

impl HtmlView {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            welcome_visible: true,
            input_enabled: true,
            route: "/chat".to_string(),
            sessions: Vec::new(),
            active_session: None,
            navigation_open: false,
        }
    }

    pub fn nodes(&self) -> &[HtmlNode] {
        &self.nodes
    }

    pub fn welcome_visible(&self) -> bool {
        self.welcome_visible
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn active_session(&self) -> Option<i64> {
        self.active_session
    }

    pub fn open_navigation(&mut self) {
        self.navigation_open = true;
    }

    pub fn navigation_open(&self) -> bool {
        self.navigation_open
    }

    /// The message list as an HTML fragment.
    pub fn body_html(&self) -> String {
        let mut out = String::new();
        if self.welcome_visible {
            out.push_str("<div class=\"welcome-screen\"><h1>How can I help you today?</h1></div>\n");
        }
        for node in &self.nodes {
            match node {
                HtmlNode::Message { role, html, .. } => {
                    out.push_str(&format!(
                        "<div class=\"message {}-message\">\n<div class=\"message-header\">\n\
                         <div class=\"message-avatar\">{}</div>\n\
                         <div class=\"message-name\">{}</div>\n</div>\n\
                         <div class=\"message-content\">{}</div>\n</div>\n",
                        role.as_str(),
                        role.avatar(),
                        role.display_name(),
                        html
                    ));
                }
                HtmlNode::Pending(_) => {
                    out.push_str(
                        "<div class=\"message assistant-message loading\">\
                         <div class=\"loading-dot\"></div><div class=\"loading-dot\"></div>\
                         <div class=\"loading-dot\"></div></div>\n",
                    );
                }
                HtmlNode::Error { message, retry, .. } => {
                    out.push_str(&format!(
                        "<div class=\"error-message\">\n<div class=\"error-text\">{}</div>\n\
                         <div class=\"error-actions\">\
                         <button class=\"error-btn\" data-action=\"dismiss\">Dismiss</button>",
                        escape_html(message)
                    ));
                    if *retry {
                        out.push_str(
                            "<button class=\"error-btn retry-btn\" data-action=\"retry\">Retry</button>",
                        );
                    }
                    out.push_str("</div>\n</div>\n");
                }
                HtmlNode::Notice(message) => {
                    out.push_str(&format!(
                        "<div class=\"error-message notice\">{}</div>\n",
                        escape_html(message)
                    ));
                }
                HtmlNode::CodeOutput(output) => {
                    let (class, title) = if output.success {
                        ("success", "Execution Successful")
                    } else {
                        ("error", "Execution Failed")
                    };
                    out.push_str(&format!(
                        "<div class=\"code-output\" data-block=\"{}\">\n\
                         <div class=\"output-header {class}\">{title}</div>\n\
                         <pre class=\"output-content {class}\">{}</pre>\n</div>\n",
                        output.block_index,
                        escape_html(&output.text)
                    ));
                }
            }
        }
        out
    }

    /// Standalone HTML page.
    pub fn to_document(&self, title: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>{}</title>\n</head>\n<body>\n<div class=\"messages\">\n{}</div>\n</body>\n</html>\n",
            escape_html(title),
            self.body_html()
        )
    }
}

impl View for HtmlView {
    fn render_turn(&mut self, turn: &RenderedTurn) {
        self.nodes.push(HtmlNode::Message {
            index: turn.index,
            role: turn.role,
            html: turn.formatted.html.clone(),
        });
    }

    fn remove_turn(&mut self, index: usize) {
        self.nodes.retain(|n| match n {
            HtmlNode::Message { index: i, .. } => *i != index,
            HtmlNode::CodeOutput(o) => o.turn_index != index,
            _ => true,
        });
    }

    fn show_pending(&mut self, handle: PendingHandle) {
        self.nodes.push(HtmlNode::Pending(handle));
    }

    fn remove_pending(&mut self, handle: PendingHandle) {
        self.nodes
            .retain(|n| !matches!(n, HtmlNode::Pending(h) if *h == handle));
    }

    fn show_error(&mut self, banner: &ErrorBanner) {
        self.nodes.push(HtmlNode::Error {
            id: banner.id,
            message: banner.message.clone(),
            retry: banner.retry.is_some(),
        });
    }

    fn remove_error(&mut self, id: BannerId) {
        self.nodes
            .retain(|n| !matches!(n, HtmlNode::Error { id: other, .. } if *other == id));
    }

    fn show_notice(&mut self, message: &str) {
        self.nodes.push(HtmlNode::Notice(message.to_string()));
    }

    fn clear_all(&mut self) {
        self.nodes.clear();
    }

    fn set_welcome_visible(&mut self, visible: bool) {
        self.welcome_visible = visible;
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
    }

    fn scroll_to_bottom(&mut self) {}

    fn show_code_output(&mut self, output: &CodeOutput) {
        // Directly after the owning message and any earlier outputs for it.
        let message_pos = self.nodes.iter().position(
            |n| matches!(n, HtmlNode::Message { index, .. } if *index == output.turn_index),
        );
        let insert_at = match message_pos {
            Some(pos) => {
                let mut at = pos + 1;
                while matches!(
                    self.nodes.get(at),
                    Some(HtmlNode::CodeOutput(o)) if o.turn_index == output.turn_index
                ) {
                    at += 1;
                }
                at
            }
            None => self.nodes.len(),
        };
        self.nodes.insert(insert_at, HtmlNode::CodeOutput(output.clone()));
    }

    fn set_route(&mut self, route: &str) {
        self.route = route.to_string();
    }

    fn render_sessions(&mut self, sessions: &[SessionSummary], active: Option<i64>) {
        self.sessions = sessions.to_vec();
        self.active_session = active;
    }

    fn close_navigation(&mut self) {
        self.navigation_open = false;
    }
}

/// Render a conversation as a standalone HTML page.
pub fn export_html(turns: &[Turn], title: &str) -> String {
    let mut pipeline = RenderPipeline::new(HtmlView::new());
    for turn in turns {
        pipeline.show_turn(turn);
    }
    pipeline.view().to_document(title)
}

/// Render a conversation as plain text.
pub fn export_text(turns: &[Turn], title: &str) -> String {
    let mut out = format!("{}\n{}\n\n", title, "=".repeat(30));
    for turn in turns {
        let who = match turn.role {
            Role::User => "User",
            Role::Assistant => "AI Assistant",
        };
        out.push_str(&format!("{}:\n{}\n\n", who, turn.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_html_contains_both_roles() {
        let doc = export_html(
            &[Turn::user("Hello"), Turn::assistant("**Hi** there")],
            "Chat <1>",
        );
        assert!(doc.contains("<title>Chat &lt;1&gt;</title>"));
        assert!(doc.contains("message user-message"));
        assert!(doc.contains("message assistant-message"));
        assert!(doc.contains("<strong>Hi</strong>"));
        assert!(!doc.contains("welcome-screen"));
    }

    #[test]
    fn test_export_empty_shows_welcome() {
        let doc = export_html(&[], "Chat");
        assert!(doc.contains("welcome-screen"));
    }

    #[test]
    fn test_export_text_layout() {
        let text = export_text(&[Turn::user("q"), Turn::assistant("a")], "Parley Conversation");
        assert_eq!(
            text,
            "Parley Conversation\n==============================\n\nUser:\nq\n\nAI Assistant:\na\n\n"
        );
    }

    #[test]
    fn test_code_output_lands_beneath_its_message() {
        let mut pipeline = RenderPipeline::new(HtmlView::new());
        pipeline.show_turn(&Turn::assistant("```python\nprint(1)\n```"));
        pipeline.show_turn(&Turn::user("next"));
        pipeline.show_code_output(&CodeOutput {
            turn_index: 0,
            block_index: 0,
            success: true,
            text: "1\n<ok>".to_string(),
        });

        let view = pipeline.view();
        assert!(matches!(view.nodes()[1], HtmlNode::CodeOutput(_)));
        let body = view.body_html();
        assert!(body.contains("Execution Successful"));
        assert!(body.contains("1\n&lt;ok&gt;"));
    }

    #[test]
    fn test_error_banner_markup_has_no_inline_handlers() {
        let mut pipeline = RenderPipeline::new(HtmlView::new());
        pipeline.show_failure("<bad>", Some("Hello".into()), std::time::Instant::now());
        let body = pipeline.view().body_html();
        assert!(body.contains("&lt;bad&gt;"));
        assert!(body.contains("data-action=\"retry\""));
        assert!(!body.contains("onclick"));
    }
}
