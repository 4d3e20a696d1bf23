//! Render pipeline: turns conversation mutations into calls on a [`View`].
//!
//! The pipeline owns the transient display state that is not part of the
//! conversation: the loading placeholder, error banners and their expiry, and
//! whether the welcome placeholder is showing.

pub mod html;

use std::time::{Duration, Instant};

use crate::formatter::{escape_html, format_message, CodeBlock, FormattedMessage};
use crate::state::{Role, SessionSummary, Turn};

/// How long an error banner stays up unless dismissed.
pub const ERROR_BANNER_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BannerId(u64);

/// A turn ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTurn {
    /// Position in the conversation.
    pub index: usize,
    pub role: Role,
    /// Unformatted message text.
    pub content: String,
    pub formatted: FormattedMessage,
}

impl RenderedTurn {
    pub fn new(index: usize, turn: &Turn) -> Self {
        let formatted = match turn.role {
            Role::Assistant => format_message(&turn.content),
            Role::User => FormattedMessage {
                html: format!(
                    "<p>{}</p>",
                    escape_html(&turn.content).replace('\n', "<br />\n")
                ),
                code_blocks: Vec::new(),
            },
        };

        Self {
            index,
            role: turn.role,
            content: turn.content.clone(),
            formatted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub id: BannerId,
    pub message: String,
    /// Message text to resend when the retry action fires.
    pub retry: Option<String>,
    pub expires_at: Instant,
}

/// Result of running a code block, shown beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeOutput {
    pub turn_index: usize,
    pub block_index: usize,
    pub success: bool,
    pub text: String,
}

/// Display surface the pipeline drives.
pub trait View {
    fn render_turn(&mut self, turn: &RenderedTurn);
    /// Remove a rendered turn and any code output beneath it.
    fn remove_turn(&mut self, index: usize);
    fn show_pending(&mut self, handle: PendingHandle);
    fn remove_pending(&mut self, handle: PendingHandle);
    fn show_error(&mut self, banner: &ErrorBanner);
    fn remove_error(&mut self, id: BannerId);
    /// Inline, non-dismissable message (e.g. validation).
    fn show_notice(&mut self, message: &str);
    /// Remove every rendered element.
    fn clear_all(&mut self);
    fn set_welcome_visible(&mut self, visible: bool);
    fn set_input_enabled(&mut self, enabled: bool);
    fn scroll_to_bottom(&mut self);
    fn show_code_output(&mut self, output: &CodeOutput);

    fn set_route(&mut self, _route: &str) {}

    fn render_sessions(&mut self, _sessions: &[SessionSummary], _active: Option<i64>) {}

    fn close_navigation(&mut self) {}
}

pub struct RenderPipeline<V: View> {
    view: V,
    rendered: Vec<RenderedTurn>,
    pending: Option<PendingHandle>,
    banners: Vec<ErrorBanner>,
    welcome_visible: bool,
    next_id: u64,
}

impl<V: View> RenderPipeline<V> {
    pub fn new(mut view: V) -> Self {
        view.set_welcome_visible(true);
        Self {
            view,
            rendered: Vec::new(),
            pending: None,
            banners: Vec::new(),
            welcome_visible: true,
            next_id: 0,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn into_view(self) -> V {
        self.view
    }

    pub fn rendered(&self) -> &[RenderedTurn] {
        &self.rendered
    }

    pub fn banners(&self) -> &[ErrorBanner] {
        &self.banners
    }

    pub fn pending(&self) -> Option<PendingHandle> {
        self.pending
    }

    pub fn welcome_visible(&self) -> bool {
        self.welcome_visible
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn hide_welcome(&mut self) {
        if self.welcome_visible {
            self.welcome_visible = false;
            self.view.set_welcome_visible(false);
        }
    }

    pub fn show_turn(&mut self, turn: &Turn) {
        self.hide_welcome();
        let rendered = RenderedTurn::new(self.rendered.len(), turn);
        self.view.render_turn(&rendered);
        self.view.scroll_to_bottom();
        self.rendered.push(rendered);
    }

    /// Remove the most recently rendered turn from the display. Everything
    /// else on screen is left in place.
    pub fn unshow_last_turn(&mut self) {
        let Some(turn) = self.rendered.pop() else {
            return;
        };
        self.view.remove_turn(turn.index);
        if self.rendered.is_empty() {
            self.welcome_visible = true;
            self.view.set_welcome_visible(true);
        }
        self.view.scroll_to_bottom();
    }

    pub fn show_pending(&mut self) -> PendingHandle {
        if let Some(existing) = self.pending.take() {
            self.view.remove_pending(existing);
        }
        let handle = PendingHandle(self.next_id());
        self.pending = Some(handle);
        self.view.show_pending(handle);
        self.view.scroll_to_bottom();
        handle
    }

    pub fn clear_pending(&mut self, handle: PendingHandle) {
        if self.pending == Some(handle) {
            self.pending = None;
        }
        self.view.remove_pending(handle);
    }

    /// Show a dismissable banner that expires after [`ERROR_BANNER_TTL`].
    pub fn show_failure(&mut self, message: &str, retry: Option<String>, now: Instant) -> BannerId {
        let banner = ErrorBanner {
            id: BannerId(self.next_id()),
            message: message.to_string(),
            retry,
            expires_at: now + ERROR_BANNER_TTL,
        };
        self.view.show_error(&banner);
        self.view.scroll_to_bottom();
        let id = banner.id;
        self.banners.push(banner);
        id
    }

    pub fn dismiss(&mut self, id: BannerId) -> bool {
        let before = self.banners.len();
        self.banners.retain(|b| b.id != id);
        let removed = self.banners.len() != before;
        if removed {
            self.view.remove_error(id);
        }
        removed
    }

    /// Drop banners whose time is up. Returns how many were removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired: Vec<BannerId> = self
            .banners
            .iter()
            .filter(|b| b.expires_at <= now)
            .map(|b| b.id)
            .collect();
        for id in &expired {
            self.dismiss(*id);
        }
        expired.len()
    }

    pub fn show_notice(&mut self, message: &str) {
        self.view.show_notice(message);
        self.view.scroll_to_bottom();
    }

    pub fn show_code_output(&mut self, output: &CodeOutput) {
        self.view.show_code_output(output);
    }

    /// Remove everything and bring back the welcome placeholder.
    pub fn clear(&mut self) {
        self.rendered.clear();
        self.banners.clear();
        self.pending = None;
        self.view.clear_all();
        self.welcome_visible = true;
        self.view.set_welcome_visible(true);
    }

    pub fn code_block(&self, turn_index: usize, block_index: usize) -> Option<&CodeBlock> {
        self.rendered
            .get(turn_index)
            .and_then(|t| t.formatted.code_blocks.get(block_index))
    }

    /// Most recent code block, optionally only runnable ones, as
    /// `(turn_index, block_index, block)`.
    pub fn last_code_block(&self, runnable_only: bool) -> Option<(usize, usize, &CodeBlock)> {
        self.rendered.iter().rev().find_map(|turn| {
            turn.formatted
                .code_blocks
                .iter()
                .enumerate()
                .rev()
                .find(|(_, block)| !runnable_only || block.is_runnable())
                .map(|(i, block)| (turn.index, i, block))
        })
    }

    pub fn set_input_enabled(&mut self, enabled: bool) {
        self.view.set_input_enabled(enabled);
    }

    pub fn set_route(&mut self, route: &str) {
        self.view.set_route(route);
    }

    pub fn render_sessions(&mut self, sessions: &[SessionSummary], active: Option<i64>) {
        self.view.render_sessions(sessions, active);
    }

    pub fn close_navigation(&mut self) {
        self.view.close_navigation();
    }
}

#[cfg(test)]
mod tests {
    use super::html::{HtmlNode, HtmlView};
    use super::*;

    fn pipeline() -> RenderPipeline<HtmlView> {
        RenderPipeline::new(HtmlView::new())
    }

    #[test]
    fn test_first_turn_hides_welcome_and_clear_restores_it() {
        let mut p = pipeline();
        assert!(p.view().welcome_visible());

        p.show_turn(&Turn::user("Hello"));
        assert!(!p.view().welcome_visible());
        assert_eq!(p.view().nodes().len(), 1);

        p.clear();
        assert!(p.view().welcome_visible());
        assert!(p.view().nodes().is_empty());
        assert!(p.rendered().is_empty());
    }

    #[test]
    fn test_user_turns_are_escaped() {
        let mut p = pipeline();
        p.show_turn(&Turn::user("<b>hi</b>\nthere"));
        assert_eq!(
            p.rendered()[0].formatted.html,
            "<p>&lt;b&gt;hi&lt;/b&gt;<br />\nthere</p>"
        );
    }

    #[test]
    fn test_pending_is_distinct_from_turns() {
        let mut p = pipeline();
        p.show_turn(&Turn::user("Hello"));
        let handle = p.show_pending();

        assert!(matches!(p.view().nodes().last(), Some(HtmlNode::Pending(h)) if *h == handle));
        assert_eq!(p.rendered().len(), 1);

        p.clear_pending(handle);
        assert_eq!(p.view().nodes().len(), 1);
        assert_eq!(p.pending(), None);
    }

    #[test]
    fn test_banners_expire_after_ttl() {
        let mut p = pipeline();
        let now = Instant::now();
        p.show_failure("first", None, now);
        p.show_failure("second", Some("Hello".into()), now + Duration::from_secs(5));

        assert_eq!(p.expire(now + Duration::from_secs(9)), 0);
        assert_eq!(p.expire(now + ERROR_BANNER_TTL), 1);
        assert_eq!(p.banners().len(), 1);
        assert_eq!(p.banners()[0].retry.as_deref(), Some("Hello"));
        assert_eq!(p.expire(now + Duration::from_secs(15)), 1);
        assert!(p.banners().is_empty());
    }

    #[test]
    fn test_dismiss_removes_banner_once() {
        let mut p = pipeline();
        let id = p.show_failure("oops", None, Instant::now());
        assert!(p.dismiss(id));
        assert!(!p.dismiss(id));
        assert!(p.view().nodes().is_empty());
    }

    #[test]
    fn test_unshow_last_turn_keeps_earlier_turns() {
        let mut p = pipeline();
        p.show_turn(&Turn::user("a"));
        p.show_turn(&Turn::assistant("b"));
        p.show_turn(&Turn::user("c"));

        p.unshow_last_turn();
        assert_eq!(p.rendered().len(), 2);
        assert_eq!(p.view().nodes().len(), 2);

        p.unshow_last_turn();
        p.unshow_last_turn();
        assert!(p.view().welcome_visible());
    }

    #[test]
    fn test_unshow_last_turn_leaves_outputs_and_notices() {
        let mut p = pipeline();
        p.show_turn(&Turn::assistant("```python\nprint(1)\n```"));
        p.show_code_output(&CodeOutput {
            turn_index: 0,
            block_index: 0,
            success: true,
            text: "1\n".to_string(),
        });
        p.show_notice("Please enter a message");
        p.show_turn(&Turn::user("next"));

        p.unshow_last_turn();

        let nodes = p.view().nodes();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(nodes[1], HtmlNode::CodeOutput(_)));
        assert!(matches!(nodes[2], HtmlNode::Notice(_)));
    }

    #[test]
    fn test_last_code_block_prefers_latest_runnable() {
        let mut p = pipeline();
        p.show_turn(&Turn::assistant("```python\nprint(1)\n```"));
        p.show_turn(&Turn::assistant("```python\nprint(2)\n```\n\n```rust\nfn x() {}\n```"));

        let (turn, block, code) = p.last_code_block(false).unwrap();
        assert_eq!((turn, block, code.language.as_str()), (1, 1, "rust"));

        let (turn, block, code) = p.last_code_block(true).unwrap();
        assert_eq!((turn, block, code.code.as_str()), (1, 0, "print(2)"));
    }
}
