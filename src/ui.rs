use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use parley_core::formatter::CodeBlock;
use parley_core::Role;

use crate::app::{App, Focus, EXAMPLE_PROMPTS};
use crate::view::ChatItem;

const SIDEBAR_WIDTH: u16 = 32;

/// Parse a line of text and convert **bold** and `inline code` markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let next = [rest.find("**"), rest.find('`')]
            .into_iter()
            .flatten()
            .min();
        let Some(start) = next else {
            spans.push(Span::raw(rest.to_string()));
            break;
        };

        let (marker, style) = if rest[start..].starts_with("**") {
            ("**", Style::default().add_modifier(Modifier::BOLD))
        } else {
            ("`", Style::default().fg(Color::Magenta))
        };
        let body_start = start + marker.len();

        match rest[body_start..].find(marker) {
            Some(len) if len > 0 => {
                if start > 0 {
                    spans.push(Span::raw(rest[..start].to_string()));
                }
                spans.push(Span::styled(
                    rest[body_start..body_start + len].to_string(),
                    style,
                ));
                rest = &rest[body_start + len + marker.len()..];
            }
            _ => {
                // No closing marker, treat as literal
                spans.push(Span::raw(rest[..body_start].to_string()));
                rest = &rest[body_start..];
            }
        }
    }

    Line::from(spans)
}

/// Message body lines. Fenced code is framed and labelled with its block number.
fn message_lines(text: &str, code_blocks: &[CodeBlock]) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut block_index = 0;
    let mut in_fence = false;
    let code_style = Style::default().fg(Color::Cyan);
    let frame_style = Style::default().fg(Color::DarkGray);

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            if in_fence {
                lines.push(Line::from(Span::styled("└────", frame_style)));
                block_index += 1;
            } else {
                let label = match code_blocks.get(block_index) {
                    Some(block) if block.is_runnable() => {
                        format!("┌ {} [{}] Ctrl+Y copy, Ctrl+R run", block.language, block_index + 1)
                    }
                    Some(block) => format!("┌ {} [{}] Ctrl+Y copy", block.language, block_index + 1),
                    None => "┌".to_string(),
                };
                lines.push(Line::from(Span::styled(label, frame_style)));
            }
            in_fence = !in_fence;
        } else if in_fence {
            lines.push(Line::from(vec![
                Span::styled("│ ", frame_style),
                Span::styled(line.to_string(), code_style),
            ]));
        } else {
            lines.push(parse_markdown_line(line));
        }
    }

    lines
}

fn role_line(role: Role) -> Line<'static> {
    let color = match role {
        Role::User => Color::Cyan,
        Role::Assistant => Color::Yellow,
    };
    Line::from(vec![
        Span::styled(
            format!("[{}] ", role.avatar()),
            Style::default().fg(Color::Black).bg(color),
        ),
        Span::styled(
            role.display_name(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
    ])
}

fn chat_lines(app: &App) -> Vec<Line<'static>> {
    let view = app.view();
    let mut lines: Vec<Line<'static>> = Vec::new();

    if view.welcome_visible {
        lines.push(Line::default());
        lines.push(Line::from(Span::styled(
            "How can I help you today?",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::default());
        for (i, prompt) in EXAMPLE_PROMPTS.iter().enumerate() {
            lines.push(Line::from(vec![
                Span::styled(format!("  {} ", i + 1), Style::default().fg(Color::Cyan).bold()),
                Span::styled(prompt.to_string(), Style::default().fg(Color::DarkGray)),
            ]));
        }
        lines.push(Line::default());
    }

    for item in &view.items {
        match item {
            ChatItem::Message {
                role,
                text,
                code_blocks,
                ..
            } => {
                lines.push(role_line(*role));
                match role {
                    Role::User => lines.extend(text.lines().map(|l| Line::from(l.to_string()))),
                    Role::Assistant => lines.extend(message_lines(text, code_blocks)),
                }
                lines.push(Line::default());
            }
            ChatItem::Pending(_) => {
                lines.push(role_line(Role::Assistant));
                // Animated ellipsis: cycles through ".", "..", "..."
                let dots = ".".repeat((app.animation_frame as usize) + 1);
                lines.push(Line::from(Span::styled(
                    format!("Thinking{}", dots),
                    Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
                )));
                lines.push(Line::default());
            }
            ChatItem::Error { message, retry, .. } => {
                let mut spans = vec![Span::styled(
                    format!("⚠ {} ", message),
                    Style::default().fg(Color::White).bg(Color::Red),
                )];
                if *retry {
                    spans.push(Span::styled(" Ctrl+T retry", Style::default().fg(Color::Red)));
                }
                spans.push(Span::styled(" Ctrl+D dismiss", Style::default().fg(Color::DarkGray)));
                lines.push(Line::from(spans));
                lines.push(Line::default());
            }
            ChatItem::Notice(message) => {
                lines.push(Line::from(Span::styled(
                    message.clone(),
                    Style::default().fg(Color::Yellow),
                )));
                lines.push(Line::default());
            }
            ChatItem::Output(output) => {
                let (title, color) = if output.success {
                    ("Execution Successful", Color::Green)
                } else {
                    ("Execution Failed", Color::Red)
                };
                lines.push(Line::from(Span::styled(
                    format!("▸ {} [{}]", title, output.block_index + 1),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                )));
                lines.extend(output.text.lines().map(|l| {
                    Line::from(Span::styled(l.to_string(), Style::default().fg(color)))
                }));
                lines.push(Line::default());
            }
        }
    }

    lines
}

/// Rows the lines occupy once wrapped to `width`.
fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    let width = width.max(1) as usize;
    lines
        .iter()
        .map(|line| {
            let chars = line.width();
            if chars == 0 { 1 } else { chars.div_ceil(width) }
        })
        .sum::<usize>()
        .min(u16::MAX as usize) as u16
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let input_rows = (app.input.lines().count().max(1) as u16).min(6);
    let [header_area, body_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(input_rows + 2),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let chat_area = if app.view().sidebar_open {
        let [sidebar_area, chat_area] = Layout::horizontal([
            Constraint::Length(SIDEBAR_WIDTH.min(body_area.width / 2)),
            Constraint::Min(0),
        ])
        .areas(body_area);
        render_sidebar(app, frame, sidebar_area);
        chat_area
    } else {
        body_area
    };

    render_chat(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.confirm.is_some() {
        render_confirm(app, frame, area);
    } else if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let state = app.controller.state();
    let user = state
        .user
        .as_ref()
        .map(|u| format!(" {} ", u.username))
        .unwrap_or_default();

    let title = Line::from(vec![
        Span::styled(" parley ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(app.view().route.clone(), Style::default().fg(Color::White)),
        Span::raw("  "),
        Span::styled(state.model.clone(), Style::default().fg(Color::Magenta)),
        Span::styled(user, Style::default().fg(Color::Green)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_sidebar(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == Focus::Sidebar;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Conversations ");

    let view = app.controller.view();
    if view.sessions.is_empty() {
        let empty = Paragraph::new(Span::styled(
            "No saved conversations",
            Style::default().fg(Color::DarkGray),
        ))
        .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let items: Vec<ListItem> = view
        .sessions
        .iter()
        .map(|session| {
            let title = if session.title.is_empty() {
                "New conversation"
            } else {
                session.title.as_str()
            };
            let style = if Some(session.id) == view.active_session {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", title)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.sidebar_state);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.focus == Focus::Input {
            Color::Cyan
        } else {
            Color::DarkGray
        }));

    let lines = chat_lines(app);
    let inner = block.inner(area);
    app.chat_height = inner.height;
    app.chat_lines = wrapped_height(&lines, inner.width);

    let view = app.controller.view_mut();
    if view.follow_bottom {
        view.follow_bottom = false;
        app.chat_scroll = app.max_scroll();
    }
    app.chat_scroll = app.chat_scroll.min(app.max_scroll());

    let chat = Paragraph::new(Text::from(lines))
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let enabled = app.view().input_enabled;
    let border_color = if !enabled {
        Color::DarkGray
    } else if app.focus == Focus::Input {
        Color::Yellow
    } else {
        Color::White
    };

    let title = if enabled {
        " Message (Enter send, Alt+Enter newline) "
    } else {
        " Waiting for reply... "
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    let count = app.input.chars().count();
    let counter = Line::from(Span::styled(
        format!(" {}/{} ", count, parley_core::error::MAX_MESSAGE_CHARS),
        Style::default().fg(if count > parley_core::error::MAX_MESSAGE_CHARS {
            Color::Red
        } else {
            Color::DarkGray
        }),
    ))
    .right_aligned();
    let block = block.title_bottom(counter);

    let inner = block.inner(area);
    let input = Paragraph::new(app.input.as_str()).block(block);
    frame.render_widget(input, area);

    if enabled && app.focus == Focus::Input && app.confirm.is_none() && !app.show_model_picker {
        // Cursor row/column within the (possibly multi-line) input
        let before: String = app.input.chars().take(app.input_cursor).collect();
        let row = before.matches('\n').count() as u16;
        let col = before.rsplit('\n').next().map(|l| l.chars().count()).unwrap_or(0) as u16;
        let y = inner.y + row.min(inner.height.saturating_sub(1));
        let x = inner.x + col.min(inner.width.saturating_sub(1));
        frame.set_cursor_position((x, y));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let hint_style = Style::default().fg(Color::DarkGray);

    let line = match &app.status {
        Some((message, _)) => Line::from(Span::styled(
            format!(" {} ", message),
            Style::default().fg(Color::Black).bg(Color::Green),
        )),
        None => {
            let loading = if app.view().is_pending() {
                Span::styled(" sending ", Style::default().bg(Color::Yellow).fg(Color::Black))
            } else {
                Span::styled(" ready ", Style::default().bg(Color::Blue).fg(Color::White))
            };
            Line::from(vec![
                loading,
                Span::styled(
                    " ^N new  ^B sidebar  Tab focus  ^O model  ^Y copy  ^E copy reply  ^R run  ^T retry  ^C quit",
                    hint_style,
                ),
            ])
        }
    };

    frame.render_widget(Paragraph::new(line), area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height.saturating_sub(4));
    let x = (area.width.saturating_sub(width)) / 2;
    let y = (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_confirm(app: &App, frame: &mut Frame, area: Rect) {
    let Some(confirm) = app.confirm else {
        return;
    };

    let popup_area = centered(area, 60, 5);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Confirm ");

    let text = Text::from(vec![
        Line::from(confirm.prompt()),
        Line::default(),
        Line::from(Span::styled("y: yes   n: no", Style::default().fg(Color::DarkGray))),
    ]);
    frame.render_widget(Paragraph::new(text).block(block).wrap(Wrap { trim: true }), popup_area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let models = app.filtered_models();
    let popup_area = centered(area, 60, models.len() as u16 + 4);
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model (type to filter, Enter to select, Esc to cancel) ");
    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let [filter_area, list_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(inner);

    let filter = Paragraph::new(Line::from(vec![
        Span::styled("Search: ", Style::default().fg(Color::DarkGray)),
        Span::raw(app.model_filter.clone()),
    ]));
    frame.render_widget(filter, filter_area);

    let current = app.controller.state().model.as_str();
    let items: Vec<ListItem> = if models.is_empty() {
        vec![ListItem::new(Span::styled(
            " No models found ",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        models
            .iter()
            .map(|model| {
                let style = if model.id == current {
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
                } else {
                    Style::default()
                };
                ListItem::new(Line::from(vec![
                    Span::styled(format!(" {} ", model.name), style),
                    Span::styled(model.provider.clone(), Style::default().fg(Color::DarkGray)),
                ]))
            })
            .collect()
    };

    let list = List::new(items)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    let mut state = app.model_picker_state.clone();
    frame.render_stateful_widget(list, list_area, &mut state);
    app.model_picker_state = state;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_parse_markdown_line_styles_bold_and_code() {
        let line = parse_markdown_line("use **this** or `that`");
        assert_eq!(plain(&line), "use this or that");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style.fg, Some(Color::Magenta));
    }

    #[test]
    fn test_parse_markdown_line_keeps_unclosed_markers() {
        assert_eq!(plain(&parse_markdown_line("2 ** 3")), "2 ** 3");
        assert_eq!(plain(&parse_markdown_line("a `b")), "a `b");
    }

    #[test]
    fn test_message_lines_frame_code_blocks() {
        let blocks = vec![CodeBlock {
            language: "python".to_string(),
            code: "print(1)".to_string(),
        }];
        let lines = message_lines("Run this:\n```python\nprint(1)\n```", &blocks);
        let text: Vec<String> = lines.iter().map(plain).collect();
        assert_eq!(text[0], "Run this:");
        assert!(text[1].contains("python [1]"));
        assert!(text[1].contains("Ctrl+R"));
        assert_eq!(text[2], "│ print(1)");
        assert!(text[3].starts_with('└'));
    }

    #[test]
    fn test_wrapped_height() {
        let lines = vec![Line::from("abcdef"), Line::default()];
        assert_eq!(wrapped_height(&lines, 4), 3);
    }
}
