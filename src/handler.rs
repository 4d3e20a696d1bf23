use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};

use crate::app::{App, Confirm, Focus};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key).await?,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(_, _) => {}
        AppEvent::Tick => app.tick().await,
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent) -> Result<()> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    // Global keys that work in any mode
    if ctrl && key.code == KeyCode::Char('c') {
        app.should_quit = true;
        return Ok(());
    }

    if app.confirm.is_some() {
        handle_confirm(app, key).await;
        return Ok(());
    }

    if app.show_model_picker {
        handle_model_picker(app, key);
        return Ok(());
    }

    if ctrl {
        match key.code {
            KeyCode::Char('n') | KeyCode::Char('k') => app.request_new_chat(),
            KeyCode::Char('b') => app.toggle_sidebar(),
            KeyCode::Char('o') => app.open_model_picker().await,
            KeyCode::Char('y') => app.copy_last_code(),
            KeyCode::Char('e') => app.copy_last_reply(),
            KeyCode::Char('r') => app.run_last_code().await,
            KeyCode::Char('d') => app.dismiss_error(),
            KeyCode::Char('t') => app.retry().await,
            _ => {}
        }
        return Ok(());
    }

    match key.code {
        KeyCode::PageUp => app.scroll_page_up(),
        KeyCode::PageDown => app.scroll_page_down(),
        KeyCode::Tab => {
            app.focus = match app.focus {
                Focus::Input => {
                    if !app.view().sidebar_open {
                        app.toggle_sidebar();
                    }
                    if app.sidebar_state.selected().is_none() && !app.view().sessions.is_empty() {
                        app.sidebar_state.select(Some(0));
                    }
                    Focus::Sidebar
                }
                Focus::Sidebar => Focus::Input,
            };
        }
        _ => match app.focus {
            Focus::Sidebar => handle_sidebar(app, key).await,
            Focus::Input => handle_input(app, key),
        },
    }

    Ok(())
}

async fn handle_confirm(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => app.answer_confirm(true).await,
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.answer_confirm(false).await,
        _ => {}
    }
}

fn handle_model_picker(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.show_model_picker = false,
        KeyCode::Down => app.model_picker_down(),
        KeyCode::Up => app.model_picker_up(),
        KeyCode::Enter => app.select_model(),
        KeyCode::Backspace => {
            app.model_filter.pop();
            app.model_picker_state.select(Some(0));
        }
        KeyCode::Char(c) => {
            app.model_filter.push(c);
            app.model_picker_state.select(Some(0));
        }
        _ => {}
    }
}

async fn handle_sidebar(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.sidebar_down(),
        KeyCode::Char('k') | KeyCode::Up => app.sidebar_up(),
        KeyCode::Enter => app.open_selected_session().await,
        KeyCode::Char('d') | KeyCode::Delete => {
            if let Some(id) = app.selected_session() {
                app.confirm = Some(Confirm::DeleteSession(id));
            }
        }
        KeyCode::Esc => {
            app.focus = Focus::Input;
            app.controller.view_mut().sidebar_open = false;
        }
        _ => {}
    }
}

fn handle_input(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Enter if key.modifiers.contains(KeyModifiers::ALT) => {
            insert_char(app, '\n');
        }
        KeyCode::Enter => {
            if app.view().input_enabled {
                app.submit_input();
            }
        }
        KeyCode::Esc => {
            app.typing = None;
        }
        KeyCode::Backspace => {
            app.typing = None;
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            app.typing = None;
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => app.input_cursor = 0,
        KeyCode::End => app.input_cursor = app.input.chars().count(),
        KeyCode::Char(c @ '1'..='3')
            if app.input.is_empty() && app.typing.is_none() && app.view().welcome_visible =>
        {
            app.start_example(c as usize - '1' as usize);
        }
        KeyCode::Char(c) => {
            app.typing = None;
            insert_char(app, c);
        }
        _ => {}
    }
}

fn insert_char(app: &mut App, c: char) {
    let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
    app.input.insert(byte_pos, c);
    app.input_cursor += 1;
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::ScrollUp => {
            app.chat_scroll = app.chat_scroll.saturating_sub(3);
        }
        MouseEventKind::ScrollDown => {
            app.chat_scroll = (app.chat_scroll + 3).min(app.max_scroll());
        }
        _ => {}
    }
}
