use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;

use crate::app::{App, Edit, InputMode};
use crate::tui::AppEvent;

pub async fn handle_event(app: &mut App, event: AppEvent, tx: &UnboundedSender<AppEvent>) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key, tx).await,
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Paste(text) => {
            if app.input_mode != InputMode::Normal {
                app.edit(Edit::InsertStr(text));
            }
        }
        AppEvent::Resize => {}
        AppEvent::Tick => app.tick_animation(),
        AppEvent::Reply(result) => app.apply_reply(result),
    }
    Ok(())
}

async fn handle_key(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key, tx),
        InputMode::Attaching => handle_attach_mode(app, key).await,
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => app.should_quit = true,

        // Dismiss the error alert
        KeyCode::Esc | KeyCode::Char('e') => app.controller.dismiss_error(),

        // Back to typing
        KeyCode::Char('i') | KeyCode::Enter => {
            if app.controller.has_session() {
                app.input_mode = InputMode::Editing;
            }
        }

        KeyCode::Char('a') => app.open_attach_prompt(),
        KeyCode::Char('x') => app.clear_attachment(),

        // Scrolling
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_down(app.chat_height / 2);
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_up(app.chat_height / 2);
        }
        KeyCode::PageDown => app.scroll_down(app.chat_height),
        KeyCode::PageUp => app.scroll_up(app.chat_height),
        KeyCode::Char('G') | KeyCode::End => app.scroll_to_bottom(),
        KeyCode::Char('g') | KeyCode::Home => app.scroll_to_top(),

        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent, tx: &UnboundedSender<AppEvent>) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => submit(app, tx),

        // Attachment shortcuts while typing
        KeyCode::Char('o') if ctrl => app.open_attach_prompt(),
        KeyCode::Char('x') if ctrl => app.clear_attachment(),

        KeyCode::PageDown => app.scroll_down(app.chat_height),
        KeyCode::PageUp => app.scroll_up(app.chat_height),

        KeyCode::Backspace => app.edit(Edit::Backspace),
        KeyCode::Delete => app.edit(Edit::Delete),
        KeyCode::Left => app.edit(Edit::Left),
        KeyCode::Right => app.edit(Edit::Right),
        KeyCode::Home => app.edit(Edit::Home),
        KeyCode::End => app.edit(Edit::End),
        KeyCode::Char('a') if ctrl => app.edit(Edit::Home),
        KeyCode::Char('e') if ctrl => app.edit(Edit::End),
        KeyCode::Char(c) if !ctrl => app.edit(Edit::Insert(c)),
        _ => {}
    }
}

async fn handle_attach_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => app.cancel_attach_prompt(),
        KeyCode::Enter => app.confirm_attachment().await,
        KeyCode::Backspace => app.edit(Edit::Backspace),
        KeyCode::Delete => app.edit(Edit::Delete),
        KeyCode::Left => app.edit(Edit::Left),
        KeyCode::Right => app.edit(Edit::Right),
        KeyCode::Home => app.edit(Edit::Home),
        KeyCode::End => app.edit(Edit::End),
        KeyCode::Char(c) => app.edit(Edit::Insert(c)),
        _ => {}
    }
}

/// Start a send in the background; its outcome comes back as `AppEvent::Reply`.
fn submit(app: &mut App, tx: &UnboundedSender<AppEvent>) {
    let Some(dispatch) = app.start_submit() else {
        return;
    };

    tracing::debug!(with_image = dispatch.payload().image().is_some(), "dispatching message");
    let tx = tx.clone();
    tokio::spawn(async move {
        let result = dispatch.run().await;
        if tx.send(AppEvent::Reply(result)).is_err() {
            tracing::debug!("event loop closed before reply arrived");
        }
    });
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let in_chat = app
        .chat_area
        .map(|r| point_in_rect(mouse.column, mouse.row, r))
        .unwrap_or(false);
    if !in_chat {
        return;
    }

    match mouse.kind {
        MouseEventKind::ScrollDown => app.scroll_down(3),
        MouseEventKind::ScrollUp => app.scroll_up(3),
        _ => {}
    }
}
