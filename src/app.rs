use std::path::PathBuf;

use ratatui::layout::Rect;

use crate::attachment::FileBlob;
use crate::controller::{Controller, Dispatch, Role};
use crate::error::SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
    /// Typing a file path in the attach popup.
    Attaching,
}

/// A cursor edit applied to whichever buffer the current mode is typing into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Insert(char),
    InsertStr(String),
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
}

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub controller: Controller,

    // Shown in the header
    pub model: String,
    pub key_source: Option<&'static str>,

    // Cursor positions are in chars, not bytes
    pub input_cursor: usize,
    pub attach_input: String,
    pub attach_cursor: usize,
    /// Mode to go back to when the attach popup closes.
    attach_return: InputMode,

    // Chat log viewport
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub chat_area: Option<Rect>,
    /// Wrapped line count of the log as last rendered.
    pub chat_lines: u16,
    /// Keep the newest line in view on the next render.
    pub follow_bottom: bool,

    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(controller: Controller, model: impl Into<String>, key_source: Option<&'static str>) -> Self {
        Self {
            should_quit: false,
            input_mode: if controller.has_session() { InputMode::Editing } else { InputMode::Normal },
            // The live session knows the model it was created with
            model: controller.model().map(str::to_string).unwrap_or_else(|| model.into()),
            controller,
            key_source,
            input_cursor: 0,
            attach_input: String::new(),
            attach_cursor: 0,
            attach_return: InputMode::Normal,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            chat_lines: 0,
            follow_bottom: true,
            animation_frame: 0,
        }
    }

    /// Apply an edit to the message draft or, in the attach popup, the path.
    pub fn edit(&mut self, edit: Edit) {
        match self.input_mode {
            InputMode::Attaching => apply_edit(&mut self.attach_input, &mut self.attach_cursor, edit),
            _ => apply_edit(self.controller.text_mut(), &mut self.input_cursor, edit),
        }
    }

    /// Start sending the draft. The returned dispatch must be run and its
    /// result fed back through [`App::apply_reply`].
    pub fn start_submit(&mut self) -> Option<Dispatch> {
        let dispatch = self.controller.begin_submit()?;
        self.input_cursor = 0;
        self.scroll_to_bottom();
        Some(dispatch)
    }

    pub fn apply_reply(&mut self, result: Result<String, SendError>) {
        let failed = result.is_err();
        self.controller.finish_submit(result);
        if failed {
            // The draft was restored, put the cursor after it
            self.input_cursor = self.controller.text().chars().count();
        }
        self.scroll_to_bottom();
    }

    pub fn open_attach_prompt(&mut self) {
        if self.input_mode != InputMode::Attaching {
            self.attach_return = self.input_mode;
        }
        self.attach_input.clear();
        self.attach_cursor = 0;
        self.input_mode = InputMode::Attaching;
    }

    /// Close the popup and return to the mode it was opened from. Without a
    /// session the input box stays read-only.
    pub fn cancel_attach_prompt(&mut self) {
        self.attach_input.clear();
        self.attach_cursor = 0;
        self.input_mode = match self.attach_return {
            InputMode::Editing if self.controller.has_session() => InputMode::Editing,
            _ => InputMode::Normal,
        };
    }

    /// Read the file named in the attach popup and stage it.
    pub async fn confirm_attachment(&mut self) {
        let raw = self.attach_input.trim().to_string();
        if raw.is_empty() {
            self.cancel_attach_prompt();
            return;
        }

        match FileBlob::from_path(&expand_path(&raw)).await {
            Ok(blob) => {
                // Rejections are recorded in the controller's error
                let _ = self.controller.stage_attachment(blob);
            }
            Err(err) => self.controller.report(err),
        }
        self.cancel_attach_prompt();
    }

    pub fn clear_attachment(&mut self) {
        self.controller.clear_attachment();
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.controller.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_bottom = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        let max = self.max_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(max);
        self.follow_bottom = self.chat_scroll >= max;
    }

    pub fn scroll_to_top(&mut self) {
        self.follow_bottom = false;
        self.chat_scroll = 0;
    }

    /// Scroll the log so the newest message (or "Thinking...") is visible.
    /// The final offset is settled on the next render, once the new lines
    /// have been wrapped.
    pub fn scroll_to_bottom(&mut self) {
        self.follow_bottom = true;
        self.chat_scroll = self.max_scroll();
    }

    /// Record the rendered height of the log and clamp the scroll offset to it.
    pub fn set_chat_lines(&mut self, lines: u16) {
        self.chat_lines = lines;
        let max = self.max_scroll();
        self.chat_scroll = if self.follow_bottom { max } else { self.chat_scroll.min(max) };
    }

    fn max_scroll(&self) -> u16 {
        self.chat_lines.saturating_sub(self.chat_height)
    }

    pub fn role_label(role: Role) -> &'static str {
        match role {
            Role::User => "You:",
            Role::Model => "Gemini:",
        }
    }
}

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn apply_edit(text: &mut String, cursor: &mut usize, edit: Edit) {
    let char_count = text.chars().count();
    *cursor = (*cursor).min(char_count);

    match edit {
        Edit::Insert(c) => {
            let byte_pos = char_to_byte_index(text, *cursor);
            text.insert(byte_pos, c);
            *cursor += 1;
        }
        Edit::InsertStr(s) => {
            // Pasted newlines would break the single-line input box
            let s = s.replace(['\r', '\n'], " ");
            let byte_pos = char_to_byte_index(text, *cursor);
            text.insert_str(byte_pos, &s);
            *cursor += s.chars().count();
        }
        Edit::Backspace => {
            if *cursor > 0 {
                *cursor -= 1;
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        Edit::Delete => {
            if *cursor < char_count {
                let byte_pos = char_to_byte_index(text, *cursor);
                text.remove(byte_pos);
            }
        }
        Edit::Left => *cursor = cursor.saturating_sub(1),
        Edit::Right => *cursor = (*cursor + 1).min(char_count),
        Edit::Home => *cursor = 0,
        Edit::End => *cursor = char_count,
    }
}

/// Expand a leading `~/` and strip quotes added by terminals on drag-and-drop.
pub fn expand_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim().trim_matches(|c: char| c == '\'' || c == '"');
    if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(trimmed)
}
