use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap},
};
use crate::app::{App, InputMode};
use crate::controller::Role;

/// Parse a line of text and convert **bold** and `code` markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut chars = text.chars().peekable();
    let mut current_text = String::new();

    while let Some(c) = chars.next() {
        if c == '*' && chars.peek() == Some(&'*') {
            chars.next();

            // Find closing **
            let mut bold_text = String::new();
            let mut found_close = false;
            while let Some(c) = chars.next() {
                if c == '*' && chars.peek() == Some(&'*') {
                    chars.next();
                    found_close = true;
                    break;
                }
                bold_text.push(c);
            }

            if found_close && !bold_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::raw(std::mem::take(&mut current_text)));
                }
                spans.push(Span::styled(bold_text, Style::default().add_modifier(Modifier::BOLD)));
            } else {
                // No closing **, treat as literal
                current_text.push_str("**");
                current_text.push_str(&bold_text);
                if found_close {
                    current_text.push_str("**");
                }
            }
        } else if c == '`' {
            let mut code_text = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '`' {
                    found_close = true;
                    break;
                }
                code_text.push(c);
            }

            if found_close && !code_text.is_empty() {
                if !current_text.is_empty() {
                    spans.push(Span::raw(std::mem::take(&mut current_text)));
                }
                spans.push(Span::styled(code_text, Style::default().fg(Color::Green)));
            } else {
                current_text.push('`');
                current_text.push_str(&code_text);
                if found_close {
                    current_text.push('`');
                }
            }
        } else {
            current_text.push(c);
        }
    }

    if !current_text.is_empty() {
        spans.push(Span::raw(current_text));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    let chip_height = if app.controller.pending().attachment.is_some() { 1 } else { 0 };
    let alert_height = if app.controller.last_error().is_some() { 3 } else { 0 };

    let [header_area, chat_area, chip_area, alert_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(chip_height),
        Constraint::Length(alert_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_chat(app, frame, chat_area);
    if chip_height > 0 {
        render_attachment_chip(app, frame, chip_area);
    }
    if alert_height > 0 {
        render_alert(app, frame, alert_area);
    }
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    if app.input_mode == InputMode::Attaching {
        render_attach_prompt(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let key_status = match app.key_source {
        Some("env") => "key: env var",
        Some("config") => "key: configured",
        _ => "key: missing",
    };

    let status = if !app.controller.has_session() {
        Span::styled(" offline ", Style::default().fg(Color::Red).bold())
    } else if app.controller.is_busy() {
        Span::styled(" sending ", Style::default().fg(Color::Yellow))
    } else {
        Span::styled(" ready ", Style::default().fg(Color::Green))
    };

    let title = Line::from(vec![
        Span::styled(" Vision Chat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(format!("{} ", app.model), Style::default().fg(Color::White)),
        Span::styled(format!("({}) ", key_status), Style::default().fg(Color::Gray)),
        status,
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn role_style(role: Role) -> Style {
    let color = match role {
        Role::User => Color::Cyan,
        Role::Model => Color::Yellow,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let border_color = if app.input_mode == InputMode::Normal {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" Chat ({}) ", app.controller.messages().len()));

    let busy = app.controller.is_busy();
    let chat_text = if app.controller.messages().is_empty() && !busy {
        let hint = if app.controller.has_session() {
            "Ask anything, or press Ctrl-O to attach an image..."
        } else {
            "No chat session. Set GEMINI_API_KEY and restart."
        };
        Text::from(Span::styled(hint, Style::default().fg(Color::DarkGray)))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for msg in app.controller.messages() {
            lines.push(Line::from(Span::styled(App::role_label(msg.role), role_style(msg.role))));
            if let Some(preview) = &msg.attachment {
                lines.push(Line::from(Span::styled(
                    format!("[image] {}", preview.label()),
                    Style::default().fg(Color::Magenta),
                )));
            }
            for line in msg.text.lines() {
                match msg.role {
                    Role::User => lines.push(Line::from(line.to_string())),
                    Role::Model => lines.push(parse_markdown_line(line)),
                }
            }
            lines.push(Line::default());
        }

        if busy {
            lines.push(Line::from(Span::styled(App::role_label(Role::Model), role_style(Role::Model))));
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    // Measure with the same wrapping the paragraph renders with
    let total_lines = Paragraph::new(chat_text.clone())
        .wrap(Wrap { trim: false })
        .line_count(app.chat_width);
    app.set_chat_lines(total_lines.min(u16::MAX as usize) as u16);

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));

    frame.render_widget(chat, area);

    if total_lines > app.chat_height as usize {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("^"))
            .end_symbol(Some("v"));

        let mut scrollbar_state = ScrollbarState::new(total_lines).position(app.chat_scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }
}

fn render_attachment_chip(app: &App, frame: &mut Frame, area: Rect) {
    let Some(attachment) = &app.controller.pending().attachment else {
        return;
    };

    let chip = Line::from(vec![
        Span::styled(" [image] ", Style::default().bg(Color::Magenta).fg(Color::White).bold()),
        Span::raw(" "),
        Span::raw(attachment.preview().label()),
        Span::styled("  (x / Ctrl-X to remove)", Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(chip), area);
}

fn render_alert(app: &App, frame: &mut Frame, area: Rect) {
    let Some(message) = app.controller.last_error() else {
        return;
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Error (Esc in normal mode to dismiss) ");

    let alert = Paragraph::new(message.to_string())
        .style(Style::default().fg(Color::Red))
        .block(block);
    frame.render_widget(alert, area);
}

/// Scroll offset that keeps `cursor` inside a field `width` chars wide.
fn input_scroll_offset(cursor: usize, width: usize) -> usize {
    if width == 0 || cursor < width {
        0
    } else {
        cursor - width + 1
    }
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let title = if !app.controller.has_session() {
        " Message (disabled) "
    } else if app.controller.is_busy() {
        " Message (waiting for reply) "
    } else if app.controller.can_submit() {
        " Message (Enter to send) "
    } else {
        " Message "
    };

    let input_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title);

    // Inner width = total width - 2 (for borders)
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor.min(app.controller.text().chars().count());
    let scroll_offset = input_scroll_offset(cursor_pos, inner_width);

    let visible_text: String = app
        .controller
        .text()
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input = Paragraph::new(visible_text)
        .style(Style::default().fg(Color::Cyan))
        .block(input_block);

    frame.render_widget(input, area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" INSERT ", Style::default().bg(Color::Yellow).fg(Color::Black)),
        InputMode::Attaching => (" ATTACH ", Style::default().bg(Color::Magenta).fg(Color::White)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hints = match app.input_mode {
        InputMode::Normal => {
            let mut hints = vec![
                Span::styled(" i ", key_style),
                Span::styled(" type ", label_style),
                Span::styled(" a ", key_style),
                Span::styled(" attach ", label_style),
            ];
            if app.controller.pending().attachment.is_some() {
                hints.extend(vec![
                    Span::styled(" x ", key_style),
                    Span::styled(" remove image ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" j/k ", key_style),
                Span::styled(" scroll ", label_style),
            ]);
            if app.controller.last_error().is_some() {
                hints.extend(vec![
                    Span::styled(" Esc ", key_style),
                    Span::styled(" dismiss ", label_style),
                ]);
            }
            hints.extend(vec![
                Span::styled(" q ", key_style),
                Span::styled(" quit ", label_style),
            ]);
            hints
        }
        InputMode::Editing => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" send ", label_style),
            Span::styled(" Ctrl-O ", key_style),
            Span::styled(" attach ", label_style),
            Span::styled(" Ctrl-X ", key_style),
            Span::styled(" remove image ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" stop typing ", label_style),
        ],
        InputMode::Attaching => vec![
            Span::styled(" Enter ", key_style),
            Span::styled(" attach ", label_style),
            Span::styled(" Esc ", key_style),
            Span::styled(" cancel ", label_style),
        ],
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_attach_prompt(app: &App, frame: &mut Frame, area: Rect) {
    // Calculate popup size and position (centered)
    let popup_width = 70.min(area.width.saturating_sub(4));
    let popup_height = 5.min(area.height);

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Magenta))
        .title(" Attach Image ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);
    if inner.height < 3 {
        return;
    }

    let instructions = Paragraph::new("Path to a PNG, JPEG, GIF or WebP file. Enter to attach, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let cursor_pos = app.attach_cursor.min(app.attach_input.chars().count());
    let scroll_offset = input_scroll_offset(cursor_pos, width);

    let visible: String = app.attach_input.chars().skip(scroll_offset).take(width).collect();
    frame.render_widget(Paragraph::new(visible).style(Style::default().fg(Color::Cyan)), input_area);

    let cursor_x = (cursor_pos - scroll_offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::FileBlob;
    use crate::controller::tests::{controller_with, ScriptedSession};
    use crate::controller::Controller;
    use crate::error::ChatError;
    use ratatui::{backend::TestBackend, Terminal};

    fn draw(app: &mut App) -> String {
        draw_sized(app, 80, 24)
    }

    fn draw_sized(app: &mut App, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|frame| render(app, frame)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn test_parse_markdown_bold_and_code() {
        let line = parse_markdown_line("use **bold** and `code` here");
        let texts: Vec<&str> = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(texts, vec!["use ", "bold", " and ", "code", " here"]);
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[3].style.fg, Some(Color::Green));
    }

    #[test]
    fn test_parse_markdown_unclosed_is_literal() {
        let line = parse_markdown_line("a **b and `c");
        let text: String = line.spans.iter().map(|s| s.content.as_ref()).collect();
        assert_eq!(text, "a **b and `c");
    }

    #[test]
    fn test_parse_markdown_empty_line() {
        assert!(parse_markdown_line("").spans.is_empty());
    }

    #[test]
    fn test_input_scroll_offset() {
        assert_eq!(input_scroll_offset(3, 10), 0);
        assert_eq!(input_scroll_offset(10, 10), 1);
        assert_eq!(input_scroll_offset(25, 10), 16);
        assert_eq!(input_scroll_offset(5, 0), 0);
    }

    #[test]
    fn test_render_conversation_and_thinking() {
        let session = ScriptedSession::with_replies(vec![]);
        let mut app = App::new(controller_with(&session), "gemini-test", Some("env"));
        app.controller.set_text("describe this");
        app.controller
            .stage_attachment(FileBlob::new("cat.png", "image/png", vec![0; 10]))
            .unwrap();
        app.start_submit().unwrap();

        let screen = draw(&mut app);
        assert!(screen.contains("You:"));
        assert!(screen.contains("describe this"));
        assert!(screen.contains("cat.png"));
        assert!(screen.contains("Thinking."));
        // Header shows the session's model, not the requested name
        assert!(screen.contains("test-model"));
        assert_eq!(app.chat_width, 78);
    }

    #[test]
    fn test_render_error_and_attach_prompt() {
        let mut app = App::new(Controller::new(), "gemini-test", None);
        app.controller.report(ChatError::Config("API key is not set".to_string()));
        app.open_attach_prompt();

        let screen = draw(&mut app);
        assert!(screen.contains("API key is not set"));
        assert!(screen.contains("Attach Image"));
        assert!(screen.contains("key: missing"));
    }

    #[test]
    fn test_end_of_word_wrapped_reply_scrolls_into_view() {
        let session = ScriptedSession::with_replies(vec![]);
        let mut app = App::new(controller_with(&session), "gemini-test", Some("env"));

        // Word wrapping needs more rows than the character count suggests
        let mut reply: String = (0..29).map(|i| format!("word{:06} ", i)).collect();
        reply.push_str("THEEND");
        app.controller.set_text("tell me a lot");
        app.start_submit().unwrap();
        app.apply_reply(Ok(reply));

        let screen = draw_sized(&mut app, 24, 16);
        assert!(screen.contains("THEEND"));

        app.scroll_to_top();
        let screen = draw_sized(&mut app, 24, 16);
        assert!(!screen.contains("THEEND"));

        app.scroll_down(1000);
        let screen = draw_sized(&mut app, 24, 16);
        assert!(screen.contains("THEEND"));
        assert_eq!(app.chat_scroll, app.chat_lines - app.chat_height);
    }

}
