use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use super::local_completion::LocalPathInput;
use super::{Action, App, InputMode, Phase, SPINNER_FRAMES, centered_rect, upload_mode_title};

impl App {
    pub(super) fn draw(&self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(4),
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(5),
            ])
            .split(f.area());

        self.draw_status(f, chunks[0]);
        self.draw_buttons(f, chunks[1]);
        self.draw_count(f, chunks[2]);
        self.draw_logs(f, chunks[3]);

        if let InputMode::PickFile { mode, input } = &self.input {
            let cur = if self.cursor_visible { "\u{2588}" } else { " " };
            self.draw_file_picker(f, upload_mode_title(*mode), input, cur);
        }
    }

    fn draw_status(&self, f: &mut Frame, area: Rect) {
        let spinner = SPINNER_FRAMES[self.spinner_idx];
        let lines = match &self.phase {
            Phase::RequestingCode => vec![Line::from(Span::styled(
                format!("{} Requesting sign-in code...", spinner),
                Style::default().fg(Color::Cyan),
            ))],
            Phase::AwaitingApproval(device) => vec![
                Line::from(vec![
                    Span::raw("Open "),
                    Span::styled(
                        device.verification_url.clone(),
                        Style::default().fg(Color::Cyan).add_modifier(Modifier::UNDERLINED),
                    ),
                    Span::raw(" and enter code "),
                    Span::styled(
                        device.user_code.clone(),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ),
                ]),
                Line::from(Span::styled(
                    format!("{} Waiting for approval...", spinner),
                    Style::default().fg(Color::DarkGray),
                )),
            ],
            Phase::Opening => vec![Line::from(Span::styled(
                format!("{} Opening folder '{}'...", spinner, self.config.app_folder),
                Style::default().fg(Color::Cyan),
            ))],
            Phase::Ready { account } => {
                let who = account
                    .as_ref()
                    .map(|a| {
                        if a.email_address.is_empty() {
                            a.display_name.clone()
                        } else {
                            format!("{} <{}>", a.display_name, a.email_address)
                        }
                    })
                    .unwrap_or_else(|| "signed in".into());
                vec![
                    Line::from(Span::styled(who, Style::default().fg(Color::Green))),
                    Line::from(Span::styled(
                        format!(
                            "Folder: {} ({})",
                            self.config.app_folder,
                            self.session.folder_id().unwrap_or("-")
                        ),
                        Style::default().fg(Color::DarkGray),
                    )),
                ]
            }
            Phase::Failed(err) => vec![
                Line::from(Span::styled(
                    format!("Not ready: {}", err),
                    Style::default().fg(Color::Red),
                )),
                Line::from(Span::styled("r: retry", Style::default().fg(Color::DarkGray))),
            ],
        };

        let p = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Drive Backup ")
                    .title_style(Style::default().fg(Color::Green))
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: true });
        f.render_widget(p, area);
    }

    fn draw_buttons(&self, f: &mut Frame, area: Rect) {
        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Ratio(1, 3); 3])
            .split(area);

        for (i, action) in Action::ALL.iter().enumerate() {
            let active = i == self.selected;
            let (text_style, border_style) = if active {
                (
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    Style::default().fg(Color::Yellow),
                )
            } else if self.session.is_ready() {
                (Style::default().fg(Color::White), Style::default().fg(Color::DarkGray))
            } else {
                (Style::default().fg(Color::DarkGray), Style::default().fg(Color::DarkGray))
            };
            let label = Line::from(vec![
                Span::styled(format!("[{}] ", action.key()), Style::default().fg(Color::DarkGray)),
                Span::styled(action.label(), text_style),
            ]);
            let p = Paragraph::new(label)
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL).border_style(border_style));
            f.render_widget(p, cells[i]);
        }
    }

    fn draw_count(&self, f: &mut Frame, area: Rect) {
        let count = match self.file_count {
            Some(n) => n.to_string(),
            None => "-".into(),
        };
        let mut spans = vec![Span::styled(
            format!("Number of files: {}", count),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )];
        if self.in_flight > 0 {
            spans.push(Span::styled(
                format!("  {} working", SPINNER_FRAMES[self.spinner_idx]),
                Style::default().fg(Color::Cyan),
            ));
        }
        let p = Paragraph::new(Line::from(spans)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );
        f.render_widget(p, area);
    }

    fn draw_logs(&self, f: &mut Frame, area: Rect) {
        let mut lines: Vec<Line> = self
            .logs
            .iter()
            .rev()
            .take(area.height.saturating_sub(4) as usize)
            .rev()
            .map(|s| Line::from(s.as_str()))
            .collect();
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "u:upload b:background c:count ←/→:select Enter:press q:quit",
            Style::default().fg(Color::DarkGray),
        )));
        let logs = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .title_style(Style::default().fg(Color::Green))
                    .border_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(logs, area);
    }

    fn draw_file_picker(&self, f: &mut Frame, title: &str, input: &LocalPathInput, cur: &str) {
        let candidate_lines = input.candidates.len().min(8);
        let base_height = 6;
        let total_lines = base_height + if candidate_lines > 0 { candidate_lines + 1 } else { 0 };
        let pct = ((total_lines as u16 * 100) / f.area().height.max(1)).clamp(20, 60);
        let area = centered_rect(70, pct, f.area());
        f.render_widget(Clear, area);

        let mut lines = vec![
            Line::from(""),
            Line::from(vec![
                Span::styled("  File: ", Style::default().fg(Color::Cyan)),
                Span::styled(
                    format!("{}{}", input.value, cur),
                    Style::default().fg(Color::Yellow),
                ),
            ]),
        ];

        if !input.candidates.is_empty() {
            lines.push(Line::from(""));
            for (i, (name, is_dir)) in input.candidates.iter().enumerate().take(8) {
                let is_sel = input.candidate_idx == Some(i);
                let prefix = if is_sel { "  > " } else { "    " };
                let style = match (is_sel, is_dir) {
                    (true, _) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    (false, true) => Style::default().fg(Color::Blue),
                    (false, false) => Style::default().fg(Color::White),
                };
                let suffix = if *is_dir { "/" } else { "" };
                lines.push(Line::from(Span::styled(
                    format!("{}{}{}", prefix, name, suffix),
                    style,
                )));
            }
            if input.candidates.len() > 8 {
                lines.push(Line::from(Span::styled(
                    format!("    ... and {} more", input.candidates.len() - 8),
                    Style::default().fg(Color::DarkGray),
                )));
            }
        }

        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "  Tab: complete | Enter: confirm | Esc: cancel",
            Style::default().fg(Color::DarkGray),
        )));

        let p = Paragraph::new(Text::from(lines)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", title))
                .title_style(Style::default().fg(Color::Yellow))
                .border_style(Style::default().fg(Color::Cyan)),
        );
        f.render_widget(p, area);
    }
}
