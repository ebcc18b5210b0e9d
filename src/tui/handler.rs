use crossterm::event::KeyCode;

use super::local_completion::LocalPathInput;
use super::{Action, App, InputMode, Phase};
use crate::session::UploadMode;

impl App {
    /// Returns true when the app should quit.
    pub(super) fn handle_key(&mut self, code: KeyCode) -> bool {
        let mode = std::mem::replace(&mut self.input, InputMode::Normal);
        match mode {
            InputMode::Normal => self.handle_normal_key(code),
            InputMode::PickFile { mode, mut input } => {
                self.handle_pick_file_key(code, mode, &mut input);
                false
            }
        }
    }

    fn handle_normal_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Left | KeyCode::Char('h') | KeyCode::BackTab => {
                self.selected = (self.selected + Action::ALL.len() - 1) % Action::ALL.len();
            }
            KeyCode::Right | KeyCode::Char('l') | KeyCode::Tab => {
                self.selected = (self.selected + 1) % Action::ALL.len();
            }
            KeyCode::Char('r') if matches!(self.phase, Phase::Failed(_)) => {
                self.push_log("Retrying sign-in".into());
                self.start();
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                self.trigger(Action::ALL[self.selected]);
            }
            KeyCode::Char(c) => {
                if let Some(pos) = Action::ALL.iter().position(|a| a.key() == c) {
                    self.selected = pos;
                    self.trigger(Action::ALL[pos]);
                }
            }
            _ => {}
        }
        false
    }

    fn handle_pick_file_key(&mut self, code: KeyCode, mode: UploadMode, input: &mut LocalPathInput) {
        match code {
            KeyCode::Esc => {
                if !input.candidates.is_empty() {
                    input.clear_candidates();
                } else {
                    return;
                }
            }
            KeyCode::Tab | KeyCode::Down => {
                if input.candidates.is_empty() {
                    input.open_candidates();
                } else {
                    input.navigate_next();
                }
            }
            KeyCode::BackTab | KeyCode::Up => input.navigate_prev(),
            KeyCode::Enter => {
                if !input.candidates.is_empty() {
                    if input.confirm_selected() && input.value.ends_with('/') {
                        input.open_candidates();
                    }
                } else {
                    let path = input.value.trim().to_string();
                    if path.is_empty() || path.ends_with('/') {
                        self.push_log("No file selected".into());
                    } else {
                        self.start_upload(&path, mode);
                        return;
                    }
                }
            }
            KeyCode::Backspace => {
                input.value.pop();
                input.clear_candidates();
            }
            KeyCode::Char(c) => {
                input.value.push(c);
                input.clear_candidates();
            }
            _ => {}
        }
        self.input = InputMode::PickFile {
            mode,
            input: std::mem::take(input),
        };
    }
}
