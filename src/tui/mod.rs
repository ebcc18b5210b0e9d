mod draw;
mod handler;
mod local_completion;

use crate::auth::DeviceCode;
use crate::config::AppConfig;
use crate::document::{DocumentRef, LocalFiles};
use crate::drive::{AccountInfo, Drive, StorageApi};
use crate::session::{DriveSession, FileSession, SessionError, UploadMode, UploadReceipt};
use crate::work::{WorkEvent, WorkQueue};
use anyhow::Result;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::DefaultTerminal;
use ratatui::layout::{Constraint, Direction, Layout};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use local_completion::LocalPathInput;

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const MAX_LOGS: usize = 500;

pub fn run(config: AppConfig) -> Result<()> {
    let drive = Arc::new(Drive::new(&config)?);
    let queue = WorkQueue::open(&config)?;
    let mut app = App::new(config, drive, queue);
    app.start();
    run_terminal(app)
}

fn run_terminal(mut app: App) -> Result<()> {
    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;
    let mut terminal = ratatui::init();
    let res = app.run(&mut terminal);
    ratatui::restore();
    execute!(io::stdout(), LeaveAlternateScreen)?;
    disable_raw_mode()?;
    res
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Upload,
    UploadInBackground,
    QueryFiles,
}

impl Action {
    const ALL: [Action; 3] = [Action::Upload, Action::UploadInBackground, Action::QueryFiles];

    fn label(self) -> &'static str {
        match self {
            Action::Upload => "Upload file",
            Action::UploadInBackground => "Upload in background",
            Action::QueryFiles => "Query files",
        }
    }

    fn key(self) -> char {
        match self {
            Action::Upload => 'u',
            Action::UploadInBackground => 'b',
            Action::QueryFiles => 'c',
        }
    }
}

/// Where the screen is in getting from launch to a usable session.
enum Phase {
    RequestingCode,
    AwaitingApproval(DeviceCode),
    Opening,
    Ready { account: Option<AccountInfo> },
    Failed(String),
}

enum OpResult {
    DeviceCode(Result<DeviceCode>),
    SignedIn(Result<()>),
    Opened(Result<DriveSession, SessionError>),
    Account(Result<AccountInfo>),
    Uploaded(Result<UploadReceipt, SessionError>),
    Counted(Result<usize, SessionError>),
}

enum InputMode {
    Normal,
    PickFile {
        mode: UploadMode,
        input: LocalPathInput,
    },
}

struct App {
    config: AppConfig,
    drive: Arc<Drive>,
    session: FileSession,
    work_events: Receiver<WorkEvent>,
    phase: Phase,
    input: InputMode,
    selected: usize,
    file_count: Option<usize>,
    logs: VecDeque<String>,
    in_flight: usize,
    cursor_visible: bool,
    last_blink: Instant,
    spinner_idx: usize,
    last_spinner: Instant,
    result_rx: Receiver<OpResult>,
    result_tx: Sender<OpResult>,
}

impl App {
    fn new(config: AppConfig, drive: Arc<Drive>, queue: WorkQueue) -> Self {
        let (tx, rx) = mpsc::channel();
        let work_events = queue.subscribe();
        Self {
            config,
            drive,
            session: FileSession::new(Arc::new(queue)),
            work_events,
            phase: Phase::RequestingCode,
            input: InputMode::Normal,
            selected: 0,
            file_count: None,
            logs: VecDeque::new(),
            in_flight: 0,
            cursor_visible: true,
            last_blink: Instant::now(),
            spinner_idx: 0,
            last_spinner: Instant::now(),
            result_rx: rx,
            result_tx: tx,
        }
    }

    /// Kicks off sign-in, or goes straight to opening the session when a
    /// stored one exists.
    fn start(&mut self) {
        if self.drive.auth().has_session() {
            self.open_session();
            return;
        }
        self.phase = Phase::RequestingCode;
        let drive = Arc::clone(&self.drive);
        let tx = self.result_tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(OpResult::DeviceCode(drive.auth().request_device_code()));
        });
    }

    fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        loop {
            if self.last_blink.elapsed() >= Duration::from_millis(500) {
                self.cursor_visible = !self.cursor_visible;
                self.last_blink = Instant::now();
            }
            if self.last_spinner.elapsed() >= Duration::from_millis(80) {
                self.spinner_idx = (self.spinner_idx + 1) % SPINNER_FRAMES.len();
                self.last_spinner = Instant::now();
            }
            self.poll_results();
            self.poll_work_events();

            terminal.draw(|f| self.draw(f))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    self.cursor_visible = true;
                    self.last_blink = Instant::now();
                    if self.handle_key(key.code) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn poll_results(&mut self) {
        while let Ok(result) = self.result_rx.try_recv() {
            self.apply(result);
        }
    }

    fn apply(&mut self, result: OpResult) {
        match result {
            OpResult::DeviceCode(Ok(device)) => {
                self.push_log(format!(
                    "Open {} and enter code {}",
                    device.verification_url, device.user_code
                ));
                let drive = Arc::clone(&self.drive);
                let tx = self.result_tx.clone();
                let pending = device.clone();
                std::thread::spawn(move || {
                    let res = drive.auth().poll_device_token(&pending).map(|_| ());
                    let _ = tx.send(OpResult::SignedIn(res));
                });
                self.phase = Phase::AwaitingApproval(device);
            }
            OpResult::DeviceCode(Err(e)) | OpResult::SignedIn(Err(e)) => {
                tracing::error!(error = %format!("{e:#}"), "unable to sign in");
                self.push_log(format!("Unable to sign in: {e:#}"));
                self.phase = Phase::Failed(format!("{e:#}"));
            }
            OpResult::SignedIn(Ok(())) => {
                self.push_log("Signed in".into());
                self.open_session();
            }
            OpResult::Opened(Ok(session)) => {
                let session = self.session.install(session);
                self.push_log(format!(
                    "Folder '{}' ready (id={})",
                    self.config.app_folder,
                    session.folder_id()
                ));
                self.phase = Phase::Ready { account: None };
                let drive = Arc::clone(&self.drive);
                let tx = self.result_tx.clone();
                std::thread::spawn(move || {
                    let _ = tx.send(OpResult::Account(drive.about()));
                });
            }
            OpResult::Opened(Err(e)) => {
                tracing::error!(error = %e, "unable to open storage session");
                self.push_log(format!("Unable to open folder: {e}"));
                self.phase = Phase::Failed(e.to_string());
            }
            OpResult::Account(Ok(info)) => {
                if let Phase::Ready { account } = &mut self.phase {
                    *account = Some(info);
                }
            }
            OpResult::Account(Err(e)) => {
                tracing::debug!(error = %format!("{e:#}"), "account lookup failed");
            }
            OpResult::Uploaded(res) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                match res {
                    Ok(UploadReceipt::Uploaded { name, file_id }) => {
                        self.push_log(format!("Uploaded {} (id={})", name, file_id));
                    }
                    Ok(UploadReceipt::Enqueued { name, task_id }) => {
                        self.push_log(format!("Queued {} as task {}", name, task_id));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "upload failed");
                        self.push_log(format!("Upload failed: {e}"));
                    }
                }
            }
            OpResult::Counted(res) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                match res {
                    Ok(n) => {
                        self.file_count = Some(n);
                        self.push_log(format!("Number of files: {}", n));
                    }
                    Err(e) => self.push_log(format!("Query failed: {e}")),
                }
            }
        }
    }

    fn poll_work_events(&mut self) {
        while let Ok(event) = self.work_events.try_recv() {
            let line = match event {
                WorkEvent::Started { id, name } => format!("Task {}: uploading {}", id, name),
                WorkEvent::Succeeded { id, name, file_id } => {
                    format!("Task {}: {} done (id={})", id, name, file_id)
                }
                WorkEvent::Retrying {
                    id,
                    name,
                    error,
                    delay_secs,
                } => format!("Task {}: {} retry in {}s ({})", id, name, delay_secs, error),
                WorkEvent::Failed { id, name, error } => {
                    format!("Task {}: {} failed ({})", id, name, error)
                }
            };
            self.push_log(line);
        }
    }

    fn open_session(&mut self) {
        self.phase = Phase::Opening;
        let storage: Arc<dyn StorageApi> = self.drive.clone();
        let dispatcher = self.session.dispatcher();
        let folder = self.config.app_folder.clone();
        let tx = self.result_tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(OpResult::Opened(DriveSession::open(
                storage, &folder, dispatcher,
            )));
        });
    }

    fn trigger(&mut self, action: Action) {
        match action {
            Action::Upload | Action::UploadInBackground => {
                let mode = if action == Action::Upload {
                    UploadMode::Foreground
                } else {
                    UploadMode::Background
                };
                if let Err(e) = self.session.ready(mode.operation()) {
                    self.report_not_ready(e);
                    return;
                }
                self.input = InputMode::PickFile {
                    mode,
                    input: LocalPathInput::new_for_upload(),
                };
            }
            Action::QueryFiles => match self.session.ready("count") {
                Ok(session) => {
                    self.in_flight += 1;
                    let tx = self.result_tx.clone();
                    std::thread::spawn(move || {
                        let _ = tx.send(OpResult::Counted(session.count_files()));
                    });
                }
                Err(e) => self.report_not_ready(e),
            },
        }
    }

    fn start_upload(&mut self, path: &str, mode: UploadMode) {
        let doc = DocumentRef::new(path);
        let session = match self.session.ready(mode.operation()) {
            Ok(s) => s,
            Err(e) => {
                self.report_not_ready(e);
                return;
            }
        };
        self.in_flight += 1;
        self.push_log(format!("Reading {}", path));
        let tx = self.result_tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send(OpResult::Uploaded(
                session.upload_document(&LocalFiles, &doc, mode),
            ));
        });
    }

    fn report_not_ready(&mut self, e: SessionError) {
        tracing::warn!(error = %e, "action before session was ready");
        self.push_log(format!("{e}"));
    }

    fn push_log(&mut self, msg: String) {
        self.logs.push_back(msg);
        if self.logs.len() > MAX_LOGS {
            self.logs.pop_front();
        }
    }
}

fn centered_rect(
    percent_x: u16,
    percent_y: u16,
    area: ratatui::layout::Rect,
) -> ratatui::layout::Rect {
    let v = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(v[1])[1]
}

fn upload_mode_title(mode: UploadMode) -> &'static str {
    match mode {
        UploadMode::Foreground => "Upload file",
        UploadMode::Background => "Upload in background",
    }
}
