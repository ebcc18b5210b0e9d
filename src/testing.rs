//! Canned-response HTTP server and recording fakes for offline tests.

use crate::drive::{RemoteFile, StorageApi};
use crate::work::{TaskDispatcher, TaskId, UploadTask};
use anyhow::{Result, anyhow};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ACCEPT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decoded value of a query-string parameter.
    pub fn query(&self, key: &str) -> Option<String> {
        let (_, qs) = self.target.split_once('?')?;
        form_value(qs, key)
    }

    /// Decoded value of an `application/x-www-form-urlencoded` body field.
    pub fn form(&self, key: &str) -> Option<String> {
        form_value(&self.body, key)
    }
}

pub struct MockServer {
    pub base_url: String,
    handle: JoinHandle<Vec<Recorded>>,
}

impl MockServer {
    /// Serves one response per accepted connection, in order, then stops.
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
        let addr = listener.local_addr().expect("no local addr");
        listener
            .set_nonblocking(true)
            .expect("set_nonblocking failed");

        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let Some(mut stream) = accept(&listener) else {
                    break;
                };
                seen.push(read_request(&mut stream));
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream
                    .write_all(response.as_bytes())
                    .expect("write failed");
            }
            seen
        });

        Self {
            base_url: format!("http://{}", addr),
            handle,
        }
    }

    pub fn json(responses: &[&str]) -> Self {
        Self::start(responses.iter().map(|b| (200, b.to_string())).collect())
    }

    pub fn finish(self) -> Vec<Recorded> {
        self.handle.join().expect("server thread failed")
    }
}

fn accept(listener: &TcpListener) -> Option<TcpStream> {
    let deadline = Instant::now() + ACCEPT_DEADLINE;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).ok()?;
                stream.set_read_timeout(Some(ACCEPT_DEADLINE)).ok()?;
                return Some(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => return None,
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Recorded {
    let mut raw = Vec::new();
    let mut buf = [0_u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).expect("read failed");
        if n == 0 {
            break raw.len();
        }
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = find(&raw, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let n = stream.read(&mut buf).expect("read failed");
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }
    let body = String::from_utf8_lossy(&raw[header_end..]).to_string();

    Recorded {
        method,
        target,
        headers,
        body,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn form_value(encoded: &str, key: &str) -> Option<String> {
    encoded.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (percent_decode(k) == key).then(|| percent_decode(v))
    })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => {
                        out.push(b);
                        i += 2;
                    }
                    Err(_) => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

// --- Recording fakes for the storage and dispatch seams ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchOrCreateFolder(String),
    CreateFile { parent_id: String, name: String },
    SaveFile { file_id: String, name: String, contents: String },
    ListFiles,
}

#[derive(Default)]
pub struct RecordingStorage {
    calls: Mutex<Vec<Call>>,
    files: Vec<RemoteFile>,
    next_file: AtomicU64,
    failing_creates: AtomicU32,
    failing_saves: AtomicU32,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files(names: &[&str]) -> Self {
        Self {
            files: names
                .iter()
                .enumerate()
                .map(|(i, n)| RemoteFile {
                    id: format!("remote-{}", i),
                    name: n.to_string(),
                    mime_type: "text/plain".into(),
                })
                .collect(),
            ..Self::default()
        }
    }

    /// The next `n` create calls fail.
    pub fn fail_creates(self, n: u32) -> Self {
        self.failing_creates.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` save calls fail.
    pub fn fail_saves(self, n: u32) -> Self {
        self.failing_saves.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StorageApi for RecordingStorage {
    fn fetch_or_create_app_folder(&self, name: &str) -> Result<String> {
        self.record(Call::FetchOrCreateFolder(name.to_string()));
        Ok(format!("folder:{}", name))
    }

    fn create_file(&self, parent_id: &str, name: &str) -> Result<String> {
        self.record(Call::CreateFile {
            parent_id: parent_id.to_string(),
            name: name.to_string(),
        });
        if Self::take_failure(&self.failing_creates) {
            return Err(anyhow!("create file failed (503): backend unavailable"));
        }
        Ok(format!("file-{}", self.next_file.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn save_file(&self, file_id: &str, name: &str, contents: &str) -> Result<()> {
        self.record(Call::SaveFile {
            file_id: file_id.to_string(),
            name: name.to_string(),
            contents: contents.to_string(),
        });
        if Self::take_failure(&self.failing_saves) {
            return Err(anyhow!("save file failed (503): backend unavailable"));
        }
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<RemoteFile>> {
        self.record(Call::ListFiles);
        Ok(self.files.clone())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub bound: Mutex<Vec<Arc<dyn StorageApi>>>,
    pub tasks: Mutex<Vec<UploadTask>>,
}

impl RecordingDispatcher {
    pub fn bind_count(&self) -> usize {
        self.bound.lock().unwrap().len()
    }

    pub fn enqueued(&self) -> Vec<UploadTask> {
        self.tasks.lock().unwrap().clone()
    }
}

impl TaskDispatcher for RecordingDispatcher {
    fn bind(&self, storage: Arc<dyn StorageApi>) -> Result<()> {
        self.bound.lock().unwrap().push(storage);
        Ok(())
    }

    fn enqueue(&self, task: UploadTask) -> Result<TaskId> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(task);
        Ok(tasks.len() as TaskId)
    }
}
