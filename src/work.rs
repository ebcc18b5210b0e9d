//! Deferred uploads.
//!
//! Tasks are persisted to `queue.json` so that work handed off by one process
//! can be executed later, either by the worker thread of a bound queue or by
//! `drivebackup worker`.
//!
//! Several processes may share one queue file. Every read-modify-write holds
//! an exclusive lock on `queue.json.lock`, and a task taken for execution is
//! leased to its runner. Only tasks whose lease has run out are taken again.

use crate::auth::now_unix;
use crate::config::{AppConfig, config_dir, sibling, write_atomic};
use crate::drive::StorageApi;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

pub type TaskId = u64;

const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60 * 60);

/// How long a runner owns a task it has taken. Well above the time a single
/// attempt can take with the HTTP client's request timeout.
const LEASE: Duration = Duration::from_secs(10 * 60);

/// Everything the deferred worker needs to reproduce a foreground upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTask {
    pub name: String,
    pub contents: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Enqueued,
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: TaskId,
    pub task: UploadTask,
    pub status: TaskStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub not_before_unix: i64,
    /// Remote file created by an earlier attempt, reused on retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// While `Running`, no other runner takes the task before this time.
    #[serde(default)]
    pub lease_until_unix: i64,
}

impl QueuedTask {
    fn is_due(&self, now: i64) -> bool {
        match self.status {
            TaskStatus::Enqueued => self.not_before_unix <= now,
            TaskStatus::Running => self.lease_until_unix <= now,
            TaskStatus::Succeeded | TaskStatus::Failed(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkEvent {
    Started {
        id: TaskId,
        name: String,
    },
    Succeeded {
        id: TaskId,
        name: String,
        file_id: String,
    },
    Retrying {
        id: TaskId,
        name: String,
        error: String,
        delay_secs: u64,
    },
    Failed {
        id: TaskId,
        name: String,
        error: String,
    },
}

/// Hands uploads to something that runs them outside the caller's control flow.
pub trait TaskDispatcher: Send + Sync {
    /// Attaches the storage client later tasks execute against.
    fn bind(&self, storage: Arc<dyn StorageApi>) -> Result<()>;

    fn enqueue(&self, task: UploadTask) -> Result<TaskId>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.worker.max_attempts.max(1),
            initial_backoff: Duration::from_secs(config.worker.backoff_secs),
        }
    }

    /// Exponential backoff after the `attempts`-th failed attempt.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let shift = attempts.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1_u32 << shift)
            .min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Success {
        file_id: String,
    },
    Retry {
        error: String,
        file_id: Option<String>,
    },
    Failure {
        error: String,
    },
}

pub struct UploadWorker;

impl UploadWorker {
    /// Creates the remote file (unless a previous attempt already did) and
    /// writes the contents into it.
    pub fn do_work(
        storage: &dyn StorageApi,
        task: &UploadTask,
        existing_file: Option<&str>,
    ) -> WorkOutcome {
        if task.folder_id.is_empty() {
            return WorkOutcome::Failure {
                error: "task has no folder id".into(),
            };
        }

        let file_id = match existing_file {
            Some(id) => id.to_string(),
            None => match storage.create_file(&task.folder_id, &task.name) {
                Ok(id) => id,
                Err(e) => {
                    return WorkOutcome::Retry {
                        error: format!("{e:#}"),
                        file_id: None,
                    };
                }
            },
        };

        match storage.save_file(&file_id, &task.name, &task.contents) {
            Ok(()) => WorkOutcome::Success { file_id },
            Err(e) => WorkOutcome::Retry {
                error: format!("{e:#}"),
                file_id: Some(file_id),
            },
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
struct PersistedQueue {
    #[serde(default)]
    next_id: TaskId,
    #[serde(default)]
    tasks: Vec<QueuedTask>,
}

struct Shared {
    path: PathBuf,
    policy: RetryPolicy,
    poll_interval: Duration,
    manual: AtomicBool,
    lock: Mutex<()>,
    wake: Mutex<Option<Sender<()>>>,
    events: Mutex<Option<Sender<WorkEvent>>>,
}

/// File-backed dispatcher with an optional in-process worker thread.
#[derive(Clone)]
pub struct WorkQueue {
    shared: Arc<Shared>,
}

impl WorkQueue {
    pub fn open(config: &AppConfig) -> Result<Self> {
        Self::open_at(
            config_dir()?.join("queue.json"),
            RetryPolicy::from_config(config),
            Duration::from_secs(config.worker.poll_interval_secs.max(1)),
        )
    }

    pub fn open_at(path: PathBuf, policy: RetryPolicy, poll_interval: Duration) -> Result<Self> {
        Ok(Self {
            shared: Arc::new(Shared {
                path,
                policy,
                poll_interval,
                manual: AtomicBool::new(false),
                lock: Mutex::new(()),
                wake: Mutex::new(None),
                events: Mutex::new(None),
            }),
        })
    }

    /// Binding no longer starts a worker thread; tasks wait for an explicit
    /// `run_pending`. Used by short-lived commands that exit right after
    /// enqueueing.
    pub fn drain_manually(self) -> Self {
        self.shared.manual.store(true, Ordering::SeqCst);
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.shared.path
    }

    /// Events from subsequent task executions. A new subscriber replaces the old one.
    pub fn subscribe(&self) -> Receiver<WorkEvent> {
        let (tx, rx) = mpsc::channel();
        *lock(&self.shared.events) = Some(tx);
        rx
    }

    pub fn tasks(&self) -> Result<Vec<QueuedTask>> {
        let _guard = lock(&self.shared.lock);
        let _file = self.shared.lock_file()?;
        Ok(self.shared.load()?.tasks)
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self
            .tasks()?
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Enqueued | TaskStatus::Running))
            .count())
    }

    /// Drops succeeded tasks, returning how many were removed.
    pub fn prune_finished(&self) -> Result<usize> {
        self.shared.update(|q| {
            let before = q.tasks.len();
            q.tasks.retain(|t| t.status != TaskStatus::Succeeded);
            before - q.tasks.len()
        })
    }

    /// Executes every task that is due now, one at a time.
    pub fn run_pending(&self, storage: &dyn StorageApi) -> Result<Vec<WorkEvent>> {
        self.shared.run_due(storage)
    }

    /// Seconds until the earliest unfinished task becomes due, if any. A
    /// task running elsewhere is due when its lease runs out.
    pub fn next_due_in(&self) -> Result<Option<u64>> {
        let now = now_unix()?;
        Ok(self
            .tasks()?
            .iter()
            .filter_map(|t| match t.status {
                TaskStatus::Enqueued => Some(t.not_before_unix),
                TaskStatus::Running => Some(t.lease_until_unix),
                TaskStatus::Succeeded | TaskStatus::Failed(_) => None,
            })
            .map(|at| u64::try_from(at.saturating_sub(now)).unwrap_or(0))
            .min())
    }
}

impl TaskDispatcher for WorkQueue {
    fn bind(&self, storage: Arc<dyn StorageApi>) -> Result<()> {
        if self.shared.manual.load(Ordering::SeqCst) {
            tracing::debug!(queue = %self.shared.path.display(), "queue drained manually");
            return Ok(());
        }
        let mut wake = lock(&self.shared.wake);
        if wake.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(&self.shared);
        let poll = self.shared.poll_interval;
        thread::Builder::new()
            .name("drivebackup-worker".into())
            .spawn(move || worker_loop(weak, storage, rx, poll))
            .context("failed to spawn upload worker")?;
        *wake = Some(tx);
        tracing::debug!(queue = %self.shared.path.display(), "upload worker bound");
        Ok(())
    }

    fn enqueue(&self, task: UploadTask) -> Result<TaskId> {
        let name = task.name.clone();
        let id = self.shared.update(|q| {
            let id = q.next_id;
            q.next_id += 1;
            q.tasks.push(QueuedTask {
                id,
                task,
                status: TaskStatus::Enqueued,
                attempts: 0,
                not_before_unix: 0,
                file_id: None,
                last_error: None,
                lease_until_unix: 0,
            });
            id
        })?;
        tracing::info!(task = id, name = %name, "upload enqueued");

        if let Some(tx) = lock(&self.shared.wake).as_ref() {
            let _ = tx.send(());
        }
        Ok(id)
    }
}

impl Shared {
    /// Exclusive lock shared with every other process using the same queue
    /// file. Released when the returned handle is dropped.
    fn lock_file(&self) -> Result<File> {
        let path = sibling(&self.path, "lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.lock()
            .with_context(|| format!("failed to lock {}", path.display()))?;
        Ok(file)
    }

    /// Reads the queue. A file that no longer parses is moved aside to
    /// `queue.json.corrupt` and the queue starts empty.
    fn load(&self) -> Result<PersistedQueue> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PersistedQueue::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read queue {}", self.path.display()));
            }
        };
        match serde_json::from_str(&raw) {
            Ok(queue) => Ok(queue),
            Err(e) => {
                let aside = sibling(&self.path, "corrupt");
                tracing::warn!(
                    queue = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "queue file is unreadable, starting empty"
                );
                fs::rename(&self.path, &aside)
                    .with_context(|| format!("failed to move {} aside", self.path.display()))?;
                Ok(PersistedQueue::default())
            }
        }
    }

    fn save(&self, queue: &PersistedQueue) -> Result<()> {
        let raw = serde_json::to_string_pretty(queue).context("failed to encode queue json")?;
        write_atomic(&self.path, raw.as_bytes())
            .with_context(|| format!("failed to write queue {}", self.path.display()))
    }

    /// Read-modify-write under both locks. The file is re-read every time so
    /// changes made by other processes are never overwritten.
    fn update<T>(&self, f: impl FnOnce(&mut PersistedQueue) -> T) -> Result<T> {
        let _guard = lock(&self.lock);
        let _file = self.lock_file()?;
        let mut queue = self.load()?;
        let out = f(&mut queue);
        self.save(&queue)?;
        Ok(out)
    }

    /// Marks the next due task `Running` and leases it to this runner. A
    /// `Running` task whose lease ran out belongs to a runner that stopped,
    /// so it is taken again.
    fn take_due(&self) -> Result<Option<QueuedTask>> {
        let now = now_unix()?;
        self.update(|q| {
            let next = q.tasks.iter_mut().find(|t| t.is_due(now))?;
            if next.status == TaskStatus::Running {
                tracing::warn!(task = next.id, attempt = next.attempts, "reclaiming abandoned upload");
            }
            next.status = TaskStatus::Running;
            next.attempts += 1;
            next.lease_until_unix = now.saturating_add_unsigned(LEASE.as_secs());
            Some(next.clone())
        })
    }

    fn run_due(&self, storage: &dyn StorageApi) -> Result<Vec<WorkEvent>> {
        let mut events = Vec::new();
        while let Some(queued) = self.take_due()? {
            let started = WorkEvent::Started {
                id: queued.id,
                name: queued.task.name.clone(),
            };
            self.emit(started.clone());
            events.push(started);

            tracing::info!(task = queued.id, attempt = queued.attempts, "running deferred upload");
            let outcome = UploadWorker::do_work(storage, &queued.task, queued.file_id.as_deref());
            let event = self.finish(&queued, outcome)?;
            self.emit(event.clone());
            events.push(event);
        }
        Ok(events)
    }

    fn finish(&self, queued: &QueuedTask, outcome: WorkOutcome) -> Result<WorkEvent> {
        let now = now_unix()?;
        let policy = self.policy;
        let (id, name, attempts) = (queued.id, queued.task.name.clone(), queued.attempts);
        let mut created = None;

        let event = match outcome {
            WorkOutcome::Success { file_id } => {
                tracing::info!(task = id, file = %file_id, "deferred upload finished");
                created = Some(file_id.clone());
                WorkEvent::Succeeded { id, name, file_id }
            }
            WorkOutcome::Retry { error, file_id } => {
                created = file_id;
                if attempts >= policy.max_attempts {
                    tracing::error!(task = id, attempts, error = %error, "deferred upload gave up");
                    WorkEvent::Failed { id, name, error }
                } else {
                    let delay = policy.delay_for(attempts);
                    tracing::warn!(
                        task = id,
                        attempts,
                        error = %error,
                        delay_secs = delay.as_secs(),
                        "deferred upload will retry"
                    );
                    WorkEvent::Retrying {
                        id,
                        name,
                        error,
                        delay_secs: delay.as_secs(),
                    }
                }
            }
            WorkOutcome::Failure { error } => {
                tracing::error!(task = id, error = %error, "deferred upload failed");
                WorkEvent::Failed { id, name, error }
            }
        };

        let recorded = self.update(|q| {
            // The attempt number identifies the lease this runner holds.
            let Some(t) = q
                .tasks
                .iter_mut()
                .find(|t| t.id == id && t.status == TaskStatus::Running && t.attempts == attempts)
            else {
                return false;
            };
            t.lease_until_unix = 0;
            if created.is_some() {
                t.file_id = created;
            }
            match &event {
                WorkEvent::Succeeded { .. } => {
                    t.status = TaskStatus::Succeeded;
                    t.last_error = None;
                }
                WorkEvent::Retrying {
                    error, delay_secs, ..
                } => {
                    t.status = TaskStatus::Enqueued;
                    t.not_before_unix = now.saturating_add_unsigned(*delay_secs);
                    t.last_error = Some(error.clone());
                }
                WorkEvent::Failed { error, .. } => {
                    t.status = TaskStatus::Failed(error.clone());
                    t.last_error = Some(error.clone());
                }
                WorkEvent::Started { .. } => {}
            }
            true
        })?;
        if !recorded {
            tracing::warn!(task = id, attempt = attempts, "task was taken over, result not recorded");
        }
        Ok(event)
    }

    fn emit(&self, event: WorkEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }
}

fn worker_loop(
    shared: Weak<Shared>,
    storage: Arc<dyn StorageApi>,
    rx: Receiver<()>,
    poll: Duration,
) {
    loop {
        {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if let Err(e) = shared.run_due(storage.as_ref()) {
                tracing::warn!(error = %format!("{e:#}"), "upload worker pass failed");
            }
        }
        match rx.recv_timeout(poll) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingStorage};

    fn task(name: &str) -> UploadTask {
        UploadTask {
            name: name.into(),
            contents: format!("contents of {}", name),
            folder_id: "folder-1".into(),
        }
    }

    fn queue_in(dir: &tempfile::TempDir, max_attempts: u32, backoff_secs: u64) -> WorkQueue {
        WorkQueue::open_at(
            dir.path().join("queue.json"),
            RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_secs(backoff_secs),
            },
            Duration::from_millis(20),
        )
        .unwrap()
    }

    fn creates(storage: &RecordingStorage) -> usize {
        storage
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateFile { .. }))
            .count()
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
        assert_eq!(policy.delay_for(40), MAX_BACKOFF);
    }

    #[test]
    fn worker_creates_then_saves() {
        let storage = RecordingStorage::new();
        let outcome = UploadWorker::do_work(&storage, &task("notes.txt"), None);

        assert_eq!(
            outcome,
            WorkOutcome::Success {
                file_id: "file-1".into()
            }
        );
        assert_eq!(
            storage.calls(),
            vec![
                Call::CreateFile {
                    parent_id: "folder-1".into(),
                    name: "notes.txt".into()
                },
                Call::SaveFile {
                    file_id: "file-1".into(),
                    name: "notes.txt".into(),
                    contents: "contents of notes.txt".into()
                },
            ]
        );
    }

    #[test]
    fn worker_reuses_file_from_earlier_attempt() {
        let storage = RecordingStorage::new();
        let outcome = UploadWorker::do_work(&storage, &task("a.txt"), Some("file-7"));

        assert!(matches!(outcome, WorkOutcome::Success { ref file_id } if file_id == "file-7"));
        assert_eq!(storage.calls().len(), 1);
    }

    #[test]
    fn worker_without_folder_fails_permanently() {
        let storage = RecordingStorage::new();
        let mut t = task("a.txt");
        t.folder_id.clear();
        assert!(matches!(
            UploadWorker::do_work(&storage, &t, None),
            WorkOutcome::Failure { .. }
        ));
        assert!(storage.calls().is_empty());
    }

    #[test]
    fn enqueue_persists_typed_task() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);

        let first = queue.enqueue(task("a.txt")).unwrap();
        let second = queue.enqueue(task("b.txt")).unwrap();
        assert_eq!((first, second), (0, 1));

        let reopened = queue_in(&dir, 3, 30);
        let tasks = reopened.tasks().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].task, task("b.txt"));
        assert_eq!(tasks[1].status, TaskStatus::Enqueued);
        assert_eq!(reopened.pending_count().unwrap(), 2);
        assert_eq!(reopened.enqueue(task("c.txt")).unwrap(), 2);
    }

    #[test]
    fn run_pending_executes_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);
        queue.enqueue(task("a.txt")).unwrap();
        queue.enqueue(task("b.txt")).unwrap();
        let storage = RecordingStorage::new();

        let events = queue.run_pending(&storage).unwrap();

        let succeeded: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, WorkEvent::Succeeded { .. }))
            .collect();
        assert_eq!(succeeded.len(), 2);
        assert_eq!(storage.calls().len(), 4);
        assert_eq!(queue.pending_count().unwrap(), 0);
        assert_eq!(queue.prune_finished().unwrap(), 2);
        assert!(queue.tasks().unwrap().is_empty());
    }

    #[test]
    fn failed_save_is_retried_later_without_recreating() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);
        queue.enqueue(task("a.txt")).unwrap();
        let storage = RecordingStorage::new().fail_saves(1);

        let events = queue.run_pending(&storage).unwrap();
        assert!(matches!(
            events.last(),
            Some(WorkEvent::Retrying { delay_secs: 30, .. })
        ));

        let stored = &queue.tasks().unwrap()[0];
        assert_eq!(stored.status, TaskStatus::Enqueued);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.file_id.as_deref(), Some("file-1"));
        assert!(stored.not_before_unix > now_unix().unwrap());
        assert!(queue.next_due_in().unwrap().unwrap() > 0);

        // Not due yet, so a second pass does nothing.
        assert!(queue.run_pending(&storage).unwrap().is_empty());
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 2, 0);
        queue.enqueue(task("a.txt")).unwrap();
        let storage = RecordingStorage::new().fail_creates(5);

        let events = queue.run_pending(&storage).unwrap();

        assert!(matches!(events.last(), Some(WorkEvent::Failed { .. })));
        let stored = &queue.tasks().unwrap()[0];
        assert!(matches!(stored.status, TaskStatus::Failed(_)));
        assert_eq!(stored.attempts, 2);
        assert_eq!(creates(&storage), 2);
    }

    #[test]
    fn opening_never_touches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);
        queue.enqueue(task("a.txt")).unwrap();
        queue.shared.take_due().unwrap().unwrap();

        let _other = queue_in(&dir, 3, 30);
        let stored = &queue.tasks().unwrap()[0];
        assert_eq!(stored.status, TaskStatus::Running);
        assert!(stored.lease_until_unix > now_unix().unwrap());
    }

    #[test]
    fn task_of_a_stopped_runner_is_taken_once_its_lease_expires() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);
        queue.enqueue(task("a.txt")).unwrap();
        queue
            .shared
            .update(|q| {
                q.tasks[0].status = TaskStatus::Running;
                q.tasks[0].attempts = 1;
                q.tasks[0].lease_until_unix = now_unix().unwrap() - 1;
            })
            .unwrap();
        drop(queue);

        let reopened = queue_in(&dir, 3, 30);
        let storage = RecordingStorage::new();
        let events = reopened.run_pending(&storage).unwrap();

        assert!(matches!(events.last(), Some(WorkEvent::Succeeded { .. })));
        let stored = &reopened.tasks().unwrap()[0];
        assert_eq!(stored.status, TaskStatus::Succeeded);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.lease_until_unix, 0);
    }

    #[test]
    fn task_running_in_another_queue_is_not_executed_twice() {
        let dir = tempfile::tempdir().unwrap();
        let first = queue_in(&dir, 3, 30);
        first.enqueue(task("a.txt")).unwrap();
        let taken = first.shared.take_due().unwrap().unwrap();

        let second = queue_in(&dir, 3, 30);
        let storage = RecordingStorage::new();
        assert!(second.run_pending(&storage).unwrap().is_empty());
        assert!(second.next_due_in().unwrap().unwrap() > 0);

        let outcome = UploadWorker::do_work(&storage, &taken.task, taken.file_id.as_deref());
        first.shared.finish(&taken, outcome).unwrap();
        assert!(second.run_pending(&storage).unwrap().is_empty());

        assert_eq!(creates(&storage), 1);
        assert_eq!(second.tasks().unwrap()[0].status, TaskStatus::Succeeded);
    }

    #[test]
    fn late_result_of_a_reclaimed_task_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let first = queue_in(&dir, 3, 30);
        first.enqueue(task("a.txt")).unwrap();
        let taken = first.shared.take_due().unwrap().unwrap();
        first
            .shared
            .update(|q| q.tasks[0].lease_until_unix = now_unix().unwrap() - 1)
            .unwrap();

        let second = queue_in(&dir, 3, 30);
        let storage = RecordingStorage::new();
        assert_eq!(second.run_pending(&storage).unwrap().len(), 2);

        first
            .shared
            .finish(
                &taken,
                WorkOutcome::Retry {
                    error: "connection reset".into(),
                    file_id: Some("file-stale".into()),
                },
            )
            .unwrap();

        let stored = &second.tasks().unwrap()[0];
        assert_eq!(stored.status, TaskStatus::Succeeded);
        assert_eq!(stored.file_id.as_deref(), Some("file-1"));
        assert_eq!(stored.last_error, None);
    }

    #[test]
    fn task_enqueued_by_an_exited_process_is_drained_by_another() {
        let dir = tempfile::tempdir().unwrap();
        {
            let short_lived = queue_in(&dir, 3, 30).drain_manually();
            short_lived.bind(Arc::new(RecordingStorage::new())).unwrap();
            short_lived.enqueue(task("a.txt")).unwrap();
        }

        let worker = queue_in(&dir, 3, 30);
        let storage = RecordingStorage::new();
        let events = worker.run_pending(&storage).unwrap();

        assert_eq!(
            events,
            vec![
                WorkEvent::Started {
                    id: 0,
                    name: "a.txt".into()
                },
                WorkEvent::Succeeded {
                    id: 0,
                    name: "a.txt".into(),
                    file_id: "file-1".into()
                },
            ]
        );
        assert_eq!(worker.pending_count().unwrap(), 0);
    }

    #[test]
    fn concurrent_queues_on_one_file_lose_no_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let queues = [queue_in(&dir, 3, 30), queue_in(&dir, 3, 30)];

        thread::scope(|s| {
            for (n, queue) in queues.iter().enumerate() {
                s.spawn(move || {
                    for i in 0..25 {
                        queue.enqueue(task(&format!("q{}-{}.txt", n, i))).unwrap();
                    }
                });
            }
        });

        let mut ids: Vec<_> = queues[0].tasks().unwrap().iter().map(|t| t.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_runners_execute_each_task_once() {
        let dir = tempfile::tempdir().unwrap();
        let queues = [queue_in(&dir, 3, 30), queue_in(&dir, 3, 30)];
        for i in 0..10 {
            queues[0].enqueue(task(&format!("{}.txt", i))).unwrap();
        }
        let storage = RecordingStorage::new();

        thread::scope(|s| {
            for queue in &queues {
                let storage = &storage;
                s.spawn(move || queue.run_pending(storage).unwrap());
            }
        });

        assert_eq!(creates(&storage), 10);
        assert!(
            queues[1]
                .tasks()
                .unwrap()
                .iter()
                .all(|t| t.status == TaskStatus::Succeeded && t.attempts == 1)
        );
    }

    #[test]
    fn truncated_queue_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let damaged = r#"{"next_id":1,"tasks":[{"id":0,"#;
        fs::write(&path, damaged).unwrap();

        let queue = queue_in(&dir, 3, 30);
        assert!(queue.tasks().unwrap().is_empty());
        assert_eq!(
            fs::read_to_string(dir.path().join("queue.json.corrupt")).unwrap(),
            damaged
        );

        assert_eq!(queue.enqueue(task("a.txt")).unwrap(), 0);
        assert_eq!(queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn saving_leaves_only_the_queue_and_its_lock() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);
        queue.enqueue(task("a.txt")).unwrap();
        queue.run_pending(&RecordingStorage::new()).unwrap();

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["queue.json", "queue.json.lock"]);
    }

    #[test]
    fn manual_queue_does_not_start_worker() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30).drain_manually();
        let storage = Arc::new(RecordingStorage::new());

        queue.bind(storage.clone()).unwrap();
        queue.enqueue(task("a.txt")).unwrap();
        thread::sleep(Duration::from_millis(100));

        assert!(storage.calls().is_empty());
        assert_eq!(queue.pending_count().unwrap(), 1);
        assert_eq!(queue.run_pending(storage.as_ref()).unwrap().len(), 2);
    }

    #[test]
    fn manual_queue_reads_nothing_until_asked() {
        let dir = tempfile::tempdir().unwrap();
        let unreadable = dir.path().join("queue.json");
        fs::create_dir(&unreadable).unwrap();

        let queue = WorkQueue::open_at(
            unreadable,
            RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_secs(30),
            },
            Duration::from_millis(20),
        )
        .unwrap()
        .drain_manually();
        queue.bind(Arc::new(RecordingStorage::new())).unwrap();

        assert!(queue.tasks().is_err());
    }

    #[test]
    fn bound_worker_drains_new_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_in(&dir, 3, 30);
        let events = queue.subscribe();
        let storage = Arc::new(RecordingStorage::new());

        queue.bind(storage.clone()).unwrap();
        queue.bind(storage.clone()).unwrap();
        queue.enqueue(task("late.txt")).unwrap();

        let done = loop {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                WorkEvent::Succeeded { name, .. } => break name,
                WorkEvent::Started { .. } => continue,
                other => panic!("unexpected event {other:?}"),
            }
        };
        assert_eq!(done, "late.txt");
        assert_eq!(storage.calls().len(), 2);
    }
}
