//! Worker pool that runs task launches off the interaction path.
//!
//! Requests go through a crossbeam queue to a fixed set of worker threads.
//! A worker marks the tasks `started` when it picks a request up, runs the
//! executor, then reports through `StateStore::record_run`. Each launch can
//! be cancelled through its `CancelToken`; `shutdown` stops the queue,
//! cancels whatever is still running and joins the workers with a deadline.

pub mod executor;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::state::types::{RunStatus, RuntimePatch};
use crate::state::StateStore;

pub use executor::{
    build_command_line, build_parallel_lines, CommandExecutor, DryRunExecutor, ExecutionOutcome,
    ShellExecutor,
};

const JOIN_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Launch pool is shut down")]
    ShutDown,

    #[error("Launch request has no tasks")]
    EmptyRequest,

    #[error("Launching is disabled for this hub")]
    Disabled,

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start launch worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Launch worker exited before reporting")]
    Disconnected,
}

/// Shared stop flag for one launch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub id: Uuid,
    pub task_names: Vec<String>,
    pub taskfile: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(task_names: Vec<String>, taskfile: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_names,
            taskfile,
        }
    }
}

/// Final word on one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub id: Uuid,
    pub task_names: Vec<String>,
    /// `None` when the launch was cancelled before a worker picked it up.
    pub status: Option<RunStatus>,
    pub output: String,
    pub cancelled: bool,
}

impl LaunchReport {
    pub fn is_success(&self) -> bool {
        self.status == Some(RunStatus::Success)
    }
}

/// Caller side of a submitted launch.
pub struct LaunchHandle {
    id: Uuid,
    cancel: CancelToken,
    done: Receiver<LaunchReport>,
}

impl LaunchHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn wait(&self) -> Result<LaunchReport, LaunchError> {
        self.done.recv().map_err(|_| LaunchError::Disconnected)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<LaunchReport, LaunchError> {
        match self.done.recv_timeout(timeout) {
            Ok(report) => Ok(report),
            Err(RecvTimeoutError::Timeout) => Err(LaunchError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(LaunchError::Disconnected),
        }
    }

    /// Non-blocking check for a finished launch.
    pub fn try_report(&self) -> Option<LaunchReport> {
        self.done.try_recv().ok()
    }
}

struct Job {
    request: LaunchRequest,
    cancel: CancelToken,
    done: Sender<LaunchReport>,
}

type ActiveLaunches = Arc<Mutex<IndexMap<Uuid, CancelToken>>>;

fn lock_active(active: &ActiveLaunches) -> MutexGuard<'_, IndexMap<Uuid, CancelToken>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct LaunchPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active: ActiveLaunches,
    stopped: Arc<AtomicBool>,
}

impl LaunchPool {
    pub fn new(
        worker_count: usize,
        store: Arc<StateStore>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self, LaunchError> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let active: ActiveLaunches = Arc::new(Mutex::new(IndexMap::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = receiver.clone();
            let store = Arc::clone(&store);
            let executor = Arc::clone(&executor);
            let active = Arc::clone(&active);

            let handle = std::thread::Builder::new()
                .name(format!("taskhub-launch-{}", index))
                .spawn(move || worker_loop(index, receiver, store, executor, active))
                .map_err(LaunchError::Worker)?;
            workers.push(handle);
        }

        tracing::info!(target: "launcher", workers = worker_count, "Launch pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            active,
            stopped,
        })
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Launches queued or running right now.
    pub fn active_count(&self) -> usize {
        lock_active(&self.active).len()
    }

    /// Queue one launch running all `task_names` in a single runner invocation.
    pub fn submit(
        &self,
        task_names: Vec<String>,
        taskfile: Option<PathBuf>,
    ) -> Result<LaunchHandle, LaunchError> {
        if task_names.is_empty() {
            return Err(LaunchError::EmptyRequest);
        }
        self.enqueue(LaunchRequest::new(task_names, taskfile))
    }

    /// Queue one launch per task so they can run side by side.
    pub fn submit_parallel(
        &self,
        task_names: &[String],
        taskfile: Option<PathBuf>,
    ) -> Result<Vec<LaunchHandle>, LaunchError> {
        if task_names.is_empty() {
            return Err(LaunchError::EmptyRequest);
        }
        let requests = task_names
            .iter()
            .map(|name| LaunchRequest::new(vec![name.clone()], taskfile.clone()))
            .collect();
        enqueue_all(requests, |request| self.enqueue(request))
    }

    fn enqueue(&self, request: LaunchRequest) -> Result<LaunchHandle, LaunchError> {
        if self.is_shut_down() {
            return Err(LaunchError::ShutDown);
        }

        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = guard.as_ref() else {
            return Err(LaunchError::ShutDown);
        };

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let cancel = CancelToken::new();
        let id = request.id;

        lock_active(&self.active).insert(id, cancel.clone());
        tracing::debug!(target: "launcher", %id, tasks = ?request.task_names, "Launch queued");

        let job = Job {
            request,
            cancel: cancel.clone(),
            done: done_tx,
        };
        if sender.send(job).is_err() {
            lock_active(&self.active).shift_remove(&id);
            return Err(LaunchError::ShutDown);
        }

        Ok(LaunchHandle {
            id,
            cancel,
            done: done_rx,
        })
    }

    pub fn cancel_all(&self) {
        for cancel in lock_active(&self.active).values() {
            cancel.cancel();
        }
    }

    /// Stop accepting launches, cancel the outstanding ones and join the
    /// workers. Workers still running at the deadline are left detached.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), LaunchError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Closing the queue ends each worker loop once the queue is drained
        drop(self.sender.lock().unwrap_or_else(|e| e.into_inner()).take());
        self.cancel_all();

        let deadline = Instant::now() + timeout;
        let mut workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));

        while !workers.is_empty() {
            let (finished, running): (Vec<_>, Vec<_>) =
                workers.into_iter().partition(|handle| handle.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    tracing::error!(target: "launcher", "Launch worker panicked");
                }
            }
            workers = running;

            if workers.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    target: "launcher",
                    remaining = workers.len(),
                    "Launch workers still busy at shutdown deadline"
                );
                return Err(LaunchError::Timeout(timeout));
            }
            std::thread::sleep(JOIN_POLL);
        }

        tracing::info!(target: "launcher", "Launch pool stopped");
        Ok(())
    }
}

impl Drop for LaunchPool {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown(Duration::from_secs(5)) {
            tracing::warn!(target: "launcher", "Launch pool shutdown on drop: {}", e);
        }
    }
}

fn worker_loop(
    index: usize,
    receiver: Receiver<Job>,
    store: Arc<StateStore>,
    executor: Arc<dyn CommandExecutor>,
    active: ActiveLaunches,
) {
    tracing::debug!(target: "launcher", worker = index, "Launch worker started");

    while let Ok(job) = receiver.recv() {
        let id = job.request.id;
        let report = run_job(&job, store.as_ref(), executor.as_ref());
        lock_active(&active).shift_remove(&id);
        // The caller may have dropped its handle
        let _ = job.done.send(report);
    }

    tracing::debug!(target: "launcher", worker = index, "Launch worker exiting");
}

fn run_job(job: &Job, store: &StateStore, executor: &dyn CommandExecutor) -> LaunchReport {
    let request = &job.request;

    if job.cancel.is_cancelled() {
        tracing::info!(target: "launcher", id = %request.id, "Launch cancelled before dispatch");
        return LaunchReport {
            id: request.id,
            task_names: request.task_names.clone(),
            status: None,
            output: String::new(),
            cancelled: true,
        };
    }

    for name in &request.task_names {
        store.update_runtime(name, RuntimePatch::status(RunStatus::Started));
    }

    let (status, output) = match executor.execute(request, &job.cancel) {
        Ok(outcome) => (outcome.status, outcome.output),
        Err(e) => {
            tracing::error!(target: "launcher", id = %request.id, "Launch failed: {}", e);
            (RunStatus::Failed, e.to_string())
        }
    };

    for name in &request.task_names {
        store.record_run(name, status);
    }

    tracing::info!(
        target: "launcher",
        id = %request.id,
        tasks = ?request.task_names,
        %status,
        "Launch finished"
    );

    LaunchReport {
        id: request.id,
        task_names: request.task_names.clone(),
        status: Some(status),
        output,
        cancelled: job.cancel.is_cancelled(),
    }
}

/// Queue every request or none: a refusal cancels the launches already queued.
fn enqueue_all(
    requests: Vec<LaunchRequest>,
    mut enqueue: impl FnMut(LaunchRequest) -> Result<LaunchHandle, LaunchError>,
) -> Result<Vec<LaunchHandle>, LaunchError> {
    let mut handles = Vec::with_capacity(requests.len());
    for request in requests {
        match enqueue(request) {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                for handle in &handles {
                    handle.cancel();
                }
                tracing::warn!(
                    target: "launcher",
                    queued = handles.len(),
                    "Parallel launch refused, cancelling queued launches: {}",
                    e
                );
                return Err(e);
            }
        }
    }
    Ok(handles)
}
