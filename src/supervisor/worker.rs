//! Isolated workers that a supervisor can wait on and terminate.
//!
//! A [`ThreadWorker`] runs a closure on its own OS thread and is stopped
//! through its [`CancelToken`]; a thread that ignores cancellation is
//! detached. A [`ProcessWorker`] runs `emg-agent worker ...` as a child
//! process and is killed outright.

use crate::cancel::CancelToken;
use crate::capture::CaptureJobSpec;
use crate::error::AgentError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Result of waiting on a worker.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    Finished(Result<T, AgentError>),
    StillRunning,
}

/// A unit of supervised work running somewhere else.
pub trait Worker<T>: Send {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Block up to `timeout` for the worker to finish.
    fn wait(&mut self, timeout: Duration) -> WaitOutcome<T>;

    /// Stop the worker. Returns once it is gone or has been given up on.
    fn terminate(&mut self);
}

fn worker_id(name: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{name}-{}", &uuid[..8])
}

/// Worker on a dedicated OS thread.
pub struct ThreadWorker<T> {
    id: String,
    cancel: CancelToken,
    result: Receiver<Result<T, AgentError>>,
    handle: Option<thread::JoinHandle<()>>,
    grace: Duration,
}

impl<T: Send + 'static> ThreadWorker<T> {
    /// How long `terminate` waits for a cancelled thread before detaching it.
    pub const DEFAULT_GRACE: Duration = Duration::from_millis(250);

    pub fn spawn<F>(name: &str, work: F) -> Result<Self, AgentError>
    where
        F: FnOnce(&CancelToken) -> Result<T, AgentError> + Send + 'static,
    {
        let id = worker_id(name);
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let (tx, rx) = bounded(1);

        let handle = thread::Builder::new()
            .name(id.clone())
            .spawn(move || {
                let _ = tx.send(work(&token));
            })
            .map_err(|e| AgentError::Worker(format!("failed to spawn worker thread: {e}")))?;

        Ok(Self {
            id,
            cancel,
            result: rx,
            handle: Some(handle),
            grace: Self::DEFAULT_GRACE,
        })
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.id, "worker thread panicked");
            }
        }
    }
}

impl<T: Send + 'static> Worker<T> for ThreadWorker<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn wait(&mut self, timeout: Duration) -> WaitOutcome<T> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => {
                self.join();
                WaitOutcome::Finished(result)
            }
            Err(RecvTimeoutError::Timeout) => WaitOutcome::StillRunning,
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                WaitOutcome::Finished(Err(AgentError::Worker(format!(
                    "worker {} exited without a result",
                    self.id
                ))))
            }
        }
    }

    fn terminate(&mut self) {
        self.cancel.cancel();
        match self.result.recv_timeout(self.grace) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                self.join();
                tracing::debug!(worker = %self.id, "worker stopped after cancellation");
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(worker = %self.id, "worker ignored cancellation, detaching thread");
                self.handle.take();
            }
        }
    }
}

/// The single stdout line a worker process prints before exiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerReply<T> {
    Ok(T),
    Err { code: String, detail: String },
}

impl<T> WorkerReply<T> {
    pub fn from_result(result: Result<T, AgentError>) -> Self {
        match result {
            Ok(value) => WorkerReply::Ok(value),
            Err(e) => WorkerReply::Err {
                code: e.code().to_string(),
                detail: e.detail(),
            },
        }
    }

    pub fn into_result(self) -> Result<T, AgentError> {
        match self {
            WorkerReply::Ok(value) => Ok(value),
            WorkerReply::Err { code, detail } => Err(AgentError::from_code(&code, detail)),
        }
    }
}

/// Worker in a child process.
pub struct ProcessWorker<T> {
    id: String,
    child: Child,
    exited: bool,
    poll_interval: Duration,
    _output: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ProcessWorker<T> {
    pub fn spawn(name: &str, mut command: Command) -> Result<Self, AgentError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let child = command
            .spawn()
            .map_err(|e| AgentError::Worker(format!("failed to launch worker process: {e}")))?;

        let id = worker_id(name);
        tracing::debug!(worker = %id, pid = child.id(), "worker process launched");

        Ok(Self {
            id,
            child,
            exited: false,
            poll_interval: Duration::from_millis(20),
            _output: PhantomData,
        })
    }

    fn collect(&mut self, status: std::process::ExitStatus) -> Result<T, AgentError> {
        let mut stdout = String::new();
        if let Some(mut pipe) = self.child.stdout.take() {
            pipe.read_to_string(&mut stdout)
                .map_err(|e| AgentError::Worker(format!("failed to read worker output: {e}")))?;
        }

        let reply = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(serde_json::from_str::<WorkerReply<T>>);

        match reply {
            Some(Ok(reply)) => reply.into_result(),
            Some(Err(e)) => Err(AgentError::Worker(format!("malformed worker reply: {e}"))),
            None => Err(AgentError::Worker(format!("worker exited with {status} and no reply"))),
        }
    }
}

impl<T: DeserializeOwned> Worker<T> for ProcessWorker<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn wait(&mut self, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.exited = true;
                    return WaitOutcome::Finished(self.collect(status));
                }
                Ok(None) => {}
                Err(e) => {
                    return WaitOutcome::Finished(Err(AgentError::Worker(format!(
                        "failed to poll worker process: {e}"
                    ))))
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::StillRunning;
            }
            thread::sleep((deadline - now).min(self.poll_interval));
        }
    }

    fn terminate(&mut self) {
        if self.exited {
            return;
        }
        if let Err(e) = self.child.kill() {
            tracing::warn!(worker = %self.id, error = %e, "failed to kill worker process");
        }
        let _ = self.child.wait();
        self.exited = true;
        tracing::debug!(worker = %self.id, "worker process killed");
    }
}

impl<T> Drop for ProcessWorker<T> {
    fn drop(&mut self) {
        if !self.exited {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Work that can be handed to a worker process.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerTask {
    Probe,
    PowerOff,
    Capture(CaptureJobSpec),
}

impl WorkerTask {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerTask::Probe => "probe",
            WorkerTask::PowerOff => "power-off",
            WorkerTask::Capture(_) => "capture",
        }
    }

    /// Arguments for the hidden `worker` subcommand.
    pub fn args(&self) -> Vec<String> {
        match self {
            WorkerTask::Probe | WorkerTask::PowerOff => vec![self.name().to_string()],
            WorkerTask::Capture(spec) => vec![
                self.name().to_string(),
                "--label".to_string(),
                spec.label.to_string(),
                "--millis".to_string(),
                spec.duration.as_millis().to_string(),
                "--mode".to_string(),
                spec.mode.to_string(),
            ],
        }
    }
}

/// How to start a worker process: program plus leading arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerProgram {
    pub program: PathBuf,
    pub base_args: Vec<String>,
}

impl WorkerProgram {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// The running `emg-agent` binary, pointed at `data_dir`.
    pub fn current(data_dir: &std::path::Path) -> Result<Self, AgentError> {
        let program = std::env::current_exe()
            .map_err(|e| AgentError::Worker(format!("cannot locate agent binary: {e}")))?;
        Ok(Self::new(
            program,
            vec![
                "worker".to_string(),
                "--data-dir".to_string(),
                data_dir.display().to_string(),
            ],
        ))
    }

    pub fn command(&self, task: &WorkerTask) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.base_args).args(task.args());
        command
    }
}

/// Chooses thread or process isolation for each launch.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum WorkerSpawner {
    #[default]
    Thread,
    Process(WorkerProgram),
}

impl WorkerSpawner {
    /// Launch `task`. Thread workers run `body`; process workers re-run the
    /// task in a child and ignore `body`.
    pub fn spawn<T, F>(&self, task: &WorkerTask, body: F) -> Result<Box<dyn Worker<T>>, AgentError>
    where
        T: Send + DeserializeOwned + 'static,
        F: FnOnce(&CancelToken) -> Result<T, AgentError> + Send + 'static,
    {
        match self {
            WorkerSpawner::Thread => Ok(Box::new(ThreadWorker::spawn(task.name(), body)?)),
            WorkerSpawner::Process(program) => Ok(Box::new(ProcessWorker::spawn(
                task.name(),
                program.command(task),
            )?)),
        }
    }
}
