// src/communication/relay.rs - Forwards controller status to a remote intake worker
use crate::config::RelayConfig;
use crate::controller::{ControllerStatus, ThermalController};
use crate::scheduler::{ScheduleStatus, Scheduler};
use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Line the worker prints once it is ready to receive status.
pub const READY_LINE: &str = "ready";

/// Floor on the retry delay after a failed spawn.
const SPAWN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Status lines queued for a worker that is slow to read its stdin.
const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to start relay worker: {0}")]
    Spawn(#[from] io::Error),
    #[error("Relay worker did not provide {0}")]
    MissingPipe(&'static str),
}

/// Event sources the relay forwards once the worker is ready.
#[async_trait]
pub trait StatusSources: Send + Sync {
    fn subscribe_controller(&self) -> broadcast::Receiver<ControllerStatus>;
    fn subscribe_schedule(&self) -> broadcast::Receiver<ScheduleStatus>;
    /// Ask for a schedule status to be published on the schedule channel.
    async fn request_schedule_snapshot(&self);
}

/// The running controller and scheduler as relay sources.
#[derive(Clone)]
pub struct KilnSources {
    pub controller: ThermalController,
    pub scheduler: Scheduler,
}

#[async_trait]
impl StatusSources for KilnSources {
    fn subscribe_controller(&self) -> broadcast::Receiver<ControllerStatus> {
        self.controller.subscribe()
    }

    fn subscribe_schedule(&self) -> broadcast::Receiver<ScheduleStatus> {
        self.scheduler.subscribe()
    }

    async fn request_schedule_snapshot(&self) {
        self.scheduler.announce().await;
    }
}

/// A connected worker: its stdio plus a future that resolves when it exits.
/// Dropping it terminates the worker.
pub struct Worker {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Box<dyn AsyncRead + Send + Unpin>,
    pub exited: BoxFuture<'static, ()>,
}

pub trait WorkerLauncher: Send + Sync {
    fn launch(&self) -> Result<Worker, RelayError>;
}

/// Runs the intake script on the remote host over `ssh`.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    program: String,
    args: Vec<String>,
}

impl SshLauncher {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: vec![
                "-i".to_string(),
                config.identity_file.clone(),
                format!("{}@{}", config.user, config.hostname),
                config.node_path.clone(),
                config.intake_path.clone(),
            ],
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl WorkerLauncher for SshLauncher {
    fn launch(&self) -> Result<Worker, RelayError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or(RelayError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(RelayError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(RelayError::MissingPipe("stderr"))?;

        let exited = async move {
            match child.wait().await {
                Ok(status) => tracing::info!("ssh process exited: {}", status),
                Err(e) => tracing::warn!("Failed to wait for ssh process: {}", e),
            }
        }
        .boxed();

        Ok(Worker {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            exited,
        })
    }
}

enum SessionEnd {
    /// The owner closed the link.
    Closed,
    /// The worker went away on its own.
    Disconnected,
}

/// Keeps one worker connected, reconnecting whenever it goes away until
/// [`close`](RelayLink::close) is called.
pub struct RelayLink {
    closed: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayLink {
    pub fn spawn(
        launcher: Arc<dyn WorkerLauncher>,
        sources: Arc<dyn StatusSources>,
        reconnect_delay: Duration,
    ) -> Self {
        let (closed, closed_rx) = watch::channel(false);
        let task = tokio::spawn(run(launcher, sources, reconnect_delay, closed_rx));
        Self { closed, task }
    }

    /// Stop reconnecting and terminate the current worker. Safe to call twice.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            tracing::info!("Closing relay link");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait for the link task to finish after [`close`](Self::close).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Relay task failed: {}", e);
        }
    }
}

async fn run(
    launcher: Arc<dyn WorkerLauncher>,
    sources: Arc<dyn StatusSources>,
    reconnect_delay: Duration,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        if *closed.borrow_and_update() {
            break;
        }

        let delay = match launcher.launch() {
            Ok(worker) => match session(worker, sources.as_ref(), &mut closed).await {
                SessionEnd::Closed => break,
                SessionEnd::Disconnected => {
                    tracing::info!("ssh process closed");
                    reconnect_delay
                }
            },
            Err(e) => {
                tracing::error!("{}", e);
                reconnect_delay.max(SPAWN_RETRY_DELAY)
            }
        };

        if !delay.is_zero() {
            tokio::select! {
                _ = closed.changed() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
    tracing::debug!("Relay link stopped");
}

async fn session(
    worker: Worker,
    sources: &dyn StatusSources,
    closed: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let Worker {
        stdin,
        stdout,
        stderr,
        mut exited,
    } = worker;
    let (outbox, writer) = spawn_writer(stdin);
    let _writer = AbortOnDrop(writer);
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();
    let (mut stdout_open, mut stderr_open, mut running) = (true, true, true);

    let mut controller_rx: Option<broadcast::Receiver<ControllerStatus>> = None;
    let mut schedule_rx: Option<broadcast::Receiver<ScheduleStatus>> = None;
    let mut accumulated = Map::new();

    while running || stdout_open || stderr_open {
        tokio::select! {
            _ = closed.changed() => return SessionEnd::Closed,
            _ = &mut exited, if running => running = false,
            line = stdout.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    if line == READY_LINE {
                        accumulated.clear();
                        controller_rx = Some(sources.subscribe_controller());
                        schedule_rx = Some(sources.subscribe_schedule());
                        sources.request_schedule_snapshot().await;
                    }
                    if !line.is_empty() {
                        tracing::info!("ssh: {}", line);
                    }
                }
                Ok(None) => stdout_open = false,
                Err(e) => {
                    tracing::warn!("Relay stdout failed: {}", e);
                    stdout_open = false;
                }
            },
            line = stderr.next_line(), if stderr_open => match line {
                Ok(Some(line)) => {
                    if !line.is_empty() {
                        tracing::warn!("ssh stderr: {}", line);
                    }
                }
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::warn!("Relay stderr failed: {}", e);
                    stderr_open = false;
                }
            },
            update = recv_update(&mut controller_rx) => match update {
                Ok(status) => {
                    merge_into(&mut accumulated, &status);
                    queue_line(&outbox, &accumulated);
                }
                Err(RecvError::Lagged(n)) => tracing::debug!("Relay skipped {} controller updates", n),
                Err(RecvError::Closed) => controller_rx = None,
            },
            update = recv_update(&mut schedule_rx) => match update {
                Ok(status) => match serde_json::to_value(&status) {
                    Ok(value) => {
                        accumulated.insert("schedule".to_string(), value);
                    }
                    Err(e) => tracing::warn!("Failed to encode schedule status: {}", e),
                },
                Err(RecvError::Lagged(n)) => tracing::debug!("Relay skipped {} schedule updates", n),
                Err(RecvError::Closed) => schedule_rx = None,
            },
        }
    }
    SessionEnd::Disconnected
}

async fn recv_update<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn merge_into(accumulated: &mut Map<String, Value>, status: &ControllerStatus) {
    match serde_json::to_value(status) {
        Ok(Value::Object(fields)) => accumulated.extend(fields),
        Ok(_) => {}
        Err(e) => tracing::warn!("Failed to encode controller status: {}", e),
    }
}

/// Stdin writes run on their own task so a worker that stops reading can
/// never stall the session loop.
fn spawn_writer(
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
) -> (mpsc::Sender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);
    let task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            // The worker may be shutting down; the next connection resumes delivery
            let result = async {
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = result {
                tracing::debug!("Relay write dropped: {}", e);
            }
        }
    });
    (tx, task)
}

fn queue_line(outbox: &mpsc::Sender<String>, accumulated: &Map<String, Value>) {
    let mut line = Value::Object(accumulated.clone()).to_string();
    line.push('\n');
    if let Err(e) = outbox.try_send(line) {
        tracing::debug!("Relay line dropped: {}", e);
    }
}

/// Stops the writer (and closes the worker's stdin) when the session ends.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
