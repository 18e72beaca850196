//! A pool of compiler worker subprocesses.
//!
//! Each worker reads one request per line on stdin: shell-quoted tokens, the
//! first being a dotted function name. It answers with any number of output
//! lines followed by [`SUCCESS`] or [`ERROR`]. A new worker announces itself
//! with [`READY`] once it can be interrupted. Workers are reused; at most
//! `max_workers` of them exist at any time.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use crate::Config;

pub const SUCCESS: &str = "---- SUCCESS ----";
pub const ERROR: &str = "---- ERROR ----";
pub const READY: &str = "---- READY ----";

const WORKER_LOG_TARGET: &str = "fontgoggles::worker";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker {pid} closed its output in the middle of a job")]
    BrokenWorker { pid: u32 },

    #[error("Could not start worker {program:?}: {source}")]
    Spawn { program: PathBuf, source: io::Error },

    #[error("IO error talking to worker: {0}")]
    Io(#[from] io::Error),

    #[error("Cancelled")]
    Cancelled,

    #[error("The worker pool has been shut down")]
    Closed,
}

/// A handle for cancelling in-flight pool calls. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

struct Worker {
    child: Child,
    pid: u32,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    ready: bool,
}

impl Worker {
    fn spawn(inner: &PoolInner) -> Result<Worker, PoolError> {
        let spawn_error = |source| PoolError::Spawn {
            program: inner.program.clone(),
            source,
        };
        let mut child = Command::new(&inner.program)
            .args(&inner.args)
            .envs(inner.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        let missing = |what: &str| {
            spawn_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("worker {what} not captured"),
            ))
        };
        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!(target: WORKER_LOG_TARGET, "[{pid}] {line}");
                }
            });
        }
        log::info!("Started compiler worker {pid}");
        Ok(Worker {
            child,
            pid,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            ready: false,
        })
    }

    /// Wait for the worker's [`READY`] line. Anything before it is logged.
    async fn wait_ready(&mut self) -> Result<(), PoolError> {
        while !self.ready {
            let line = self.next_line().await?;
            if line == READY {
                log::debug!("Worker {} is ready", self.pid);
                self.ready = true;
            } else {
                log::debug!(target: WORKER_LOG_TARGET, "[{}] {line}", self.pid);
            }
        }
        Ok(())
    }

    async fn send(&mut self, request: &str) -> io::Result<()> {
        self.stdin.write_all(request.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    /// The next output line, or `BrokenWorker` if stdout was closed.
    async fn next_line(&mut self) -> Result<String, PoolError> {
        match self.stdout.next_line().await? {
            Some(line) => Ok(line),
            None => Err(PoolError::BrokenWorker { pid: self.pid }),
        }
    }

    #[cfg(unix)]
    fn interrupt(&mut self) {
        log::debug!("Interrupting worker {}", self.pid);
        // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs
        // to a child we have not yet reaped.
        let result = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGINT) };
        if result != 0 {
            log::warn!(
                "Could not interrupt worker {}: {}",
                self.pid,
                io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) {
        log::debug!("Stopping worker {}", self.pid);
        let _ = self.child.start_kill();
    }

    /// Read and discard output up to the end of the current job. Returns the
    /// job's error flag.
    async fn drain(&mut self) -> Result<bool, PoolError> {
        loop {
            match self.next_line().await?.as_str() {
                SUCCESS => return Ok(false),
                ERROR => return Ok(true),
                _ => {}
            }
        }
    }
}

struct PoolState {
    idle: VecDeque<Worker>,
    /// Live workers, idle or busy.
    total: usize,
}

struct PoolInner {
    max_workers: usize,
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn checkout(&self) -> Result<Worker, PoolError> {
        let mut state = self.state.lock();
        if let Some(worker) = state.idle.pop_front() {
            return Ok(worker);
        }
        let worker = Worker::spawn(self)?;
        state.total += 1;
        Ok(worker)
    }

    fn put_back(&self, worker: Worker) {
        if self.permits.is_closed() {
            self.discard(worker);
            return;
        }
        self.state.lock().idle.push_back(worker);
    }

    fn discard(&self, mut worker: Worker) {
        log::info!("Discarding compiler worker {}", worker.pid);
        let _ = worker.child.start_kill();
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    /// Discard a worker that can no longer be trusted and start a fresh one
    /// in its place.
    fn replace(&self, worker: Worker) {
        self.discard(worker);
        if self.permits.is_closed() {
            return;
        }
        match Worker::spawn(self) {
            Ok(fresh) => {
                let mut state = self.state.lock();
                state.total += 1;
                state.idle.push_back(fresh);
            }
            Err(e) => log::warn!("Could not replace worker: {e}"),
        }
    }

    /// Finish a job that nobody is waiting for anymore, then return the
    /// worker to the pool.
    async fn recover(&self, mut worker: Worker) {
        worker.interrupt();
        match worker.drain().await {
            Ok(_) => self.put_back(worker),
            Err(e) => {
                log::warn!("{e}");
                self.replace(worker);
            }
        }
    }
}

/// A checked-out worker. Dropping it returns the worker to the pool; if it
/// is dropped while a job is running, the job is interrupted and drained
/// first.
struct Lease {
    pool: Arc<PoolInner>,
    worker: Option<Worker>,
    permit: Option<OwnedSemaphorePermit>,
    busy: bool,
}

impl Lease {
    fn worker(&mut self) -> Result<&mut Worker, PoolError> {
        self.worker.as_mut().ok_or(PoolError::Closed)
    }

    fn discard(mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.discard(worker);
        }
    }

    fn replace(mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.replace(worker);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if !self.busy {
            self.pool.put_back(worker);
            return;
        }
        let pool = self.pool.clone();
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.recover(worker).await;
                    drop(permit);
                });
            }
            Err(_) => pool.discard(worker),
        }
    }
}

/// Runs compiler jobs in reusable worker subprocesses.
#[derive(Clone)]
pub struct CompilerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for CompilerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerPool")
            .field("program", &self.inner.program)
            .field("max_workers", &self.inner.max_workers)
            .field("workers", &self.num_workers())
            .finish()
    }
}

impl CompilerPool {
    /// A pool running the default worker program.
    pub fn new(max_workers: usize) -> Self {
        CompilerPool::from_config(&Config::default().with_max_workers(max_workers))
    }

    pub fn from_config(config: &Config) -> Self {
        CompilerPool::with_program(
            config.resolve_worker_program(),
            config.worker_args.clone(),
            config.worker_env.clone(),
            config.max_workers,
        )
    }

    /// A pool running an arbitrary program that speaks the worker protocol.
    pub fn with_program(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        mut env: Vec<(String, String)>,
        max_workers: usize,
    ) -> Self {
        let max_workers = max_workers.max(1);
        if let Ok(level) = std::env::var("RUST_LOG") {
            if !env.iter().any(|(k, _)| k == "RUST_LOG") {
                env.push(("RUST_LOG".to_string(), level));
            }
        }
        CompilerPool {
            inner: Arc::new(PoolInner {
                max_workers,
                program: program.into(),
                args,
                env,
                permits: Arc::new(Semaphore::new(max_workers)),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    total: 0,
                }),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Live worker processes.
    pub fn num_workers(&self) -> usize {
        self.inner.state.lock().total
    }

    pub fn num_idle(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    pub fn num_busy(&self) -> usize {
        let state = self.inner.state.lock();
        state.total - state.idle.len()
    }

    /// Run `func` with `args` in a worker, passing each output line to
    /// `sink`. Returns `true` when the job reported an error.
    pub async fn call_function<F>(
        &self,
        func: &str,
        args: &[String],
        sink: F,
    ) -> Result<bool, PoolError>
    where
        F: FnMut(&str),
    {
        self.call_function_cancellable(func, args, sink, &CancelToken::new())
            .await
    }

    /// Like [`call_function`](Self::call_function), but gives up with
    /// `Cancelled` once `cancel` fires. A running job is interrupted and
    /// drained so its worker can be reused.
    pub async fn call_function_cancellable<F>(
        &self,
        func: &str,
        args: &[String],
        mut sink: F,
        cancel: &CancelToken,
    ) -> Result<bool, PoolError>
    where
        F: FnMut(&str),
    {
        let request = shell_words::join(std::iter::once(func).chain(args.iter().map(String::as_str)));
        let permit = tokio::select! {
            permit = self.inner.permits.clone().acquire_owned() => {
                permit.map_err(|_| PoolError::Closed)?
            }
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        let worker = self.inner.checkout()?;
        let mut lease = Lease {
            pool: self.inner.clone(),
            worker: Some(worker),
            permit: Some(permit),
            busy: false,
        };

        if let Err(e) = lease.worker()?.wait_ready().await {
            log::warn!("Worker did not start: {e}");
            lease.discard();
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        log::debug!("Calling {request}");
        if let Err(e) = lease.worker()?.send(&request).await {
            log::warn!("Could not send job to worker: {e}");
            lease.discard();
            return Err(e.into());
        }
        lease.busy = true;

        let mut drained = true;
        let outcome = loop {
            let worker = lease.worker()?;
            let line = tokio::select! {
                line = worker.next_line() => Some(line),
                _ = cancel.cancelled() => None,
            };
            let Some(line) = line else {
                worker.interrupt();
                if let Err(e) = worker.drain().await {
                    log::warn!("Interrupted job did not finish cleanly: {e}");
                    drained = false;
                }
                break Err(PoolError::Cancelled);
            };
            match line {
                Ok(line) if line == SUCCESS => break Ok(false),
                Ok(line) if line == ERROR => break Ok(true),
                Ok(line) => sink(&line),
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Err(PoolError::Cancelled) if drained => {
                lease.busy = false;
                Err(PoolError::Cancelled)
            }
            Err(PoolError::Cancelled) => {
                lease.replace();
                Err(PoolError::Cancelled)
            }
            Err(e) => {
                log::warn!("{e}");
                lease.discard();
                if cancel.is_cancelled() {
                    return Err(PoolError::Cancelled);
                }
                Err(e)
            }
            Ok(_) if cancel.is_cancelled() => {
                lease.busy = false;
                Err(PoolError::Cancelled)
            }
            Ok(error) => {
                lease.busy = false;
                Ok(error)
            }
        }
    }

    /// Refuse new calls and stop idle workers. Busy workers stop when their
    /// job ends.
    pub async fn shutdown(&self) {
        self.inner.permits.close();
        let idle: Vec<Worker> = self.inner.state.lock().idle.drain(..).collect();
        for mut worker in idle {
            drop(worker.stdin);
            if let Err(e) = worker.child.wait().await {
                log::warn!("Worker {} did not exit cleanly: {e}", worker.pid);
            }
            let mut state = self.inner.state.lock();
            state.total = state.total.saturating_sub(1);
        }
    }
}
