//! Generic loop-supervision runtime: the state machine every subsystem
//! (VPN tunnel, DNS-over-TLS, ...) is driven through.
//!
//! Each loop owns a current `LoopStatus`, a single-slot command channel
//! with latest-wins overflow, a status-change broadcast, and a nested
//! cancellation token cleared on every transition to `Stopped`/`Crashed`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{TunnelError, TunnelResult};
use crate::model::LoopStatus;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Handle a run task uses to announce it has finished starting up,
/// transitioning its loop from `Starting` to `Running`.
#[derive(Clone)]
pub struct ReadySignal(mpsc::Sender<()>);

impl ReadySignal {
    pub fn signal(&self) {
        let _ = self.0.try_send(());
    }
}

/// Settings types a `Loop` can be reloaded with must be able to validate
/// themselves before they replace the live settings. Defaults to
/// always-valid for settings with no invariants of their own (e.g.
/// `DnsSettings`).
pub trait ValidateSettings {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The per-subsystem behavior a `Loop` supervises, parameterized over its
/// settings snapshot type `S` (e.g. `VpnSettings`, `DnsSettings`).
/// Implementors do the actual work (spawn a tunnel process, supervise a
/// resolver, ...); the loop runtime only handles state transitions,
/// backoff and cancellation.
#[async_trait]
pub trait RunTask<S>: Send + Sync + 'static
where
    S: Clone + Send + Sync + 'static,
{
    async fn run(&self, ctx: CancellationToken, settings: S, ready: ReadySignal) -> TunnelResult<()>;
}

/// Commands a loop's supervisor accepts on its single-slot channel.
#[derive(Debug, Clone)]
pub enum LoopCommand<S> {
    Start,
    Stop,
    Restart,
    ApplyStatus(LoopStatus),
    ApplySettings(S),
}

struct Envelope<S> {
    command: LoopCommand<S>,
    reply: oneshot::Sender<TunnelResult<String>>,
}

struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Backoff { current: BACKOFF_BASE }
    }

    fn reset(&mut self) {
        self.current = BACKOFF_BASE;
    }

    fn next_delay(&mut self) -> Duration {
        let jitter_ms = rand::thread_rng().gen_range(0..250);
        let delay = self.current + Duration::from_millis(jitter_ms);
        self.current = std::cmp::min(self.current * 2, BACKOFF_CAP);
        delay
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A supervised, long-running subsystem with a state machine and a
/// command channel.
pub struct Loop<T, S>
where
    T: RunTask<S>,
    S: Clone + Send + Sync + 'static,
{
    name: String,
    run_task: Arc<T>,
    status_tx: watch::Sender<LoopStatus>,
    status_rx: watch::Receiver<LoopStatus>,
    settings: RwLock<S>,
    active: Mutex<Option<RunHandle>>,
    backoff: Mutex<Backoff>,
    slot: Mutex<Option<Envelope<S>>>,
    notify: Arc<tokio::sync::Notify>,
    /// Set by the spawned run-task wrapper if it exited with an error,
    /// consumed by `on_run_task_exit`.
    last_error: Mutex<Option<String>>,
}

impl<T, S> Loop<T, S>
where
    T: RunTask<S>,
    S: Clone + Send + Sync + std::fmt::Debug + ValidateSettings + 'static,
{
    pub fn new(name: impl Into<String>, run_task: Arc<T>, initial_settings: S) -> Arc<Self> {
        let (status_tx, status_rx) = watch::channel(LoopStatus::Stopped);
        let this = Arc::new(Loop {
            name: name.into(),
            run_task,
            status_tx,
            status_rx,
            settings: RwLock::new(initial_settings),
            active: Mutex::new(None),
            backoff: Mutex::new(Backoff::new()),
            slot: Mutex::new(None),
            notify: Arc::new(tokio::sync::Notify::new()),
            last_error: Mutex::new(None),
        });
        Loop::spawn_supervisor(this.clone());
        this
    }

    fn spawn_supervisor(this: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                this.notify.notified().await;
                let envelope = { this.slot.lock().await.take() };
                if let Some(Envelope { command, reply }) = envelope {
                    let outcome = this.clone().handle_command(command).await;
                    let _ = reply.send(outcome);
                }
            }
        });
    }

    /// Lock-free snapshot — never blocks on loop transitions.
    pub fn get_status(&self) -> LoopStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopStatus> {
        self.status_rx.clone()
    }

    /// Lock-free snapshot of the current settings.
    pub async fn get_settings(&self) -> S {
        self.settings.read().await.clone()
    }

    /// Synchronous from the caller's perspective: submits the command and
    /// waits for the outcome string the supervisor produces.
    async fn submit(&self, command: LoopCommand<S>) -> TunnelResult<String> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.slot.lock().await;
            if let Some(old) = slot.take() {
                // Latest-wins: the superseded command never ran — its
                // caller gets an empty outcome rather than hanging.
                let _ = old.reply.send(Ok(String::new()));
            }
            *slot = Some(Envelope { command, reply: tx });
        }
        self.notify.notify_one();
        rx.await.unwrap_or(Ok(String::new()))
    }

    pub async fn apply_status(&self, target: LoopStatus) -> TunnelResult<String> {
        self.submit(LoopCommand::ApplyStatus(target)).await
    }

    pub async fn apply_settings(&self, new: S) -> TunnelResult<String> {
        self.submit(LoopCommand::ApplySettings(new)).await
    }

    pub async fn start(&self) -> TunnelResult<String> {
        self.submit(LoopCommand::Start).await
    }

    pub async fn stop(&self) -> TunnelResult<String> {
        self.submit(LoopCommand::Stop).await
    }

    async fn set_status(&self, status: LoopStatus) {
        let _ = self.status_tx.send(status);
    }

    async fn handle_command(self: Arc<Self>, command: LoopCommand<S>) -> TunnelResult<String> {
        match command {
            LoopCommand::Start => {
                self.do_start().await?;
                Ok(format!("{} started", self.name))
            }
            LoopCommand::Stop => {
                self.do_stop().await?;
                Ok(format!("{} stopped", self.name))
            }
            LoopCommand::Restart => {
                self.do_stop().await?;
                self.do_start().await?;
                Ok(format!("{} restarted", self.name))
            }
            LoopCommand::ApplyStatus(target) => self.do_apply_status(target).await,
            LoopCommand::ApplySettings(new) => self.do_apply_settings(new).await,
        }
    }

    async fn do_apply_status(self: &Arc<Self>, target: LoopStatus) -> TunnelResult<String> {
        let current = self.get_status();
        match (current, target) {
            (LoopStatus::Stopped, LoopStatus::Running) => {
                self.do_start().await?;
                Ok(format!("{} started", self.name))
            }
            (LoopStatus::Running, LoopStatus::Running) => Ok(format!("{} is already running", self.name)),
            (LoopStatus::Stopped, LoopStatus::Stopped) => Ok(format!("{} is already stopped", self.name)),
            (LoopStatus::Running, LoopStatus::Stopped) => {
                self.do_stop().await?;
                Ok(format!("{} stopped", self.name))
            }
            (LoopStatus::Crashed, LoopStatus::Stopped) => {
                self.do_stop().await?;
                Ok(format!("{} stopped", self.name))
            }
            (LoopStatus::Crashed, LoopStatus::Running) => {
                self.do_start().await?;
                Ok(format!("{} started", self.name))
            }
            (from, to) => Err(TunnelError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    async fn do_apply_settings(self: &Arc<Self>, new: S) -> TunnelResult<String> {
        new.validate().map_err(TunnelError::InvalidSettings)?;
        let current = self.get_status();
        if current == LoopStatus::Stopped {
            *self.settings.write().await = new;
            return Ok(format!("{} settings applied", self.name));
        }
        self.do_stop().await?;
        *self.settings.write().await = new;
        self.do_start().await?;
        Ok(format!("{} restarted", self.name))
    }

    async fn do_start(self: &Arc<Self>) -> TunnelResult<()> {
        if matches!(self.get_status(), LoopStatus::Running | LoopStatus::Starting) {
            return Ok(());
        }
        self.set_status(LoopStatus::Starting).await;

        let cancel = CancellationToken::new();
        let (ready_tx, mut ready_rx) = mpsc::channel(1);
        let ready = ReadySignal(ready_tx);
        let settings = self.settings.read().await.clone();
        let run_task = self.run_task.clone();
        let child_cancel = cancel.clone();

        let this = self.clone();
        let task = tokio::spawn(async move {
            let result = run_task.run(child_cancel, settings, ready).await;
            let error = match result {
                Ok(()) => None,
                Err(TunnelError::Cancelled) => None,
                Err(e) => Some(e.to_string()),
            };
            this.on_run_task_exit(error).await;
        });

        *self.active.lock().await = Some(RunHandle { cancel, task });

        // Wait (briefly) for the run task to either signal readiness or
        // fail fast. A well-behaved run task signals ready quickly; we
        // don't block `apply_status` forever on a hung subsystem.
        tokio::select! {
            _ = ready_rx.recv() => {
                self.set_status(LoopStatus::Running).await;
                self.backoff.lock().await.reset();
                info!("{} is running", self.name);
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                // Readiness never arrived; leave it Starting — the run
                // task's own exit path drives Crashed on failure.
            }
        }
        if let Some(error) = self.last_error.lock().await.take() {
            return Err(TunnelError::TunnelCrashed(error));
        }
        Ok(())
    }

    async fn do_stop(self: &Arc<Self>) -> TunnelResult<()> {
        let status = self.get_status();
        if status == LoopStatus::Stopped {
            return Ok(());
        }
        self.set_status(LoopStatus::Stopping).await;

        let handle = self.active.lock().await.take();
        if let Some(RunHandle { cancel, task }) = handle {
            cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }

        self.set_status(LoopStatus::Stopped).await;
        info!("{} stopped", self.name);
        Ok(())
    }

    /// Called from the spawned run-task wrapper when it exits. If the
    /// loop was already transitioning to `Stopping`/`Stopped` this is a
    /// no-op; otherwise an unexpected exit means the subsystem crashed
    /// and a backoff-gated restart is scheduled.
    async fn on_run_task_exit(self: &Arc<Self>, error: Option<String>) {
        let status = self.get_status();
        if status == LoopStatus::Stopping || status == LoopStatus::Stopped {
            return;
        }
        let Some(error) = error else { return };

        *self.last_error.lock().await = Some(error.clone());
        warn!("{} crashed: {error}", self.name);
        self.set_status(LoopStatus::Crashed).await;

        let delay = self.backoff.lock().await.next_delay();
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if this.get_status() == LoopStatus::Crashed {
                let _ = this.do_start().await;
            }
        });
    }
}
