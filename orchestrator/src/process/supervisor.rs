// File: orchestrator/src/process/supervisor.rs
//
// Process Supervisor
//
// Launches the stack binaries and judges them purely from their output.
// Each process gets one monitor task that owns the child, merges stdout and
// stderr into a single chunk stream, settles readiness exactly once and
// reacts to the exit of the process. An exit after settlement is a fault of
// the whole stack: the supervisor arms its kill switch and force-stops every
// sibling.

use super::args::render_args;
use super::output::{LogSink, OutputTail};
use super::spec::{OutputPredicate, ProcessSpec};
use crate::config::StackConfig;
use crate::error::{StackError, StackResult};
use crate::orchestrator::{KillSwitch, KILL_POLL_INTERVAL};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use strum::Display;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Duration, Instant};

/// Time a process gets to exit after SIGTERM before it is killed.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How long output is still collected after a process exited.
const EXIT_DRAIN_LIMIT: Duration = Duration::from_millis(500);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Readiness state of a managed process. Terminal once it leaves `Starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProcessState {
    /// Spawned, no predicate matched yet.
    Starting,
    /// The readiness predicate matched.
    Ready,
    /// Error output, readiness timeout or exit before readiness.
    Failed,
    /// Aborted by the kill switch while starting.
    Killed,
}

/// Signal sent to stop a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StopSignal {
    /// Graceful (SIGTERM).
    Term,
    /// Forced (SIGKILL).
    Kill,
}

/// Supervisor-wide settings.
#[derive(Debug, Clone, Default)]
pub struct SupervisorOptions {
    /// Echo process output to stdout.
    pub echo_output: bool,
    /// Directory receiving `<name>.log` files; no log files when `None`.
    pub log_dir: Option<PathBuf>,
}

impl SupervisorOptions {
    /// Options for a run of the configured stack.
    pub fn from_config(config: &StackConfig) -> Self {
        Self {
            echo_output: config.run_mode.echoes_output(),
            log_dir: config.run_log_dir(),
        }
    }
}

#[derive(Debug)]
enum Settlement {
    Ready,
    Error,
    Exited(Option<i32>),
}

struct ProcessStatus {
    state: ProcessState,
    last_signal: Option<StopSignal>,
    exit_code: Option<i32>,
    exited: bool,
    tail: OutputTail,
}

struct ProcessInner {
    name: String,
    pid: Option<u32>,
    status: Mutex<ProcessStatus>,
    control: mpsc::UnboundedSender<StopSignal>,
    exit: watch::Receiver<bool>,
}

/// Handle on a process owned by a [`ProcessSupervisor`].
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<ProcessInner>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("name", &self.inner.name)
            .field("pid", &self.inner.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl ProcessHandle {
    /// Component name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// OS process id.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Readiness state.
    pub fn state(&self) -> ProcessState {
        self.inner.status.lock().state
    }

    /// Last stop signal sent by the supervisor, if any.
    pub fn last_signal(&self) -> Option<StopSignal> {
        self.inner.status.lock().last_signal
    }

    /// Exit code, once exited. `None` after death by signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.status.lock().exit_code
    }

    /// Whether the OS process is gone.
    pub fn has_exited(&self) -> bool {
        self.inner.status.lock().exited
    }

    /// Last output chunks, concatenated.
    pub fn output_tail(&self) -> String {
        self.inner.status.lock().tail.render()
    }

    /// Resolves once the process exited, with its exit code.
    pub async fn wait_exit(&self) -> Option<i32> {
        let mut exit = self.inner.exit.clone();
        // The sender only goes away after publishing the exit
        let _ = exit.wait_for(|exited| *exited).await;
        self.exit_code()
    }

    /// Ask the monitor to deliver `signal`. Returns false once the process exited.
    fn signal(&self, signal: StopSignal) -> bool {
        {
            let mut status = self.inner.status.lock();
            if status.exited {
                return false;
            }
            status.last_signal = Some(match (status.last_signal, signal) {
                (Some(StopSignal::Kill), _) => StopSignal::Kill,
                (_, requested) => requested,
            });
        }
        self.inner.control.send(signal).is_ok()
    }

    fn stop_requested(&self) -> bool {
        self.inner.status.lock().last_signal.is_some()
    }

    /// Leave `Starting` for `state`. Only the first settlement wins.
    fn settle(&self, state: ProcessState) -> bool {
        let mut status = self.inner.status.lock();
        if status.state != ProcessState::Starting {
            return false;
        }
        status.state = state;
        true
    }
}

struct SupervisorShared {
    processes: Mutex<IndexMap<String, ProcessHandle>>,
    kill: KillSwitch,
    stopping: AtomicBool,
    fault: Mutex<Option<StackError>>,
    options: SupervisorOptions,
}

impl Drop for SupervisorShared {
    fn drop(&mut self) {
        for handle in self.processes.get_mut().values() {
            handle.signal(StopSignal::Kill);
        }
    }
}

/// Owner of the managed processes of one stack and of its kill switch.
///
/// # Example
///
/// ```rust,ignore
/// let supervisor = ProcessSupervisor::new(SupervisorOptions::from_config(&config));
/// let node = supervisor
///     .start(ProcessSpec::from_component(ComponentKind::Node, &config))
///     .await?;
/// assert_eq!(node.state(), ProcessState::Ready);
/// supervisor.stop(false).await;
/// ```
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<SupervisorShared>,
}

impl ProcessSupervisor {
    /// Supervisor with a fresh kill switch.
    pub fn new(options: SupervisorOptions) -> Self {
        Self::with_kill_switch(options, KillSwitch::new())
    }

    /// Supervisor observing an existing kill switch.
    pub fn with_kill_switch(options: SupervisorOptions, kill: KillSwitch) -> Self {
        Self {
            shared: Arc::new(SupervisorShared {
                processes: Mutex::new(IndexMap::new()),
                kill,
                stopping: AtomicBool::new(false),
                fault: Mutex::new(None),
                options,
            }),
        }
    }

    /// The switch every pending start observes.
    pub fn kill_switch(&self) -> KillSwitch {
        self.shared.kill.clone()
    }

    /// Handles of every process started so far, in start order.
    pub fn processes(&self) -> Vec<ProcessHandle> {
        self.shared.processes.lock().values().cloned().collect()
    }

    /// Handle of the process started under `name`.
    pub fn get(&self, name: &str) -> Option<ProcessHandle> {
        self.shared.processes.lock().get(name).cloned()
    }

    /// Takes the fault recorded when a ready process exited on its own.
    pub fn take_runtime_fault(&self) -> Option<StackError> {
        self.shared.fault.lock().take()
    }

    /// Spawn `spec` and wait until its output settles it.
    ///
    /// # Errors
    ///
    /// - [`StackError::Spawn`] if the binary cannot be executed
    /// - [`StackError::ErrorOutput`] if the error predicate matched first
    /// - [`StackError::PrematureExit`] if the process exited before settling
    /// - [`StackError::ReadinessTimeout`] if nothing matched within `spec.timeout`
    /// - [`StackError::Killed`] if the kill switch fired meanwhile
    ///
    /// Every error except `Spawn` leaves the process killed.
    pub async fn start(&self, spec: ProcessSpec) -> StackResult<ProcessHandle> {
        let name = spec.name.clone();
        if self.shared.kill.is_triggered() || self.shared.stopping.load(Ordering::SeqCst) {
            return Err(StackError::Killed(name));
        }

        if let Some(data_dir) = spec.resolved_data_dir() {
            recreate_dir(&data_dir).await?;
        }

        let binary = spec.resolved_binary();
        let mut command = Command::new(&binary);
        command
            .args(render_args(&spec.args))
            .current_dir(&spec.work_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!("Spawning {}: {:?}", name, command);

        let mut child = command.spawn().map_err(|source| StackError::Spawn {
            component: name.clone(),
            binary: binary.clone(),
            source,
        })?;
        let pid = child.id();

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, output_tx.clone()));
        }
        drop(output_tx);

        let log = match &self.shared.options.log_dir {
            Some(dir) => LogSink::open(&dir.join(format!("{}.log", name))).await?,
            None => LogSink::disabled(),
        };

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(false);
        let (settle_tx, mut settle_rx) = oneshot::channel();
        let handle = ProcessHandle {
            inner: Arc::new(ProcessInner {
                name: name.clone(),
                pid,
                status: Mutex::new(ProcessStatus {
                    state: ProcessState::Starting,
                    last_signal: None,
                    exit_code: None,
                    exited: false,
                    tail: OutputTail::default(),
                }),
                control: control_tx,
                exit: exit_rx,
            }),
        };

        if let Some(previous) = self
            .shared
            .processes
            .lock()
            .insert(name.clone(), handle.clone())
        {
            warn!("Replacing process {} (pid {:?})", name, previous.pid());
        }

        let monitor = Monitor {
            handle: handle.clone(),
            supervisor: Arc::downgrade(&self.shared),
            is_ready: spec.is_ready.clone(),
            is_error: spec.is_error.clone(),
            echo: self.shared.options.echo_output,
            log,
            settle: Some(settle_tx),
        };
        tokio::spawn(monitor.run(child, output_rx, control_rx, exit_tx));

        // A stop that ran while this process was being spawned missed it
        if self.shared.stopping.load(Ordering::SeqCst) || self.shared.kill.is_triggered() {
            if handle.settle(ProcessState::Killed) {
                warn!("Stack stopped while {} was spawning", name);
                handle.signal(StopSignal::Kill);
                return Err(StackError::Killed(name));
            }
        }
        info!("Started {} (pid {:?}), waiting up to {:?}", name, pid, spec.timeout);

        let kill = self.shared.kill.clone();
        let outcome = tokio::select! {
            settled = &mut settle_rx => settled,
            _ = time::sleep(spec.timeout) => {
                if handle.settle(ProcessState::Failed) {
                    handle.signal(StopSignal::Kill);
                    return Err(StackError::ReadinessTimeout {
                        component: name,
                        timeout: spec.timeout,
                        tail: handle.output_tail(),
                    });
                }
                settle_rx.await
            }
            _ = kill.triggered(KILL_POLL_INTERVAL) => {
                if handle.settle(ProcessState::Killed) {
                    warn!("Kill requested while {} was starting", name);
                    handle.signal(StopSignal::Kill);
                    return Err(StackError::Killed(name));
                }
                settle_rx.await
            }
        };

        match outcome {
            Ok(Settlement::Ready) => {
                info!("{} is ready", name);
                Ok(handle)
            }
            Ok(Settlement::Error) => {
                handle.signal(StopSignal::Kill);
                Err(StackError::ErrorOutput {
                    component: name,
                    tail: handle.output_tail(),
                })
            }
            Ok(Settlement::Exited(_)) if handle.state() == ProcessState::Killed => {
                Err(StackError::Killed(name))
            }
            Ok(Settlement::Exited(code)) => Err(StackError::PrematureExit {
                component: name,
                code,
                tail: handle.output_tail(),
            }),
            Err(_) => Err(StackError::External(anyhow::anyhow!(
                "monitor of {} stopped before settling",
                name
            ))),
        }
    }

    /// Stop every running process with SIGTERM, or SIGKILL when `force` is set.
    ///
    /// Waits for each process to exit; a process ignoring SIGTERM for
    /// [`STOP_GRACE_PERIOD`] is killed. Only the first call has an effect.
    pub async fn stop(&self, force: bool) {
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            debug!("Stack already stopping");
            return;
        }

        let signal = if force { StopSignal::Kill } else { StopSignal::Term };
        let handles = self.processes();
        for handle in &handles {
            if handle.signal(signal) {
                info!("Stopping {} ({})", handle.name(), signal);
            }
        }

        for handle in handles {
            if time::timeout(STOP_GRACE_PERIOD, handle.wait_exit()).await.is_ok() {
                continue;
            }
            warn!(
                "{} ignored {} for {:?}, killing it",
                handle.name(),
                signal,
                STOP_GRACE_PERIOD
            );
            handle.signal(StopSignal::Kill);
            if time::timeout(STOP_GRACE_PERIOD, handle.wait_exit()).await.is_err() {
                error!("{} (pid {:?}) did not exit", handle.name(), handle.pid());
            }
        }
    }
}

struct Monitor {
    handle: ProcessHandle,
    supervisor: Weak<SupervisorShared>,
    is_ready: OutputPredicate,
    is_error: OutputPredicate,
    echo: bool,
    log: LogSink,
    settle: Option<oneshot::Sender<Settlement>>,
}

impl Monitor {
    async fn run(
        mut self,
        mut child: Child,
        mut output: mpsc::UnboundedReceiver<String>,
        mut control: mpsc::UnboundedReceiver<StopSignal>,
        exit_tx: watch::Sender<bool>,
    ) {
        let mut output_open = true;
        let exit = loop {
            let mut pending = None;
            tokio::select! {
                biased;
                chunk = output.recv(), if output_open => match chunk {
                    Some(chunk) => self.observe(chunk, true).await,
                    None => output_open = false,
                },
                Some(signal) = control.recv() => pending = Some(signal),
                status = child.wait() => break status,
            }
            if let Some(signal) = pending {
                deliver(&mut child, signal);
            }
        };

        let deadline = Instant::now() + EXIT_DRAIN_LIMIT;
        while output_open {
            match time::timeout_at(deadline, output.recv()).await {
                Ok(Some(chunk)) => self.observe(chunk, false).await,
                _ => output_open = false,
            }
        }

        let code = match exit {
            Ok(status) => status.code(),
            Err(e) => {
                error!("Cannot wait for {}: {}", self.handle.name(), e);
                None
            }
        };
        {
            let mut status = self.handle.inner.status.lock();
            status.exited = true;
            status.exit_code = code;
        }
        debug!("{} exited with code {:?}", self.handle.name(), code);

        let state = if self.handle.stop_requested() {
            ProcessState::Killed
        } else {
            ProcessState::Failed
        };
        // Settle before publishing the exit so waiters see the final state
        let settled = self.handle.settle(state);
        let _ = exit_tx.send(true);
        if settled {
            self.send(Settlement::Exited(code));
            return;
        }
        if self.handle.state() == ProcessState::Ready && !self.handle.stop_requested() {
            self.runtime_fault(code);
        }
    }

    async fn observe(&mut self, chunk: String, evaluate: bool) {
        if self.echo {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }
        self.log.write(&chunk).await;
        self.handle.inner.status.lock().tail.push(chunk.as_str());

        if !evaluate || self.settle.is_none() {
            return;
        }
        if (self.is_ready)(&chunk) {
            if self.handle.settle(ProcessState::Ready) {
                self.send(Settlement::Ready);
            }
        } else if (self.is_error)(&chunk) && self.handle.settle(ProcessState::Failed) {
            self.send(Settlement::Error);
        }
    }

    fn send(&mut self, settlement: Settlement) {
        if let Some(tx) = self.settle.take() {
            let _ = tx.send(settlement);
        }
    }

    fn runtime_fault(&self, code: Option<i32>) {
        let Some(shared) = self.supervisor.upgrade() else {
            return;
        };
        if shared.stopping.load(Ordering::SeqCst) {
            return;
        }

        let name = self.handle.name().to_string();
        error!(
            "{} exited unexpectedly with code {:?}, stopping the stack",
            name, code
        );
        shared.fault.lock().get_or_insert(StackError::RuntimeExit {
            component: name,
            code,
            tail: self.handle.output_tail(),
        });
        shared.kill.trigger();

        let supervisor = ProcessSupervisor { shared };
        tokio::spawn(async move { supervisor.stop(true).await });
    }
}

fn deliver(child: &mut Child, signal: StopSignal) {
    match signal {
        #[cfg(unix)]
        StopSignal::Term => {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let Some(pid) = child.id() else {
                return;
            };
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Cannot send SIGTERM to pid {}: {}", pid, e);
            }
        }
        _ => {
            if let Err(e) = child.start_kill() {
                debug!("Cannot kill pid {:?}: {}", child.id(), e);
            }
        }
    }
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(chunk).is_err() {
                    break;
                }
            }
        }
    }
}

async fn recreate_dir(path: &Path) -> StackResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed previous data in {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
