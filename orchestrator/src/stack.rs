// File: orchestrator/src/stack.rs
//
// Local Stack
//
// DevStack ties config, supervisor and setup versions together. Every run is
// a pipeline whose abort hook force-stops the processes it may have started,
// and whose steps observe the supervisor's kill switch.

use crate::chain::DriverRole;
use crate::config::StackConfig;
use crate::error::{StackError, StackResult};
use crate::orchestrator::KillSwitch;
use crate::pipeline::{Pipeline, PipelineReport, PipelineStep};
use crate::process::{ProcessSupervisor, SupervisorOptions};
use crate::setup::steps::start_steps;
use crate::setup::{BootstrapResult, ChainHandles, ContractBundle, SetupContext, SetupVersion};
use crate::waiters::DEFAULT_POLL_INTERVAL;
use indexmap::IndexMap;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// A local node + worker + relay stack.
///
/// ```rust,ignore
/// let stack = DevStack::new(StackConfig::load("devstack.yml")?);
/// let result = stack.bootstrap(chain).await?;
/// println!("cluster {}", result.cluster_id);
/// stack.stop(false).await;
/// ```
pub struct DevStack {
    config: StackConfig,
    supervisor: ProcessSupervisor,
    drivers: IndexMap<DriverRole, ContractBundle>,
    poll_interval: Duration,
}

impl DevStack {
    /// Stack with a supervisor set up from `config`.
    pub fn new(config: StackConfig) -> Self {
        let supervisor = ProcessSupervisor::new(SupervisorOptions::from_config(&config));
        Self::with_supervisor(config, supervisor)
    }

    /// Stack driving its processes through `supervisor`.
    pub fn with_supervisor(config: StackConfig, supervisor: ProcessSupervisor) -> Self {
        Self {
            config,
            supervisor,
            drivers: IndexMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Use `bundle` for `role` instead of the bundle file named in the config.
    pub fn with_driver(mut self, role: DriverRole, bundle: ContractBundle) -> Self {
        self.drivers.insert(role, bundle);
        self
    }

    /// Poll interval of every on-chain wait.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Supervisor owning the stack processes.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Kill switch aborting pending starts and the running pipeline.
    pub fn kill_switch(&self) -> KillSwitch {
        self.supervisor.kill_switch()
    }

    /// Abort the running start or bootstrap on Ctrl-C.
    pub fn abort_on_ctrl_c(&self) -> JoinHandle<()> {
        self.supervisor.kill_switch().trigger_on_ctrl_c()
    }

    /// Start node, worker and relay.
    pub async fn start(&self) -> StackResult<PipelineReport> {
        let mut ctx = self.context();
        self.run("start", start_steps(), &mut ctx).await
    }

    /// Start the processes, then run the configured setup version.
    pub async fn bootstrap(&self, chain: ChainHandles) -> StackResult<BootstrapResult> {
        self.setup_with(chain, true).await
    }

    /// Run the configured setup version against an already running stack.
    pub async fn setup(&self, chain: ChainHandles) -> StackResult<BootstrapResult> {
        self.setup_with(chain, false).await
    }

    /// Stop every process; see [`ProcessSupervisor::stop`].
    pub async fn stop(&self, force: bool) {
        self.supervisor.stop(force).await
    }

    async fn setup_with(&self, chain: ChainHandles, start: bool) -> StackResult<BootstrapResult> {
        let version = SetupVersion::parse(&self.config.setup_version)?;
        let drivers = self.driver_bundles(version)?;

        let mut steps = if start { start_steps() } else { Vec::new() };
        steps.extend(version.steps());

        let mut ctx = self.context().with_chain(chain).with_drivers(drivers);
        let report = self
            .run(&format!("{} setup", version), steps, &mut ctx)
            .await?;

        let cluster_id = ctx.cluster()?;
        info!(
            "Stack ready: cluster {}, {} driver(s)",
            cluster_id,
            ctx.deployed.len()
        );
        Ok(BootstrapResult {
            cluster_id,
            drivers: ctx.deployed,
            report,
        })
    }

    fn context(&self) -> SetupContext {
        let mut ctx = SetupContext::new(self.config.clone(), self.supervisor.clone());
        ctx.poll_interval = self.poll_interval;
        ctx
    }

    fn driver_bundles(
        &self,
        version: SetupVersion,
    ) -> StackResult<IndexMap<DriverRole, ContractBundle>> {
        let mut bundles = IndexMap::new();
        for role in version.drivers() {
            let bundle = match (self.drivers.get(role), self.config.drivers.get(role)) {
                (Some(bundle), _) => bundle.clone(),
                (None, Some(path)) => ContractBundle::load(self.config.resolve_path(path))?,
                (None, None) => return Err(StackError::MissingDriver(role.to_string())),
            };
            bundles.insert(*role, bundle);
        }
        Ok(bundles)
    }

    async fn run(
        &self,
        name: &str,
        steps: Vec<PipelineStep<SetupContext>>,
        ctx: &mut SetupContext,
    ) -> StackResult<PipelineReport> {
        let mut pipeline = Pipeline::new(name)
            .steps(steps)
            .with_kill_switch(self.supervisor.kill_switch())
            .on_abort(|ctx: &mut SetupContext| Box::pin(force_stop(ctx)));

        match pipeline.run(ctx).await {
            Ok(report) => Ok(report),
            // A process dying after readiness is the root cause of the kill
            Err(e) if e.is_killed() => match self.supervisor.take_runtime_fault() {
                Some(fault) => Err(fault),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

async fn force_stop(ctx: &mut SetupContext) {
    warn!("Setup aborted, force-stopping started processes");
    ctx.supervisor.stop(true).await;
}
