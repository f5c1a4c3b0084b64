// File: orchestrator/src/setup/mod.rs
//
// Stack Setup
//
// Shared context of the bootstrap steps. Steps never talk to each other
// directly: whatever a later step needs (worker identity, cluster id,
// deployed drivers) is written into SetupContext by the step producing it.

/// Driver contract bundles and deployment
pub mod drivers;
/// Start and cluster steps
pub mod steps;
/// Setup versions and their step lists
pub mod versions;

use crate::chain::{
    ChainQuery, ChainTransactor, ClusterId, ContractId, DriverRole, SigningAccount, WorkerApi,
    WorkerInfo,
};
use crate::config::StackConfig;
use crate::error::{StackError, StackResult};
use crate::events::{ArgFilters, ChainEvent, EventRecord};
use crate::orchestrator::{Clock, SystemClock};
use crate::pipeline::PipelineReport;
use crate::process::ProcessSupervisor;
use crate::waiters::{WaitOptions, DEFAULT_POLL_INTERVAL};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::time::Duration;

pub use drivers::ContractBundle;
pub use versions::SetupVersion;

/// Chain collaborators used by the setup steps. Shared read-only by every step.
#[derive(Clone)]
pub struct ChainHandles {
    /// State queries.
    pub query: Arc<dyn ChainQuery>,
    /// Transaction submission.
    pub tx: Arc<dyn ChainTransactor>,
    /// Worker HTTP API.
    pub worker: Arc<dyn WorkerApi>,
    /// Account signing every bootstrap transaction.
    pub signer: SigningAccount,
}

impl ChainHandles {
    /// Handles over one client implementing every chain trait.
    pub fn from_client<T>(client: Arc<T>, worker: Arc<dyn WorkerApi>, signer: SigningAccount) -> Self
    where
        T: ChainQuery + ChainTransactor + 'static,
    {
        Self {
            query: client.clone(),
            tx: client,
            worker,
            signer,
        }
    }
}

/// Context threaded through the start and setup steps.
pub struct SetupContext {
    /// Resolved configuration.
    pub config: StackConfig,
    /// Supervisor owning the stack processes.
    pub supervisor: ProcessSupervisor,
    /// Chain access; `None` for the start-only pipeline.
    pub chain: Option<ChainHandles>,
    /// Driver bundles to deploy, per role.
    pub drivers: IndexMap<DriverRole, ContractBundle>,
    /// Worker identity, once fetched.
    pub worker_info: Option<WorkerInfo>,
    /// Cluster in use, once resolved or created.
    pub cluster_id: Option<ClusterId>,
    /// Contracts bound per driver role, deployed or reused.
    pub deployed: IndexMap<DriverRole, ContractId>,
    /// Time source of every wait.
    pub clock: Arc<dyn Clock>,
    /// Poll interval of every wait.
    pub poll_interval: Duration,
}

impl SetupContext {
    /// Context for `config`, driving processes through `supervisor`.
    pub fn new(config: StackConfig, supervisor: ProcessSupervisor) -> Self {
        Self {
            config,
            supervisor,
            chain: None,
            drivers: IndexMap::new(),
            worker_info: None,
            cluster_id: None,
            deployed: IndexMap::new(),
            clock: Arc::new(SystemClock),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Attach chain access.
    pub fn with_chain(mut self, chain: ChainHandles) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Driver bundles to deploy.
    pub fn with_drivers(mut self, drivers: IndexMap<DriverRole, ContractBundle>) -> Self {
        self.drivers = drivers;
        self
    }

    /// Chain access, or [`StackError::MissingChain`].
    pub fn chain(&self) -> StackResult<&ChainHandles> {
        self.chain.as_ref().ok_or(StackError::MissingChain)
    }

    /// Worker identity fetched by an earlier step.
    pub fn worker_info(&self) -> StackResult<&WorkerInfo> {
        self.worker_info.as_ref().ok_or_else(|| {
            StackError::External(anyhow::anyhow!("worker info not fetched yet"))
        })
    }

    /// Cluster resolved by an earlier step.
    pub fn cluster(&self) -> StackResult<ClusterId> {
        self.cluster_id
            .clone()
            .ok_or_else(|| StackError::External(anyhow::anyhow!("cluster not resolved yet")))
    }

    /// Wait options labeled `label`, using the context clock and interval.
    pub fn wait_options(&self, label: impl Into<String>) -> WaitOptions {
        WaitOptions::labeled(label)
            .with_poll_interval(self.poll_interval)
            .with_clock(self.clock.clone())
    }
}

/// Terminal record of a successful bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// Cluster contracts deploy into.
    pub cluster_id: ClusterId,
    /// Driver contracts bound in the cluster.
    pub drivers: IndexMap<DriverRole, ContractId>,
    /// Executed and skipped steps.
    pub report: PipelineReport,
}

/// First record of `events` with key `key` whose arguments satisfy `filters`.
pub fn find_event(
    events: &[EventRecord],
    key: &str,
    filters: &ArgFilters,
) -> StackResult<Option<ChainEvent>> {
    for record in events.iter().filter(|r| r.key() == key) {
        let event = record.decode()?;
        let matches = filters
            .iter()
            .all(|(position, filter)| filter.matches(event.args.get(*position)));
        if matches {
            return Ok(Some(event));
        }
    }
    Ok(None)
}
