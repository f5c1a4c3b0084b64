// Common test utilities: shell-script processes and an in-memory chain.
//
// Fake binaries are `/bin/sh -c <script>`; scripts that must stay alive end
// with `exec sleep 30` so the supervised pid is the sleeping process itself.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use devstack_orchestrator::chain::{
    keys, ChainCall, ChainQuery, ChainTransactor, ClusterId, ClusterInfo, CodeHash, ContractId,
    DriverBinding, DriverRole, EventSource, ResourceEstimate, SigningAccount, WorkerApi,
    WorkerInfo,
};
use devstack_orchestrator::config::{ComponentConfig, RunMode, StackConfig};
use devstack_orchestrator::events::EventRecord;
use devstack_orchestrator::process::{ArgValue, ProcessSpec};
use devstack_orchestrator::setup::{ChainHandles, ContractBundle};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

pub const SHELL: &str = "/bin/sh";

/// Install a test logger once per binary.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Process running `script` under `/bin/sh`.
pub fn script_spec(name: &str, script: &str, dir: &Path) -> ProcessSpec {
    ProcessSpec::new(name, SHELL)
        .arg("-c", script)
        .work_dir(dir)
        .timeout(Duration::from_secs(10))
}

/// Component running `script`, settling on `ready`.
pub fn script_component(script: &str, ready: &str, timeout_ms: u64) -> ComponentConfig {
    let mut args = IndexMap::new();
    args.insert("-c".to_string(), ArgValue::from(script));
    ComponentConfig {
        binary: Some(SHELL.into()),
        args,
        timeout: Some(timeout_ms),
        ready_pattern: Some(ready.to_string()),
        ..Default::default()
    }
}

/// Quiet stack config rooted at `root` with 100ms blocks.
pub fn stack_config(root: &Path, node: &str, worker: &str, relay: &str) -> StackConfig {
    StackConfig {
        root: root.to_path_buf(),
        block_time: 100,
        run_mode: RunMode::Testing,
        save_logs: false,
        node: script_component(node, "node-ready", 10_000),
        worker: script_component(worker, "worker-ready", 10_000),
        relay: script_component(relay, "relay-ready", 10_000),
        ..Default::default()
    }
}

/// Stack whose three processes become ready at once and stay up.
pub fn healthy_stack_config(root: &Path) -> StackConfig {
    stack_config(
        root,
        "echo node-ready; exec sleep 30",
        "echo worker-ready; exec sleep 30",
        "echo relay-ready; exec sleep 30",
    )
}

/// Bundle whose hash follows the mock chain convention.
pub fn bundle(name: &str, code: &[u8]) -> ContractBundle {
    ContractBundle::new(name, MockChain::code_hash(code), code.to_vec())
}

#[derive(Default)]
struct ChainState {
    workers: HashSet<String>,
    gatekeepers: Vec<String>,
    master_key: Option<String>,
    master_key_polls: usize,
    clusters: Vec<ClusterInfo>,
    cluster_keys: HashMap<ClusterId, String>,
    contract_keys: HashMap<ContractId, String>,
    uploaded: HashSet<(ClusterId, CodeHash)>,
    contracts: HashMap<ContractId, CodeHash>,
    drivers: HashMap<(ClusterId, DriverRole), DriverBinding>,
    calls: Vec<&'static str>,
    next_id: u64,
}

/// In-memory chain applying every call on submission.
///
/// The master key shows up only after a few polls, so the bootstrap has
/// to wait for it.
pub struct MockChain {
    state: Mutex<ChainState>,
    subscriber: Mutex<Option<mpsc::Sender<Vec<EventRecord>>>>,
    worker: WorkerInfo,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                master_key_polls: 3,
                ..Default::default()
            }),
            subscriber: Mutex::new(None),
            worker: WorkerInfo {
                public_key: "0xworker".to_string(),
                ecdh_public_key: "0xecdh".to_string(),
            },
        })
    }

    /// Hash the mock assigns to uploaded code.
    pub fn code_hash(code: &[u8]) -> CodeHash {
        format!("0x{}", hex::encode(code))
    }

    /// Names of submitted calls, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn cluster_count(&self) -> usize {
        self.state.lock().clusters.len()
    }

    pub fn handles(self: &Arc<Self>) -> ChainHandles {
        ChainHandles::from_client(
            self.clone(),
            self.clone(),
            SigningAccount::new("alice", "5Alice"),
        )
    }

    fn next_id(state: &mut ChainState, prefix: &str) -> String {
        state.next_id += 1;
        format!("0x{}{:04}", prefix, state.next_id)
    }

    fn apply(&self, signer: &SigningAccount, call: ChainCall) -> Result<Vec<EventRecord>> {
        let mut state = self.state.lock();
        state.calls.push(call.name());

        let events = match call {
            ChainCall::RegisterWorker { info } => {
                state.workers.insert(info.public_key.clone());
                vec![EventRecord::new("registry", "WorkerAdded", vec![json!(info.public_key)])]
            }
            ChainCall::RegisterGatekeeper { worker } => {
                if !state.workers.contains(&worker) {
                    bail!("worker {} not registered", worker);
                }
                state.gatekeepers.push(worker.clone());
                vec![EventRecord::new("registry", "GatekeeperAdded", vec![json!(worker)])]
            }
            ChainCall::CreateCluster { owner, workers, .. } => {
                if state.master_key.is_none() {
                    bail!("no master key yet");
                }
                let id = Self::next_id(&mut state, "c");
                let system = Self::next_id(&mut state, "sys");
                state.contract_keys.insert(system.clone(), "0xsyskey".to_string());
                state.cluster_keys.insert(id.clone(), format!("{}-key", id));
                state.clusters.push(ClusterInfo {
                    id: id.clone(),
                    owner: owner.clone(),
                    workers,
                    system_contract: Some(system),
                });
                vec![EventRecord::new(
                    "registry",
                    "ClusterCreated",
                    vec![json!(id), json!(owner)],
                )]
            }
            ChainCall::UploadCode { cluster, code } => {
                let hash = Self::code_hash(&code);
                state.uploaded.insert((cluster, hash.clone()));
                vec![EventRecord::new("contracts", "CodeStored", vec![json!(hash)])]
            }
            ChainCall::InstantiateContract {
                cluster, code_hash, ..
            } => {
                if !state.uploaded.contains(&(cluster, code_hash.clone())) {
                    bail!("code {} not uploaded", code_hash);
                }
                let id = Self::next_id(&mut state, "contract");
                state.contracts.insert(id.clone(), code_hash.clone());
                state.contract_keys.insert(id.clone(), format!("{}-key", id));
                vec![EventRecord::new(
                    "contracts",
                    "Instantiated",
                    vec![json!(signer.address), json!(id), json!(code_hash)],
                )]
            }
            ChainCall::SetDriver {
                cluster,
                role,
                contract,
            } => {
                let Some(code_hash) = state.contracts.get(&contract).cloned() else {
                    bail!("unknown contract {}", contract);
                };
                state
                    .drivers
                    .insert((cluster, role), DriverBinding { contract, code_hash });
                Vec::new()
            }
        };
        Ok(events)
    }
}

#[async_trait]
impl ChainQuery for MockChain {
    async fn worker_registered(&self, public_key: &str) -> Result<bool> {
        Ok(self.state.lock().workers.contains(public_key))
    }

    async fn gatekeepers(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().gatekeepers.clone())
    }

    async fn master_key(&self) -> Result<Option<String>> {
        let mut state = self.state.lock();
        if state.master_key.is_none() && !state.gatekeepers.is_empty() {
            if state.master_key_polls == 0 {
                state.master_key = Some("0xmaster".to_string());
            } else {
                state.master_key_polls -= 1;
            }
        }
        Ok(state.master_key.clone())
    }

    async fn clusters(&self) -> Result<Vec<ClusterId>> {
        Ok(self.state.lock().clusters.iter().map(|c| c.id.clone()).collect())
    }

    async fn cluster_info(&self, cluster: &ClusterId) -> Result<Option<ClusterInfo>> {
        Ok(self
            .state
            .lock()
            .clusters
            .iter()
            .find(|c| &c.id == cluster)
            .cloned())
    }

    async fn cluster_key(&self, cluster: &ClusterId) -> Result<Option<String>> {
        Ok(self.state.lock().cluster_keys.get(cluster).cloned())
    }

    async fn contract_key(&self, contract: &ContractId) -> Result<Option<String>> {
        Ok(self.state.lock().contract_keys.get(contract).cloned())
    }

    async fn driver(&self, cluster: &ClusterId, role: DriverRole) -> Result<Option<DriverBinding>> {
        Ok(self
            .state
            .lock()
            .drivers
            .get(&(cluster.clone(), role))
            .cloned())
    }

    async fn code_uploaded(&self, cluster: &ClusterId, code_hash: &CodeHash) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .uploaded
            .contains(&(cluster.clone(), code_hash.clone())))
    }

    async fn estimate_instantiate(
        &self,
        _cluster: &ClusterId,
        _code_hash: &CodeHash,
        _constructor: &str,
    ) -> Result<ResourceEstimate> {
        Ok(ResourceEstimate {
            gas_required: 1_000_000,
            storage_deposit: 10_000,
        })
    }
}

#[async_trait]
impl ChainTransactor for MockChain {
    async fn submit(&self, signer: &SigningAccount, call: ChainCall) -> Result<Vec<EventRecord>> {
        let events = self.apply(signer, call)?;
        let subscriber = self.subscriber.lock().clone();
        if let Some(tx) = subscriber {
            let _ = tx.send(events.clone()).await;
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSource for MockChain {
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<EventRecord>>> {
        let (tx, rx) = mpsc::channel(64);
        *self.subscriber.lock() = Some(tx);
        Ok(rx)
    }
}

#[async_trait]
impl WorkerApi for MockChain {
    async fn get_info(&self) -> Result<WorkerInfo> {
        Ok(self.worker.clone())
    }
}

/// Key of the cluster creation event, re-exported for assertions.
pub const CLUSTER_CREATED: &str = keys::CLUSTER_CREATED;
