// File: orchestrator/src/chain/mod.rs
//
// Chain Collaborators
//
// The orchestrator treats the chain client and the worker API as opaque
// collaborators. These traits are the whole surface it consumes: state
// snapshots, transaction submission, and the event subscription.

use crate::events::EventRecord;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use tokio::sync::mpsc;

/// On-chain cluster identifier.
pub type ClusterId = String;
/// On-chain contract identifier.
pub type ContractId = String;
/// Hash of uploaded contract code.
pub type CodeHash = String;

/// Well-known event keys the bootstrap relies on.
pub mod keys {
    /// Cluster creation; args: `[cluster_id, owner]`.
    pub const CLUSTER_CREATED: &str = "registry.ClusterCreated";
    /// Contract instantiation; args: `[deployer, contract_id, code_hash]`.
    pub const CONTRACT_INSTANTIATED: &str = "contracts.Instantiated";
}

/// Account used to sign bootstrap transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningAccount {
    /// Keyring name, e.g. `alice`.
    pub name: String,
    /// Encoded address.
    pub address: String,
}

impl SigningAccount {
    /// Create an account reference.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Identity reported by the secure worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Worker identity key.
    pub public_key: String,
    /// Key used for encrypted communication with the worker.
    pub ecdh_public_key: String,
}

/// Snapshot of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Cluster identifier.
    pub id: ClusterId,
    /// Creator of the cluster.
    pub owner: String,
    /// Workers serving the cluster.
    pub workers: Vec<String>,
    /// System contract of the cluster, once deployed.
    pub system_contract: Option<ContractId>,
}

/// Contract currently bound to a driver role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverBinding {
    /// Bound contract.
    pub contract: ContractId,
    /// Code hash of the bound contract.
    pub code_hash: CodeHash,
}

/// Resources a contract instantiation is expected to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceEstimate {
    /// Gas required by the constructor.
    pub gas_required: u64,
    /// Storage deposit required by the constructor.
    pub storage_deposit: u128,
}

/// Well-known roles a driver contract can be bound to inside a cluster.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DriverRole {
    /// Charges contracts for the resources they use.
    CostAccounting,
    /// Runs sandboxed guest code on behalf of contracts.
    SandboxRuntime,
    /// Collects contract log output.
    Logging,
}

/// Transactions submitted by the bootstrap.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainCall {
    /// Register the worker identity on chain.
    RegisterWorker {
        /// Identity reported by the worker.
        info: WorkerInfo,
    },
    /// Promote a registered worker to gatekeeper.
    RegisterGatekeeper {
        /// Worker public key.
        worker: String,
    },
    /// Create an execution cluster served by `workers`.
    CreateCluster {
        /// Cluster owner.
        owner: String,
        /// Worker public keys.
        workers: Vec<String>,
        /// Initial deposit.
        deposit: u128,
    },
    /// Upload contract code into a cluster.
    UploadCode {
        /// Target cluster.
        cluster: ClusterId,
        /// Contract code.
        code: Vec<u8>,
    },
    /// Instantiate uploaded code.
    InstantiateContract {
        /// Target cluster.
        cluster: ClusterId,
        /// Code to instantiate.
        code_hash: CodeHash,
        /// Constructor selector name.
        constructor: String,
        /// Instantiation salt.
        salt: String,
        /// Gas limit for the constructor.
        gas_limit: u64,
        /// Storage deposit limit.
        storage_deposit_limit: u128,
    },
    /// Bind a contract as the cluster driver for a role.
    SetDriver {
        /// Target cluster.
        cluster: ClusterId,
        /// Driver role.
        role: DriverRole,
        /// Contract to bind.
        contract: ContractId,
    },
}

impl ChainCall {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterWorker { .. } => "register_worker",
            Self::RegisterGatekeeper { .. } => "register_gatekeeper",
            Self::CreateCluster { .. } => "create_cluster",
            Self::UploadCode { .. } => "upload_code",
            Self::InstantiateContract { .. } => "instantiate_contract",
            Self::SetDriver { .. } => "set_driver",
        }
    }
}

/// Read-only chain state queries.
///
/// Implementations should handle connection errors themselves and return
/// meaningful error messages; the orchestrator never retries a failed query.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Whether the worker identity is registered.
    async fn worker_registered(&self, public_key: &str) -> Result<bool>;

    /// Public keys of all registered gatekeepers.
    async fn gatekeepers(&self) -> Result<Vec<String>>;

    /// Cluster-wide master key published by the gatekeepers.
    async fn master_key(&self) -> Result<Option<String>>;

    /// All clusters, in creation order.
    async fn clusters(&self) -> Result<Vec<ClusterId>>;

    /// Cluster snapshot.
    async fn cluster_info(&self, cluster: &ClusterId) -> Result<Option<ClusterInfo>>;

    /// Cluster key, once the gatekeepers derived it.
    async fn cluster_key(&self, cluster: &ClusterId) -> Result<Option<String>>;

    /// Contract key, once the contract is instantiated in a worker.
    async fn contract_key(&self, contract: &ContractId) -> Result<Option<String>>;

    /// Contract bound to `role` in `cluster`.
    async fn driver(&self, cluster: &ClusterId, role: DriverRole) -> Result<Option<DriverBinding>>;

    /// Whether the code is already uploaded to the cluster.
    async fn code_uploaded(&self, cluster: &ClusterId, code_hash: &CodeHash) -> Result<bool>;

    /// Dry-run a constructor to size gas and storage deposit.
    async fn estimate_instantiate(
        &self,
        cluster: &ClusterId,
        code_hash: &CodeHash,
        constructor: &str,
    ) -> Result<ResourceEstimate>;
}

/// Transaction submission.
#[async_trait]
pub trait ChainTransactor: Send + Sync {
    /// Sign and submit `call`, resolving with the events emitted on inclusion.
    ///
    /// A transaction that fails on chain resolves with an error.
    async fn submit(&self, signer: &SigningAccount, call: ChainCall) -> Result<Vec<EventRecord>>;
}

/// Event subscription.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open the event stream. Each message is the batch of records of one block.
    /// Dropping the receiver cancels the subscription.
    async fn subscribe(&self) -> Result<mpsc::Receiver<Vec<EventRecord>>>;
}

/// HTTP API of the secure worker.
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Identity of the running worker.
    async fn get_info(&self) -> Result<WorkerInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_driver_role_names() {
        assert_eq!(DriverRole::CostAccounting.to_string(), "cost-accounting");
        assert_eq!(
            DriverRole::from_str("sandbox-runtime").unwrap(),
            DriverRole::SandboxRuntime
        );
        assert!(DriverRole::from_str("unknown").is_err());
        assert_eq!(DriverRole::iter().count(), 3);
    }

    #[test]
    fn test_driver_role_serde_matches_strum() {
        for role in DriverRole::iter() {
            let encoded = serde_json::to_string(&role).unwrap();
            assert_eq!(encoded, format!("\"{}\"", role));
        }
    }

    #[test]
    fn test_call_names() {
        let call = ChainCall::RegisterGatekeeper {
            worker: "0x01".to_string(),
        };
        assert_eq!(call.name(), "register_gatekeeper");
    }
}
