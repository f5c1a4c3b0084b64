//! Driver contract bundles and their deployment into a cluster.

use super::{find_event, SetupContext};
use crate::chain::{keys, ChainCall, CodeHash, ContractId, DriverBinding, DriverRole};
use crate::error::{StackError, StackResult};
use crate::events::filter_at;
use crate::waiters::{wait_for, wait_until};
use log::{debug, info, warn};
use serde::Deserialize;
use std::path::Path;

/// Constructor called when a bundle names none.
pub const DEFAULT_CONSTRUCTOR: &str = "default";

const CODE_UPLOAD_BLOCKS: u32 = 10;
const CONTRACT_KEY_BLOCKS: u32 = 20;
const DRIVER_BINDING_BLOCKS: u32 = 10;

/// Compiled contract ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractBundle {
    /// Contract name, for logs.
    pub name: String,
    /// Hash of `code` as computed by the contract toolchain.
    pub code_hash: CodeHash,
    /// Contract code.
    pub code: Vec<u8>,
    /// Constructor used on instantiation.
    pub constructor: String,
}

#[derive(Deserialize)]
struct BundleFile {
    source: BundleSource,
    #[serde(default)]
    contract: Option<BundleContract>,
}

#[derive(Deserialize)]
struct BundleSource {
    hash: String,
    wasm: String,
}

#[derive(Deserialize)]
struct BundleContract {
    name: String,
}

impl ContractBundle {
    /// Bundle from raw parts, with the default constructor.
    pub fn new(name: impl Into<String>, code_hash: impl Into<CodeHash>, code: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            code_hash: code_hash.into(),
            code,
            constructor: DEFAULT_CONSTRUCTOR.to_string(),
        }
    }

    /// Use another constructor.
    pub fn with_constructor(mut self, constructor: impl Into<String>) -> Self {
        self.constructor = constructor.into();
        self
    }

    /// Parse a `.contract` bundle: `source.hash` and hex `source.wasm`.
    pub fn from_json(raw: &str) -> StackResult<Self> {
        let file: BundleFile = serde_json::from_str(raw)
            .map_err(|e| StackError::Config(format!("invalid contract bundle: {}", e)))?;
        let wasm = file.source.wasm.trim_start_matches("0x");
        let code = hex::decode(wasm)
            .map_err(|e| StackError::Config(format!("invalid contract code: {}", e)))?;
        let name = file
            .contract
            .map(|c| c.name)
            .unwrap_or_else(|| "unnamed".to_string());
        Ok(Self::new(name, file.source.hash, code))
    }

    /// Read and parse a bundle file.
    pub fn load(path: impl AsRef<Path>) -> StackResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StackError::Config(format!("cannot read bundle {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }
}

fn bundle_for(ctx: &SetupContext, role: DriverRole) -> StackResult<ContractBundle> {
    ctx.drivers
        .get(&role)
        .cloned()
        .ok_or_else(|| StackError::MissingDriver(role.to_string()))
}

/// Whether `role` is already bound to a contract built from the configured bundle.
///
/// A binding with another code hash does not count: the driver is redeployed.
pub(crate) async fn driver_current(ctx: &mut SetupContext, role: DriverRole) -> StackResult<bool> {
    let bundle = bundle_for(ctx, role)?;
    let cluster = ctx.cluster()?;
    let binding = ctx.chain()?.query.driver(&cluster, role).await?;

    match binding {
        Some(binding) if binding.code_hash == bundle.code_hash => {
            debug!("{} driver already bound to {}", role, binding.contract);
            ctx.deployed.insert(role, binding.contract);
            Ok(true)
        }
        Some(binding) => {
            warn!(
                "{} driver {} runs code {}, expected {}; redeploying",
                role, binding.contract, binding.code_hash, bundle.code_hash
            );
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Upload, instantiate and bind the driver contract of `role`.
pub(crate) async fn deploy_driver(ctx: &mut SetupContext, role: DriverRole) -> StackResult<()> {
    let bundle = bundle_for(ctx, role)?;
    let cluster = ctx.cluster()?;
    let chain = ctx.chain()?.clone();

    if !chain.query.code_uploaded(&cluster, &bundle.code_hash).await? {
        info!("Uploading {} ({} bytes)", bundle.name, bundle.code.len());
        chain
            .tx
            .submit(
                &chain.signer,
                ChainCall::UploadCode {
                    cluster: cluster.clone(),
                    code: bundle.code.clone(),
                },
            )
            .await?;
        let (query, cluster, hash) = (chain.query.clone(), cluster.clone(), bundle.code_hash.clone());
        wait_until(
            move || {
                let (query, cluster, hash) = (query.clone(), cluster.clone(), hash.clone());
                async move { query.code_uploaded(&cluster, &hash).await }
            },
            ctx.config.wait_limit(CODE_UPLOAD_BLOCKS),
            ctx.wait_options(format!("{} code upload", bundle.name)),
        )
        .await?;
    }

    let estimate = chain
        .query
        .estimate_instantiate(&cluster, &bundle.code_hash, &bundle.constructor)
        .await?;
    debug!("{} instantiation estimate: {:?}", bundle.name, estimate);

    let salt = format!("{}-{}", role, chrono::Utc::now().timestamp_millis());
    let events = chain
        .tx
        .submit(
            &chain.signer,
            ChainCall::InstantiateContract {
                cluster: cluster.clone(),
                code_hash: bundle.code_hash.clone(),
                constructor: bundle.constructor.clone(),
                salt,
                gas_limit: estimate.gas_required,
                storage_deposit_limit: estimate.storage_deposit,
            },
        )
        .await?;
    let contract: ContractId = find_event(
        &events,
        keys::CONTRACT_INSTANTIATED,
        &filter_at(2, bundle.code_hash.as_str()),
    )?
    .and_then(|event| event.arg_str(1))
    .ok_or_else(|| {
        StackError::External(anyhow::anyhow!(
            "no {} event for {}",
            keys::CONTRACT_INSTANTIATED,
            bundle.name
        ))
    })?;
    info!("{} instantiated as {}", bundle.name, contract);

    let (query, id) = (chain.query.clone(), contract.clone());
    wait_for(
        move || {
            let (query, id) = (query.clone(), id.clone());
            async move { query.contract_key(&id).await }
        },
        ctx.config.wait_limit(CONTRACT_KEY_BLOCKS),
        ctx.wait_options(format!("{} contract key", bundle.name)),
    )
    .await?;

    chain
        .tx
        .submit(
            &chain.signer,
            ChainCall::SetDriver {
                cluster: cluster.clone(),
                role,
                contract: contract.clone(),
            },
        )
        .await?;

    let expected = DriverBinding {
        contract: contract.clone(),
        code_hash: bundle.code_hash.clone(),
    };
    let query = chain.query.clone();
    wait_until(
        move || {
            let (query, cluster, expected) = (query.clone(), cluster.clone(), expected.clone());
            async move {
                let binding = query.driver(&cluster, role).await?;
                Ok::<_, anyhow::Error>(binding.as_ref() == Some(&expected))
            }
        },
        ctx.config.wait_limit(DRIVER_BINDING_BLOCKS),
        ctx.wait_options(format!("{} driver binding", role)),
    )
    .await?;

    ctx.deployed.insert(role, contract);
    Ok(())
}
