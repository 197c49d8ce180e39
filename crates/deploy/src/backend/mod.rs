//! Transaction-submission collaborators.
//!
//! The orchestration core only needs three things from a chain: deploy a unit,
//! link a library into a unit, and send a state-mutating call. Each either
//! succeeds once the transaction is included or fails; nothing else about the
//! backend is interpreted.

mod artifacts;
mod rpc;
mod simulated;

use std::future::Future;

use alloy_core::primitives::{Address, B256};
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    abi::Arg,
    contracts::ContractUnit,
    handle::{ContractHandle, Role},
};

pub use artifacts::{Artifact, ArtifactStore, LinkReference};
pub use rpc::RpcBackend;
pub use simulated::{SimEvent, SimulatedBackend};

/// Receipt of an included state-mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
}

/// A chain the deployment can be submitted to.
pub trait DeploymentBackend: Send + Sync {
    /// Account every transaction is sent from.
    fn deployer(&self) -> Address;

    /// Deploy `unit` with the given constructor arguments.
    fn deploy(
        &self,
        role: Role,
        unit: &'static ContractUnit,
        args: Vec<Arg>,
    ) -> impl Future<Output = Result<ContractHandle>> + Send;

    /// Make `library` available to the bytecode of `consumer`.
    fn link(
        &self,
        library: &ContractHandle,
        consumer: &'static ContractUnit,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Send a transaction calling `method(args)` on `target`.
    fn call(
        &self,
        target: Address,
        method: &str,
        args: Vec<Arg>,
    ) -> impl Future<Output = Result<CallReceipt>> + Send;
}
