//! Error taxonomy of a deployment run.
//!
//! Backends and IO helpers speak `anyhow`; everything the orchestration core
//! decides on is one of the typed errors below.

use alloy_core::primitives::Address;
use thiserror::Error;

use crate::{handle::Role, sequencer::Phase};

/// Missing or invalid configuration. Always raised before the first deployment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required parameter `{0}` is not set for this network")]
    Missing(&'static str),
    #[error("parameter `{name}` is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("failed to read configuration: {0}")]
    Source(String),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// A single deployment or contract call rejected by the backend.
#[derive(Debug, Clone, Error)]
#[error("action `{label}` failed: {reason}")]
pub struct ActionFailure {
    /// Human readable label, always carrying the logical role involved.
    pub label: String,
    pub reason: String,
}

impl ActionFailure {
    pub fn new(label: impl Into<String>, err: &anyhow::Error) -> Self {
        Self {
            label: label.into(),
            reason: format!("{err:#}"),
        }
    }
}

/// A batch that had at least one failed action.
#[derive(Debug, Error)]
#[error(
    "{} action(s) failed ({completed} completed, {skipped} skipped): {}",
    .failures.len(),
    join_failures(.failures)
)]
pub struct BatchError {
    pub failures: Vec<ActionFailure>,
    pub completed: usize,
    pub skipped: usize,
}

fn join_failures(failures: &[ActionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum ProxyInitError {
    #[error("proxy for `{role}` has already been initialized")]
    AlreadyInitialized { role: Role },
    #[error("initializer `{initializer}` of `{unit}` takes {expected} argument(s), got {actual}")]
    ArgumentCount {
        unit: &'static str,
        initializer: String,
        expected: usize,
        actual: usize,
    },
    #[error("`{unit}` has no initializer and cannot be proxied")]
    NotInitializable { unit: &'static str },
}

/// Ownership chain could not be advanced. The chain is left half-built.
#[derive(Debug, Error)]
pub enum OwnershipTransferError {
    #[error(
        "transferring ownership of `{role}` ({contract}) to {intended_owner} failed, owner is still {current_owner}: {reason}"
    )]
    TransferFailed {
        role: Role,
        contract: Address,
        intended_owner: Address,
        current_owner: Address,
        reason: String,
    },
    #[error("ownership of {contract} cannot move from {from} back to {to}")]
    Regression {
        contract: Address,
        from: crate::proxy::OwnershipStage,
        to: crate::proxy::OwnershipStage,
    },
}

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("`{0}` has not been resolved yet")]
    Unresolved(Role),
    #[error("`{0}` was already resolved")]
    AlreadyResolved(Role),
    #[error("address {address} referenced by `{referenced_by}` is not a resolved handle")]
    UnknownAddress {
        address: Address,
        referenced_by: String,
    },
}

/// Any failure of the orchestration core.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Action(#[from] ActionFailure),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error(transparent)]
    ProxyInit(#[from] ProxyInitError),
    #[error(transparent)]
    Ownership(#[from] OwnershipTransferError),
    #[error(transparent)]
    Handle(#[from] HandleError),
}

/// The fatal error of a run: which phase aborted, and why.
#[derive(Debug, Error)]
#[error("deployment aborted in phase `{phase}`: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: DeployError,
}

pub type DeployResult<T> = Result<T, DeployError>;
