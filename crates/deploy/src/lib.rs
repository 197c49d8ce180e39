//! mocdex-deploy - Deployment orchestration for the upgradeable order book exchange.
//!
//! A run resolves the configuration of one network, then drives a
//! [`DeploymentBackend`] through a fixed sequence of phases: libraries, tokens,
//! infrastructure, proxies, ownership, markets, fixtures and minting. The
//! result is a [`RunSummary`] of every contract address.

pub mod abi;
pub mod backend;
pub mod batch;
pub mod config;
pub mod contracts;
pub mod error;
pub mod handle;
pub mod mint;
pub mod price_provider;
pub mod proxy;
pub mod sequencer;
pub mod summary;
pub mod token_pairs;

pub use backend::{ArtifactStore, CallReceipt, DeploymentBackend, RpcBackend, SimulatedBackend};
pub use batch::{ActionOutcome, BatchExecutor, DeploymentAction};
pub use config::{Config, ConfigLayer, ConfigResolver};
pub use error::{
    ActionFailure, BatchError, ConfigError, DeployError, DeployResult, HandleError,
    OwnershipTransferError, PhaseError, ProxyInitError,
};
pub use handle::{
    ContractHandle, HandleOrigin, HandleTable, MarketPair, REFERENCE_MARKETS, Role, TokenRole,
};
pub use mint::MintFanout;
pub use price_provider::{PriceProviderSelector, PriceProviderSpec};
pub use proxy::{OwnershipStage, ProxyOwnershipManager};
pub use sequencer::{DeploymentSequencer, Phase};
pub use summary::{ConfigHash, RunSummary};
pub use token_pairs::{RegistrationOutcome, TokenPair, TokenPairPlanner};
