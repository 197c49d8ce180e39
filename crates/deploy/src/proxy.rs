//! Upgradeable proxies and the ownership handoff chain.
//!
//! Every proxy is bound to the proxy admin at construction. Upgrade authority
//! then flows governor → proxy admin → delegator: protocol contracts owned by
//! the deployer are handed to the admin, and the admin itself is handed to the
//! delegator. Ownership only ever moves forward.

use std::collections::{BTreeMap, BTreeSet};

use alloy_core::primitives::Address;
use serde::Serialize;

use crate::{
    abi::{self, Arg},
    backend::DeploymentBackend,
    config::Config,
    contracts::{self, ContractUnit},
    error::{ActionFailure, DeployResult, OwnershipTransferError, ProxyInitError},
    handle::{ContractHandle, Role},
};

/// Who holds the ownership of a contract, in the order it is handed over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum OwnershipStage {
    DeployerDefault,
    Admin,
    Delegator,
}

/// Current owner and stage of every contract whose ownership was moved.
#[derive(Debug, Clone)]
pub struct OwnershipLedger {
    deployer: Address,
    entries: BTreeMap<Address, (OwnershipStage, Address)>,
}

impl OwnershipLedger {
    pub fn new(deployer: Address) -> Self {
        Self {
            deployer,
            entries: BTreeMap::new(),
        }
    }

    pub fn stage(&self, contract: Address) -> OwnershipStage {
        self.entries
            .get(&contract)
            .map_or(OwnershipStage::DeployerDefault, |(stage, _)| *stage)
    }

    pub fn owner(&self, contract: Address) -> Address {
        self.entries
            .get(&contract)
            .map_or(self.deployer, |(_, owner)| *owner)
    }

    /// Fails unless moving `contract` to `to` is strictly forward.
    pub fn check(&self, contract: Address, to: OwnershipStage) -> Result<(), OwnershipTransferError> {
        let from = self.stage(contract);
        if to <= from {
            return Err(OwnershipTransferError::Regression { contract, from, to });
        }
        Ok(())
    }

    pub fn advance(
        &mut self,
        contract: Address,
        to: OwnershipStage,
        owner: Address,
    ) -> Result<(), OwnershipTransferError> {
        self.check(contract, to)?;
        self.entries.insert(contract, (to, owner));
        Ok(())
    }
}

/// A contract deployed behind a proxy, and the roles of both halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxiedContract {
    pub proxy: Role,
    pub implementation: Role,
    pub unit: &'static ContractUnit,
}

pub const FEE_MANAGER_PROXY: ProxiedContract = ProxiedContract {
    proxy: Role::FeeManager,
    implementation: Role::FeeManagerImplementation,
    unit: &contracts::FEE_MANAGER,
};

pub const EXCHANGE_PROXY: ProxiedContract = ProxiedContract {
    proxy: Role::Exchange,
    implementation: Role::ExchangeImplementation,
    unit: &contracts::EXCHANGE,
};

pub const FAKE_EXCHANGE_PROXY: ProxiedContract = ProxiedContract {
    proxy: Role::FakeExchange,
    implementation: Role::FakeExchangeImplementation,
    unit: &contracts::FAKE_EXCHANGE,
};

#[derive(Debug, Clone, Copy)]
pub struct ProxyOptions {
    /// Proxy admin the proxy is bound to.
    pub admin: Address,
    /// Deploy a new implementation even if one is registered.
    pub reupload: bool,
}

/// Result of [`ProxyOwnershipManager::create_proxy`].
#[derive(Debug, Clone)]
pub struct ProxyDeployment {
    pub proxy: ContractHandle,
    pub implementation: ContractHandle,
    /// The implementation was deployed by this call rather than reused.
    pub uploaded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DelegatorVariant {
    Plain,
    TimeGated { unblock_at: u64 },
}

/// The terminal state of the ownership handoff.
#[derive(Debug, Clone)]
pub struct OwnershipChain {
    pub governor: Address,
    pub proxy_admin: Address,
    pub delegator: ContractHandle,
    pub variant: DelegatorVariant,
}

pub struct ProxyOwnershipManager<'b, B> {
    backend: &'b B,
    implementations: BTreeMap<&'static str, ContractHandle>,
    initialized: BTreeSet<Role>,
    ledger: OwnershipLedger,
}

impl<'b, B: DeploymentBackend> ProxyOwnershipManager<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            implementations: BTreeMap::new(),
            initialized: BTreeSet::new(),
            ledger: OwnershipLedger::new(backend.deployer()),
        }
    }

    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    /// Make an already deployed implementation available to [`Self::create_proxy`].
    pub fn register_implementation(&mut self, implementation: ContractHandle) {
        tracing::debug!(
            unit = implementation.unit,
            address = %implementation.address,
            "Implementation registered"
        );
        self.implementations
            .insert(implementation.unit, implementation);
    }

    /// Deploy a proxy for `target`, running `initializer(args)` through the
    /// proxy constructor.
    ///
    /// Argument count and double initialization are checked before anything
    /// is sent to the backend.
    pub async fn create_proxy(
        &mut self,
        target: ProxiedContract,
        initializer: &str,
        args: Vec<Arg>,
        options: ProxyOptions,
    ) -> DeployResult<ProxyDeployment> {
        if self.initialized.contains(&target.proxy) {
            return Err(ProxyInitError::AlreadyInitialized { role: target.proxy }.into());
        }
        check_arity(target.unit, initializer, &args)?;

        let registered = self
            .implementations
            .get(target.unit.name)
            .filter(|_| !options.reupload)
            .cloned();
        let (implementation, uploaded) = match registered {
            Some(handle) => (handle, false),
            None => {
                let handle = self
                    .backend
                    .deploy(target.implementation, target.unit, vec![])
                    .await
                    .map_err(|err| {
                        ActionFailure::new(format!("deploy {}", target.implementation), &err)
                    })?;
                self.register_implementation(handle.clone());
                (handle, true)
            }
        };

        let calldata = abi::encode_call(initializer, &args);
        let proxy = self
            .backend
            .deploy(
                target.proxy,
                &contracts::UPGRADEABLE_PROXY,
                vec![
                    Arg::Address(implementation.address),
                    Arg::Address(options.admin),
                    Arg::Bytes(calldata),
                ],
            )
            .await
            .map_err(|err| ActionFailure::new(format!("create proxy {}", target.proxy), &err))?;
        self.initialized.insert(target.proxy);

        tracing::info!(
            role = %target.proxy,
            proxy = %proxy.address,
            implementation = %implementation.address,
            admin = %options.admin,
            uploaded,
            "Proxy created"
        );

        Ok(ProxyDeployment {
            proxy,
            implementation,
            uploaded,
        })
    }

    /// Transfer the ownership of deployer-owned protocol contracts to the admin.
    pub async fn hand_to_admin(
        &mut self,
        contracts: &[&ContractHandle],
        proxy_admin: &ContractHandle,
    ) -> DeployResult<()> {
        for contract in contracts {
            self.transfer_ownership(contract, proxy_admin.address, OwnershipStage::Admin)
                .await?;
        }
        Ok(())
    }

    /// Deploy and initialize the delegator, then make it the proxy admin's owner.
    ///
    /// The time-gated variant is used when `unblock_upgrades_at` is configured.
    /// A failed transfer leaves the admin owned by the deployer; nothing is
    /// rolled back.
    pub async fn build_ownership_chain(
        &mut self,
        config: &Config,
        governor: &ContractHandle,
        proxy_admin: &ContractHandle,
        owner: Address,
    ) -> DeployResult<OwnershipChain> {
        let (unit, variant, args) = match config.unblock_upgrades_at {
            Some(unblock_at) => (
                &contracts::BLOCKABLE_UPGRADE_DELEGATOR,
                DelegatorVariant::TimeGated { unblock_at },
                vec![
                    Arg::Address(owner),
                    Arg::Address(governor.address),
                    Arg::Address(proxy_admin.address),
                    Arg::uint(unblock_at),
                ],
            ),
            None => (
                &contracts::UPGRADE_DELEGATOR,
                DelegatorVariant::Plain,
                vec![
                    Arg::Address(governor.address),
                    Arg::Address(proxy_admin.address),
                ],
            ),
        };
        check_arity(unit, "initialize", &args)?;

        let delegator = self
            .backend
            .deploy(Role::UpgradeDelegator, unit, vec![])
            .await
            .map_err(|err| ActionFailure::new(format!("deploy {}", Role::UpgradeDelegator), &err))?;

        self.backend
            .call(delegator.address, "initialize", args)
            .await
            .map_err(|err| {
                ActionFailure::new(format!("initialize {}", Role::UpgradeDelegator), &err)
            })?;
        tracing::info!(
            delegator = %delegator.address,
            unit = %unit,
            variant = ?variant,
            "Upgrade delegator initialized"
        );

        self.transfer_ownership(proxy_admin, delegator.address, OwnershipStage::Delegator)
            .await?;

        Ok(OwnershipChain {
            governor: governor.address,
            proxy_admin: proxy_admin.address,
            delegator,
            variant,
        })
    }

    async fn transfer_ownership(
        &mut self,
        contract: &ContractHandle,
        new_owner: Address,
        stage: OwnershipStage,
    ) -> DeployResult<()> {
        self.ledger.check(contract.address, stage)?;

        if let Err(err) = self
            .backend
            .call(
                contract.address,
                "transferOwnership",
                vec![Arg::Address(new_owner)],
            )
            .await
        {
            return Err(OwnershipTransferError::TransferFailed {
                role: contract.role,
                contract: contract.address,
                intended_owner: new_owner,
                current_owner: self.ledger.owner(contract.address),
                reason: format!("{err:#}"),
            }
            .into());
        }

        self.ledger.advance(contract.address, stage, new_owner)?;
        tracing::info!(
            role = %contract.role,
            contract = %contract.address,
            new_owner = %new_owner,
            stage = %stage,
            "Ownership transferred"
        );
        Ok(())
    }
}

fn check_arity(unit: &ContractUnit, initializer: &str, args: &[Arg]) -> Result<(), ProxyInitError> {
    let expected = unit
        .initializer_arity
        .ok_or(ProxyInitError::NotInitializable { unit: unit.name })?;
    if args.len() != expected {
        return Err(ProxyInitError::ArgumentCount {
            unit: unit.name,
            initializer: initializer.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}
