//! Deterministic in-memory chain.
//!
//! Used to rehearse a deployment without a node (`--backend simulated`) and as the
//! backend of the test-suite. It models just enough contract behaviour to
//! check orchestration: `Ownable` owners, one-shot initializers, library
//! linking, token balances and how many operations are in flight at once.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy_core::primitives::{Address, B256, U256, address, keccak256};
use anyhow::{Context, Result};

use super::{CallReceipt, DeploymentBackend};
use crate::{
    abi::Arg,
    contracts::{self, ContractUnit},
    handle::{ContractHandle, Role},
};

/// First pre-funded account of a local dev node.
pub const DEFAULT_DEPLOYER: Address = address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

/// Everything the simulated chain observed, in inclusion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Deployed {
        role: Role,
        unit: &'static str,
        address: Address,
        args: Vec<Arg>,
    },
    Linked {
        library: &'static str,
        consumer: &'static str,
    },
    Called {
        target: Address,
        unit: &'static str,
        method: String,
        args: Vec<Arg>,
    },
}

#[derive(Debug, Clone)]
struct SimContract {
    unit: &'static str,
    owner: Address,
    initialized: bool,
}

#[derive(Debug, Default)]
struct SimState {
    nonce: u64,
    contracts: HashMap<Address, SimContract>,
    links: HashMap<&'static str, HashMap<&'static str, Address>>,
    balances: HashMap<(Address, Address), U256>,
    events: Vec<SimEvent>,
    failing_deploys: HashSet<&'static str>,
    failing_calls: HashSet<(&'static str, String)>,
}

/// Decrements the in-flight counter when the operation settles.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SimulatedBackend {
    deployer: Address,
    latency: Duration,
    state: Mutex<SimState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DEPLOYER)
    }
}

impl SimulatedBackend {
    pub fn new(deployer: Address) -> Self {
        Self {
            deployer,
            latency: Duration::ZERO,
            state: Mutex::new(SimState::default()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every operation by `latency` so concurrent operations overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make every deployment of `unit` fail.
    pub fn fail_deploy(self, unit: &'static str) -> Self {
        self.state().failing_deploys.insert(unit);
        self
    }

    /// Make every `method` call on instances of `unit` fail.
    pub fn fail_call(self, unit: &'static str, method: impl Into<String>) -> Self {
        self.state().failing_calls.insert((unit, method.into()));
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        InFlight(&self.in_flight)
    }

    /// Highest number of operations that were unsettled at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    pub fn owner_of(&self, contract: Address) -> Option<Address> {
        self.state().contracts.get(&contract).map(|c| c.owner)
    }

    pub fn is_initialized(&self, contract: Address) -> bool {
        self.state()
            .contracts
            .get(&contract)
            .is_some_and(|c| c.initialized)
    }

    pub fn balance_of(&self, token: Address, holder: Address) -> U256 {
        self.state()
            .balances
            .get(&(token, holder))
            .copied()
            .unwrap_or_default()
    }

    /// Arguments of every call to `method`, in inclusion order.
    pub fn calls(&self, method: &str) -> Vec<(Address, Vec<Arg>)> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                SimEvent::Called {
                    target,
                    method: m,
                    args,
                    ..
                } if m == method => Some((*target, args.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of deployments of `unit`.
    pub fn deployments_of(&self, unit: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, SimEvent::Deployed { unit: u, .. } if *u == unit))
            .count()
    }

    fn next_address(state: &mut SimState, deployer: Address) -> Address {
        let mut preimage = deployer.to_vec();
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        state.nonce += 1;
        Address::from_slice(&keccak256(&preimage)[12..])
    }

    fn next_tx_hash(state: &mut SimState) -> B256 {
        state.nonce += 1;
        keccak256(state.nonce.to_be_bytes())
    }
}

impl DeploymentBackend for SimulatedBackend {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn deploy(
        &self,
        role: Role,
        unit: &'static ContractUnit,
        args: Vec<Arg>,
    ) -> Result<ContractHandle> {
        let _guard = self.enter().await;
        let mut state = self.state();

        if state.failing_deploys.contains(unit.name) {
            anyhow::bail!("transaction reverted while deploying {}", unit.name);
        }

        let linked = state.links.get(unit.name);
        for lib in unit.libraries {
            if !linked.is_some_and(|l| l.contains_key(lib)) {
                anyhow::bail!("{} requires library {} to be linked", unit.name, lib);
            }
        }

        let address = Self::next_address(&mut state, self.deployer);

        // A proxy deployed with initializer calldata has already run it.
        let initialized = *unit == contracts::UPGRADEABLE_PROXY
            && matches!(args.get(2), Some(Arg::Bytes(data)) if !data.is_empty());

        state.contracts.insert(
            address,
            SimContract {
                unit: unit.name,
                owner: self.deployer,
                initialized,
            },
        );
        state.events.push(SimEvent::Deployed {
            role,
            unit: unit.name,
            address,
            args,
        });

        Ok(ContractHandle::deployed(role, unit.name, address))
    }

    async fn link(&self, library: &ContractHandle, consumer: &'static ContractUnit) -> Result<()> {
        let _guard = self.enter().await;
        let mut state = self.state();

        let lib = contracts::library(library.unit)
            .with_context(|| format!("{} is not a library", library.unit))?;
        if !state.contracts.contains_key(&library.address) {
            anyhow::bail!("library {} is not deployed at {}", lib.name, library.address);
        }

        state
            .links
            .entry(consumer.name)
            .or_default()
            .insert(lib.name, library.address);
        state.events.push(SimEvent::Linked {
            library: lib.name,
            consumer: consumer.name,
        });
        Ok(())
    }

    async fn call(&self, target: Address, method: &str, args: Vec<Arg>) -> Result<CallReceipt> {
        let _guard = self.enter().await;
        let mut state = self.state();
        let deployer = self.deployer;

        let unit = state
            .contracts
            .get(&target)
            .map(|c| c.unit)
            .with_context(|| format!("no contract deployed at {target}"))?;

        if state.failing_calls.contains(&(unit, method.to_string())) {
            anyhow::bail!("transaction reverted: {}.{}", unit, method);
        }

        match method {
            "transferOwnership" => {
                let new_owner = args
                    .first()
                    .and_then(Arg::as_address)
                    .context("transferOwnership expects an address")?;
                let contract = state
                    .contracts
                    .get_mut(&target)
                    .context("contract disappeared")?;
                if contract.owner != deployer {
                    anyhow::bail!("Ownable: caller is not the owner of {target}");
                }
                contract.owner = new_owner;
            }
            "initialize" => {
                let contract = state
                    .contracts
                    .get_mut(&target)
                    .context("contract disappeared")?;
                if contract.initialized {
                    anyhow::bail!("Initializable: {target} is already initialized");
                }
                contract.initialized = true;
            }
            "mint" => {
                let (Some(Arg::Address(holder)), Some(Arg::Uint(amount))) =
                    (args.first(), args.get(1))
                else {
                    anyhow::bail!("mint expects (address, uint256)");
                };
                *state.balances.entry((target, *holder)).or_default() += *amount;
            }
            _ => {}
        }

        state.events.push(SimEvent::Called {
            target,
            unit,
            method: method.to_string(),
            args,
        });
        let tx_hash = Self::next_tx_hash(&mut state);

        Ok(CallReceipt {
            tx_hash,
            block_number: Some(state.nonce),
        })
    }
}
