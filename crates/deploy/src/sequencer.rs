//! The phase-ordered deployment driver.
//!
//! Phases are strict barriers: every action of a phase settles before the
//! next phase starts, and every handle a phase needs was written to the
//! [`HandleTable`] by an earlier one. The first failure aborts the run.

use std::future::Future;

use alloy_core::primitives::{Address, U256};
use serde::Serialize;

use crate::{
    abi::Arg,
    backend::DeploymentBackend,
    batch::{BatchExecutor, DeploymentAction},
    config::Config,
    contracts::{self, ContractUnit},
    error::{ActionFailure, DeployResult, HandleError, PhaseError},
    handle::{ContractHandle, HandleTable, REFERENCE_MARKETS, Role, TokenRole},
    mint::{self, MintFanout},
    price_provider::PriceProviderSelector,
    proxy::{
        EXCHANGE_PROXY, FAKE_EXCHANGE_PROXY, FEE_MANAGER_PROXY, OwnershipChain, ProxiedContract,
        ProxyOptions, ProxyOwnershipManager,
    },
    summary::RunSummary,
    token_pairs::{self, RegistrationOutcome, TokenPairPlanner},
};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    strum::Display,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Shared libraries and, unless adopted, the tokens.
    Libraries,
    Linking,
    /// Adopt configured tokens or read back the deployed ones.
    Tokens,
    /// Governance contracts, proxy admin and proxied implementations.
    Infrastructure,
    Proxies,
    Ownership,
    /// Price providers and token pair registration.
    Markets,
    /// Test doubles, only when fakes are deployed.
    Fixtures,
    /// Initial balances, only for freshly deployed tokens.
    Minting,
    Summary,
}

/// Library roles, in deployment order.
const LIBRARY_ROLES: [(Role, &ContractUnit); 3] = [
    (Role::ExchangeLib, &contracts::EXCHANGE_LIB),
    (Role::TickStateLib, &contracts::TICK_STATE),
    (Role::SafeTransferLib, &contracts::SAFE_TRANSFER),
];

/// Token deployment order when no tokens are adopted.
const TOKENS: [TokenRole; 4] = [
    TokenRole::Bpro,
    TokenRole::Wrbtc,
    TokenRole::Doc,
    TokenRole::Test,
];

fn library_role(name: &str) -> Option<Role> {
    LIBRARY_ROLES
        .iter()
        .find(|(_, unit)| unit.name == name)
        .map(|(role, _)| *role)
}

fn deploy_action<'a, B: DeploymentBackend>(
    backend: &'a B,
    role: Role,
    unit: &'static ContractUnit,
    args: Vec<Arg>,
) -> DeploymentAction<'a, ContractHandle> {
    DeploymentAction::new(format!("deploy {role} ({unit})"), move || {
        backend.deploy(role, unit, args)
    })
}

async fn run_phase<T>(
    phase: Phase,
    work: impl Future<Output = DeployResult<T>>,
) -> Result<T, PhaseError> {
    tracing::info!(phase = %phase, "Phase started");
    match work.await {
        Ok(value) => {
            tracing::info!(phase = %phase, "Phase completed");
            Ok(value)
        }
        Err(source) => {
            tracing::error!(phase = %phase, error = %source, "Phase failed, aborting deployment");
            Err(PhaseError { phase, source })
        }
    }
}

pub struct DeploymentSequencer<'a, B> {
    backend: &'a B,
    config: &'a Config,
    executor: BatchExecutor,
    handles: HandleTable,
    proxies: ProxyOwnershipManager<'a, B>,
}

impl<'a, B: DeploymentBackend> DeploymentSequencer<'a, B> {
    pub fn new(backend: &'a B, config: &'a Config) -> Self {
        Self {
            backend,
            config,
            executor: BatchExecutor::new(config.max_pending_txs),
            handles: HandleTable::new(),
            proxies: ProxyOwnershipManager::new(backend),
        }
    }

    /// Run every phase in order and summarize the created contracts.
    pub async fn run(mut self) -> Result<RunSummary, PhaseError> {
        tracing::info!(
            network = %self.config.network,
            deployer = %self.backend.deployer(),
            deploy_fakes = self.config.deploy_fakes,
            adopt_tokens = self.config.existing_tokens.is_some(),
            max_pending_txs = self.config.max_pending_txs,
            "Starting deployment"
        );

        run_phase(Phase::Libraries, self.deploy_libraries()).await?;
        run_phase(Phase::Linking, self.link_libraries()).await?;
        run_phase(Phase::Tokens, self.resolve_tokens()).await?;
        run_phase(Phase::Infrastructure, self.deploy_infrastructure()).await?;
        run_phase(Phase::Proxies, self.create_proxies()).await?;
        let chain = run_phase(Phase::Ownership, self.build_ownership()).await?;
        let registration = run_phase(Phase::Markets, self.setup_markets()).await?;
        run_phase(Phase::Fixtures, self.deploy_fixtures()).await?;
        run_phase(Phase::Minting, self.mint()).await?;

        let summary = run_phase(Phase::Summary, async {
            RunSummary::new(
                self.config,
                self.backend.deployer(),
                &self.handles,
                &registration,
            )
        })
        .await?;

        tracing::info!(
            contracts = summary.contracts.len(),
            delegator = %chain.delegator.address,
            config_hash = %summary.config_hash,
            "Deployment completed"
        );
        Ok(summary)
    }

    async fn deploy_one(
        &self,
        role: Role,
        unit: &'static ContractUnit,
        args: Vec<Arg>,
    ) -> DeployResult<ContractHandle> {
        let handle = self
            .backend
            .deploy(role, unit, args)
            .await
            .map_err(|err| ActionFailure::new(format!("deploy {role} ({unit})"), &err))?;
        tracing::info!(role = %role, unit = %unit, address = %handle.address, "Contract deployed");
        Ok(handle)
    }

    async fn deploy_batch(
        &self,
        actions: Vec<DeploymentAction<'a, ContractHandle>>,
    ) -> DeployResult<Vec<ContractHandle>> {
        let handles = self.executor.run_batched(actions).await?;
        for handle in &handles {
            tracing::info!(role = %handle.role, unit = handle.unit, address = %handle.address, "Contract deployed");
        }
        Ok(handles)
    }

    async fn deploy_libraries(&mut self) -> DeployResult<()> {
        let mut actions: Vec<_> = LIBRARY_ROLES
            .iter()
            .map(|(role, unit)| deploy_action(self.backend, *role, *unit, vec![]))
            .collect();

        if self.config.existing_tokens.is_none() {
            actions.extend(
                TOKENS
                    .iter()
                    .map(|token| deploy_action(self.backend, Role::Token(*token), token.unit(), vec![])),
            );
        }

        let handles = self.deploy_batch(actions).await?;
        self.handles.extend(handles)?;
        Ok(())
    }

    async fn link_libraries(&mut self) -> DeployResult<()> {
        let mut consumers = vec![&contracts::EXCHANGE];
        if self.config.deploy_fakes {
            consumers.extend([&contracts::FAKE_EXCHANGE, &contracts::TICK_STATE_FAKE]);
        }

        let mut actions = Vec::new();
        for consumer in consumers {
            for name in consumer.libraries {
                let role = library_role(name).ok_or_else(|| {
                    ActionFailure::new(
                        format!("link {name} into {consumer}"),
                        &anyhow::anyhow!("{name} is not a known library"),
                    )
                })?;
                let library = self.handles.get(role)?.clone();
                let backend = self.backend;
                actions.push(DeploymentAction::new(
                    format!("link {role} into {consumer}"),
                    move || async move { backend.link(&library, consumer).await },
                ));
            }
        }

        tracing::debug!(links = actions.len(), "Linking libraries");
        self.executor.run_batched(actions).await?;
        Ok(())
    }

    async fn resolve_tokens(&mut self) -> DeployResult<()> {
        let config = self.config;
        match &config.existing_tokens {
            Some(existing) => {
                for (token, address) in existing {
                    self.handles.insert(ContractHandle::adopted(
                        Role::Token(*token),
                        token.unit().name,
                        *address,
                    ))?;
                    tracing::info!(token = %token, address = %address, "Adopted existing token");
                }
            }
            None => {
                for token in TOKENS {
                    let handle = self.handles.get(Role::Token(token))?;
                    tracing::debug!(token = %token, address = %handle.address, "Token deployed in this run");
                }
            }
        }
        Ok(())
    }

    fn proxied(&self) -> Vec<ProxiedContract> {
        let mut proxied = vec![FEE_MANAGER_PROXY, EXCHANGE_PROXY];
        if self.config.deploy_fakes {
            proxied.push(FAKE_EXCHANGE_PROXY);
        }
        proxied
    }

    async fn deploy_infrastructure(&mut self) -> DeployResult<()> {
        let governance = [
            (Role::Governor, &contracts::GOVERNOR),
            (Role::Stopper, &contracts::STOPPER),
            (Role::ProxyAdmin, &contracts::PROXY_ADMIN),
        ];

        let proxied = self.proxied();
        let actions = governance
            .into_iter()
            .chain(proxied.iter().map(|p| (p.implementation, p.unit)))
            .map(|(role, unit)| deploy_action(self.backend, role, unit, vec![]))
            .collect();

        let handles = self.deploy_batch(actions).await?;
        for handle in handles {
            if proxied.iter().any(|p| p.implementation == handle.role) {
                self.proxies.register_implementation(handle);
            } else {
                self.handles.insert(handle)?;
            }
        }
        Ok(())
    }

    fn fee_manager_args(&self) -> Result<Vec<Arg>, HandleError> {
        let config = self.config;
        Ok(vec![
            Arg::Address(config.beneficiary_address),
            Arg::Uint(config.commission_rate),
            Arg::Uint(config.cancelation_penalty_rate),
            Arg::Uint(config.expiration_penalty_rate),
            Arg::Address(self.handles.address(Role::Governor)?),
            Arg::Address(self.backend.deployer()),
            Arg::Uint(config.minimum_commission),
        ])
    }

    fn exchange_args(&self) -> Result<Vec<Arg>, HandleError> {
        let config = self.config;
        Ok(vec![
            Arg::Address(self.handles.address(Role::Token(TokenRole::Doc))?),
            Arg::Address(self.handles.address(Role::FeeManager)?),
            Arg::uint(config.orders_for_tick),
            Arg::uint(config.max_blocks_for_tick),
            Arg::uint(config.min_blocks_for_tick),
            Arg::Uint(config.min_order_amount),
            Arg::Uint(config.min_mo_multiply_factor),
            Arg::Uint(config.max_mo_multiply_factor),
            Arg::uint(config.max_order_lifespan),
            Arg::Address(self.handles.address(Role::Governor)?),
            Arg::Address(self.handles.address(Role::Stopper)?),
        ])
    }

    async fn create_proxies(&mut self) -> DeployResult<()> {
        let options = ProxyOptions {
            admin: self.handles.address(Role::ProxyAdmin)?,
            reupload: false,
        };

        // Fee manager first, the exchange initializer takes its proxy address
        for target in self.proxied() {
            let args = if target.proxy == Role::FeeManager {
                self.fee_manager_args()?
            } else {
                self.exchange_args()?
            };

            let created = self
                .proxies
                .create_proxy(target, "initialize", args, options)
                .await?;
            self.handles.insert(created.implementation)?;
            self.handles.insert(created.proxy)?;
        }
        Ok(())
    }

    async fn build_ownership(&mut self) -> DeployResult<OwnershipChain> {
        let governor = self.handles.get(Role::Governor)?.clone();
        let proxy_admin = self.handles.get(Role::ProxyAdmin)?.clone();
        let fee_manager = self.handles.get(Role::FeeManager)?.clone();

        self.proxies
            .hand_to_admin(&[&fee_manager], &proxy_admin)
            .await?;
        let chain = self
            .proxies
            .build_ownership_chain(self.config, &governor, &proxy_admin, self.backend.deployer())
            .await?;
        self.handles.insert(chain.delegator.clone())?;
        Ok(chain)
    }

    async fn setup_markets(&mut self) -> DeployResult<RegistrationOutcome> {
        let config = self.config;
        let dex = self.handles.address(Role::Exchange)?;
        let selector = PriceProviderSelector::new(self.backend);

        let mut actions = Vec::with_capacity(REFERENCE_MARKETS.len());
        for market in REFERENCE_MARKETS {
            let base = self.handles.get(Role::Token(market.base))?.clone();
            let secondary = self.handles.get(Role::Token(market.secondary))?.clone();
            let selector = &selector;
            actions.push(DeploymentAction::new(
                format!("deploy {}", Role::PriceProvider(market)),
                move || async move {
                    selector
                        .select_and_deploy(config, dex, &base, &secondary)
                        .await
                },
            ));
        }
        let providers = self.executor.run_batched(actions).await?;
        self.handles.extend(providers)?;

        let pairs = token_pairs::plan(
            &self.handles,
            &REFERENCE_MARKETS,
            config.default_price_precision,
        )?;
        TokenPairPlanner::new(self.backend, config.have_to_add_token_pairs)
            .register(pairs, &self.handles)
            .await
    }

    async fn deploy_fixtures(&mut self) -> DeployResult<()> {
        if !self.config.deploy_fakes {
            tracing::debug!("Fakes disabled, no fixtures to deploy");
            return Ok(());
        }
        let config = self.config;

        let blacklist = self
            .deploy_one(Role::BlacklistToken, &contracts::BLACKLIST_TOKEN, vec![])
            .await?;
        self.handles.insert(blacklist)?;

        let tick_state = self
            .deploy_one(Role::TickStateFake, &contracts::TICK_STATE_FAKE, vec![])
            .await?;
        let init_args = vec![
            Arg::Address(self.handles.address(Role::Token(TokenRole::Doc))?),
            Arg::Address(self.handles.address(Role::Token(TokenRole::Bpro))?),
            Arg::uint(config.orders_for_tick),
            Arg::uint(config.max_blocks_for_tick),
            Arg::uint(config.min_blocks_for_tick),
        ];
        self.backend
            .call(tick_state.address, "initialize", init_args)
            .await
            .map_err(|err| ActionFailure::new(format!("initialize {}", Role::TickStateFake), &err))?;
        self.handles.insert(tick_state)?;

        let doc_bpro = self
            .handles
            .address(Role::PriceProvider(REFERENCE_MARKETS[0]))?;
        let moc_state = self
            .deploy_one(
                Role::MocStateFake,
                &contracts::MOC_STATE_FAKE,
                vec![
                    Arg::Address(doc_bpro),
                    Arg::Uint(U256::ZERO),
                    Arg::Uint(U256::ZERO),
                    Arg::Uint(U256::ZERO),
                ],
            )
            .await?;
        self.handles.insert(moc_state)?;
        Ok(())
    }

    async fn mint(&mut self) -> DeployResult<()> {
        if self.config.existing_tokens.is_some() {
            tracing::info!("Tokens were adopted, skipping minting");
            return Ok(());
        }

        let tokens = TOKENS
            .iter()
            .map(|token| self.handles.get(Role::Token(*token)).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        let holders: Vec<Address> = mint::beneficiaries(self.config, self.backend.deployer());

        let receipts = MintFanout::new(self.backend, self.executor)
            .mint(&tokens, &holders, self.config.tokens_to_mint)
            .await?;
        tracing::info!(mints = receipts.len(), holders = holders.len(), "Initial balances minted");
        Ok(())
    }
}
