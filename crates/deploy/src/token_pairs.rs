//! Market registration plan.

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{
    abi::Arg,
    backend::DeploymentBackend,
    error::{ActionFailure, DeployResult, HandleError},
    handle::{HandleTable, MarketPair, Role},
};

/// One market as submitted to the exchange's `addTokenPair`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub market: MarketPair,
    pub base: Address,
    pub secondary: Address,
    pub provider: Address,
    pub base_precision: U256,
    pub secondary_precision: U256,
}

impl TokenPair {
    pub fn args(&self) -> Vec<Arg> {
        vec![
            Arg::Address(self.base),
            Arg::Address(self.secondary),
            Arg::Address(self.provider),
            Arg::Uint(self.base_precision),
            Arg::Uint(self.secondary_precision),
        ]
    }
}

/// The pairs that a governance-gated registration would submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunSummary {
    pub dex: Address,
    pub governor: Address,
    pub pairs: Vec<TokenPair>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum RegistrationOutcome {
    Registered { dex: Address, pairs: Vec<TokenPair> },
    DryRun(DryRunSummary),
}

impl RegistrationOutcome {
    pub fn pairs(&self) -> &[TokenPair] {
        match self {
            RegistrationOutcome::Registered { pairs, .. } => pairs,
            RegistrationOutcome::DryRun(summary) => &summary.pairs,
        }
    }
}

/// One pair per market, in market order, with both precisions set to
/// `precision`. Tokens and providers are read from `handles`.
pub fn plan(
    handles: &HandleTable,
    markets: &[MarketPair],
    precision: U256,
) -> Result<Vec<TokenPair>, HandleError> {
    markets
        .iter()
        .map(|market| {
            Ok(TokenPair {
                market: *market,
                base: handles.address(Role::Token(market.base))?,
                secondary: handles.address(Role::Token(market.secondary))?,
                provider: handles.address(Role::PriceProvider(*market))?,
                base_precision: precision,
                secondary_precision: precision,
            })
        })
        .collect()
}

/// Every address of every pair must be a resolved handle.
pub fn verify(pairs: &[TokenPair], handles: &HandleTable) -> Result<(), HandleError> {
    for pair in pairs {
        for address in [pair.base, pair.secondary, pair.provider] {
            if !handles.contains_address(address) {
                return Err(HandleError::UnknownAddress {
                    address,
                    referenced_by: pair.market.to_string(),
                });
            }
        }
    }
    Ok(())
}

pub struct TokenPairPlanner<'b, B> {
    backend: &'b B,
    execute: bool,
}

impl<'b, B: DeploymentBackend> TokenPairPlanner<'b, B> {
    /// With `execute` unset, [`Self::register`] only reports the plan.
    pub fn new(backend: &'b B, execute: bool) -> Self {
        Self { backend, execute }
    }

    /// Submit `pairs` to the exchange in order, or return them as a dry run.
    ///
    /// `addTokenPair` is governance gated. In execute mode it is sent by the
    /// deployer straight to the exchange, which only succeeds while the
    /// governor authorizes the deployer (as the development governor does).
    /// On a governed network leave execution off and submit the dry run
    /// through the governor. The simulated backend does not enforce the gate.
    pub async fn register(
        &self,
        pairs: Vec<TokenPair>,
        handles: &HandleTable,
    ) -> DeployResult<RegistrationOutcome> {
        verify(&pairs, handles)?;
        let dex = handles.address(Role::Exchange)?;
        let governor = handles.address(Role::Governor)?;

        if !self.execute {
            tracing::info!(
                dex = %dex,
                governor = %governor,
                pairs = pairs.len(),
                "Token pairs not registered, they must be added through governance"
            );
            for pair in &pairs {
                tracing::info!(
                    market = %pair.market,
                    base = %pair.base,
                    secondary = %pair.secondary,
                    provider = %pair.provider,
                    precision = %pair.base_precision,
                    "Token pair to add"
                );
            }
            return Ok(RegistrationOutcome::DryRun(DryRunSummary {
                dex,
                governor,
                pairs,
            }));
        }

        for pair in &pairs {
            self.backend
                .call(dex, "addTokenPair", pair.args())
                .await
                .map_err(|err| ActionFailure::new(format!("add token pair {}", pair.market), &err))?;
            tracing::info!(market = %pair.market, dex = %dex, "Token pair registered");
        }

        Ok(RegistrationOutcome::Registered { dex, pairs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::SimulatedBackend,
        contracts,
        handle::{ContractHandle, REFERENCE_MARKETS, TokenRole},
    };
    use strum::IntoEnumIterator;

    async fn market_handles(backend: &SimulatedBackend) -> HandleTable {
        let mut table = HandleTable::new();
        for token in TokenRole::iter() {
            let handle = backend
                .deploy(Role::Token(token), token.unit(), vec![])
                .await
                .unwrap();
            table.insert(handle).unwrap();
        }
        for market in REFERENCE_MARKETS {
            let handle = backend
                .deploy(Role::PriceProvider(market), &contracts::FAKE_PRICE_PROVIDER, vec![])
                .await
                .unwrap();
            table.insert(handle).unwrap();
        }
        for (role, unit) in [
            (Role::Exchange, &contracts::UPGRADEABLE_PROXY),
            (Role::Governor, &contracts::GOVERNOR),
        ] {
            table.insert(backend.deploy(role, unit, vec![]).await.unwrap()).unwrap();
        }
        table
    }

    #[tokio::test]
    async fn test_plan_follows_market_order() {
        let backend = SimulatedBackend::default();
        let handles = market_handles(&backend).await;
        let precision = U256::from(1_000_000u64);

        let pairs = plan(&handles, &REFERENCE_MARKETS, precision).unwrap();

        assert_eq!(pairs.len(), 5);
        for (pair, market) in pairs.iter().zip(REFERENCE_MARKETS) {
            assert_eq!(pair.market, market);
            assert_eq!(pair.base, handles.address(Role::Token(market.base)).unwrap());
            assert_eq!(pair.provider, handles.address(Role::PriceProvider(market)).unwrap());
            assert_eq!(pair.base_precision, precision);
            assert_eq!(pair.secondary_precision, precision);
        }
    }

    #[test]
    fn test_plan_requires_providers() {
        let mut handles = HandleTable::new();
        for token in TokenRole::iter() {
            handles
                .insert(ContractHandle::adopted(
                    Role::Token(token),
                    token.unit().name,
                    Address::with_last_byte(token as u8 + 1),
                ))
                .unwrap();
        }

        let err = plan(&handles, &REFERENCE_MARKETS, U256::ONE).unwrap_err();
        assert!(matches!(err, HandleError::Unresolved(Role::PriceProvider(_))));
    }

    #[tokio::test]
    async fn test_dry_run_matches_registration() {
        let backend = SimulatedBackend::default();
        let handles = market_handles(&backend).await;
        let pairs = plan(&handles, &REFERENCE_MARKETS, U256::ONE).unwrap();

        let dry = TokenPairPlanner::new(&backend, false)
            .register(pairs.clone(), &handles)
            .await
            .unwrap();
        assert!(matches!(dry, RegistrationOutcome::DryRun(_)));
        assert!(backend.calls("addTokenPair").is_empty());

        let registered = TokenPairPlanner::new(&backend, true)
            .register(pairs, &handles)
            .await
            .unwrap();
        assert_eq!(dry.pairs(), registered.pairs());

        let submitted = backend.calls("addTokenPair");
        assert_eq!(submitted.len(), 5);
        for ((target, args), pair) in submitted.iter().zip(registered.pairs()) {
            assert_eq!(*target, handles.address(Role::Exchange).unwrap());
            assert_eq!(*args, pair.args());
        }
    }

    #[tokio::test]
    async fn test_dry_run_names_governance_route() {
        let backend = SimulatedBackend::default();
        let handles = market_handles(&backend).await;
        let pairs = plan(&handles, &REFERENCE_MARKETS, U256::ONE).unwrap();

        let outcome = TokenPairPlanner::new(&backend, false)
            .register(pairs.clone(), &handles)
            .await
            .unwrap();

        let RegistrationOutcome::DryRun(summary) = outcome else {
            panic!("registration must not execute");
        };
        assert_eq!(summary.dex, handles.address(Role::Exchange).unwrap());
        assert_eq!(summary.governor, handles.address(Role::Governor).unwrap());
        assert_eq!(summary.pairs, pairs);
    }

    #[tokio::test]
    async fn test_unknown_address_is_rejected() {
        let backend = SimulatedBackend::default();
        let handles = market_handles(&backend).await;
        let mut pairs = plan(&handles, &REFERENCE_MARKETS, U256::ONE).unwrap();
        pairs[2].provider = Address::repeat_byte(0x42);

        let err = TokenPairPlanner::new(&backend, true)
            .register(pairs, &handles)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("DocToken/WRBTC"), "{err}");
        assert!(backend.calls("addTokenPair").is_empty());
    }
}
