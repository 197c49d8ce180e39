//! Per-market price provider selection.

use alloy_core::primitives::Address;
use serde::Serialize;

use crate::{
    abi::Arg,
    backend::DeploymentBackend,
    config::Config,
    contracts::{self, ContractUnit},
    handle::{ContractHandle, MarketPair, Role},
};

/// Which provider to deploy for a market, with its constructor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PriceProviderSpec {
    /// Fixed test price.
    Fake,
    /// External oracle, falling back to the exchange's last closing price.
    ExternalOracleFallback {
        oracle: Address,
        dex: Address,
        base: Address,
        secondary: Address,
    },
    LastClosingPrice {
        dex: Address,
        base: Address,
        secondary: Address,
    },
}

impl PriceProviderSpec {
    /// Pick the provider for `pair`. First match wins: fakes, then an oracle
    /// configured for exactly this (base, secondary) order, then the last
    /// closing price.
    pub fn select(
        config: &Config,
        pair: MarketPair,
        dex: Address,
        base: Address,
        secondary: Address,
    ) -> Self {
        if config.deploy_fakes {
            return Self::Fake;
        }

        match config.external_oracle(pair) {
            Some(oracle) => Self::ExternalOracleFallback {
                oracle,
                dex,
                base,
                secondary,
            },
            None => Self::LastClosingPrice {
                dex,
                base,
                secondary,
            },
        }
    }

    pub fn unit(&self) -> &'static ContractUnit {
        match self {
            Self::Fake => &contracts::FAKE_PRICE_PROVIDER,
            Self::ExternalOracleFallback { .. } => &contracts::EXTERNAL_ORACLE_PRICE_PROVIDER,
            Self::LastClosingPrice { .. } => &contracts::LAST_CLOSING_PRICE_PROVIDER,
        }
    }

    pub fn constructor_args(&self) -> Vec<Arg> {
        match *self {
            Self::Fake => vec![],
            Self::ExternalOracleFallback {
                oracle,
                dex,
                base,
                secondary,
            } => vec![
                Arg::Address(oracle),
                Arg::Address(dex),
                Arg::Address(base),
                Arg::Address(secondary),
            ],
            Self::LastClosingPrice {
                dex,
                base,
                secondary,
            } => vec![
                Arg::Address(dex),
                Arg::Address(base),
                Arg::Address(secondary),
            ],
        }
    }
}

pub struct PriceProviderSelector<'b, B> {
    backend: &'b B,
}

impl<'b, B: DeploymentBackend> PriceProviderSelector<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Deploy the provider `spec` describes under the market's role.
    pub async fn deploy(
        &self,
        pair: MarketPair,
        spec: PriceProviderSpec,
    ) -> Result<ContractHandle, anyhow::Error> {
        let handle = self
            .backend
            .deploy(Role::PriceProvider(pair), spec.unit(), spec.constructor_args())
            .await?;
        tracing::info!(
            market = %pair,
            provider = spec.unit().name,
            address = %handle.address,
            "Price provider deployed"
        );
        Ok(handle)
    }

    /// Select and deploy the provider for the market made of two token handles.
    pub async fn select_and_deploy(
        &self,
        config: &Config,
        dex: Address,
        base: &ContractHandle,
        secondary: &ContractHandle,
    ) -> Result<ContractHandle, anyhow::Error> {
        let pair = match (base.role, secondary.role) {
            (Role::Token(b), Role::Token(s)) => MarketPair::new(b, s),
            _ => anyhow::bail!(
                "{} and {} do not form a token market",
                base.role,
                secondary.role
            ),
        };

        let spec = PriceProviderSpec::select(config, pair, dex, base.address, secondary.address);
        tracing::debug!(market = %pair, spec = ?spec, "Price provider selected");
        self.deploy(pair, spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;
    use crate::{
        backend::SimulatedBackend,
        config::fixtures,
        handle::{REFERENCE_MARKETS, TokenRole},
    };

    const DEX: Address = address!("dededededededededededededededededededede");
    const BASE: Address = address!("0101010101010101010101010101010101010101");
    const SECONDARY: Address = address!("0202020202020202020202020202020202020202");
    const ORACLE: Address = address!("fefefefefefefefefefefefefefefefefefefefe");

    fn docbpro() -> MarketPair {
        MarketPair::new(TokenRole::Doc, TokenRole::Bpro)
    }

    #[test]
    fn test_fakes_win_over_oracle() {
        let mut config = fixtures::resolve("testnet");
        config.deploy_fakes = true;
        assert_eq!(
            PriceProviderSpec::select(&config, docbpro(), DEX, BASE, SECONDARY),
            PriceProviderSpec::Fake
        );
    }

    #[test]
    fn test_oracle_only_for_configured_pair() {
        let mut config = fixtures::resolve("testnet");
        config.external_price_provider.clear();
        config
            .external_price_provider
            .entry(TokenRole::Doc)
            .or_default()
            .insert(TokenRole::Bpro, ORACLE);

        let selections: Vec<_> = REFERENCE_MARKETS
            .iter()
            .map(|pair| PriceProviderSpec::select(&config, *pair, DEX, BASE, SECONDARY))
            .collect();

        assert_eq!(
            selections[0],
            PriceProviderSpec::ExternalOracleFallback {
                oracle: ORACLE,
                dex: DEX,
                base: BASE,
                secondary: SECONDARY
            }
        );
        for spec in &selections[1..] {
            assert!(matches!(spec, PriceProviderSpec::LastClosingPrice { .. }));
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        for network in ["development", "testnet", "mainnet"] {
            let config = fixtures::resolve(network);
            for pair in REFERENCE_MARKETS {
                let first = PriceProviderSpec::select(&config, pair, DEX, BASE, SECONDARY);
                let second = PriceProviderSpec::select(&config.clone(), pair, DEX, BASE, SECONDARY);
                assert_eq!(first, second, "{network} {pair}");
            }
        }
    }

    #[test]
    fn test_constructor_args_order() {
        let spec = PriceProviderSpec::ExternalOracleFallback {
            oracle: ORACLE,
            dex: DEX,
            base: BASE,
            secondary: SECONDARY,
        };
        assert_eq!(
            spec.constructor_args(),
            vec![
                Arg::Address(ORACLE),
                Arg::Address(DEX),
                Arg::Address(BASE),
                Arg::Address(SECONDARY)
            ]
        );
        assert!(PriceProviderSpec::Fake.constructor_args().is_empty());
    }

    #[tokio::test]
    async fn test_select_and_deploy_uses_market_role() {
        let backend = SimulatedBackend::default();
        let config = fixtures::resolve("mainnet");
        let base = ContractHandle::adopted(Role::Token(TokenRole::Wrbtc), "WRBTC", BASE);
        let secondary =
            ContractHandle::adopted(Role::Token(TokenRole::Test), "TestToken", SECONDARY);

        let handle = PriceProviderSelector::new(&backend)
            .select_and_deploy(&config, DEX, &base, &secondary)
            .await
            .unwrap();

        assert_eq!(
            handle.role,
            Role::PriceProvider(MarketPair::new(TokenRole::Wrbtc, TokenRole::Test))
        );
        assert_eq!(handle.unit, "TokenPriceProviderLastClosingPrice");
        assert_eq!(backend.deployments_of("TokenPriceProviderLastClosingPrice"), 1);
    }

    #[tokio::test]
    async fn test_non_token_handles_are_rejected() {
        let backend = SimulatedBackend::default();
        let config = fixtures::resolve("development");
        let governor = ContractHandle::deployed(Role::Governor, "Governor", BASE);
        let doc = ContractHandle::adopted(Role::Token(TokenRole::Doc), "DocToken", SECONDARY);

        assert!(
            PriceProviderSelector::new(&backend)
                .select_and_deploy(&config, DEX, &governor, &doc)
                .await
                .is_err()
        );
        assert!(backend.events().is_empty());
    }
}
