//! Layered deployment configuration.
//!
//! A configuration file holds a `[default]` table and one table per network.
//! Resolution merges, in increasing precedence, the built-in defaults, the
//! `[default]` table and the network table. Values are replaced whole, except
//! `addresses_to_have_balance` which accumulates across layers.

use std::{
    collections::BTreeMap,
    path::Path,
    str::FromStr,
};

use alloy_core::primitives::{Address, U256};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    handle::{MarketPair, TokenRole},
};

/// Prefix of environment overrides, e.g. `MOCDEX_TESTNET__COMMISSION_RATE`.
pub const ENV_PREFIX: &str = "MOCDEX_";

/// Name of the table every network inherits from.
pub const DEFAULT_SECTION: &str = "default";

/// Networks on which test doubles are deployed unless configured otherwise.
const FAKE_NETWORKS: [&str; 2] = ["development", "coverage"];

/// One table of the configuration file. Every field is optional; presence is
/// only checked once all layers are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_fakes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pending_txs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders_for_tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_blocks_for_tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_blocks_for_tick: Option<u64>,
    /// Raw token units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_order_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_order_lifespan: Option<u64>,
    /// Raw units, like `min_order_amount`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_price_precision: Option<Decimal>,
    /// Multiplier applied to every rate and amount below (e.g. 10^18).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_decimals: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelation_penalty_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_penalty_rate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_commission: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mo_multiply_factor: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mo_multiply_factor: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_to_mint: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_address: Option<Address>,
    /// Token name → address of tokens that already exist on the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_tokens: Option<BTreeMap<String, Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses_to_have_balance: Option<Vec<Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub have_to_add_token_pairs: Option<bool>,
    /// Unix timestamp before which upgrades stay blocked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unblock_upgrades_at: Option<u64>,
    /// Base token name → secondary token name → oracle address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_price_provider: Option<BTreeMap<String, BTreeMap<String, Address>>>,
    /// Keys this tool does not interpret, kept as written.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ConfigLayer {
    /// Defaults that depend only on the network name.
    pub fn builtin(network: &str) -> Self {
        Self {
            deploy_fakes: Some(FAKE_NETWORKS.contains(&network)),
            have_to_add_token_pairs: Some(false),
            ..Default::default()
        }
    }

    /// Overlay `over` on top of `self`.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        let addresses_to_have_balance =
            match (self.addresses_to_have_balance, over.addresses_to_have_balance) {
                (Some(mut base), Some(more)) => {
                    base.extend(more);
                    Some(base)
                }
                (base, more) => more.or(base),
            };

        let mut extra = self.extra;
        extra.extend(over.extra);

        ConfigLayer {
            deploy_fakes: over.deploy_fakes.or(self.deploy_fakes),
            max_pending_txs: over.max_pending_txs.or(self.max_pending_txs),
            orders_for_tick: over.orders_for_tick.or(self.orders_for_tick),
            max_blocks_for_tick: over.max_blocks_for_tick.or(self.max_blocks_for_tick),
            min_blocks_for_tick: over.min_blocks_for_tick.or(self.min_blocks_for_tick),
            min_order_amount: over.min_order_amount.or(self.min_order_amount),
            max_order_lifespan: over.max_order_lifespan.or(self.max_order_lifespan),
            default_price_precision: over
                .default_price_precision
                .or(self.default_price_precision),
            token_decimals: over.token_decimals.or(self.token_decimals),
            commission_rate: over.commission_rate.or(self.commission_rate),
            cancelation_penalty_rate: over
                .cancelation_penalty_rate
                .or(self.cancelation_penalty_rate),
            expiration_penalty_rate: over
                .expiration_penalty_rate
                .or(self.expiration_penalty_rate),
            minimum_commission: over.minimum_commission.or(self.minimum_commission),
            min_mo_multiply_factor: over.min_mo_multiply_factor.or(self.min_mo_multiply_factor),
            max_mo_multiply_factor: over.max_mo_multiply_factor.or(self.max_mo_multiply_factor),
            tokens_to_mint: over.tokens_to_mint.or(self.tokens_to_mint),
            beneficiary_address: over.beneficiary_address.or(self.beneficiary_address),
            existing_tokens: over.existing_tokens.or(self.existing_tokens),
            addresses_to_have_balance,
            have_to_add_token_pairs: over.have_to_add_token_pairs.or(self.have_to_add_token_pairs),
            unblock_upgrades_at: over.unblock_upgrades_at.or(self.unblock_upgrades_at),
            external_price_provider: over.external_price_provider.or(self.external_price_provider),
            extra,
        }
    }
}

/// Resolved configuration of one run. Immutable once built.
///
/// Rates, commissions and the mint amount are already multiplied by
/// `token_decimals`. `min_order_amount` and `default_price_precision` are
/// taken as written.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub network: String,
    pub deploy_fakes: bool,
    pub max_pending_txs: usize,
    pub orders_for_tick: u64,
    pub max_blocks_for_tick: u64,
    pub min_blocks_for_tick: u64,
    pub min_order_amount: U256,
    pub max_order_lifespan: u64,
    pub default_price_precision: U256,
    pub commission_rate: U256,
    pub cancelation_penalty_rate: U256,
    pub expiration_penalty_rate: U256,
    pub minimum_commission: U256,
    pub min_mo_multiply_factor: U256,
    pub max_mo_multiply_factor: U256,
    /// Amount minted to every beneficiary.
    pub tokens_to_mint: U256,
    pub beneficiary_address: Address,
    pub existing_tokens: Option<BTreeMap<TokenRole, Address>>,
    pub addresses_to_have_balance: Vec<Address>,
    pub have_to_add_token_pairs: bool,
    pub unblock_upgrades_at: Option<u64>,
    pub external_price_provider: BTreeMap<TokenRole, BTreeMap<TokenRole, Address>>,
    pub extra: BTreeMap<String, serde_json::Value>,
    source: ConfigLayer,
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing(name))
}

fn to_u256(name: &'static str, value: Decimal) -> Result<U256, ConfigError> {
    if value.is_sign_negative() {
        return Err(ConfigError::invalid(name, format!("{value} is negative")));
    }
    if !value.fract().is_zero() {
        return Err(ConfigError::invalid(
            name,
            format!("{value} is not a whole number of token units"),
        ));
    }
    value
        .to_u128()
        .map(U256::from)
        .ok_or_else(|| ConfigError::invalid(name, format!("{value} is out of range")))
}

fn scale(name: &'static str, value: Decimal, decimals: Decimal) -> Result<U256, ConfigError> {
    let scaled = value
        .checked_mul(decimals)
        .ok_or_else(|| ConfigError::invalid(name, format!("{value} overflows once scaled")))?;
    to_u256(name, scaled)
}

impl Config {
    /// Check a merged layer and compute the scaled values.
    pub fn from_layer(network: &str, layer: ConfigLayer) -> Result<Self, ConfigError> {
        let source = layer.clone();

        let max_pending_txs = required(layer.max_pending_txs, "max_pending_txs")?;
        if max_pending_txs == 0 {
            return Err(ConfigError::invalid("max_pending_txs", "must be at least 1"));
        }

        let max_blocks_for_tick = required(layer.max_blocks_for_tick, "max_blocks_for_tick")?;
        let min_blocks_for_tick = required(layer.min_blocks_for_tick, "min_blocks_for_tick")?;
        if min_blocks_for_tick > max_blocks_for_tick {
            return Err(ConfigError::invalid(
                "min_blocks_for_tick",
                format!("{min_blocks_for_tick} is above max_blocks_for_tick ({max_blocks_for_tick})"),
            ));
        }

        let decimals = required(layer.token_decimals, "token_decimals")?;
        if decimals <= Decimal::ZERO || !decimals.fract().is_zero() {
            return Err(ConfigError::invalid(
                "token_decimals",
                format!("{decimals} is not a positive whole multiplier"),
            ));
        }

        let existing_tokens = layer
            .existing_tokens
            .map(|tokens| parse_existing_tokens(&tokens))
            .transpose()?;
        let external_price_provider = layer
            .external_price_provider
            .map(|oracles| parse_oracles(&oracles))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            network: network.to_string(),
            deploy_fakes: layer.deploy_fakes.unwrap_or_default(),
            max_pending_txs,
            orders_for_tick: required(layer.orders_for_tick, "orders_for_tick")?,
            max_blocks_for_tick,
            min_blocks_for_tick,
            min_order_amount: to_u256(
                "min_order_amount",
                required(layer.min_order_amount, "min_order_amount")?,
            )?,
            max_order_lifespan: required(layer.max_order_lifespan, "max_order_lifespan")?,
            default_price_precision: to_u256(
                "default_price_precision",
                required(layer.default_price_precision, "default_price_precision")?,
            )?,
            commission_rate: scale(
                "commission_rate",
                required(layer.commission_rate, "commission_rate")?,
                decimals,
            )?,
            cancelation_penalty_rate: scale(
                "cancelation_penalty_rate",
                required(layer.cancelation_penalty_rate, "cancelation_penalty_rate")?,
                decimals,
            )?,
            expiration_penalty_rate: scale(
                "expiration_penalty_rate",
                required(layer.expiration_penalty_rate, "expiration_penalty_rate")?,
                decimals,
            )?,
            minimum_commission: scale(
                "minimum_commission",
                required(layer.minimum_commission, "minimum_commission")?,
                decimals,
            )?,
            min_mo_multiply_factor: scale(
                "min_mo_multiply_factor",
                required(layer.min_mo_multiply_factor, "min_mo_multiply_factor")?,
                decimals,
            )?,
            max_mo_multiply_factor: scale(
                "max_mo_multiply_factor",
                required(layer.max_mo_multiply_factor, "max_mo_multiply_factor")?,
                decimals,
            )?,
            tokens_to_mint: scale(
                "tokens_to_mint",
                required(layer.tokens_to_mint, "tokens_to_mint")?,
                decimals,
            )?,
            beneficiary_address: required(layer.beneficiary_address, "beneficiary_address")?,
            existing_tokens,
            addresses_to_have_balance: layer.addresses_to_have_balance.unwrap_or_default(),
            have_to_add_token_pairs: layer.have_to_add_token_pairs.unwrap_or_default(),
            unblock_upgrades_at: layer.unblock_upgrades_at,
            external_price_provider,
            extra: layer.extra,
            source,
        })
    }

    /// Oracle configured for exactly this (base, secondary) market.
    pub fn external_oracle(&self, pair: MarketPair) -> Option<Address> {
        self.external_price_provider
            .get(&pair.base)
            .and_then(|secondaries| secondaries.get(&pair.secondary))
            .copied()
    }

    /// The merged, unscaled values this configuration was built from.
    pub fn source(&self) -> &ConfigLayer {
        &self.source
    }

    /// Merged configuration rendered as a TOML table.
    pub fn to_toml(&self) -> Result<String, anyhow::Error> {
        Ok(toml::to_string_pretty(&self.source)?)
    }
}

/// Token names are matched ignoring case, environment overrides arrive
/// lowercased.
fn parse_token(parameter: &'static str, name: &str) -> Result<TokenRole, ConfigError> {
    TokenRole::from_str(name)
        .map_err(|_| ConfigError::invalid(parameter, format!("unknown token `{name}`")))
}

fn parse_oracles(
    oracles: &BTreeMap<String, BTreeMap<String, Address>>,
) -> Result<BTreeMap<TokenRole, BTreeMap<TokenRole, Address>>, ConfigError> {
    let mut parsed: BTreeMap<TokenRole, BTreeMap<TokenRole, Address>> = BTreeMap::new();
    for (base, secondaries) in oracles {
        let base = parse_token("external_price_provider", base)?;
        for (secondary, oracle) in secondaries {
            let secondary = parse_token("external_price_provider", secondary)?;
            parsed.entry(base).or_default().insert(secondary, *oracle);
        }
    }
    Ok(parsed)
}

fn parse_existing_tokens(
    tokens: &BTreeMap<String, Address>,
) -> Result<BTreeMap<TokenRole, Address>, ConfigError> {
    let mut parsed = BTreeMap::new();
    for (name, address) in tokens {
        parsed.insert(parse_token("existing_tokens", name)?, *address);
    }

    let missing: Vec<_> = [TokenRole::Bpro, TokenRole::Doc, TokenRole::Wrbtc, TokenRole::Test]
        .into_iter()
        .filter(|token| !parsed.contains_key(token))
        .map(|token| token.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::invalid(
            "existing_tokens",
            format!("missing {}", missing.join(", ")),
        ));
    }

    Ok(parsed)
}

/// Reads configuration sources and resolves a [`Config`] per network.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    figment: Figment,
}

impl ConfigResolver {
    /// TOML file overlaid with `MOCDEX_<NETWORK>__<KEY>` environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_toml_str(content: &str) -> Self {
        Self::from_figment(Figment::new().merge(Toml::string(content)))
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    /// A single table of the sources, empty if absent.
    pub fn layer(&self, section: &str) -> Result<ConfigLayer, ConfigError> {
        if !self.figment.contains(section) {
            return Ok(ConfigLayer::default());
        }
        self.figment
            .extract_inner(section)
            .map_err(|err| ConfigError::Source(err.to_string()))
    }

    /// Merge built-in defaults, `[default]` and `[network]`, then validate.
    pub fn resolve(&self, network: &str) -> Result<Config, ConfigError> {
        if !self.figment.contains(network) {
            tracing::warn!(network, "No configuration section for network, using defaults only");
        }

        let merged = ConfigLayer::builtin(network)
            .merge(self.layer(DEFAULT_SECTION)?)
            .merge(self.layer(network)?);
        let config = Config::from_layer(network, merged)?;

        tracing::debug!(
            network,
            deploy_fakes = config.deploy_fakes,
            existing_tokens = config.existing_tokens.is_some(),
            max_pending_txs = config.max_pending_txs,
            "Configuration resolved"
        );
        Ok(config)
    }
}
