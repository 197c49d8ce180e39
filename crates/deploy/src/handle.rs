//! Logical roles, contract handles and the write-once handle table.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{contracts, error::HandleError};

/// The four tokens traded on the exchange.
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
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum TokenRole {
    #[strum(serialize = "DocToken")]
    #[serde(rename = "DocToken")]
    Doc,
    #[strum(serialize = "BproToken")]
    #[serde(rename = "BproToken")]
    Bpro,
    #[strum(serialize = "WRBTC")]
    #[serde(rename = "WRBTC")]
    Wrbtc,
    #[strum(serialize = "TestToken")]
    #[serde(rename = "TestToken")]
    Test,
}

impl TokenRole {
    /// The unit deployed when the token is not pre-existing.
    pub fn unit(&self) -> &'static contracts::ContractUnit {
        match self {
            TokenRole::Doc => &contracts::DOC_TOKEN,
            TokenRole::Bpro => &contracts::BPRO_TOKEN,
            TokenRole::Wrbtc => &contracts::WRBTC,
            TokenRole::Test => &contracts::TEST_TOKEN,
        }
    }

    /// Whether freshly deployed instances get an initial supply.
    pub fn is_mintable(&self) -> bool {
        !matches!(self, TokenRole::Wrbtc)
    }

    fn summary_key(&self) -> &'static str {
        match self {
            TokenRole::Doc => "doc",
            TokenRole::Bpro => "bpro",
            TokenRole::Wrbtc => "wrbtc",
            TokenRole::Test => "test",
        }
    }

    fn provider_fragment(&self) -> &'static str {
        match self {
            TokenRole::Doc => "Doc",
            TokenRole::Bpro => "Bpro",
            TokenRole::Wrbtc => "Wrbtc",
            TokenRole::Test => "TestToken",
        }
    }
}

/// A (base, secondary) market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketPair {
    pub base: TokenRole,
    pub secondary: TokenRole,
}

impl MarketPair {
    pub const fn new(base: TokenRole, secondary: TokenRole) -> Self {
        Self { base, secondary }
    }
}

impl std::fmt::Display for MarketPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.secondary)
    }
}

/// Markets of the reference deployment, in registration order.
pub const REFERENCE_MARKETS: [MarketPair; 5] = [
    MarketPair::new(TokenRole::Doc, TokenRole::Bpro),
    MarketPair::new(TokenRole::Doc, TokenRole::Test),
    MarketPair::new(TokenRole::Doc, TokenRole::Wrbtc),
    MarketPair::new(TokenRole::Wrbtc, TokenRole::Bpro),
    MarketPair::new(TokenRole::Wrbtc, TokenRole::Test),
];

/// Logical slot filled by exactly one deployed (or adopted) contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    ExchangeLib,
    TickStateLib,
    SafeTransferLib,
    Token(TokenRole),
    Governor,
    Stopper,
    ProxyAdmin,
    UpgradeDelegator,
    FeeManagerImplementation,
    ExchangeImplementation,
    FakeExchangeImplementation,
    FeeManager,
    Exchange,
    FakeExchange,
    PriceProvider(MarketPair),
    BlacklistToken,
    TickStateFake,
    MocStateFake,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::ExchangeLib => f.write_str("exchangeLib"),
            Role::TickStateLib => f.write_str("tickState"),
            Role::SafeTransferLib => f.write_str("safeTransfer"),
            Role::Token(token) => f.write_str(token.summary_key()),
            Role::Governor => f.write_str("governor"),
            Role::Stopper => f.write_str("stopper"),
            Role::ProxyAdmin => f.write_str("proxyAdmin"),
            Role::UpgradeDelegator => f.write_str("upgradeDelegator"),
            Role::FeeManagerImplementation => f.write_str("commissionManagerImplementation"),
            Role::ExchangeImplementation => f.write_str("dexImplementation"),
            Role::FakeExchangeImplementation => f.write_str("dexFakeImplementation"),
            Role::FeeManager => f.write_str("commissionManager"),
            Role::Exchange => f.write_str("dex"),
            Role::FakeExchange => f.write_str("dexFake"),
            Role::PriceProvider(pair) => write!(
                f,
                "{}{}PriceProvider",
                lower_first(pair.base.provider_fragment()),
                pair.secondary.provider_fragment()
            ),
            Role::BlacklistToken => f.write_str("erc20WithBlacklist"),
            Role::TickStateFake => f.write_str("tickStateFake"),
            Role::MocStateFake => f.write_str("mocStateFake"),
        }
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Where a handle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleOrigin {
    /// Created by an action of this run.
    Deployed,
    /// Pre-existing address taken from configuration.
    Adopted,
}

/// Reference to a deployed unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractHandle {
    pub role: Role,
    pub unit: &'static str,
    pub address: Address,
    pub origin: HandleOrigin,
}

impl ContractHandle {
    pub fn deployed(role: Role, unit: &'static str, address: Address) -> Self {
        Self {
            role,
            unit,
            address,
            origin: HandleOrigin::Deployed,
        }
    }

    pub fn adopted(role: Role, unit: &'static str, address: Address) -> Self {
        Self {
            role,
            unit,
            address,
            origin: HandleOrigin::Adopted,
        }
    }
}

/// All handles resolved so far in a run, keyed by role.
///
/// Every role is written at most once; later phases only read.
#[derive(Debug, Clone, Default)]
pub struct HandleTable {
    handles: BTreeMap<Role, ContractHandle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: ContractHandle) -> Result<&ContractHandle, HandleError> {
        use std::collections::btree_map::Entry;

        match self.handles.entry(handle.role) {
            Entry::Occupied(_) => Err(HandleError::AlreadyResolved(handle.role)),
            Entry::Vacant(slot) => {
                tracing::debug!(role = %handle.role, address = %handle.address, origin = ?handle.origin, "Handle resolved");
                Ok(slot.insert(handle))
            }
        }
    }

    pub fn extend(
        &mut self,
        handles: impl IntoIterator<Item = ContractHandle>,
    ) -> Result<(), HandleError> {
        for handle in handles {
            self.insert(handle)?;
        }
        Ok(())
    }

    pub fn get(&self, role: Role) -> Result<&ContractHandle, HandleError> {
        self.handles.get(&role).ok_or(HandleError::Unresolved(role))
    }

    pub fn address(&self, role: Role) -> Result<Address, HandleError> {
        self.get(role).map(|h| h.address)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.handles.contains_key(&role)
    }

    pub fn contains_address(&self, address: Address) -> bool {
        self.handles.values().any(|h| h.address == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContractHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_price_provider_summary_keys() {
        let keys: Vec<_> = REFERENCE_MARKETS
            .iter()
            .map(|pair| Role::PriceProvider(*pair).to_string())
            .collect();
        assert_eq!(
            keys,
            vec![
                "docBproPriceProvider",
                "docTestTokenPriceProvider",
                "docWrbtcPriceProvider",
                "wrbtcBproPriceProvider",
                "wrbtcTestTokenPriceProvider",
            ]
        );
    }

    #[test]
    fn test_token_role_names() {
        assert_eq!(TokenRole::Bpro.to_string(), "BproToken");
        assert_eq!(TokenRole::from_str("WRBTC").unwrap(), TokenRole::Wrbtc);
        assert_eq!(TokenRole::from_str("doctoken").unwrap(), TokenRole::Doc);
        assert_eq!(Role::Token(TokenRole::Test).to_string(), "test");
    }

    #[test]
    fn test_handle_table_is_write_once() {
        let mut table = HandleTable::new();
        let first = ContractHandle::deployed(Role::Governor, "Governor", Address::repeat_byte(1));
        let second = ContractHandle::deployed(Role::Governor, "Governor", Address::repeat_byte(2));

        table.insert(first).unwrap();
        assert!(matches!(
            table.insert(second),
            Err(HandleError::AlreadyResolved(Role::Governor))
        ));
        assert_eq!(table.address(Role::Governor).unwrap(), Address::repeat_byte(1));
    }

    #[test]
    fn test_handle_table_unresolved() {
        let table = HandleTable::new();
        assert!(matches!(
            table.get(Role::Exchange),
            Err(HandleError::Unresolved(Role::Exchange))
        ));
        assert!(!table.contains_address(Address::ZERO));
    }
}
