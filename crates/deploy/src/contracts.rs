//! Catalog of the deployable units of the exchange protocol.

use serde::Serialize;

/// A compiled contract the backend knows how to deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContractUnit {
    /// Artifact name.
    pub name: &'static str,
    /// Libraries that must be linked into the bytecode before deployment.
    pub libraries: &'static [&'static str],
    /// Number of arguments of `initialize`, for contracts that are initialized after deployment.
    pub initializer_arity: Option<usize>,
}

impl ContractUnit {
    const fn plain(name: &'static str) -> Self {
        Self {
            name,
            libraries: &[],
            initializer_arity: None,
        }
    }

    const fn initializable(name: &'static str, arity: usize) -> Self {
        Self {
            name,
            libraries: &[],
            initializer_arity: Some(arity),
        }
    }

    pub fn is_library(&self) -> bool {
        LIBRARIES.iter().any(|lib| lib.name == self.name)
    }
}

impl std::fmt::Display for ContractUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

pub const EXCHANGE_LIB: ContractUnit = ContractUnit::plain("MoCExchangeLib");
pub const TICK_STATE: ContractUnit = ContractUnit::plain("TickState");
pub const SAFE_TRANSFER: ContractUnit = ContractUnit::plain("SafeTransfer");

/// Shared libraries, deployed first.
pub const LIBRARIES: [ContractUnit; 3] = [EXCHANGE_LIB, TICK_STATE, SAFE_TRANSFER];

pub const EXCHANGE: ContractUnit = ContractUnit {
    name: "MoCDecentralizedExchange",
    libraries: &["MoCExchangeLib", "TickState"],
    initializer_arity: Some(11),
};
pub const FAKE_EXCHANGE: ContractUnit = ContractUnit {
    name: "MoCDexFake",
    libraries: &["MoCExchangeLib", "TickState"],
    initializer_arity: Some(11),
};
pub const FEE_MANAGER: ContractUnit = ContractUnit::initializable("CommissionManager", 7);

pub const BPRO_TOKEN: ContractUnit = ContractUnit::plain("BProToken");
pub const DOC_TOKEN: ContractUnit = ContractUnit::plain("DocToken");
pub const WRBTC: ContractUnit = ContractUnit::plain("WRBTC");
pub const TEST_TOKEN: ContractUnit = ContractUnit::plain("TestToken");

pub const PROXY_ADMIN: ContractUnit = ContractUnit::plain("ProxyAdmin");
/// Transparent proxy; constructor is `(logic, admin, data)`.
pub const UPGRADEABLE_PROXY: ContractUnit = ContractUnit::plain("AdminUpgradeabilityProxy");
pub const UPGRADE_DELEGATOR: ContractUnit = ContractUnit::initializable("UpgradeDelegator", 2);
pub const BLOCKABLE_UPGRADE_DELEGATOR: ContractUnit =
    ContractUnit::initializable("BlockableUpgradeDelegator", 4);
pub const GOVERNOR: ContractUnit = ContractUnit::plain("Governor");
pub const STOPPER: ContractUnit = ContractUnit::plain("Stopper");

pub const FAKE_PRICE_PROVIDER: ContractUnit = ContractUnit::plain("TokenPriceProviderFake");
pub const EXTERNAL_ORACLE_PRICE_PROVIDER: ContractUnit =
    ContractUnit::plain("ExternalOraclePriceProviderFallback");
pub const LAST_CLOSING_PRICE_PROVIDER: ContractUnit =
    ContractUnit::plain("TokenPriceProviderLastClosingPrice");

pub const BLACKLIST_TOKEN: ContractUnit = ContractUnit::plain("ERC20WithBlacklist");
pub const TICK_STATE_FAKE: ContractUnit = ContractUnit {
    name: "TickStateFake",
    libraries: &["TickState"],
    initializer_arity: Some(5),
};
pub const MOC_STATE_FAKE: ContractUnit = ContractUnit::plain("MocStateFake");

/// Every unit known to the deployment, in catalog order.
pub const CATALOG: &[ContractUnit] = &[
    EXCHANGE_LIB,
    TICK_STATE,
    SAFE_TRANSFER,
    EXCHANGE,
    FAKE_EXCHANGE,
    FEE_MANAGER,
    BPRO_TOKEN,
    DOC_TOKEN,
    WRBTC,
    TEST_TOKEN,
    PROXY_ADMIN,
    UPGRADEABLE_PROXY,
    UPGRADE_DELEGATOR,
    BLOCKABLE_UPGRADE_DELEGATOR,
    GOVERNOR,
    STOPPER,
    FAKE_PRICE_PROVIDER,
    EXTERNAL_ORACLE_PRICE_PROVIDER,
    LAST_CLOSING_PRICE_PROVIDER,
    BLACKLIST_TOKEN,
    TICK_STATE_FAKE,
    MOC_STATE_FAKE,
];

/// Look up a library unit by name.
pub fn library(name: &str) -> Option<&'static ContractUnit> {
    LIBRARIES.iter().find(|lib| lib.name == name)
}
