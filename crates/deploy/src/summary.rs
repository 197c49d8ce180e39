//! Record of a completed run.

use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use derive_more::{Deref, Display};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    config::Config,
    error::{ConfigError, DeployResult},
    handle::HandleTable,
    token_pairs::RegistrationOutcome,
};

/// Hex encoded SHA-256 of the merged configuration of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Deref, Display)]
#[serde(transparent)]
pub struct ConfigHash(String);

impl ConfigHash {
    /// Hash the unscaled values `config` was resolved from, together with its
    /// network name. Maps are ordered so the JSON form is stable.
    pub fn of(config: &Config) -> Result<Self, ConfigError> {
        let json = serde_json::to_string(&(&config.network, config.source()))
            .map_err(|err| ConfigError::invalid("config", err.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(Self(hex::encode(hasher.finalize())))
    }
}

/// Every address created or adopted by a run, keyed by its summary name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub network: String,
    /// Unix timestamp, in seconds.
    pub deployed_at: i64,
    pub deployer: Address,
    pub config_hash: ConfigHash,
    pub contracts: BTreeMap<String, Address>,
    pub registration: RegistrationOutcome,
    pub tool_version: String,
}

impl RunSummary {
    pub fn new(
        config: &Config,
        deployer: Address,
        handles: &HandleTable,
        registration: &RegistrationOutcome,
    ) -> DeployResult<Self> {
        let contracts = handles
            .iter()
            .map(|handle| (handle.role.to_string(), handle.address))
            .collect();

        Ok(Self {
            network: config.network.clone(),
            deployed_at: chrono::Utc::now().timestamp(),
            deployer,
            config_hash: ConfigHash::of(config)?,
            contracts,
            registration: registration.clone(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        self.contracts.get(name).copied()
    }

    /// Contracts and token pairs as a printable table.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Contract", "Address"]);

        for (name, address) in &self.contracts {
            table.add_row(vec![name.clone(), address.to_string()]);
        }

        let mode = match &self.registration {
            RegistrationOutcome::Registered { .. } => "registered",
            RegistrationOutcome::DryRun(_) => "pending governance",
        };
        for pair in self.registration.pairs() {
            table.add_row(vec![
                format!("pair {}", pair.market),
                format!("{} ({mode})", pair.provider),
            ]);
        }

        let deployed_at = chrono::DateTime::from_timestamp(self.deployed_at, 0)
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| self.deployed_at.to_string());
        table.add_row(vec!["network".to_string(), self.network.clone()]);
        table.add_row(vec!["deployer".to_string(), self.deployer.to_string()]);
        table.add_row(vec!["deployedAt".to_string(), deployed_at]);
        table.add_row(vec!["configHash".to_string(), self.config_hash.to_string()]);
        table
    }

    /// Write the summary as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;

        std::fs::write(path, json)
            .context(format!("Failed to write run summary to {}", path.display()))?;

        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Run summary file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read run summary from {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse run summary JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::fixtures,
        handle::{ContractHandle, Role, TokenRole},
        token_pairs::DryRunSummary,
    };
    use tempdir::TempDir;

    fn handles() -> HandleTable {
        let mut table = HandleTable::new();
        table
            .extend([
                ContractHandle::deployed(Role::Exchange, "AdminUpgradeabilityProxy", Address::repeat_byte(1)),
                ContractHandle::deployed(Role::Governor, "Governor", Address::repeat_byte(2)),
                ContractHandle::adopted(Role::Token(TokenRole::Doc), "DocToken", Address::repeat_byte(3)),
            ])
            .unwrap();
        table
    }

    fn dry_run() -> RegistrationOutcome {
        RegistrationOutcome::DryRun(DryRunSummary {
            dex: Address::repeat_byte(1),
            governor: Address::repeat_byte(2),
            pairs: vec![],
        })
    }

    #[test]
    fn test_contracts_are_keyed_by_role_name() {
        let config = fixtures::resolve("development");
        let summary =
            RunSummary::new(&config, Address::ZERO, &handles(), &dry_run()).unwrap();

        assert_eq!(summary.contracts.len(), 3);
        assert_eq!(summary.address("dex"), Some(Address::repeat_byte(1)));
        assert_eq!(summary.address("doc"), Some(Address::repeat_byte(3)));
        assert_eq!(summary.address("bpro"), None);
        assert_eq!(summary.network, "development");
    }

    #[test]
    fn test_config_hash_is_deterministic() {
        let first = ConfigHash::of(&fixtures::resolve("testnet")).unwrap();
        let second = ConfigHash::of(&fixtures::resolve("testnet")).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_config_hash_changes_with_network_values() {
        let development = ConfigHash::of(&fixtures::resolve("development")).unwrap();
        let testnet = ConfigHash::of(&fixtures::resolve("testnet")).unwrap();
        assert_ne!(development, testnet);
    }

    #[test]
    fn test_table_lists_every_contract() {
        let config = fixtures::resolve("development");
        let summary =
            RunSummary::new(&config, Address::ZERO, &handles(), &dry_run()).unwrap();

        let rendered = summary.to_table().to_string();
        for name in ["dex", "governor", "doc", "configHash"] {
            assert!(rendered.contains(name), "{name} missing from\n{rendered}");
        }
    }

    #[test]
    fn test_summary_save_and_load() {
        let temp_dir = TempDir::new("mocdex-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join("deployment.json");
        let config = fixtures::resolve("testnet");
        let original =
            RunSummary::new(&config, Address::repeat_byte(9), &handles(), &dry_run()).unwrap();

        original.save_to_file(&path).expect("Failed to save summary");
        let loaded = RunSummary::load_from_file(&path).expect("Failed to load summary");

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_summary_load_missing_file() {
        let temp_dir = TempDir::new("mocdex-test").expect("Failed to create temp dir");
        assert!(RunSummary::load_from_file(&temp_dir.path().join("missing.json")).is_err());
    }
}
