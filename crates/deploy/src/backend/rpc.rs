//! JSON-RPC backend for a node holding an unlocked deployer account.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::Context;
use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{ArtifactStore, CallReceipt, DeploymentBackend};
use crate::{
    abi::{self, Arg},
    contracts::ContractUnit,
    handle::{ContractHandle, Role},
};

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between receipt polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Receipt polls before giving up on a transaction (~5 minutes).
const DEFAULT_MAX_POLLS: usize = 600;

/// Create an HTTP client configured for JSON-RPC requests.
fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?;

    let result: Value = response
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    if let Some(error) = result.get("error") {
        anyhow::bail!(
            "RPC error: {}",
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
        );
    }

    let result_value = result
        .get("result")
        .context("No result in response")?
        .clone();

    serde_json::from_value(result_value)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Parse a u64 from a hex quantity (with 0x prefix).
fn parse_quantity(value: &str) -> Result<u64, anyhow::Error> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity {value}"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: B256,
    #[serde(default)]
    contract_address: Option<Address>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

impl TransactionReceipt {
    fn succeeded(&self) -> bool {
        // Pre-byzantium receipts carry no status
        self.status.as_deref().is_none_or(|s| s == "0x1")
    }
}

/// Deploys and calls through `eth_sendTransaction`.
///
/// Library links are kept per consumer and substituted into the consumer's
/// creation bytecode at deployment time.
#[derive(Debug)]
pub struct RpcBackend {
    client: reqwest::Client,
    url: Url,
    from: Address,
    artifacts: ArtifactStore,
    links: Mutex<HashMap<&'static str, HashMap<String, Address>>>,
    poll_interval: Duration,
    max_polls: usize,
}

impl RpcBackend {
    /// Connect to `url`, sending from `from` or from the node's first account.
    pub async fn connect(
        url: Url,
        artifacts: ArtifactStore,
        from: Option<Address>,
    ) -> Result<Self, anyhow::Error> {
        let client = create_client()?;

        let chain_id: String = json_rpc_call(&client, &url, "eth_chainId", vec![])
            .await
            .with_context(|| format!("Failed to reach node at {url}"))?;

        let from = match from {
            Some(from) => from,
            None => {
                let accounts: Vec<Address> =
                    json_rpc_call(&client, &url, "eth_accounts", vec![]).await?;
                *accounts
                    .first()
                    .context("Node exposes no unlocked account, pass --from")?
            }
        };

        tracing::info!(
            url = %url,
            chain_id = parse_quantity(&chain_id)?,
            from = %from,
            artifacts = %artifacts.root().display(),
            "Connected to deployment node"
        );

        Ok(Self {
            client,
            url,
            from,
            artifacts,
            links: Mutex::new(HashMap::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    /// Override how receipts are polled.
    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn send_transaction(
        &self,
        to: Option<Address>,
        data: Bytes,
    ) -> Result<TransactionReceipt, anyhow::Error> {
        let mut tx = serde_json::json!({
            "from": self.from,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = serde_json::json!(to);
        }

        let tx_hash: B256 =
            json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx]).await?;
        tracing::debug!(tx_hash = %tx_hash, "Transaction submitted");

        let receipt = self.wait_for_receipt(tx_hash).await?;
        if !receipt.succeeded() {
            anyhow::bail!("Transaction {} reverted", receipt.transaction_hash);
        }
        Ok(receipt)
    }

    async fn wait_for_receipt(&self, tx_hash: B256) -> Result<TransactionReceipt, anyhow::Error> {
        let fetch = || async {
            let receipt: Option<TransactionReceipt> = json_rpc_call(
                &self.client,
                &self.url,
                "eth_getTransactionReceipt",
                vec![serde_json::json!(tx_hash)],
            )
            .await?;
            receipt.context("Transaction not included yet")
        };

        fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.poll_interval)
                    .with_max_times(self.max_polls),
            )
            .notify(|err, _| {
                tracing::trace!(error = %err, tx_hash = %tx_hash, "Receipt not available, retrying...");
            })
            .await
            .with_context(|| format!("Timeout waiting for receipt of {tx_hash}"))
    }

    fn links_for(&self, consumer: &str) -> HashMap<String, Address> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(consumer)
            .cloned()
            .unwrap_or_default()
    }
}

impl DeploymentBackend for RpcBackend {
    fn deployer(&self) -> Address {
        self.from
    }

    async fn deploy(
        &self,
        role: Role,
        unit: &'static ContractUnit,
        args: Vec<Arg>,
    ) -> Result<ContractHandle, anyhow::Error> {
        let artifact = self.artifacts.load(unit.name)?;
        let mut data = artifact
            .linked_bytecode(&self.links_for(unit.name))?
            .to_vec();
        data.extend_from_slice(&abi::encode_args(&args));

        tracing::debug!(role = %role, unit = %unit, args = args.len(), "Sending deployment");
        let receipt = self.send_transaction(None, data.into()).await?;
        let address = receipt
            .contract_address
            .with_context(|| format!("Receipt of {} has no contract address", unit.name))?;

        Ok(ContractHandle::deployed(role, unit.name, address))
    }

    async fn link(
        &self,
        library: &ContractHandle,
        consumer: &'static ContractUnit,
    ) -> Result<(), anyhow::Error> {
        let artifact = self.artifacts.load(consumer.name)?;
        if !artifact.required_libraries().contains(&library.unit) {
            tracing::warn!(
                library = library.unit,
                consumer = consumer.name,
                "Consumer bytecode does not reference library, link is a no-op"
            );
        }

        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(consumer.name)
            .or_default()
            .insert(library.unit.to_string(), library.address);
        Ok(())
    }

    async fn call(
        &self,
        target: Address,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<CallReceipt, anyhow::Error> {
        let data = abi::encode_call(method, &args);
        tracing::debug!(target = %target, signature = %abi::signature(method, &args), "Sending call");

        let receipt = self.send_transaction(Some(target), data).await?;
        let block_number = receipt
            .block_number
            .as_deref()
            .map(parse_quantity)
            .transpose()?;

        Ok(CallReceipt {
            tx_hash: receipt.transaction_hash,
            block_number,
        })
    }
}
