//! Initial token supply for freshly deployed tokens.

use alloy_core::primitives::{Address, U256};

use crate::{
    abi::Arg,
    backend::{CallReceipt, DeploymentBackend},
    batch::{BatchExecutor, DeploymentAction},
    config::Config,
    error::BatchError,
    handle::{ContractHandle, HandleOrigin, Role},
};

/// Configured balance holders followed by the deployer.
pub fn beneficiaries(config: &Config, deployer: Address) -> Vec<Address> {
    let mut addresses = config.addresses_to_have_balance.clone();
    addresses.push(deployer);
    addresses
}

pub struct MintFanout<'b, B> {
    backend: &'b B,
    executor: BatchExecutor,
}

impl<'b, B: DeploymentBackend> MintFanout<'b, B> {
    pub fn new(backend: &'b B, executor: BatchExecutor) -> Self {
        Self { backend, executor }
    }

    /// Mint `amount` of every mintable token to every beneficiary.
    ///
    /// Adopted tokens are never minted. Actions are ordered beneficiary first,
    /// then token, and run in batches.
    pub async fn mint(
        &self,
        tokens: &[ContractHandle],
        beneficiaries: &[Address],
        amount: U256,
    ) -> Result<Vec<CallReceipt>, BatchError> {
        let mintable: Vec<_> = tokens
            .iter()
            .filter(|token| token.origin == HandleOrigin::Deployed)
            .filter(|token| matches!(token.role, Role::Token(t) if t.is_mintable()))
            .collect();

        if mintable.is_empty() {
            tracing::info!("No freshly deployed token to mint, skipping");
            return Ok(vec![]);
        }

        let actions: Vec<_> = beneficiaries
            .iter()
            .flat_map(|holder| mintable.iter().map(move |token| (*holder, *token)))
            .map(|(holder, token)| {
                DeploymentAction::new(format!("mint {} to {holder}", token.role), move || {
                    self.backend.call(
                        token.address,
                        "mint",
                        vec![Arg::Address(holder), Arg::Uint(amount)],
                    )
                })
            })
            .collect();

        tracing::info!(
            tokens = mintable.len(),
            beneficiaries = beneficiaries.len(),
            amount = %amount,
            "Minting initial balances"
        );
        self.executor.run_batched(actions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::SimulatedBackend, config::fixtures, handle::TokenRole};
    use strum::IntoEnumIterator;

    async fn deploy_tokens(backend: &SimulatedBackend) -> Vec<ContractHandle> {
        let mut tokens = Vec::new();
        for token in TokenRole::iter() {
            tokens.push(
                backend
                    .deploy(Role::Token(token), token.unit(), vec![])
                    .await
                    .unwrap(),
            );
        }
        tokens
    }

    #[test]
    fn test_deployer_is_last_beneficiary() {
        let config = fixtures::resolve("development");
        let deployer = Address::with_last_byte(0xff);
        let holders = beneficiaries(&config, deployer);
        assert_eq!(holders.len(), 3);
        assert_eq!(holders.last(), Some(&deployer));
    }

    #[tokio::test]
    async fn test_mints_every_holder_every_mintable_token() {
        let backend = SimulatedBackend::default();
        let tokens = deploy_tokens(&backend).await;
        let holders = [Address::with_last_byte(1), Address::with_last_byte(2)];
        let amount = U256::from(500u64);

        let receipts = MintFanout::new(&backend, BatchExecutor::new(4))
            .mint(&tokens, &holders, amount)
            .await
            .unwrap();
        assert_eq!(receipts.len(), 6, "WRBTC is not minted");

        for token in &tokens {
            let expected = if token.role == Role::Token(TokenRole::Wrbtc) {
                U256::ZERO
            } else {
                amount
            };
            for holder in holders {
                assert_eq!(backend.balance_of(token.address, holder), expected);
            }
        }

        // Beneficiary-major order
        let targets: Vec<_> = backend
            .calls("mint")
            .into_iter()
            .map(|(_, args)| args[0].clone())
            .collect();
        assert_eq!(targets[..3], vec![Arg::Address(holders[0]); 3][..]);
        assert_eq!(targets[3..], vec![Arg::Address(holders[1]); 3][..]);
    }

    #[tokio::test]
    async fn test_adopted_tokens_are_not_minted() {
        let backend = SimulatedBackend::default();
        let tokens: Vec<_> = TokenRole::iter()
            .map(|t| ContractHandle::adopted(Role::Token(t), t.unit().name, Address::with_last_byte(t as u8)))
            .collect();

        let receipts = MintFanout::new(&backend, BatchExecutor::new(4))
            .mint(&tokens, &[Address::with_last_byte(1)], U256::ONE)
            .await
            .unwrap();
        assert!(receipts.is_empty());
        assert!(backend.events().is_empty());
    }

    #[tokio::test]
    async fn test_mint_failure_is_reported() {
        let backend = SimulatedBackend::default().fail_call("DocToken", "mint");
        let tokens = deploy_tokens(&backend).await;

        let err = MintFanout::new(&backend, BatchExecutor::new(2))
            .mint(&tokens, &[Address::with_last_byte(1)], U256::ONE)
            .await
            .unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert!(err.failures[0].label.starts_with("mint doc to"), "{}", err.failures[0].label);
    }
}
