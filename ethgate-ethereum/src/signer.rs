use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};

use ethgate_core::{GatewayError, GatewayResult, TxSigner};

/// A `TxSigner` backed by an in-memory key, e.g. one resolved from the HD
/// wallet service.
#[derive(Debug, Clone)]
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    /// Wrap an existing wallet.
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Construct from a hex private key.
    pub fn from_private_key(hex_key: &str) -> GatewayResult<Self> {
        let wallet: LocalWallet = hex_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| GatewayError::HdWallet(format!("invalid private key: {e}")))?;
        Ok(Self { wallet })
    }
}

#[async_trait]
impl TxSigner for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> GatewayResult<Bytes> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| GatewayError::Send(format!("signing failed: {e}")))?;
        Ok(tx.rlp_signed(&signature))
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::TransactionRequest;

    use super::*;

    #[tokio::test]
    async fn signs_a_legacy_transaction() {
        let signer = WalletSigner::from_private_key(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap();
        let tx: TypedTransaction = TransactionRequest::new()
            .from(signer.address())
            .to(signer.address())
            .nonce(0u64)
            .gas(21_000u64)
            .gas_price(0u64)
            .value(0u64)
            .into();
        let raw = signer.sign_transaction(&tx).await.unwrap();
        assert!(!raw.is_empty());
    }
}
