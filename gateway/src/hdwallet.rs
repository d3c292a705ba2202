//! HD-wallet signing: sender strings of the form `hd-<instance>-<wallet>-<index>`
//! resolve to a key served by an HTTP endpoint, wrapped as a local signer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use ethgate_core::{GatewayError, GatewayResult, HdWallet, HdWalletRequest, TxSigner};
use ethgate_ethereum::WalletSigner;

/// Key material returned by the wallet service.
#[derive(Debug, Deserialize)]
struct WalletKey {
    #[serde(rename = "privateKey")]
    private_key: String,
}

/// An `HdWallet` resolving keys over HTTP from a URL template carrying
/// `{instance}`, `{wallet}` and `{index}` placeholders.
pub struct RestHdWallet {
    url_template: String,
    client: reqwest::Client,
}

impl RestHdWallet {
    pub fn new(url_template: String) -> Self {
        Self {
            url_template,
            client: reqwest::Client::new(),
        }
    }
}

fn render_url(template: &str, request: &HdWalletRequest) -> String {
    template
        .replace("{instance}", &request.instance)
        .replace("{wallet}", &request.wallet)
        .replace("{index}", &request.index.to_string())
}

#[async_trait]
impl HdWallet for RestHdWallet {
    async fn signer_for(&self, request: &HdWalletRequest) -> GatewayResult<Arc<dyn TxSigner>> {
        let url = render_url(&self.url_template, request);
        debug!(instance = %request.instance, wallet = %request.wallet, index = request.index, "resolving HD wallet key");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::HdWallet(format!("wallet service unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::HdWallet(format!(
                "wallet service returned {}",
                response.status()
            )));
        }
        let key: WalletKey = response
            .json()
            .await
            .map_err(|e| GatewayError::HdWallet(format!("bad wallet service response: {e}")))?;
        let signer = WalletSigner::from_private_key(&key.private_key)?;
        Ok(Arc::new(signer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_templates_substitute_all_placeholders() {
        let request = HdWalletRequest {
            instance: "u0abcd1234".to_string(),
            wallet: "u0efgh5678".to_string(),
            index: 42,
        };
        assert_eq!(
            render_url(
                "https://wallets/{instance}/accounts/{wallet}/{index}",
                &request
            ),
            "https://wallets/u0abcd1234/accounts/u0efgh5678/42"
        );
    }
}
