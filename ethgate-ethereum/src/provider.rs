use async_trait::async_trait;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::types::TransactionReceipt as EthReceipt;
use serde_json::{json, Value};
use tracing::debug;

use ethgate_core::{EthRpc, GatewayError, GatewayResult};

/// An `EthRpc` bound to a single HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpRpc {
    provider: Provider<Http>,
    url: String,
}

impl HttpRpc {
    /// Connect to an endpoint URL. No request is made until the first call.
    pub fn connect(url: &str) -> GatewayResult<Self> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| GatewayError::Rpc(format!("invalid RPC URL '{url}': {e}")))?;
        Ok(Self {
            provider,
            url: url.to_string(),
        })
    }

    /// The endpoint this client is bound to.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request<R: serde::de::DeserializeOwned + serde::Serialize + std::fmt::Debug + Send>(
        &self,
        method: &str,
        params: Value,
    ) -> GatewayResult<R> {
        debug!(method, url = %self.url, "JSON/RPC request");
        self.provider
            .request(method, params)
            .await
            .map_err(|e| GatewayError::Rpc(format!("{method}: {e}")))
    }
}

#[async_trait]
impl EthRpc for HttpRpc {
    async fn transaction_count(&self, addr: Address, block_tag: &str) -> GatewayResult<U256> {
        self.request(
            "eth_getTransactionCount",
            json!([format!("{addr:#x}"), block_tag]),
        )
        .await
    }

    async fn private_transaction_count(
        &self,
        addr: Address,
        privacy_group_id: &str,
    ) -> GatewayResult<U256> {
        self.request(
            "priv_getTransactionCount",
            json!([format!("{addr:#x}"), privacy_group_id]),
        )
        .await
    }

    async fn find_privacy_group(
        &self,
        private_from: Option<&str>,
        private_for: &[String],
    ) -> GatewayResult<String> {
        let mut members: Vec<String> = Vec::with_capacity(private_for.len() + 1);
        if let Some(from) = private_from {
            members.push(from.to_string());
        }
        members.extend(private_for.iter().cloned());
        let groups: Vec<Value> = self.request("priv_findPrivacyGroup", json!([members])).await?;
        groups
            .first()
            .and_then(|g| g.get("privacyGroupId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::Rpc("no privacy group found for the supplied members".to_string())
            })
    }

    async fn send_transaction(&self, tx: &Value) -> GatewayResult<H256> {
        self.request("eth_sendTransaction", json!([tx]))
            .await
            .map_err(send_error)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> GatewayResult<H256> {
        self.request("eth_sendRawTransaction", json!([format!("{raw}")]))
            .await
            .map_err(send_error)
    }

    async fn transaction_receipt(&self, hash: H256) -> GatewayResult<Option<EthReceipt>> {
        self.request("eth_getTransactionReceipt", json!([format!("{hash:#x}")]))
            .await
    }
}

fn send_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Rpc(detail) => GatewayError::Send(detail),
        other => other,
    }
}
