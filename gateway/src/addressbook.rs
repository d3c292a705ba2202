//! The address book: optional per-address routing of submissions to
//! alternate RPC endpoints, resolved over HTTP and cached per endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use ethgate_core::{AddressBook, EthRpc, GatewayError, GatewayResult};
use ethgate_ethereum::HttpRpc;

#[derive(Debug, Deserialize)]
struct AddressBookEntry {
    endpoint: String,
}

/// An `AddressBook` backed by a REST lookup service. Unknown addresses fall
/// back to the default endpoint; constructed clients are cached by endpoint.
pub struct RestAddressBook {
    url_prefix: String,
    client: reqwest::Client,
    fallback: Arc<dyn EthRpc>,
    cache: Mutex<HashMap<String, Arc<dyn EthRpc>>>,
}

impl RestAddressBook {
    pub fn new(url_prefix: String, fallback: Arc<dyn EthRpc>) -> Self {
        Self {
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            fallback,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AddressBook for RestAddressBook {
    async fn lookup(&self, addr: &str) -> GatewayResult<Arc<dyn EthRpc>> {
        let url = format!("{}/{}", self.url_prefix, addr.to_lowercase());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Rpc(format!("address book unreachable: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(addr, "address not in address book; using default endpoint");
            return Ok(self.fallback.clone());
        }
        if !response.status().is_success() {
            return Err(GatewayError::Rpc(format!(
                "address book returned {}",
                response.status()
            )));
        }
        let entry: AddressBookEntry = response
            .json()
            .await
            .map_err(|e| GatewayError::Rpc(format!("bad address book response: {e}")))?;

        let mut cache = self.cache.lock().await;
        if let Some(rpc) = cache.get(&entry.endpoint) {
            return Ok(rpc.clone());
        }
        info!(addr, endpoint = %entry.endpoint, "routing address to dedicated endpoint");
        let rpc: Arc<dyn EthRpc> = Arc::new(HttpRpc::connect(&entry.endpoint)?);
        cache.insert(entry.endpoint, rpc.clone());
        Ok(rpc)
    }
}
