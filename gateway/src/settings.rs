//! Gateway configuration: an optional config file merged with
//! `ETHGATE_`-prefixed environment variables, overridden by the CLI flag
//! surface.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::processor::ProcessorConfig;
use crate::registry::RegistryConfig;

/// Command-line flags.
#[derive(Debug, Parser)]
#[clap(name = "ethgate", version, about = "REST gateway for Ethereum-compatible nodes")]
pub struct Opts {
    /// Configuration file (YAML or JSON)
    #[clap(short = 'f', long)]
    pub config: Option<PathBuf>,
    /// Listen address for the REST surface
    #[clap(short = 'l', long)]
    pub listen: Option<String>,
    /// JSON/RPC endpoint of the Ethereum-compatible node
    #[clap(short = 'r', long)]
    pub rpc_url: Option<String>,
    /// Path containing ABI + generated OpenAPI contract definitions
    #[clap(short = 'I', long = "openapi-path")]
    pub openapi_path: Option<PathBuf>,
    /// Base URL for generated OpenAPI contract definitions
    #[clap(short = 'U', long = "openapi-baseurl")]
    pub openapi_baseurl: Option<String>,
    /// Maximum wait time for an individual transaction (seconds)
    #[clap(short = 'x', long = "tx-timeout")]
    pub tx_timeout: Option<u64>,
    /// Include hex values for large numbers in receipts (as well as numeric strings)
    #[clap(short = 'H', long = "hex-values")]
    pub hex_values: bool,
    /// Predict the next nonce before sending (default=false for node-signed txns)
    #[clap(short = 'P', long = "predict-nonces")]
    pub predict_nonces: bool,
    /// Use Orion JSON/RPC API semantics for private transactions
    #[clap(short = 'G', long = "orion-privapi")]
    pub orion_privapi: bool,
    /// Parallel wire sends per ordering partition
    #[clap(long = "send-concurrency")]
    pub send_concurrency: Option<usize>,
    /// Fill nonce gaps left by failed sends with zero-value transactions
    #[clap(long = "attempt-gapfill")]
    pub attempt_gapfill: bool,
}

/// Resolved gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen: String,
    pub rpc_url: String,
    pub openapi_path: PathBuf,
    pub openapi_base_url: String,
    pub tx_timeout_secs: u64,
    pub send_concurrency: usize,
    pub attempt_gapfill: bool,
    pub hex_values_in_receipt: bool,
    pub predict_nonces: bool,
    pub orion_private_apis: bool,
    pub shutdown_grace_secs: u64,
    /// HD-wallet key endpoint with `{instance}`/`{wallet}`/`{index}`
    /// placeholders; unset disables HD-wallet signing.
    pub hd_wallet_url_template: Option<String>,
    /// Address-book endpoint prefix; unset disables per-address routing.
    pub address_book_url_prefix: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            openapi_path: PathBuf::from("./openapi"),
            openapi_base_url: "http://localhost:8080".to_string(),
            tx_timeout_secs: 60,
            send_concurrency: 1,
            attempt_gapfill: false,
            hex_values_in_receipt: false,
            predict_nonces: false,
            orion_private_apis: false,
            shutdown_grace_secs: 10,
            hd_wallet_url_template: None,
            address_book_url_prefix: None,
        }
    }
}

impl Settings {
    /// Load the file/env layers, then apply the flag overrides.
    pub fn load(opts: &Opts) -> eyre::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = &opts.config {
            builder = builder.add_source(File::from(path.clone()));
        }
        builder = builder.add_source(Environment::with_prefix("ETHGATE"));
        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Some(listen) = &opts.listen {
            settings.listen = listen.clone();
        }
        if let Some(rpc_url) = &opts.rpc_url {
            settings.rpc_url = rpc_url.clone();
        }
        if let Some(path) = &opts.openapi_path {
            settings.openapi_path = path.clone();
        }
        if let Some(base_url) = &opts.openapi_baseurl {
            settings.openapi_base_url = base_url.clone();
        }
        if let Some(timeout) = opts.tx_timeout {
            settings.tx_timeout_secs = timeout;
        }
        if let Some(send_concurrency) = opts.send_concurrency {
            settings.send_concurrency = send_concurrency;
        }
        settings.hex_values_in_receipt |= opts.hex_values;
        settings.predict_nonces |= opts.predict_nonces;
        settings.orion_private_apis |= opts.orion_privapi;
        settings.attempt_gapfill |= opts.attempt_gapfill;
        Ok(settings)
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            always_manage_nonce: self.predict_nonces,
            attempt_gapfill: self.attempt_gapfill,
            max_tx_wait: Duration::from_secs(self.tx_timeout_secs),
            send_concurrency: self.send_concurrency,
            orion_private_apis: self.orion_private_apis,
            hex_values_in_receipt: self.hex_values_in_receipt,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            storage_path: self.openapi_path.clone(),
            base_url: self.openapi_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let opts = Opts::parse_from([
            "ethgate",
            "--openapi-path",
            "/var/lib/ethgate",
            "--openapi-baseurl",
            "https://gw.example.com/api/v1",
            "--tx-timeout",
            "120",
            "--hex-values",
            "--predict-nonces",
            "--send-concurrency",
            "4",
        ]);
        let settings = Settings::load(&opts).unwrap();
        assert_eq!(settings.openapi_path, PathBuf::from("/var/lib/ethgate"));
        assert_eq!(settings.openapi_base_url, "https://gw.example.com/api/v1");
        assert!(settings.hex_values_in_receipt);
        assert!(settings.predict_nonces);
        assert!(!settings.orion_private_apis);

        let conf = settings.processor_config();
        assert_eq!(conf.max_tx_wait, Duration::from_secs(120));
        assert_eq!(conf.send_concurrency, 4);
        assert!(conf.always_manage_nonce);
    }

    #[test]
    fn defaults_are_usable_without_any_input() {
        let opts = Opts::parse_from(["ethgate"]);
        let settings = Settings::load(&opts).unwrap();
        assert_eq!(settings.listen, "0.0.0.0:8080");
        assert_eq!(settings.send_concurrency, 1);
        assert!(settings.hd_wallet_url_template.is_none());
    }
}
