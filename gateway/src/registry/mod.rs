//! The contract/ABI registry: in-memory indexes over a directory of deploy
//! messages, per-address ABIs and generated OpenAPI documents. The on-disk
//! file naming is the sole source of truth — the in-memory index is rebuilt
//! from a directory scan at startup and never persisted itself.

pub mod openapi_gen;

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::form_urlencoded;
use uuid::Uuid;

use ethgate_core::{
    addr_no_prefix, CompiledSolidity, DeployContract, GatewayError, GatewayResult, OpenApiDocument,
    OpenApiGen, SolidityCompiler, TransactionReceipt, EXT_DEPLOYMENT_ID, EXT_REGISTERED_NAME,
};

static CONTRACT_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^contract_([0-9a-f]{40})\.swagger\.json$").expect("static regex"));
static ABI_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^abi_([0-9a-z-]+)\.deploy\.json$").expect("static regex"));
static ADDRESS_40: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("static regex"));

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Directory holding deploy messages, ABIs and OpenAPI documents.
    pub storage_path: PathBuf,
    /// External base URL the generated documents and links are rooted at,
    /// e.g. `http://localhost:8080/api/v1`.
    pub base_url: String,
}

/// The minimal per-contract descriptor kept in memory, indexed by address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInfo {
    /// 40-hex lowercase address, no prefix.
    pub address: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Routable path prefix for instance calls.
    pub path: String,
    /// Id of the deploy message that produced this contract.
    #[serde(rename = "abi", default)]
    pub abi_id: String,
    #[serde(rename = "openapi")]
    pub swagger_url: String,
    /// ISO8601 creation time; drives friendly-name tie-breaks.
    pub created: String,
}

/// The minimal per-ABI descriptor kept in memory, indexed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiInfo {
    /// UUID v4 of the deploy message.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub path: String,
    /// True iff the deploy message carries bytecode.
    pub deployable: bool,
    #[serde(rename = "openapi")]
    pub swagger_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_version: Option<String>,
    pub created: String,
}

/// PUT body when registering an ABI against an address.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractRegistration {
    #[serde(rename = "registerAs", default)]
    pub register_as: Option<String>,
}

#[derive(Default)]
struct Indexes {
    contracts: HashMap<String, ContractInfo>,
    registrations: HashMap<String, ContractInfo>,
    abis: HashMap<String, AbiInfo>,
}

/// The registry itself. One instance per process; the three maps share one
/// mutex, and every read copies out under the lock before sorting or
/// serializing outside it.
pub struct ContractStore {
    conf: RegistryConfig,
    gen: Arc<dyn OpenApiGen>,
    compiler: Arc<dyn SolidityCompiler>,
    inner: Mutex<Indexes>,
}

impl ContractStore {
    pub fn new(
        conf: RegistryConfig,
        gen: Arc<dyn OpenApiGen>,
        compiler: Arc<dyn SolidityCompiler>,
    ) -> Self {
        Self {
            conf,
            gen,
            compiler,
            inner: Mutex::new(Indexes::default()),
        }
    }

    /// The configured base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.conf.base_url.trim_end_matches('/')
    }

    /// Scan the storage directory and rebuild the in-memory index. Files
    /// that fail the name regexes are ignored; files that fail to parse are
    /// logged and skipped. A missing directory leaves the index empty — the
    /// service still serves new uploads.
    pub fn build_index(&self) {
        info!(path = %self.conf.storage_path.display(), "building smart contract index");
        let entries = match fs::read_dir(&self.conf.storage_path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, path = %self.conf.storage_path.display(), "failed to read storage directory");
                return;
            }
        };
        let mut contracts = 0;
        let mut abis = 0;
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let created = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(iso8601)
                .unwrap_or_else(|_| now_iso8601());
            if let Some(caps) = CONTRACT_FILE.captures(&file_name) {
                match self.load_contract_file(&entry.path(), &caps[1], &created) {
                    Ok(()) => contracts += 1,
                    Err(err) => warn!(%err, file = %file_name, "skipping contract file"),
                }
            } else if let Some(caps) = ABI_FILE.captures(&file_name) {
                match self.load_abi_file(&entry.path(), &caps[1], &created) {
                    Ok(()) => abis += 1,
                    Err(err) => warn!(%err, file = %file_name, "skipping ABI file"),
                }
            }
        }
        info!(contracts, abis, "smart contract index built");
    }

    fn load_contract_file(
        &self,
        path: &std::path::Path,
        address: &str,
        created: &str,
    ) -> GatewayResult<()> {
        let bytes =
            fs::read(path).map_err(|e| GatewayError::storage("cannot read swagger file", e))?;
        let doc: OpenApiDocument = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Storage(format!("cannot parse swagger file: {e}")))?;
        self.index_contract(address, &doc, created);
        Ok(())
    }

    fn load_abi_file(
        &self,
        path: &std::path::Path,
        id: &str,
        created: &str,
    ) -> GatewayResult<()> {
        let bytes =
            fs::read(path).map_err(|e| GatewayError::storage("cannot read deploy file", e))?;
        let msg: DeployContract = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Storage(format!("cannot parse deploy file: {e}")))?;
        self.index_abi(id, &msg, created);
        Ok(())
    }

    /// Compile the message's solidity if present, generate the factory
    /// document, persist the deploy message under its id, and consume the
    /// raw source. The caller is responsible for a unique `headers.id`.
    pub async fn pre_deploy(&self, msg: &mut DeployContract) -> GatewayResult<AbiInfo> {
        let compiled = match msg.solidity.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(solidity) => Some(
                self.compiler
                    .compile_source(
                        solidity,
                        msg.contract_name.as_deref(),
                        msg.compiler_version.as_deref(),
                    )
                    .await?,
            ),
            None => None,
        };
        self.store_deployable_abi(msg, compiled)
    }

    /// Persist a deployable ABI: merge in any compiler output, generate and
    /// store the factory document and the deploy message, and index it.
    pub fn store_deployable_abi(
        &self,
        msg: &mut DeployContract,
        compiled: Option<CompiledSolidity>,
    ) -> GatewayResult<AbiInfo> {
        if let Some(compiled) = compiled {
            msg.abi = Some(compiled.abi);
            msg.compiled = Some(compiled.compiled);
            msg.dev_doc = Some(compiled.dev_doc);
            msg.contract_name = Some(compiled.contract_name);
            msg.compiler_version = Some(compiled.compiler_version);
        } else if msg.abi.is_none() {
            return Err(GatewayError::InvalidMessage(
                "must supply an ABI to install an existing ABI into the gateway".to_string(),
            ));
        }

        let id = msg.headers.id.clone();
        let abi = msg.abi.clone().expect("checked above");
        let name = msg.contract_name.clone().unwrap_or_else(|| id.clone());
        let mut doc = self
            .gen
            .factory_doc(&format!("/abis/{id}"), &name, &abi, msg.dev_doc.as_deref());
        if !id.is_empty() {
            doc.set_extension(EXT_DEPLOYMENT_ID, id.clone());
        }
        msg.description = doc.info.description.clone();

        self.write_json(&format!("abi_{id}.swagger.json"), &doc)?;
        let info = self.index_abi(&id, msg, &now_iso8601());
        self.write_json(&format!("abi_{id}.deploy.json"), msg)?;

        // the solidity is consumed by compilation; no need to serialize it again
        msg.solidity = None;
        Ok(info)
    }

    /// Process a deployment receipt: recover the deploy message by request
    /// id, generate and persist the instance document and ABI, index the new
    /// contract, and point the receipt at its generated API.
    pub fn post_deploy(&self, receipt: &mut TransactionReceipt) -> GatewayResult<()> {
        let req_id = receipt
            .headers
            .as_ref()
            .map(|h| h.req_id.clone())
            .unwrap_or_default();
        let address = receipt.contract_address.ok_or_else(|| {
            GatewayError::InvalidMessage(format!("{req_id}: missing contract address in receipt"))
        })?;
        let addr_hex = addr_no_prefix(address);

        let deploy_msg = self.load_deploy_msg(&req_id)?;
        let abi = deploy_msg.abi.as_ref().ok_or_else(|| {
            GatewayError::Storage(format!("{req_id}: recovered deploy message has no ABI"))
        })?;

        let name = deploy_msg
            .contract_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| req_id.clone());
        let doc = self.generate_instance_doc(
            &req_id,
            &name,
            abi,
            deploy_msg.dev_doc.as_deref(),
            &addr_hex,
            receipt.register_as.as_deref(),
        );
        self.write_json(&format!("contract_{addr_hex}.swagger.json"), &doc)?;
        self.write_json(&format!("contract_{addr_hex}.abi.json"), abi)?;
        self.index_contract(&addr_hex, &doc, &now_iso8601());

        let url_base = format!("{}{}", self.base_url_origin(), doc.base_path);
        receipt.contract_swagger = Some(format!("{url_base}?openapi"));
        receipt.contract_ui = Some(format!("{url_base}?ui"));
        Ok(())
    }

    /// Bind an existing deployable ABI to an address, optionally under a
    /// friendly name. Returns true when the friendly name had already been
    /// registered.
    pub fn register_contract(
        &self,
        abi_id: &str,
        address: &str,
        register_as: Option<&str>,
    ) -> GatewayResult<bool> {
        let addr_hex = address.trim().to_lowercase();
        let addr_hex = addr_hex.strip_prefix("0x").unwrap_or(&addr_hex);
        if !ADDRESS_40.is_match(addr_hex) {
            return Err(GatewayError::NotFound(
                "invalid address in path - must be a 40 character hex string with optional 0x prefix"
                    .to_string(),
            ));
        }

        let deploy_msg = self.load_deploy_msg(abi_id)?;
        let abi = deploy_msg.abi.as_ref().ok_or_else(|| {
            GatewayError::NotFound(format!("ABI with ID {abi_id} has no ABI definition"))
        })?;
        let name = deploy_msg
            .contract_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| abi_id.to_string());

        let doc = self.generate_instance_doc(
            abi_id,
            &name,
            abi,
            deploy_msg.dev_doc.as_deref(),
            addr_hex,
            register_as,
        );
        self.write_json(&format!("contract_{addr_hex}.swagger.json"), &doc)?;
        self.write_json(&format!("contract_{addr_hex}.abi.json"), abi)?;
        Ok(self.index_contract(addr_hex, &doc, &now_iso8601()))
    }

    /// Resolve a friendly name to its registered address, accepting the
    /// URL-query-escaped form of the name as a fallback.
    pub fn resolve_contract_addr(&self, registered_name: &str) -> GatewayResult<String> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        let info = inner
            .registrations
            .get(registered_name)
            .or_else(|| inner.registrations.get(&query_escape(registered_name)));
        match info {
            Some(info) => Ok(info.address.clone()),
            None => Err(GatewayError::NotFound(format!(
                "failed to find installed contract address for '{registered_name}'"
            ))),
        }
    }

    /// All contracts, sorted by name then address.
    pub fn list_contracts(&self) -> Vec<ContractInfo> {
        let mut out: Vec<ContractInfo> = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner.contracts.values().cloned().collect()
        };
        out.sort_by(|a, b| (&a.name, &a.address).cmp(&(&b.name, &b.address)));
        out
    }

    /// All ABIs, sorted by name then id.
    pub fn list_abis(&self) -> Vec<AbiInfo> {
        let mut out: Vec<AbiInfo> = {
            let inner = self.inner.lock().expect("registry lock poisoned");
            inner.abis.values().cloned().collect()
        };
        out.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));
        out
    }

    pub fn contract_by_address(&self, addr_hex: &str) -> Option<ContractInfo> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.contracts.get(addr_hex).cloned()
    }

    pub fn abi_by_id(&self, id: &str) -> Option<AbiInfo> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner.abis.get(id).cloned()
    }

    /// Read a stored OpenAPI document (`prefix` is `contract` or `abi`).
    pub fn load_swagger(&self, prefix: &str, id: &str) -> GatewayResult<Vec<u8>> {
        let path = self
            .conf
            .storage_path
            .join(format!("{prefix}_{id}.swagger.json"));
        fs::read(&path)
            .map_err(|_| GatewayError::Storage("failed to read OpenAPI definition".to_string()))
    }

    /// Read the ABI stored for a deployed instance.
    pub fn load_instance_abi(&self, addr_hex: &str) -> GatewayResult<ethers::abi::Abi> {
        let path = self
            .conf
            .storage_path
            .join(format!("contract_{addr_hex}.abi.json"));
        let bytes = fs::read(&path).map_err(|_| {
            GatewayError::NotFound(format!(
                "failed to find installed ABI for contract address 0x{addr_hex}"
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            GatewayError::Storage(format!(
                "failed to load installed ABI for contract address 0x{addr_hex}: {e}"
            ))
        })
    }

    /// Recover a deploy message from disk by its id.
    pub fn load_deploy_msg(&self, id: &str) -> GatewayResult<DeployContract> {
        let path = self.conf.storage_path.join(format!("abi_{id}.deploy.json"));
        let bytes = fs::read(&path)
            .map_err(|_| GatewayError::NotFound(format!("failed to find ABI with ID {id}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::Storage(format!("failed to load ABI with ID {id}: {e}")))
    }

    /// A fresh deploy-message id.
    pub fn new_request_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// The compiler collaborator, shared with the upload handler.
    pub fn compiler(&self) -> Arc<dyn SolidityCompiler> {
        self.compiler.clone()
    }

    fn generate_instance_doc(
        &self,
        request_id: &str,
        api_name: &str,
        abi: &ethers::abi::Abi,
        dev_doc: Option<&str>,
        addr_hex: &str,
        register_as: Option<&str>,
    ) -> OpenApiDocument {
        let registered = register_as
            .map(query_escape)
            .filter(|r| !r.is_empty());
        let path_suffix = registered.clone().unwrap_or_else(|| addr_hex.to_string());
        let mut doc =
            self.gen
                .instance_doc(&format!("/contracts/{path_suffix}"), api_name, abi, dev_doc);
        if let Some(registered) = registered {
            doc.set_extension(EXT_REGISTERED_NAME, registered);
        }
        if !request_id.is_empty() {
            doc.set_extension(EXT_DEPLOYMENT_ID, request_id.to_string());
        }
        doc
    }

    /// Add a contract to the index from its document. Every address entry is
    /// retained; the friendly-name entry is only replaced by a strictly
    /// newer registration, so equal timestamps keep the existing one.
    /// Returns true when the friendly name was already registered.
    fn index_contract(&self, address: &str, doc: &OpenApiDocument, created: &str) -> bool {
        let mut info = ContractInfo {
            address: address.to_string(),
            name: doc.info.title.clone(),
            description: doc.info.description.clone(),
            path: format!("/contracts/{address}"),
            abi_id: doc.deployment_id().unwrap_or_default().to_string(),
            swagger_url: format!("{}/contracts/{address}?swagger", self.base_url()),
            created: created.to_string(),
        };
        let mut overwritten = false;
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if let Some(registered) = doc.registered_name() {
            info.path = format!("/contracts/{registered}");
            info.swagger_url = format!("{}/contracts/{registered}?swagger", self.base_url());
            let replace = match inner.registrations.get(registered) {
                Some(existing) => {
                    overwritten = true;
                    existing.created < info.created
                }
                None => true,
            };
            if replace {
                info!(
                    path = %info.path,
                    address = %info.address,
                    replaced = overwritten,
                    "registering contract path"
                );
                inner
                    .registrations
                    .insert(registered.to_string(), info.clone());
            }
        }
        inner.contracts.insert(address.to_string(), info);
        overwritten
    }

    fn index_abi(&self, id: &str, msg: &DeployContract, created: &str) -> AbiInfo {
        let info = AbiInfo {
            id: id.to_string(),
            name: msg.contract_name.clone().unwrap_or_default(),
            description: msg.description.clone(),
            path: format!("/abis/{id}"),
            deployable: msg.compiled.as_deref().map(|c| !c.is_empty()).unwrap_or(false),
            swagger_url: format!("{}/abis/{id}?swagger", self.base_url()),
            compiler_version: msg.compiler_version.clone(),
            created: created.to_string(),
        };
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.abis.insert(id.to_string(), info.clone());
        info
    }

    /// Whole-file write via a temp file and rename, so a crashed write never
    /// leaves a half-parseable entry for the next index rebuild.
    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> GatewayResult<()> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| GatewayError::Storage(format!("cannot serialize {file_name}: {e}")))?;
        let final_path = self.conf.storage_path.join(file_name);
        let tmp_path = self
            .conf
            .storage_path
            .join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, &bytes)
            .map_err(|e| GatewayError::storage("cannot write registry file", e))?;
        fs::rename(&tmp_path, &final_path)
            .map_err(|e| GatewayError::storage("cannot finalize registry file", e))?;
        Ok(())
    }

    /// Scheme and authority of the configured base URL, used when the
    /// document's base path already includes the URL path prefix.
    fn base_url_origin(&self) -> String {
        match url::Url::parse(self.base_url()) {
            Ok(url) => {
                let origin = url.origin().ascii_serialization();
                origin.trim_end_matches('/').to_string()
            }
            Err(_) => self.base_url().to_string(),
        }
    }
}

fn iso8601(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// URL query escaping, matching the escaping applied when registered names
/// are embedded in document paths.
pub fn query_escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
