use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::Abi;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::types::TransactionReceipt as EthReceipt;
use serde_json::Value;

use crate::{GatewayResult, OpenApiDocument};

/// The JSON-RPC surface of an Ethereum-compatible node, as used by the
/// gateway. One instance may be bound per address via the address book.
#[async_trait]
pub trait EthRpc: Send + Sync {
    /// `eth_getTransactionCount` at the given block tag (normally "pending").
    async fn transaction_count(&self, addr: Address, block_tag: &str) -> GatewayResult<U256>;

    /// `priv_getTransactionCount` for a privacy group.
    async fn private_transaction_count(
        &self,
        addr: Address,
        privacy_group_id: &str,
    ) -> GatewayResult<U256>;

    /// Resolve a privateFrom/privateFor pair to a privacy group id.
    async fn find_privacy_group(
        &self,
        private_from: Option<&str>,
        private_for: &[String],
    ) -> GatewayResult<String>;

    /// `eth_sendTransaction` — the node signs; returns the transaction hash.
    async fn send_transaction(&self, tx: &Value) -> GatewayResult<H256>;

    /// `eth_sendRawTransaction` of a locally-signed payload.
    async fn send_raw_transaction(&self, raw: Bytes) -> GatewayResult<H256>;

    /// `eth_getTransactionReceipt`; `None` until the transaction is mined.
    async fn transaction_receipt(&self, hash: H256) -> GatewayResult<Option<EthReceipt>>;
}

/// A signing capability resolved for a sender, e.g. from the HD wallet.
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// The address this capability signs for.
    fn address(&self) -> Address;

    /// Sign the transaction and return the raw RLP payload for
    /// `eth_sendRawTransaction`.
    async fn sign_transaction(&self, tx: &TypedTransaction) -> GatewayResult<Bytes>;
}

/// A parsed HD-wallet sender string: `hd-<instance>-<wallet>-<index>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdWalletRequest {
    /// Wallet service instance.
    pub instance: String,
    /// Wallet id within the instance.
    pub wallet: String,
    /// Key derivation index.
    pub index: u64,
}

/// Resolves HD-wallet requests to signing capabilities.
#[async_trait]
pub trait HdWallet: Send + Sync {
    /// Look up the key for a derivation request.
    async fn signer_for(&self, request: &HdWalletRequest) -> GatewayResult<Arc<dyn TxSigner>>;
}

/// Optional per-address routing of submissions to alternate RPC endpoints.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// The RPC endpoint to use for this sender address.
    async fn lookup(&self, addr: &str) -> GatewayResult<Arc<dyn EthRpc>>;
}

/// One contract out of a compiler run.
#[derive(Debug, Clone)]
pub struct CompiledContract {
    /// The contract ABI.
    pub abi: Abi,
    /// Hex-encoded deployment bytecode (no prefix).
    pub bin: String,
    /// Developer documentation JSON.
    pub dev_doc: String,
    /// Compiler version that produced this output.
    pub compiler_version: String,
}

/// The selected output of compiling one deployable contract.
#[derive(Debug, Clone)]
pub struct CompiledSolidity {
    /// Name of the selected contract.
    pub contract_name: String,
    /// Compiler version used.
    pub compiler_version: String,
    /// The contract ABI.
    pub abi: Abi,
    /// Hex-encoded deployment bytecode (no prefix).
    pub compiled: String,
    /// Developer documentation JSON.
    pub dev_doc: String,
}

/// The Solidity compiler, as an external collaborator.
#[async_trait]
pub trait SolidityCompiler: Send + Sync {
    /// Compile the given source files under `dir`. `sources` restricts the
    /// file set; empty means every root-level `.sol` file. `solc_version`
    /// optionally pins the compiler.
    async fn compile_directory(
        &self,
        dir: &Path,
        sources: &[String],
        solc_version: Option<&str>,
    ) -> GatewayResult<HashMap<String, CompiledContract>>;

    /// Compile a single in-memory source and select one contract from it.
    async fn compile_source(
        &self,
        solidity: &str,
        contract_name: Option<&str>,
        solc_version: Option<&str>,
    ) -> GatewayResult<CompiledSolidity>;
}

/// Unpacks uploaded archives of solidity sources; external collaborator.
pub trait ArchiveExtractor: Send + Sync {
    /// Whether this filename looks like an archive this extractor handles.
    fn is_archive(&self, file_name: &str) -> bool;

    /// Unpack `archive` into `dest`.
    fn unpack(&self, archive: &Path, dest: &Path) -> GatewayResult<()>;
}

/// Generates OpenAPI documents from ABIs; the generator internals are an
/// external collaborator, the document shape is [`OpenApiDocument`].
pub trait OpenApiGen: Send + Sync {
    /// Document for calls against a deployed instance, served under `path`.
    fn instance_doc(
        &self,
        path: &str,
        name: &str,
        abi: &Abi,
        dev_doc: Option<&str>,
    ) -> OpenApiDocument;

    /// Document for factory (deploy) calls, served under `path`.
    fn factory_doc(
        &self,
        path: &str,
        name: &str,
        abi: &Abi,
        dev_doc: Option<&str>,
    ) -> OpenApiDocument;
}

/// The event-stream subsystem, delegated to wholesale by the REST surface.
#[async_trait]
pub trait SubscriptionManager: Send + Sync {
    /// Create a stream from its JSON specification.
    async fn add_stream(&self, spec: Value) -> GatewayResult<Value>;
    /// All streams.
    async fn streams(&self) -> Vec<Value>;
    /// One stream.
    async fn stream_by_id(&self, id: &str) -> GatewayResult<Value>;
    /// Delete a stream.
    async fn delete_stream(&self, id: &str) -> GatewayResult<()>;
    /// Suspend delivery on a stream.
    async fn suspend_stream(&self, id: &str) -> GatewayResult<()>;
    /// Resume delivery on a stream.
    async fn resume_stream(&self, id: &str) -> GatewayResult<()>;
    /// All subscriptions.
    async fn subscriptions(&self) -> Vec<Value>;
    /// One subscription.
    async fn subscription_by_id(&self, id: &str) -> GatewayResult<Value>;
    /// Delete a subscription.
    async fn delete_subscription(&self, id: &str) -> GatewayResult<()>;
}
