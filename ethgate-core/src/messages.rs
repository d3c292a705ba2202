use ethers::abi::{Abi, Function};
use ethers::types::{Address, H256, U64, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{GatewayError, GatewayResult};

/// The message kinds recognized on the submission channel, plus the kinds
/// emitted on the reply channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Request: compile/deploy a contract.
    DeployContract,
    /// Request: invoke a method on a deployed contract, or transfer value.
    SendTransaction,
    /// Reply: the transaction was mined with a positive status.
    TransactionSuccess,
    /// Reply: the transaction was mined with a zero/absent status.
    TransactionFailure,
    /// Reply: the request failed before or during tracking.
    Error,
}

/// Headers common to every message on the submission channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeaders {
    /// Unique id of this message; doubles as the deploy-message id in the
    /// contract registry.
    #[serde(default)]
    pub id: String,
    /// The type tag the dispatcher selects on.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
}

/// Headers attached to replies, echoing the request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyHeaders {
    /// The reply kind.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Id of the request this reply answers.
    #[serde(rename = "requestId", default, skip_serializing_if = "String::is_empty")]
    pub req_id: String,
}

/// Fields shared by both submission variants. The nonce is accepted as either
/// a JSON number or a numeric string; parse failure is a client error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCommon {
    /// Sender address, HD-wallet derivation string, or address-book key.
    #[serde(default)]
    pub from: String,
    /// Explicit nonce override; `None` lets the gateway manage it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<Value>,
    /// Gas limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<u64>,
    /// Gas price in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
    /// Value transferred in wei.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    /// Private-transaction originator key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_from: Option<String>,
    /// Private-transaction recipient keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_for: Vec<String>,
    /// Pre-resolved privacy group.
    #[serde(rename = "privacyGroupId", default, skip_serializing_if = "Option::is_none")]
    pub privacy_group_id: Option<String>,
}

impl TransactionCommon {
    /// Parse the user-supplied nonce, if any, into a signed 64-bit value.
    pub fn parse_nonce(&self) -> GatewayResult<Option<i64>> {
        let Some(raw) = &self.nonce else {
            return Ok(None);
        };
        let parsed = match raw {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| GatewayError::InvalidNonce(raw.to_string()))
    }
}

/// A request to deploy a contract, either from raw solidity or from a
/// pre-compiled ABI + bytecode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployContract {
    /// Message headers; `headers.id` keys the persisted deploy message.
    pub headers: MessageHeaders,
    /// Common transaction fields.
    #[serde(flatten)]
    pub tx: TransactionCommon,
    /// Raw solidity source; consumed (cleared) once compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solidity: Option<String>,
    /// The contract ABI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<Abi>,
    /// Hex-encoded deployment bytecode; presence makes the ABI deployable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled: Option<String>,
    /// Developer documentation JSON produced by the compiler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_doc: Option<String>,
    /// Contract name to select within the compiled source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_name: Option<String>,
    /// Compiler version requested or recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_version: Option<String>,
    /// Human description, normally parsed out of the devdoc.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Friendly name to register the deployed instance under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_as: Option<String>,
    /// Constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Value>,
}

/// A request to invoke a method on a deployed contract, or to make a plain
/// value transfer when no method is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransaction {
    /// Message headers.
    pub headers: MessageHeaders,
    /// Common transaction fields.
    #[serde(flatten)]
    pub tx: TransactionCommon,
    /// Target contract address.
    #[serde(default)]
    pub to: String,
    /// ABI of the method to invoke.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Function>,
    /// Method arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Value>,
}

/// The two-variant sum type the dispatcher selects over.
#[derive(Debug, Clone)]
pub enum SubmissionMessage {
    /// Deploy a new contract instance.
    Deploy(Box<DeployContract>),
    /// Invoke a method or transfer value.
    Send(Box<SendTransaction>),
}

impl SubmissionMessage {
    /// Decode a raw submission by its type tag. Unknown tags and structural
    /// decode failures are client errors.
    pub fn parse(payload: &Value) -> GatewayResult<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            headers: EnvelopeHeaders,
        }
        #[derive(Deserialize)]
        struct EnvelopeHeaders {
            #[serde(rename = "type")]
            msg_type: Option<String>,
        }
        let envelope: Envelope = serde_json::from_value(payload.clone())
            .map_err(|e| GatewayError::InvalidMessage(e.to_string()))?;
        match envelope.headers.msg_type.as_deref() {
            Some("DeployContract") => {
                let msg: DeployContract = serde_json::from_value(payload.clone())
                    .map_err(|e| GatewayError::InvalidMessage(e.to_string()))?;
                Ok(SubmissionMessage::Deploy(Box::new(msg)))
            }
            Some("SendTransaction") => {
                let msg: SendTransaction = serde_json::from_value(payload.clone())
                    .map_err(|e| GatewayError::InvalidMessage(e.to_string()))?;
                Ok(SubmissionMessage::Send(Box::new(msg)))
            }
            other => Err(GatewayError::UnknownMessageType(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}

/// The receipt reply produced when a tracked transaction is mined. Numeric
/// receipt fields are always surfaced as decimal strings; the `*Hex` twins
/// are populated when hex-values-in-receipt is configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// Reply headers; `TransactionSuccess` or `TransactionFailure`.
    pub headers: Option<ReplyHeaders>,
    /// Hash of the block containing the transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<H256>,
    /// Block number, decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<String>,
    /// Block number, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number_hex: Option<U64>,
    /// Address of the deployed contract, for deployments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    /// Cumulative gas used in the block, decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_gas_used: Option<String>,
    /// Cumulative gas used, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative_gas_used_hex: Option<U256>,
    /// Sender address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Gas used by this transaction, decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    /// Gas used, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used_hex: Option<U256>,
    /// Nonce the gateway assigned (or `-1` when the node assigned it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Nonce, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_hex: Option<U64>,
    /// Receipt status, decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Receipt status, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_hex: Option<U64>,
    /// Recipient address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Transaction hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<H256>,
    /// Index of the transaction within its block, decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index: Option<String>,
    /// Transaction index, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_index_hex: Option<U64>,
    /// Friendly name propagated from the deploy request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_as: Option<String>,
    /// URL of the generated instance OpenAPI, set by the post-deploy hook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_swagger: Option<String>,
    /// URL of the instance API exerciser, set by the post-deploy hook.
    #[serde(rename = "contractUI", default, skip_serializing_if = "Option::is_none")]
    pub contract_ui: Option<String>,
}

/// The error reply emitted when a request fails before or during tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    /// Reply headers; always `Error`.
    pub headers: ReplyHeaders,
    /// HTTP-style status class for the failure.
    pub status: u16,
    /// Human-readable failure description.
    pub error_message: String,
    /// Hash of the transaction, when it was broadcast before the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Hash of the gap-fill transaction, when one was attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_fill_tx_hash: Option<String>,
    /// Whether the gap-fill transaction was accepted by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_fill_succeeded: Option<bool>,
}

/// Exactly one of these is delivered for every accepted submission.
#[derive(Debug, Clone)]
pub enum GatewayReply {
    /// The transaction was mined (successfully or not) within the budget.
    Receipt(Box<TransactionReceipt>),
    /// The request failed, timed out, or was rejected.
    Error(Box<ErrorReply>),
}

impl GatewayReply {
    /// Build an error reply for a request.
    pub fn error(req_id: &str, err: &GatewayError) -> Self {
        GatewayReply::Error(Box::new(ErrorReply {
            headers: ReplyHeaders {
                msg_type: MessageType::Error,
                req_id: req_id.to_string(),
            },
            status: err.status(),
            error_message: err.to_string(),
            tx_hash: None,
            gap_fill_tx_hash: None,
            gap_fill_succeeded: None,
        }))
    }

    /// The status class of this reply: 200 for receipts, the error's class
    /// otherwise.
    pub fn status(&self) -> u16 {
        match self {
            GatewayReply::Receipt(_) => 200,
            GatewayReply::Error(e) => e.status,
        }
    }
}
