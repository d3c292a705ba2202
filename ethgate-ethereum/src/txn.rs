use ethers::abi::{Function, Param, ParamType, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, NameOrAddress, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use serde_json::{json, Map, Value};
use tracing::debug;

use ethgate_core::{
    parse_address, DeployContract, EthRpc, GatewayError, GatewayResult, SendTransaction,
    TransactionCommon, TxSigner,
};

/// Gas limit placed on gap-fill self-transfers.
pub const GAP_FILL_GAS_LIMIT: u64 = 90_000;

/// A wire transaction flowing through the processor: the request to send,
/// the hash once known, and the receipt once mined.
#[derive(Debug, Clone, Default)]
pub struct Txn {
    /// The assembled transaction.
    pub request: TransactionRequest,
    /// Known after signing, or after the node accepts the send.
    pub hash: Option<H256>,
    /// Set once the receipt poller observes the transaction mined.
    pub receipt: Option<ethers::types::TransactionReceipt>,
    /// When true the nonce field is omitted from the wire send so the node
    /// assigns it.
    pub node_assign_nonce: bool,
    /// Privacy group for private-transaction sends.
    pub privacy_group_id: Option<String>,
}

impl Txn {
    /// Assemble a contract-deployment transaction from the message. The
    /// message must carry compiled bytecode by this point.
    pub fn deploy_contract(msg: &DeployContract, nonce: i64) -> GatewayResult<Self> {
        let compiled = msg
            .compiled
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                GatewayError::TxBuild("no compiled bytecode available to deploy".to_string())
            })?;
        let mut data = hex::decode(compiled.trim_start_matches("0x"))
            .map_err(|e| GatewayError::TxBuild(format!("invalid deployment bytecode: {e}")))?;

        let abi = msg
            .abi
            .as_ref()
            .ok_or_else(|| GatewayError::TxBuild("no ABI available to deploy".to_string()))?;
        if let Some(constructor) = &abi.constructor {
            let tokens = coerce_tokens(&constructor.inputs, &msg.parameters)?;
            data = constructor
                .encode_input(data, &tokens)
                .map_err(|e| GatewayError::TxBuild(format!("constructor arguments: {e}")))?;
        } else if !msg.parameters.is_empty() {
            return Err(GatewayError::TxBuild(
                "constructor arguments supplied but the ABI has no constructor".to_string(),
            ));
        }

        let request = base_request(&msg.tx, nonce)?.data(Bytes::from(data));
        Ok(Txn {
            request,
            ..Default::default()
        })
    }

    /// Assemble a method invocation or plain value transfer.
    pub fn send_transaction(msg: &SendTransaction, nonce: i64) -> GatewayResult<Self> {
        let to = parse_address("to", &msg.to)?;
        let mut request = base_request(&msg.tx, nonce)?.to(NameOrAddress::Address(to));
        if let Some(method) = &msg.method {
            let data = encode_method_call(method, &msg.parameters)?;
            request = request.data(data);
        } else if !msg.parameters.is_empty() {
            return Err(GatewayError::TxBuild(
                "parameters supplied without a method".to_string(),
            ));
        }
        Ok(Txn {
            request,
            ..Default::default()
        })
    }

    /// A zero-gas-price, zero-value transfer from the sender to itself,
    /// consuming an orphaned nonce so later transactions can mine.
    pub fn nil_transaction(from: Address, nonce: i64) -> Self {
        let request = TransactionRequest::new()
            .from(from)
            .to(NameOrAddress::Address(from))
            .value(U256::zero())
            .gas(GAP_FILL_GAS_LIMIT)
            .gas_price(U256::zero())
            .nonce(U256::from(nonce as u64));
        Txn {
            request,
            ..Default::default()
        }
    }

    /// Send to the node, locally signing when a signer is supplied. For
    /// signed sends the hash is computed from the raw payload before the
    /// wire call, so it is known even if the node rejects the send.
    pub async fn send(
        &mut self,
        rpc: &dyn EthRpc,
        signer: Option<&dyn TxSigner>,
    ) -> GatewayResult<H256> {
        let hash = match signer {
            Some(signer) => {
                let typed: TypedTransaction = self.request.clone().into();
                let raw = signer.sign_transaction(&typed).await?;
                self.hash = Some(H256::from(keccak256(&raw)));
                rpc.send_raw_transaction(raw).await?
            }
            None => {
                let tx = self.to_wire_json();
                debug!(tx = %tx, "node-signed send");
                rpc.send_transaction(&tx).await?
            }
        };
        self.hash = Some(hash);
        Ok(hash)
    }

    /// Probe for the receipt; returns true and records it once mined.
    pub async fn fetch_receipt(&mut self, rpc: &dyn EthRpc) -> GatewayResult<bool> {
        let hash = self
            .hash
            .ok_or_else(|| GatewayError::Rpc("no transaction hash to poll".to_string()))?;
        match rpc.transaction_receipt(hash).await? {
            Some(receipt) => {
                let mined = receipt.block_number.is_some();
                self.receipt = Some(receipt);
                Ok(mined)
            }
            None => Ok(false),
        }
    }

    /// The JSON object passed to `eth_sendTransaction`. The nonce is omitted
    /// when the node assigns it; the privacy group rides along for private
    /// sends.
    pub fn to_wire_json(&self) -> Value {
        let mut obj = Map::new();
        if let Some(from) = self.request.from {
            obj.insert("from".into(), json!(format!("{from:#x}")));
        }
        if let Some(NameOrAddress::Address(to)) = &self.request.to {
            obj.insert("to".into(), json!(format!("{to:#x}")));
        }
        if let Some(gas) = self.request.gas {
            obj.insert("gas".into(), json!(format!("{gas:#x}")));
        }
        if let Some(gas_price) = self.request.gas_price {
            obj.insert("gasPrice".into(), json!(format!("{gas_price:#x}")));
        }
        if let Some(value) = self.request.value {
            obj.insert("value".into(), json!(format!("{value:#x}")));
        }
        if let Some(data) = &self.request.data {
            obj.insert("data".into(), json!(format!("{data}")));
        }
        if !self.node_assign_nonce {
            if let Some(nonce) = self.request.nonce {
                obj.insert("nonce".into(), json!(format!("{nonce:#x}")));
            }
        }
        if let Some(group) = &self.privacy_group_id {
            obj.insert("privacyGroupId".into(), json!(group));
        }
        Value::Object(obj)
    }
}

fn base_request(common: &TransactionCommon, nonce: i64) -> GatewayResult<TransactionRequest> {
    let from = parse_address("from", &common.from)?;
    let mut request = TransactionRequest::new().from(from);
    if nonce >= 0 {
        request = request.nonce(U256::from(nonce as u64));
    }
    if let Some(gas) = common.gas {
        request = request.gas(gas);
    }
    if let Some(gas_price) = common.gas_price {
        request = request.gas_price(gas_price);
    }
    if let Some(value) = common.value {
        request = request.value(value);
    }
    Ok(request)
}

fn encode_method_call(method: &Function, parameters: &[Value]) -> GatewayResult<Bytes> {
    let tokens = coerce_tokens(&method.inputs, parameters)?;
    method
        .encode_input(&tokens)
        .map(Bytes::from)
        .map_err(|e| GatewayError::TxBuild(format!("method '{}': {e}", method.name)))
}

/// Coerce JSON argument values to ABI tokens, one per declared input.
fn coerce_tokens(inputs: &[Param], values: &[Value]) -> GatewayResult<Vec<Token>> {
    if inputs.len() != values.len() {
        return Err(GatewayError::TxBuild(format!(
            "expected {} arguments, got {}",
            inputs.len(),
            values.len()
        )));
    }
    inputs
        .iter()
        .zip(values)
        .map(|(param, value)| {
            coerce_token(&param.kind, value).map_err(|detail| {
                GatewayError::TxBuild(format!("argument '{}': {detail}", param.name))
            })
        })
        .collect()
}

fn coerce_token(kind: &ParamType, value: &Value) -> Result<Token, String> {
    match kind {
        ParamType::Address => {
            let s = value.as_str().ok_or("expected an address string")?;
            parse_address("parameter", s)
                .map(Token::Address)
                .map_err(|e| e.to_string())
        }
        ParamType::Uint(_) => parse_uint(value).map(Token::Uint),
        ParamType::Int(_) => parse_uint(value).map(Token::Int),
        ParamType::Bool => value.as_bool().map(Token::Bool).ok_or_else(|| {
            "expected a boolean".to_string()
        }),
        ParamType::String => value
            .as_str()
            .map(|s| Token::String(s.to_string()))
            .ok_or_else(|| "expected a string".to_string()),
        ParamType::Bytes => parse_hex_bytes(value).map(Token::Bytes),
        ParamType::FixedBytes(len) => {
            let bytes = parse_hex_bytes(value)?;
            if bytes.len() != *len {
                return Err(format!("expected {len} bytes, got {}", bytes.len()));
            }
            Ok(Token::FixedBytes(bytes))
        }
        ParamType::Array(inner) => {
            let items = value.as_array().ok_or("expected an array")?;
            items
                .iter()
                .map(|item| coerce_token(inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Token::Array)
        }
        ParamType::FixedArray(inner, len) => {
            let items = value.as_array().ok_or("expected an array")?;
            if items.len() != *len {
                return Err(format!("expected {len} elements, got {}", items.len()));
            }
            items
                .iter()
                .map(|item| coerce_token(inner, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Token::FixedArray)
        }
        ParamType::Tuple(kinds) => {
            let items = value.as_array().ok_or("expected an array for tuple")?;
            if items.len() != kinds.len() {
                return Err(format!(
                    "expected {} tuple elements, got {}",
                    kinds.len(),
                    items.len()
                ));
            }
            kinds
                .iter()
                .zip(items)
                .map(|(k, v)| coerce_token(k, v))
                .collect::<Result<Vec<_>, _>>()
                .map(Token::Tuple)
        }
    }
}

/// Numbers are accepted as JSON numbers or as decimal/hex strings; strings
/// avoid precision loss above 2^53.
fn parse_uint(value: &Value) -> Result<U256, String> {
    match value {
        Value::Number(n) => {
            let u = n.as_u64().ok_or("expected a non-negative integer")?;
            Ok(U256::from(u))
        }
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16).map_err(|e| e.to_string())
            } else {
                U256::from_dec_str(s).map_err(|e| e.to_string())
            }
        }
        _ => Err("expected a number or numeric string".to_string()),
    }
}

fn parse_hex_bytes(value: &Value) -> Result<Vec<u8>, String> {
    let s = value.as_str().ok_or("expected a hex string")?;
    hex::decode(s.trim_start_matches("0x")).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use ethers::abi::Abi;

    use super::*;

    fn storage_abi() -> Abi {
        serde_json::from_str(
            r#"[
              {"type":"constructor","inputs":[{"name":"v","type":"uint256"}],"stateMutability":"nonpayable"},
              {"type":"function","name":"set","inputs":[{"name":"x","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
              {"type":"function","name":"get","inputs":[],"outputs":[{"name":"r","type":"uint256"}],"stateMutability":"view"}
            ]"#,
        )
        .unwrap()
    }

    fn deploy_msg() -> DeployContract {
        serde_json::from_value(json!({
            "headers": {"id": "message1", "type": "DeployContract"},
            "from": "0x0123456789abcdef0123456789abcdef01234567",
            "parameters": ["12345"]
        }))
        .unwrap()
    }

    #[test]
    fn builds_deploy_data_with_constructor_args() {
        let mut msg = deploy_msg();
        msg.abi = Some(storage_abi());
        msg.compiled = Some("6080604052".to_string());

        let txn = Txn::deploy_contract(&msg, 7).unwrap();
        let data = txn.request.data.as_ref().unwrap();
        assert!(data.len() > 5, "constructor argument should follow bytecode");
        assert_eq!(&data[..5], hex::decode("6080604052").unwrap().as_slice());
        assert_eq!(txn.request.nonce, Some(U256::from(7)));
    }

    #[test]
    fn deploy_without_bytecode_is_a_build_error() {
        let mut msg = deploy_msg();
        msg.abi = Some(storage_abi());
        let err = Txn::deploy_contract(&msg, 0).unwrap_err();
        assert!(matches!(err, GatewayError::TxBuild(_)));
    }

    #[test]
    fn encodes_method_call_arguments() {
        let abi = storage_abi();
        let set = abi.function("set").unwrap().clone();
        let msg: SendTransaction = serde_json::from_value(json!({
            "headers": {"id": "m2", "type": "SendTransaction"},
            "from": "0x0123456789abcdef0123456789abcdef01234567",
            "to": "0xfeedbeeffeedbeeffeedbeeffeedbeeffeedbeef",
            "parameters": ["0x10"]
        }))
        .unwrap();
        let msg = SendTransaction {
            method: Some(set),
            ..msg
        };
        let txn = Txn::send_transaction(&msg, 3).unwrap();
        let data = txn.request.data.unwrap();
        // 4-byte selector + one abi-encoded uint256
        assert_eq!(data.len(), 36);
        assert_eq!(data[35], 0x10);
    }

    #[test]
    fn wire_json_omits_nonce_when_node_assigns() {
        let msg: SendTransaction = serde_json::from_value(json!({
            "headers": {"id": "m3", "type": "SendTransaction"},
            "from": "0x0123456789abcdef0123456789abcdef01234567",
            "to": "0xfeedbeeffeedbeeffeedbeeffeedbeeffeedbeef",
            "value": "0x100"
        }))
        .unwrap();
        let mut txn = Txn::send_transaction(&msg, 9).unwrap();
        assert_eq!(txn.to_wire_json()["nonce"], json!("0x9"));

        txn.node_assign_nonce = true;
        assert!(txn.to_wire_json().get("nonce").is_none());
    }

    #[test]
    fn nil_transaction_is_a_zero_value_self_transfer() {
        let from: Address = "0x0123456789abcdef0123456789abcdef01234567"
            .parse()
            .unwrap();
        let txn = Txn::nil_transaction(from, 7);
        assert_eq!(txn.request.from, Some(from));
        assert_eq!(txn.request.to, Some(NameOrAddress::Address(from)));
        assert_eq!(txn.request.value, Some(U256::zero()));
        assert_eq!(txn.request.gas_price, Some(U256::zero()));
        assert_eq!(txn.request.nonce, Some(U256::from(7)));
    }
}
