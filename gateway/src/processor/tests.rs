use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256, U64};
use ethers::types::TransactionReceipt as EthReceipt;
use mockall::mock;
use serde_json::{json, Value};

use ethgate_core::{
    EthRpc, GatewayError, GatewayReply, GatewayResult, HdWallet, HdWalletRequest, TxSigner,
};
use ethgate_ethereum::WalletSigner;

use super::*;

mock! {
    pub Rpc {}

    #[async_trait]
    impl EthRpc for Rpc {
        async fn transaction_count(&self, addr: Address, block_tag: &str) -> GatewayResult<U256>;
        async fn private_transaction_count(
            &self,
            addr: Address,
            privacy_group_id: &str,
        ) -> GatewayResult<U256>;
        #[mockall::concretize]
        async fn find_privacy_group(
            &self,
            private_from: Option<&str>,
            private_for: &[String],
        ) -> GatewayResult<String>;
        async fn send_transaction(&self, tx: &Value) -> GatewayResult<H256>;
        async fn send_raw_transaction(&self, raw: Bytes) -> GatewayResult<H256>;
        async fn transaction_receipt(&self, hash: H256) -> GatewayResult<Option<EthReceipt>>;
    }
}

const FROM: &str = "0x0123456789abcdef0123456789abcdef01234567";
const TO: &str = "0xfeedbeeffeedbeeffeedbeeffeedbeeffeedbeef";

fn send_msg(id: &str) -> Value {
    json!({
        "headers": {"id": id, "type": "SendTransaction"},
        "from": FROM,
        "to": TO,
        "value": "0x10"
    })
}

fn mined_receipt() -> EthReceipt {
    EthReceipt {
        block_number: Some(U64::from(100)),
        status: Some(U64::from(1)),
        ..Default::default()
    }
}

fn processor_with(conf: ProcessorConfig, rpc: MockRpc) -> Arc<TxnProcessor> {
    TxnProcessor::new(
        conf,
        Arc::new(rpc),
        None,
        None,
        Arc::new(GatewayMetrics::new().unwrap()),
    )
}

fn sent_nonce(tx: &Value) -> Option<i64> {
    tx.get("nonce")
        .and_then(Value::as_str)
        .and_then(|s| i64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
}

/// Three successive submissions for a fresh sender chain from the node's
/// pending count: 7, 8, 9.
#[tokio::test(start_paused = true)]
async fn predicts_dense_nonces_from_the_node_count() {
    let mut rpc = MockRpc::new();
    // only the first submission reads the node; the rest chain in memory
    rpc.expect_transaction_count()
        .times(1)
        .returning(|_, _| Ok(U256::from(7)));
    let sent: Arc<std::sync::Mutex<Vec<i64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sent_clone = sent.clone();
    rpc.expect_send_transaction().returning(move |tx| {
        sent_clone.lock().unwrap().push(sent_nonce(tx).unwrap());
        Ok(H256::random())
    });
    rpc.expect_transaction_receipt()
        .returning(|_| Ok(Some(mined_receipt())));

    let processor = processor_with(
        ProcessorConfig {
            always_manage_nonce: true,
            ..Default::default()
        },
        rpc,
    );

    // keep all three in flight: replies resolve later, submissions are serial
    let r1 = {
        let (ctx, rx) = SubmissionContext::new(send_msg("m1"));
        processor.clone().on_message(ctx).await;
        rx
    };
    let r2 = {
        let (ctx, rx) = SubmissionContext::new(send_msg("m2"));
        processor.clone().on_message(ctx).await;
        rx
    };
    let r3 = {
        let (ctx, rx) = SubmissionContext::new(send_msg("m3"));
        processor.clone().on_message(ctx).await;
        rx
    };
    assert_eq!(*sent.lock().unwrap(), vec![7, 8, 9]);

    for rx in [r1, r2, r3] {
        assert!(matches!(rx.await.unwrap(), GatewayReply::Receipt(_)));
    }
    processor.shutdown().await;
}

/// A pre-submission send failure with nothing above it winds the nonce back:
/// the next submission reuses it rather than leaving a gap.
#[tokio::test(start_paused = true)]
async fn reuses_the_nonce_of_a_failed_send() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count()
        .times(1)
        .returning(|_, _| Ok(U256::from(7)));
    let sent: Arc<std::sync::Mutex<Vec<i64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sent_clone = sent.clone();
    rpc.expect_send_transaction().returning(move |tx| {
        let nonce = sent_nonce(tx).unwrap();
        let mut log = sent_clone.lock().unwrap();
        let first_eight = nonce == 8 && !log.contains(&8);
        log.push(nonce);
        if first_eight {
            Err(GatewayError::Send("nonce too low".to_string()))
        } else {
            Ok(H256::random())
        }
    });
    // nonce 7 stays unmined so the sender keeps an in-flight entry
    rpc.expect_transaction_receipt().returning(|_| Ok(None));

    let processor = processor_with(
        ProcessorConfig {
            always_manage_nonce: true,
            max_tx_wait: Duration::from_secs(3600),
            ..Default::default()
        },
        rpc,
    );

    let (ctx, _r1) = SubmissionContext::new(send_msg("m1"));
    processor.clone().on_message(ctx).await; // nonce 7, in flight

    let (ctx, r2) = SubmissionContext::new(send_msg("m2"));
    processor.clone().on_message(ctx).await; // nonce 8, send fails
    let reply = r2.await.unwrap();
    assert_eq!(reply.status(), 400);
    match reply {
        GatewayReply::Error(e) => {
            // gap-fill disabled: no status is reported
            assert!(e.gap_fill_tx_hash.is_none());
        }
        other => panic!("expected error reply, got {other:?}"),
    }

    let (ctx, _r3) = SubmissionContext::new(send_msg("m3"));
    processor.clone().on_message(ctx).await; // nonce 8 again

    assert_eq!(*sent.lock().unwrap(), vec![7, 8, 8]);
}

/// With a higher nonce still in flight, a failed send dispatches a zero-value
/// self-transfer carrying the orphaned nonce, and the outcome is reported in
/// the error reply.
#[tokio::test(start_paused = true)]
async fn gap_fills_behind_a_higher_inflight_nonce() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count()
        .times(1)
        .returning(|_, _| Ok(U256::from(7)));
    let gap_fills: Arc<std::sync::Mutex<Vec<Value>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let gap_clone = gap_fills.clone();
    rpc.expect_send_transaction().returning(move |tx| {
        let nonce = sent_nonce(tx).unwrap();
        let self_transfer = tx["to"] == tx["from"];
        if self_transfer {
            gap_clone.lock().unwrap().push(tx.clone());
            return Ok(H256::repeat_byte(0x99));
        }
        if nonce == 7 {
            Err(GatewayError::Send("rejected".to_string()))
        } else {
            Ok(H256::random())
        }
    });
    rpc.expect_transaction_receipt().returning(|_| Ok(None));

    let processor = processor_with(
        ProcessorConfig {
            always_manage_nonce: true,
            attempt_gapfill: true,
            send_concurrency: 2,
            max_tx_wait: Duration::from_secs(3600),
            ..Default::default()
        },
        rpc,
    );

    // two concurrent submissions: nonces 7 and 8 allocated under the lock,
    // sends racing; the nonce-7 send fails while 8 is in flight
    let p1 = processor.clone();
    let p2 = processor.clone();
    let (first, second) = tokio::join!(
        async move {
            let (ctx, rx) = SubmissionContext::new(send_msg("m1"));
            p1.on_message(ctx).await;
            rx.await.unwrap()
        },
        async move {
            let (ctx, rx) = SubmissionContext::new(send_msg("m2"));
            p2.on_message(ctx).await;
            // second submission stays in flight; just confirm it was accepted
            drop(rx);
        }
    );
    let _ = second;

    let GatewayReply::Error(err) = first else {
        panic!("nonce 7 send should fail");
    };
    assert_eq!(err.status, 400);
    assert_eq!(
        err.gap_fill_tx_hash.as_deref(),
        Some(format!("{:#x}", H256::repeat_byte(0x99)).as_str())
    );
    assert_eq!(err.gap_fill_succeeded, Some(true));

    let fills = gap_fills.lock().unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(sent_nonce(&fills[0]), Some(7));
    assert_eq!(fills[0]["value"], json!("0x0"));
    assert_eq!(fills[0]["gasPrice"], json!("0x0"));
}

/// Completing the last in-flight transaction removes the sender from the
/// map, so the next submission re-queries the node.
#[tokio::test(start_paused = true)]
async fn requeries_the_node_after_the_last_completion() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count()
        .times(2)
        .returning(|_, _| Ok(U256::from(7)));
    rpc.expect_send_transaction()
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(|_| Ok(Some(mined_receipt())));

    let processor = processor_with(
        ProcessorConfig {
            always_manage_nonce: true,
            ..Default::default()
        },
        rpc,
    );

    let reply = processor.clone().dispatch(send_msg("m1")).await;
    assert_eq!(reply.status(), 200);

    let reply = processor.clone().dispatch(send_msg("m2")).await;
    assert_eq!(reply.status(), 200);
    processor.shutdown().await;
}

/// Node-signed transactions without forced nonce management leave nonce
/// assignment to the node: no count query, no nonce on the wire.
#[tokio::test(start_paused = true)]
async fn node_signed_sends_omit_the_nonce() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count().never();
    rpc.expect_send_transaction()
        .withf(|tx| tx.get("nonce").is_none())
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(|_| Ok(Some(mined_receipt())));

    let processor = processor_with(ProcessorConfig::default(), rpc);
    let reply = processor.clone().dispatch(send_msg("m1")).await;
    assert_eq!(reply.status(), 200);
    processor.shutdown().await;
}

/// An explicit nonce is used verbatim; an unparseable one is a client error
/// before any node interaction.
#[tokio::test(start_paused = true)]
async fn explicit_nonces_are_used_verbatim() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count().never();
    rpc.expect_send_transaction()
        .withf(|tx| sent_nonce(tx) == Some(42))
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(|_| Ok(Some(mined_receipt())));

    let processor = processor_with(ProcessorConfig::default(), rpc);

    let mut msg = send_msg("m1");
    msg["nonce"] = json!("42");
    assert_eq!(processor.clone().dispatch(msg).await.status(), 200);

    let mut msg = send_msg("m2");
    msg["nonce"] = json!("not-a-number");
    let reply = processor.clone().dispatch(msg).await;
    assert_eq!(reply.status(), 400);
    processor.shutdown().await;
}

/// Private transactions take their nonce from the privacy-group count, and
/// supplying both a group and a recipient list is refused.
#[tokio::test(start_paused = true)]
async fn private_transactions_use_the_group_count() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count().never();
    rpc.expect_private_transaction_count()
        .withf(|_, group| group == "grp1")
        .returning(|_, _| Ok(U256::from(3)));
    rpc.expect_send_transaction()
        .withf(|tx| sent_nonce(tx) == Some(3) && tx["privacyGroupId"] == json!("grp1"))
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(|_| Ok(Some(mined_receipt())));

    let processor = processor_with(
        ProcessorConfig {
            orion_private_apis: true,
            ..Default::default()
        },
        rpc,
    );

    let mut msg = send_msg("m1");
    msg["privacyGroupId"] = json!("grp1");
    assert_eq!(processor.clone().dispatch(msg).await.status(), 200);

    let mut msg = send_msg("m2");
    msg["privacyGroupId"] = json!("grp1");
    msg["privateFor"] = json!(["key1"]);
    let reply = processor.clone().dispatch(msg).await;
    assert_eq!(reply.status(), 400);
    processor.shutdown().await;
}

/// Exactly one reply arrives for every accepted request, whatever the path.
#[tokio::test(start_paused = true)]
async fn every_submission_gets_exactly_one_reply() {
    let mut rpc = MockRpc::new();
    rpc.expect_send_transaction()
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(|_| Ok(Some(mined_receipt())));
    let processor = processor_with(ProcessorConfig::default(), rpc);

    // unknown message type
    let reply = processor
        .clone()
        .dispatch(json!({"headers": {"id": "u1", "type": "Frobnicate"}}))
        .await;
    assert_eq!(reply.status(), 400);

    // structural decode failure
    let reply = processor.clone().dispatch(json!({"no": "headers"})).await;
    assert_eq!(reply.status(), 400);

    // bad from address fails before the in-flight table is touched
    let mut msg = send_msg("u2");
    msg["from"] = json!("0x1234");
    assert_eq!(processor.clone().dispatch(msg).await.status(), 400);
    {
        let table = processor.table.lock().await;
        assert_eq!(table.senders(), 0);
    }

    // build failure: parameters without a method
    let mut msg = send_msg("u3");
    msg["parameters"] = json!(["1"]);
    assert_eq!(processor.clone().dispatch(msg).await.status(), 400);
    {
        let table = processor.table.lock().await;
        assert_eq!(table.senders(), 0);
    }

    // happy path
    assert_eq!(processor.clone().dispatch(send_msg("u4")).await.status(), 200);
    processor.shutdown().await;
}

/// Receipt polling times out with 408 when the budget expires quietly, and
/// 500 when probes were failing right up to the deadline.
#[tokio::test(start_paused = true)]
async fn polling_outcomes_map_to_408_and_500() {
    let mut rpc = MockRpc::new();
    rpc.expect_send_transaction()
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt().returning(|_| Ok(None));
    let processor = processor_with(
        ProcessorConfig {
            max_tx_wait: Duration::from_secs(5),
            ..Default::default()
        },
        rpc,
    );
    let reply = processor.clone().dispatch(send_msg("t1")).await;
    assert_eq!(reply.status(), 408);
    match &reply {
        GatewayReply::Error(e) => assert!(e.tx_hash.is_some(), "timeout reply carries the hash"),
        other => panic!("unexpected {other:?}"),
    }
    processor.shutdown().await;

    let mut rpc = MockRpc::new();
    rpc.expect_send_transaction()
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(|_| Err(GatewayError::Rpc("connection refused".to_string())));
    let processor = processor_with(
        ProcessorConfig {
            max_tx_wait: Duration::from_secs(5),
            ..Default::default()
        },
        rpc,
    );
    let reply = processor.clone().dispatch(send_msg("t2")).await;
    assert_eq!(reply.status(), 500);
    processor.shutdown().await;
}

/// The receipt reply carries decimal strings always, hex twins only when
/// configured, and propagates registerAs from the deploy request.
#[tokio::test(start_paused = true)]
async fn receipt_replies_carry_decimal_and_optional_hex() {
    let storage_abi: ethers::abi::Abi = serde_json::from_str(
        r#"[{"type":"constructor","inputs":[{"name":"v","type":"uint256"}],"stateMutability":"nonpayable"}]"#,
    )
    .unwrap();
    let deploy = json!({
        "headers": {"id": "d1", "type": "DeployContract"},
        "from": FROM,
        "abi": storage_abi,
        "compiled": "6080604052",
        "parameters": ["5"],
        "registerAs": "erc20"
    });

    let mut receipt = mined_receipt();
    receipt.status = Some(U64::zero());
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count()
        .returning(|_, _| Ok(U256::from(7)));
    rpc.expect_send_transaction()
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt()
        .returning(move |_| Ok(Some(receipt.clone())));

    let processor = processor_with(
        ProcessorConfig {
            always_manage_nonce: true,
            hex_values_in_receipt: true,
            ..Default::default()
        },
        rpc,
    );
    let reply = processor.clone().dispatch(deploy).await;
    let GatewayReply::Receipt(receipt) = reply else {
        panic!("expected receipt");
    };
    let headers = receipt.headers.as_ref().unwrap();
    // status 0 mines as a failure reply, still over the receipt path
    assert_eq!(headers.msg_type, MessageType::TransactionFailure);
    assert_eq!(receipt.nonce.as_deref(), Some("7"));
    assert_eq!(receipt.nonce_hex, Some(U64::from(7)));
    assert_eq!(receipt.block_number.as_deref(), Some("100"));
    assert_eq!(receipt.block_number_hex, Some(U64::from(100)));
    assert_eq!(receipt.register_as.as_deref(), Some("erc20"));
    processor.shutdown().await;
}

/// Rule 3 precedes rule 4: once a sender has gateway-tracked nonces in
/// flight, a node-signable submission still chains from the in-memory
/// highest rather than switching modes mid-window.
#[tokio::test(start_paused = true)]
async fn inflight_nonces_take_precedence_over_node_assignment() {
    let mut rpc = MockRpc::new();
    rpc.expect_transaction_count().never();
    rpc.expect_send_transaction()
        .returning(|_| Ok(H256::random()));
    rpc.expect_transaction_receipt().returning(|_| Ok(None));

    let processor = processor_with(
        ProcessorConfig {
            max_tx_wait: Duration::from_secs(3600),
            ..Default::default()
        },
        rpc,
    );

    let mut msg = send_msg("m1");
    msg["nonce"] = json!(5);
    let (ctx, _r1) = SubmissionContext::new(msg);
    processor.clone().on_message(ctx).await; // nonce 5 in flight

    let (ctx, _r2) = SubmissionContext::new(send_msg("m2"));
    processor.clone().on_message(ctx).await;
    {
        let table = processor.table.lock().await;
        assert_eq!(table.highest_nonce(FROM), 6);
    }
}

struct FixedWallet(Arc<dyn TxSigner>);

#[async_trait]
impl HdWallet for FixedWallet {
    async fn signer_for(&self, _request: &HdWalletRequest) -> GatewayResult<Arc<dyn TxSigner>> {
        Ok(self.0.clone())
    }
}

/// HD-wallet senders resolve to the derived key's address; without a wallet
/// configured the request fails.
#[tokio::test]
async fn hd_wallet_senders_resolve_to_key_addresses() {
    let signer = Arc::new(
        WalletSigner::from_private_key(
            "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318",
        )
        .unwrap(),
    );
    let expected = addr_0x(signer.address());

    let processor = TxnProcessor::new(
        ProcessorConfig::default(),
        Arc::new(MockRpc::new()),
        Some(Arc::new(FixedWallet(signer))),
        None,
        Arc::new(GatewayMetrics::new().unwrap()),
    );
    let resolved = processor
        .resolve_address("hd-inst1-wallet1-0")
        .await
        .unwrap();
    assert_eq!(resolved, expected);

    let plain = processor.resolve_address(FROM).await.unwrap();
    assert_eq!(plain, FROM);

    let unconfigured = TxnProcessor::new(
        ProcessorConfig::default(),
        Arc::new(MockRpc::new()),
        None,
        None,
        Arc::new(GatewayMetrics::new().unwrap()),
    );
    let err = unconfigured
        .resolve_address("hd-inst1-wallet1-0")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::HdWalletMissing));
}
