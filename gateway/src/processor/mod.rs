//! The transaction processor: dispatches submission messages, serializes
//! nonce assignment per sender, bounds concurrent wire sends, tracks every
//! submitted transaction to receipt or timeout, and guarantees exactly one
//! reply per accepted request.

mod delay;
mod inflight;

pub use delay::TxnDelayTracker;

use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, H256, U64};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use ethgate_core::{
    addr_0x, parse_address, parse_hd_wallet_request, AddressBook, DeployContract, EthRpc,
    GatewayError, GatewayReply, GatewayResult, HdWallet, MessageType, ReplyHeaders,
    SendTransaction, SubmissionMessage, TransactionCommon, TransactionReceipt, TxSigner,
};
use ethgate_ethereum::Txn;

use crate::metrics::GatewayMetrics;
use inflight::InflightTable;

/// Processor configuration, bound from the CLI flag surface.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Predict nonces in the gateway even for node-signed transactions.
    pub always_manage_nonce: bool,
    /// Send a gap-fill transaction when a nonce is orphaned by a failed send.
    pub attempt_gapfill: bool,
    /// Wall-clock budget for receipt polling.
    pub max_tx_wait: Duration,
    /// Parallel wire sends permitted; 1 preserves strict per-sender ordering.
    pub send_concurrency: usize,
    /// Use Orion/EEA private-transaction semantics.
    pub orion_private_apis: bool,
    /// Add hex twins of numeric receipt fields to replies.
    pub hex_values_in_receipt: bool,
    /// How long shutdown waits for receipt pollers before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            always_manage_nonce: false,
            attempt_gapfill: false,
            max_tx_wait: Duration::from_secs(60),
            send_concurrency: 1,
            orion_private_apis: false,
            hex_values_in_receipt: false,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// One accepted submission: the raw payload and the one-shot reply latch.
/// Consuming the latch IS the reply, so a second reply is unrepresentable.
pub struct SubmissionContext {
    payload: Value,
    req_id: String,
    reply: oneshot::Sender<GatewayReply>,
}

impl SubmissionContext {
    /// Wrap a raw submission; the receiver resolves with the single reply.
    pub fn new(payload: Value) -> (Self, oneshot::Receiver<GatewayReply>) {
        let req_id = payload
            .pointer("/headers/id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                req_id,
                reply: tx,
            },
            rx,
        )
    }

    fn send(self, reply: GatewayReply) {
        if self.reply.send(reply).is_err() {
            warn!(req_id = %self.req_id, "reply receiver dropped before delivery");
        }
    }

    fn send_error(self, err: GatewayError) {
        debug!(req_id = %self.req_id, %err, "error reply");
        let reply = GatewayReply::error(&self.req_id, &err);
        self.send(reply);
    }

    fn send_error_with_tx(self, err: GatewayError, tx_hash: Option<H256>) {
        let mut reply = match GatewayReply::error(&self.req_id, &err) {
            GatewayReply::Error(e) => e,
            GatewayReply::Receipt(_) => unreachable!("error constructor"),
        };
        reply.tx_hash = tx_hash.map(|h| format!("{h:#x}"));
        self.send(GatewayReply::Error(reply));
    }

    fn send_error_with_gap_fill(
        self,
        err: GatewayError,
        gap_fill_tx_hash: Option<String>,
        gap_fill_succeeded: Option<bool>,
    ) {
        let mut reply = match GatewayReply::error(&self.req_id, &err) {
            GatewayReply::Error(e) => e,
            GatewayReply::Receipt(_) => unreachable!("error constructor"),
        };
        reply.gap_fill_tx_hash = gap_fill_tx_hash;
        reply.gap_fill_succeeded = gap_fill_succeeded;
        self.send(GatewayReply::Error(reply));
    }

    fn send_receipt(self, receipt: TransactionReceipt) {
        self.send(GatewayReply::Receipt(Box::new(receipt)));
    }
}

/// The in-flight state owned by the submission/poller task. The table holds
/// only {id, nonce}; everything else travels with the task, so there is no
/// shared ownership between the two (coordination is the nonce mutex alone).
struct PreparedInflight {
    id: u64,
    from: String,
    from_addr: Address,
    nonce: i64,
    node_assign_nonce: bool,
    privacy_group_id: Option<String>,
    initial_wait_delay: Duration,
    register_as: Option<String>,
    signer: Option<Arc<dyn TxSigner>>,
    rpc: Arc<dyn EthRpc>,
    gap_fill_tx_hash: Option<String>,
    gap_fill_succeeded: bool,
}

/// The per-process transaction processor. Constructed once at startup and
/// drained on shutdown.
pub struct TxnProcessor {
    conf: ProcessorConfig,
    rpc: Arc<dyn EthRpc>,
    hdwallet: Option<Arc<dyn HdWallet>>,
    addressbook: Option<Arc<dyn AddressBook>>,
    table: Mutex<InflightTable>,
    send_slots: Arc<Semaphore>,
    pollers: Mutex<JoinSet<()>>,
    metrics: Arc<GatewayMetrics>,
}

impl TxnProcessor {
    /// Build a processor bound to the default RPC endpoint.
    pub fn new(
        conf: ProcessorConfig,
        rpc: Arc<dyn EthRpc>,
        hdwallet: Option<Arc<dyn HdWallet>>,
        addressbook: Option<Arc<dyn AddressBook>>,
        metrics: Arc<GatewayMetrics>,
    ) -> Arc<Self> {
        let send_concurrency = conf.send_concurrency.max(1);
        Arc::new(Self {
            conf: ProcessorConfig {
                send_concurrency,
                ..conf
            },
            rpc,
            hdwallet,
            addressbook,
            table: Mutex::new(InflightTable::default()),
            send_slots: Arc::new(Semaphore::new(send_concurrency)),
            pollers: Mutex::new(JoinSet::new()),
            metrics,
        })
    }

    /// Submit a raw payload and await its single reply. A reply latch dropped
    /// during shutdown surfaces as a 503-class error reply.
    pub async fn dispatch(self: Arc<Self>, payload: Value) -> GatewayReply {
        let (ctx, rx) = SubmissionContext::new(payload);
        let req_id = ctx.req_id.clone();
        self.clone().on_message(ctx).await;
        match rx.await {
            Ok(reply) => reply,
            Err(_) => GatewayReply::error(&req_id, &GatewayError::ShuttingDown),
        }
    }

    /// Dispatch one submission. From this point a reply is guaranteed on
    /// every path: the context is consumed exactly once.
    pub async fn on_message(self: Arc<Self>, ctx: SubmissionContext) {
        match SubmissionMessage::parse(&ctx.payload) {
            Ok(SubmissionMessage::Deploy(msg)) => self.on_deploy_contract(ctx, *msg).await,
            Ok(SubmissionMessage::Send(msg)) => self.on_send_transaction(ctx, *msg).await,
            Err(err) => {
                self.metrics.replies.with_label_values(&["error"]).inc();
                ctx.send_error(err);
            }
        }
    }

    /// Resolve a sender string the way submissions do: HD-wallet derivations
    /// resolve to their key address, anything else passes through.
    pub async fn resolve_address(&self, from: &str) -> GatewayResult<String> {
        match self.resolve_signer(from).await? {
            Some(signer) => Ok(addr_0x(signer.address())),
            None => Ok(from.to_string()),
        }
    }

    /// Await completion of all receipt pollers, aborting any still running
    /// after the configured grace period. Aborted pollers drop their reply
    /// latch, which awaiting dispatchers surface as a 503-class reply.
    pub async fn shutdown(&self) {
        let deadline = Instant::now() + self.conf.shutdown_grace;
        let mut pollers = self.pollers.lock().await;
        loop {
            match tokio::time::timeout_at(deadline, pollers.join_next()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = pollers.len(),
                        "shutdown grace period expired; aborting receipt pollers"
                    );
                    pollers.abort_all();
                    while pollers.join_next().await.is_some() {}
                    break;
                }
            }
        }
        info!("transaction processor drained");
    }

    async fn on_deploy_contract(self: Arc<Self>, ctx: SubmissionContext, mut msg: DeployContract) {
        let mut prepared = match self.prepare_inflight(&mut msg.tx).await {
            Ok(p) => p,
            Err(err) => {
                self.metrics.replies.with_label_values(&["error"]).inc();
                return ctx.send_error(err);
            }
        };
        prepared.register_as = msg.register_as.clone();

        match Txn::deploy_contract(&msg, prepared.nonce) {
            Ok(txn) => self.send_transaction_common(ctx, prepared, txn).await,
            Err(err) => {
                self.cancel_inflight(&mut prepared, false).await;
                self.metrics.replies.with_label_values(&["error"]).inc();
                ctx.send_error(err);
            }
        }
    }

    async fn on_send_transaction(self: Arc<Self>, ctx: SubmissionContext, mut msg: SendTransaction) {
        let mut prepared = match self.prepare_inflight(&mut msg.tx).await {
            Ok(p) => p,
            Err(err) => {
                self.metrics.replies.with_label_values(&["error"]).inc();
                return ctx.send_error(err);
            }
        };

        match Txn::send_transaction(&msg, prepared.nonce) {
            Ok(txn) => self.send_transaction_common(ctx, prepared, txn).await,
            Err(err) => {
                self.cancel_inflight(&mut prepared, false).await;
                self.metrics.replies.with_label_values(&["error"]).inc();
                ctx.send_error(err);
            }
        }
    }

    async fn resolve_signer(&self, from: &str) -> GatewayResult<Option<Arc<dyn TxSigner>>> {
        let Some(request) = parse_hd_wallet_request(from) else {
            return Ok(None);
        };
        let hdwallet = self
            .hdwallet
            .as_ref()
            .ok_or(GatewayError::HdWalletMissing)?;
        hdwallet.signer_for(&request).await.map(Some)
    }

    /// Resolve signer and endpoint, then assign a nonce and register the
    /// in-flight record — all nonce work under the single table mutex.
    /// RPC calls made while holding the mutex are accepted: per-sender
    /// throughput is bounded by them anyway.
    async fn prepare_inflight(
        &self,
        common: &mut TransactionCommon,
    ) -> GatewayResult<PreparedInflight> {
        let mut signer = None;
        let mut rpc = self.rpc.clone();
        if let Some(resolved) = self.resolve_signer(&common.from).await? {
            common.from = addr_0x(resolved.address());
            signer = Some(resolved);
        } else if let Some(book) = &self.addressbook {
            rpc = book.lookup(&common.from).await?;
        }

        let from_addr = parse_address("from", &common.from)?;
        let from = addr_0x(from_addr);

        let mut privacy_group_id = None;
        if self.conf.orion_private_apis {
            if common.privacy_group_id.is_some() && !common.private_for.is_empty() {
                return Err(GatewayError::PrivacyGroupConflict);
            }
            if let Some(group) = &common.privacy_group_id {
                privacy_group_id = Some(group.clone());
            } else if !common.private_for.is_empty() {
                let group = rpc
                    .find_privacy_group(common.private_from.as_deref(), &common.private_for)
                    .await?;
                privacy_group_id = Some(group);
            }
        }

        let supplied_nonce = common.parse_nonce()?;
        let node_assign_candidate = signer.is_none() && !self.conf.always_manage_nonce;

        let mut table = self.table.lock().await;
        let id = table.next_id();
        let highest = table.highest_nonce(&from);

        let mut nonce: i64 = -1;
        let mut node_assign_nonce = false;
        let mut from_node = false;
        if let Some(supplied) = supplied_nonce {
            nonce = supplied;
        } else if self.conf.orion_private_apis && privacy_group_id.is_some() {
            let group = privacy_group_id.as_deref().unwrap_or_default();
            nonce = rpc
                .private_transaction_count(from_addr, group)
                .await?
                .as_u64() as i64;
            from_node = true;
        } else if highest >= 0 {
            nonce = highest + 1;
        } else if node_assign_candidate {
            node_assign_nonce = true;
        } else {
            nonce = rpc.transaction_count(from_addr, "pending").await?.as_u64() as i64;
            from_node = true;
        }

        let before = table.append(&from, id, nonce);
        let initial_wait_delay = table.delayer.initial_delay();
        drop(table);

        self.metrics.txns_inflight.inc();
        info!(
            id,
            nonce,
            addr = %from,
            before,
            node = from_node,
            "in-flight added"
        );

        Ok(PreparedInflight {
            id,
            from,
            from_addr,
            nonce,
            node_assign_nonce,
            privacy_group_id,
            initial_wait_delay,
            register_as: None,
            signer,
            rpc,
            gap_fill_tx_hash: None,
            gap_fill_succeeded: false,
        })
    }

    /// Remove a transaction from the in-flight table and, when a
    /// pre-submission failure left a gap below a higher in-flight nonce,
    /// dispatch a gap-fill. Removal always precedes the reply.
    async fn cancel_inflight(&self, prepared: &mut PreparedInflight, submitted: bool) {
        let outcome = {
            let mut table = self.table.lock().await;
            table.remove(&prepared.from, prepared.id, prepared.nonce, submitted)
        };
        if outcome.removed {
            self.metrics.txns_inflight.dec();
        }
        info!(
            id = prepared.id,
            nonce = prepared.nonce,
            addr = %prepared.from,
            node_assign = prepared.node_assign_nonce,
            submitted,
            before = outcome.before,
            after = outcome.after,
            highest = outcome.highest,
            "in-flight complete"
        );

        if !submitted && outcome.highest > prepared.nonce && !prepared.node_assign_nonce {
            warn!(
                failed = prepared.nonce,
                highest = outcome.highest,
                addr = %prepared.from,
                "potential nonce gap"
            );
            self.submit_gap_fill(prepared).await;
        }
    }

    async fn submit_gap_fill(&self, prepared: &mut PreparedInflight) {
        if !self.conf.attempt_gapfill {
            return;
        }
        let mut txn = Txn::nil_transaction(prepared.from_addr, prepared.nonce);
        match txn.send(prepared.rpc.as_ref(), prepared.signer.as_deref()).await {
            Ok(hash) => {
                prepared.gap_fill_tx_hash = Some(format!("{hash:#x}"));
                prepared.gap_fill_succeeded = true;
                info!(tx = %format!("{hash:#x}"), nonce = prepared.nonce, "gap-fill submitted");
            }
            Err(err) => {
                prepared.gap_fill_tx_hash = txn.hash.map(|h| format!("{h:#x}"));
                prepared.gap_fill_succeeded = false;
                warn!(%err, nonce = prepared.nonce, "gap-fill submission failed");
            }
        }
    }

    /// Nonce assignment already happened synchronously; the wire send runs
    /// under the concurrency gate. At capacity 1 the send is awaited inline
    /// so the next nonce is not assigned until this one is on the wire.
    async fn send_transaction_common(
        self: Arc<Self>,
        ctx: SubmissionContext,
        prepared: PreparedInflight,
        mut txn: Txn,
    ) {
        txn.node_assign_nonce = prepared.node_assign_nonce;
        txn.privacy_group_id = prepared.privacy_group_id.clone();

        if self.conf.send_concurrency > 1 {
            let permit = self
                .send_slots
                .clone()
                .acquire_owned()
                .await
                .expect("send semaphore never closed");
            let this = self.clone();
            let mut pollers = self.pollers.lock().await;
            pollers.spawn(async move {
                let _permit = permit;
                this.send_and_track(ctx, prepared, txn).await;
            });
        } else {
            self.send_and_track(ctx, prepared, txn).await;
        }
    }

    async fn send_and_track(
        self: Arc<Self>,
        ctx: SubmissionContext,
        mut prepared: PreparedInflight,
        mut txn: Txn,
    ) {
        match txn.send(prepared.rpc.as_ref(), prepared.signer.as_deref()).await {
            Ok(hash) => {
                debug!(tx = %format!("{hash:#x}"), nonce = prepared.nonce, "transaction sent");
                self.track_mining(ctx, prepared, txn).await;
            }
            Err(err) => {
                self.cancel_inflight(&mut prepared, false).await;
                self.metrics.replies.with_label_values(&["error"]).inc();
                let gap_hash = prepared.gap_fill_tx_hash.clone();
                let gap_ok = gap_hash.as_ref().map(|_| prepared.gap_fill_succeeded);
                ctx.send_error_with_gap_fill(err, gap_hash, gap_ok);
            }
        }
    }

    async fn track_mining(
        self: Arc<Self>,
        ctx: SubmissionContext,
        prepared: PreparedInflight,
        txn: Txn,
    ) {
        let this = self.clone();
        let mut pollers = self.pollers.lock().await;
        pollers.spawn(async move {
            this.wait_for_completion(ctx, prepared, txn).await;
        });
    }

    /// Track one submitted transaction to receipt or timeout. Connectivity
    /// errors do not shorten the wait budget; the delay between probes comes
    /// from the delay tracker, read under the table lock.
    async fn wait_for_completion(
        self: Arc<Self>,
        ctx: SubmissionContext,
        mut prepared: PreparedInflight,
        mut txn: Txn,
    ) {
        let started = Instant::now();
        sleep(prepared.initial_wait_delay).await;

        let mut retries: u32 = 0;
        let mut last_err: Option<GatewayError> = None;
        let mut mined = false;
        let mut timed_out = false;
        let mut elapsed = Duration::ZERO;
        while !mined && !timed_out {
            match txn.fetch_receipt(prepared.rpc.as_ref()).await {
                Ok(is_mined) => {
                    mined = is_mined;
                    last_err = None;
                }
                Err(err) => {
                    info!(retries, %err, nonce = prepared.nonce, "failed to get receipt");
                    last_err = Some(err);
                }
            }
            elapsed = started.elapsed();
            timed_out = elapsed > self.conf.max_tx_wait;
            if !mined && !timed_out {
                let delay = {
                    let table = self.table.lock().await;
                    table
                        .delayer
                        .retry_delay(prepared.initial_wait_delay, retries + 1)
                };
                debug!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    retries,
                    "receipt not yet available"
                );
                sleep(delay).await;
                retries += 1;
            }
        }

        if timed_out {
            self.cancel_inflight(&mut prepared, true).await;
            let outcome_label = if last_err.is_some() { "error" } else { "timeout" };
            self.metrics.replies.with_label_values(&[outcome_label]).inc();
            let err = match last_err {
                Some(e) => GatewayError::ReceiptCheck {
                    retries,
                    last_error: e.to_string(),
                },
                None => GatewayError::ReceiptTimeout,
            };
            ctx.send_error_with_tx(err, txn.hash);
            return;
        }

        {
            let mut table = self.table.lock().await;
            table.delayer.report_success(elapsed);
        }
        self.metrics.receipt_wait.observe(elapsed.as_secs_f64());

        let receipt = txn.receipt.clone().expect("mined implies receipt");
        let is_success = receipt.status.map(|s| s.as_u64() > 0).unwrap_or(false);
        info!(
            tx = ?txn.hash,
            elapsed_secs = elapsed.as_secs_f64(),
            success = is_success,
            "receipt obtained"
        );

        let reply = self.build_receipt_reply(&ctx.req_id, &prepared, &receipt, is_success);
        self.cancel_inflight(&mut prepared, true).await;
        let label = if is_success { "success" } else { "failure" };
        self.metrics.replies.with_label_values(&[label]).inc();
        ctx.send_receipt(reply);
    }

    fn build_receipt_reply(
        &self,
        req_id: &str,
        prepared: &PreparedInflight,
        receipt: &ethers::types::TransactionReceipt,
        is_success: bool,
    ) -> TransactionReceipt {
        let hex = self.conf.hex_values_in_receipt;
        let mut reply = TransactionReceipt {
            headers: Some(ReplyHeaders {
                msg_type: if is_success {
                    MessageType::TransactionSuccess
                } else {
                    MessageType::TransactionFailure
                },
                req_id: req_id.to_string(),
            }),
            ..Default::default()
        };
        reply.block_hash = receipt.block_hash;
        reply.block_number = receipt.block_number.map(|n| n.as_u64().to_string());
        reply.contract_address = receipt.contract_address;
        reply.cumulative_gas_used = Some(receipt.cumulative_gas_used.to_string());
        reply.from = Some(receipt.from);
        reply.gas_used = receipt.gas_used.map(|g| g.to_string());
        reply.nonce = Some(prepared.nonce.to_string());
        reply.status = receipt.status.map(|s| s.as_u64().to_string());
        reply.to = receipt.to;
        reply.transaction_hash = Some(receipt.transaction_hash);
        reply.transaction_index = Some(receipt.transaction_index.as_u64().to_string());
        reply.register_as = prepared.register_as.clone();
        if hex {
            reply.block_number_hex = receipt.block_number;
            reply.cumulative_gas_used_hex = Some(receipt.cumulative_gas_used);
            reply.gas_used_hex = receipt.gas_used;
            if prepared.nonce >= 0 {
                reply.nonce_hex = Some(U64::from(prepared.nonce as u64));
            }
            reply.status_hex = receipt.status;
            reply.transaction_index_hex = Some(receipt.transaction_index);
        }
        reply
    }
}

#[cfg(test)]
mod tests;
