// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use tokio::sync::mpsc;

use btp_relayer_config::BTPRelayerConfig;
use btp_relayer_types::{
    BMCLinkStatus, BtpAddress, ErrorCode, RelayResult, Sender, VerifierStatus,
};
use btp_relayer_utils::{probe, Error, Result};

use crate::client::{ChainClient, JsonRpcClient};
use crate::types::{
    Address, BMCStatusDto, CallData, CallParam, FragmentMethodParams, HexBytes,
    HexInt, RelayMethodParams, StatusParams, TransactionParam,
    BMC_FRAGMENT_METHOD, BMC_GET_STATUS_METHOD, BMC_RELAY_METHOD,
    DUPLICATE_TRANSACTION_ERROR, EXPIRED_TRANSACTION_ERROR,
    JSONRPC_API_VERSION, JSONRPC_ERROR_CODE_EXECUTING,
    JSONRPC_ERROR_CODE_NOT_FOUND, JSONRPC_ERROR_CODE_PENDING,
    JSONRPC_ERROR_CODE_SYSTEM, JSONRPC_ERROR_CODE_TX_POOL_OVERFLOW,
    RESULT_STATUS_FAILURE_CODE_END, RESULT_STATUS_FAILURE_CODE_REVERT,
    RESULT_STATUS_SUCCESS,
};
use crate::wallet::{transaction_hash, KeyWallet, Wallet};

/// Raw transaction data budget: 512 KiB.
pub const TX_MAX_DATA_SIZE: i64 = 524288;
/// Base64 expansion ~0.36 plus envelope overhead.
pub const TX_OVERHEAD_SCALE: f64 = 0.37;
/// Cadence of transaction result polling.
pub const DEFAULT_GET_RELAY_RESULT_INTERVAL: Duration = Duration::from_secs(1);
/// Wait before re-sending into a full transaction pool.
pub const DEFAULT_RELAY_RESEND_INTERVAL: Duration = Duration::from_secs(1);
/// Invoke-call step maximum, used when the config sets no limit.
pub const DEFAULT_STEP_LIMIT: i64 = 0x9502f900;
/// In-flight transaction cap; beyond it, `relay` refuses admission.
pub const MAX_QUEUE_SIZE: usize = 100;

/// Payload bytes that fit one transaction once encoding overhead is paid.
pub fn tx_size_limit() -> i64 {
    (TX_MAX_DATA_SIZE as f64 / (1.0 + TX_OVERHEAD_SCALE)).ceil() as i64
}

struct RelayTx {
    id: i64,
    #[allow(dead_code)]
    tx_hash: Vec<u8>,
}

/// Bounded FIFO of in-flight relay transactions.
pub(crate) struct Queue {
    values: parking_lot::Mutex<Vec<RelayTx>>,
}

impl Queue {
    fn new() -> Self {
        Self {
            values: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn enqueue(&self, id: i64, tx_hash: Vec<u8>) -> Result<()> {
        let mut values = self.values.lock();
        if values.len() >= MAX_QUEUE_SIZE {
            return Err(Error::InvalidState("pending queue full".into()));
        }
        values.push(RelayTx { id, tx_hash });
        Ok(())
    }

    /// Removes the record with the matching id; no-op when absent.
    fn dequeue(&self, id: i64) {
        let mut values = self.values.lock();
        if let Some(i) = values.iter().position(|tx| tx.id == id) {
            values.remove(i);
        }
    }

    fn len(&self) -> usize {
        self.values.lock().len()
    }

    fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}

/// Destination sender for ICON-style chains.
///
/// Fragments relay messages over the transaction size budget, retries
/// pool-overflow and expiry conditions, and polls every submitted message's
/// result onto the stream handed out by [`Sender::start`].
pub struct IconSender<C, W> {
    src: BtpAddress,
    dst: BtpAddress,
    nid: i64,
    step_limit: i64,
    client: Arc<C>,
    wallet: Arc<W>,
    queue: Arc<Queue>,
    results_tx: Arc<parking_lot::Mutex<Option<mpsc::Sender<RelayResult>>>>,
    results_rx: Arc<parking_lot::Mutex<Option<mpsc::Receiver<RelayResult>>>>,
}

impl<C, W> Clone for IconSender<C, W> {
    fn clone(&self) -> Self {
        Self {
            src: self.src.clone(),
            dst: self.dst.clone(),
            nid: self.nid,
            step_limit: self.step_limit,
            client: Arc::clone(&self.client),
            wallet: Arc::clone(&self.wallet),
            queue: Arc::clone(&self.queue),
            results_tx: Arc::clone(&self.results_tx),
            results_rx: Arc::clone(&self.results_rx),
        }
    }
}

impl<C, W> IconSender<C, W>
where
    C: ChainClient,
    W: Wallet,
{
    /// Creates a sender over the given client and wallet. A non-positive
    /// `step_limit` falls back to [`DEFAULT_STEP_LIMIT`].
    pub fn new(
        src: BtpAddress,
        dst: BtpAddress,
        client: Arc<C>,
        wallet: Arc<W>,
        step_limit: i64,
    ) -> Result<Self> {
        let nid = HexInt::from_hex(dst.network_id())?.0;
        let step_limit = if step_limit <= 0 {
            DEFAULT_STEP_LIMIT
        } else {
            step_limit
        };
        let (tx, rx) = mpsc::channel(1);
        Ok(Self {
            src,
            dst,
            nid,
            step_limit,
            client,
            wallet,
            queue: Arc::new(Queue::new()),
            results_tx: Arc::new(parking_lot::Mutex::new(Some(tx))),
            results_rx: Arc::new(parking_lot::Mutex::new(Some(rx))),
        })
    }

    fn stopped(&self) -> bool {
        self.results_tx.lock().is_none()
    }

    fn new_transaction_param(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> TransactionParam {
        TransactionParam {
            version: HexInt(JSONRPC_API_VERSION),
            from: self.wallet.address(),
            to: Address(self.dst.account().to_string()),
            nid: HexInt(self.nid),
            step_limit: HexInt(self.step_limit),
            timestamp: None,
            data_type: "call".to_string(),
            data: CallData {
                method: method.to_string(),
                params,
            },
            signature: None,
        }
    }

    /// Splits the message into `ceil(len / tx_size_limit)` transactions and
    /// submits them in order. Only the last transaction's hash is returned;
    /// a fragment failure aborts the remainder.
    async fn send_relay_transactions(&self, message: &[u8]) -> Result<Vec<u8>> {
        let limit = tx_size_limit() as usize;
        let count = usize::max(1, (message.len() + limit - 1) / limit);
        if count == 1 {
            let params = serde_json::to_value(RelayMethodParams {
                prev: self.src.to_string(),
                messages: URL_SAFE.encode(message),
            })?;
            let mut p = self.new_transaction_param(BMC_RELAY_METHOD, params);
            return self.send_transaction(&mut p).await;
        }
        let mut tx_hash = Vec::new();
        for (i, chunk) in message.chunks(limit).enumerate() {
            let index = if i == 0 {
                -((count - 1) as i64)
            } else {
                (count - 1 - i) as i64
            };
            tx_hash = self.send_fragment(chunk, index).await?;
        }
        Ok(tx_hash)
    }

    async fn send_fragment(&self, chunk: &[u8], index: i64) -> Result<Vec<u8>> {
        let params = serde_json::to_value(FragmentMethodParams {
            prev: self.src.to_string(),
            messages: URL_SAFE.encode(chunk),
            index: HexInt(index),
        })?;
        let mut p = self.new_transaction_param(BMC_FRAGMENT_METHOD, params);
        self.send_transaction(&mut p).await
    }

    /// Sign-and-send ladder for one transaction. Pool overflow re-sends the
    /// same signed payload after a pause; an expired timestamp re-signs; a
    /// duplicate means an earlier attempt landed, so the locally computed
    /// hash stands in for the node's answer.
    async fn send_transaction(&self, p: &mut TransactionParam) -> Result<Vec<u8>> {
        'sign: loop {
            p.timestamp = Some(HexInt(timestamp_micros()));
            p.signature = None;
            let tx_hash = transaction_hash(p)?;
            let signature = self.wallet.sign(&tx_hash)?;
            p.signature = Some(STANDARD.encode(signature));
            loop {
                let err = match self.client.send_transaction(p).await {
                    Ok(hash) => return Ok(hash.0),
                    Err(e) => e,
                };
                match err {
                    Error::JsonRpc {
                        code: JSONRPC_ERROR_CODE_TX_POOL_OVERFLOW,
                        ..
                    } => {
                        tracing::debug!("tx pool overflow, will re-send");
                        tokio::time::sleep(DEFAULT_RELAY_RESEND_INTERVAL).await;
                    }
                    Error::JsonRpc {
                        code: JSONRPC_ERROR_CODE_SYSTEM,
                        message,
                    } => match system_error_code(&message) {
                        Some(DUPLICATE_TRANSACTION_ERROR) => {
                            tracing::debug!(
                                tx_hash = %HexBytes(tx_hash.clone()),
                                "duplicate transaction"
                            );
                            return Ok(tx_hash);
                        }
                        Some(EXPIRED_TRANSACTION_ERROR) => continue 'sign,
                        _ => {
                            return Err(Error::JsonRpc {
                                code: JSONRPC_ERROR_CODE_SYSTEM,
                                message,
                            })
                        }
                    },
                    e => return Err(e),
                }
            }
        }
    }

    /// Polls the transaction result and interprets it into an outcome code.
    async fn transaction_outcome(&self, tx_hash: &[u8]) -> Result<ErrorCode> {
        let hash = HexBytes(tx_hash.to_vec());
        let operation = || async {
            if self.stopped() {
                return Err(backoff::Error::permanent(Error::InvalidState(
                    "sender stopped".into(),
                )));
            }
            match self.client.get_transaction_result(&hash).await {
                Ok(result) => Ok(result),
                Err(
                    e @ Error::JsonRpc {
                        code:
                            JSONRPC_ERROR_CODE_PENDING
                            | JSONRPC_ERROR_CODE_EXECUTING
                            | JSONRPC_ERROR_CODE_NOT_FOUND,
                        ..
                    },
                ) => Err(backoff::Error::transient(e)),
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        };
        let backoff =
            backoff::backoff::Constant::new(DEFAULT_GET_RELAY_RESULT_INTERVAL);
        let result = backoff::future::retry(backoff, operation).await?;

        if result.status.0 == RESULT_STATUS_SUCCESS {
            return Ok(ErrorCode::Success);
        }
        let fc = result.failure.map(|f| f.code.0).unwrap_or_default();
        if (RESULT_STATUS_FAILURE_CODE_REVERT..=RESULT_STATUS_FAILURE_CODE_END)
            .contains(&fc)
        {
            Ok(ErrorCode::from_code(
                (fc - RESULT_STATUS_FAILURE_CODE_REVERT) as i32,
            ))
        } else {
            Ok(ErrorCode::Other(fc as i32))
        }
    }

    /// One task per submitted message: poll, free the queue slot, then
    /// report. The slot is freed before the result is emitted so the link
    /// observes the drained queue together with the outcome.
    async fn report_result(self, id: i64, tx_hash: Vec<u8>) {
        let outcome = self.transaction_outcome(&tx_hash).await;
        self.queue.dequeue(id);
        let err = match outcome {
            Ok(code) => code,
            Err(Error::InvalidState(_)) => return,
            Err(Error::JsonRpc { code, message }) => {
                tracing::error!(id, code, %message, "relay result query failed");
                ErrorCode::Other(code as i32)
            }
            Err(e) => {
                tracing::error!(id, error = %e, "relay result query failed");
                return;
            }
        };
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::RelayResult,
            id,
            err = %err,
            finalized = true,
        );
        let tx = self.results_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx
                .send(RelayResult {
                    id,
                    err,
                    finalized: true,
                })
                .await;
        }
    }
}

impl IconSender<JsonRpcClient, KeyWallet> {
    /// Builds the production sender straight from the relayer config.
    pub fn from_config(cfg: &BTPRelayerConfig) -> Result<Self> {
        let client = Arc::new(JsonRpcClient::new(cfg.dst.endpoint.clone()));
        let wallet = Arc::new(KeyWallet::from_private_key(&cfg.dst.private_key)?);
        Self::new(
            cfg.src.address.clone(),
            cfg.dst.address.clone(),
            client,
            wallet,
            cfg.dst.step_limit,
        )
    }
}

#[async_trait::async_trait]
impl<C, W> Sender for IconSender<C, W>
where
    C: ChainClient,
    W: Wallet,
{
    async fn start(&self) -> Result<mpsc::Receiver<RelayResult>> {
        self.results_rx
            .lock()
            .take()
            .ok_or_else(|| Error::InvalidState("sender already started".into()))
    }

    fn stop(&self) {
        self.results_tx.lock().take();
    }

    async fn get_status(&self) -> Result<BMCLinkStatus> {
        let p = CallParam {
            from: self.wallet.address(),
            to: Address(self.dst.account().to_string()),
            data_type: "call".to_string(),
            data: CallData {
                method: BMC_GET_STATUS_METHOD.to_string(),
                params: serde_json::to_value(StatusParams {
                    target: self.src.to_string(),
                })?,
            },
        };
        let status: BMCStatusDto = self.client.get_bmc_status(&p).await?;
        Ok(BMCLinkStatus {
            tx_seq: status.tx_seq.0,
            rx_seq: status.rx_seq.0,
            verifier: VerifierStatus {
                height: status.verifier.height.0,
                extra: status.verifier.extra.0,
            },
        })
    }

    fn tx_size_limit(&self) -> i64 {
        tx_size_limit()
    }

    fn margin_for_limit(&self) -> i64 {
        0
    }

    async fn relay(&self, id: i64, message: &[u8]) -> Result<i64> {
        if self.queue.len() >= MAX_QUEUE_SIZE {
            return Err(Error::InvalidState("pending queue full".into()));
        }
        tracing::debug!(src = %self.src, id, size = message.len(), "relay");
        tracing::trace!(id, message = %hex::encode(message), "relay payload");

        let tx_hash = self.send_relay_transactions(message).await?;
        self.queue.enqueue(id, tx_hash.clone())?;
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::TxQueue,
            id,
            tx_hash = %HexBytes(tx_hash.clone()),
            in_flight = self.queue.len(),
        );

        let this = self.clone();
        tokio::spawn(async move { this.report_result(id, tx_hash).await });
        Ok(id)
    }
}

fn timestamp_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Sub-code of a system error, parsed out of messages like
/// `E2000:duplicate transaction`.
fn system_error_code(message: &str) -> Option<i64> {
    message.get(1..5).and_then(|s| s.parse().ok())
}
