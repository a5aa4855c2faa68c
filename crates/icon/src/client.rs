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

use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use btp_relayer_utils::{Error, Result};

use crate::types::{
    BMCStatusDto, CallParam, HexBytes, TransactionParam, TransactionResult,
};

/// The destination node surface the sender needs. A seam so the sender state
/// machine is testable without a node.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Submits a signed transaction, returning its hash.
    async fn send_transaction(&self, p: &TransactionParam) -> Result<HexBytes>;

    /// Fetches the result of a transaction by hash.
    async fn get_transaction_result(
        &self,
        hash: &HexBytes,
    ) -> Result<TransactionResult>;

    /// Read-only query against the BMC contract.
    async fn get_bmc_status(&self, p: &CallParam) -> Result<BMCStatusDto>;
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// A JSON-RPC 2.0 client over HTTP.
///
/// Error objects returned by the node become [`Error::JsonRpc`] so callers
/// can classify them by code.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    endpoint: url::Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Creates a client against the given endpoint.
    pub fn new(endpoint: url::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::trace!(method, id, "jsonrpc request");
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await?;
        // error envelopes ride on non-2xx responses too, so parse before
        // checking the status
        let envelope: RpcResponse = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(Error::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = envelope
            .result
            .ok_or(Error::Generic("jsonrpc response carries no result"))?;
        Ok(serde_json::from_value(result)?)
    }
}

#[async_trait::async_trait]
impl ChainClient for JsonRpcClient {
    async fn send_transaction(&self, p: &TransactionParam) -> Result<HexBytes> {
        self.request("icx_sendTransaction", p).await
    }

    async fn get_transaction_result(
        &self,
        hash: &HexBytes,
    ) -> Result<TransactionResult> {
        let params = serde_json::json!({ "txHash": hash });
        self.request("icx_getTransactionResult", &params).await
    }

    async fn get_bmc_status(&self, p: &CallParam) -> Result<BMCStatusDto> {
        self.request("icx_call", p).await
    }
}
