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

use serde::{Deserialize, Serialize};

use btp_relayer_utils::{Error, Result};

/// The JSON-RPC API version carried in every transaction.
pub const JSONRPC_API_VERSION: i64 = 3;

/// BMC method receiving a whole relay message.
pub const BMC_RELAY_METHOD: &str = "handleRelayMessage";
/// BMC method receiving one fragment of a relay message.
pub const BMC_FRAGMENT_METHOD: &str = "handleFragment";
/// BMC query returning the link status.
pub const BMC_GET_STATUS_METHOD: &str = "getStatus";

/// The node rejected the call with a system error; the sub-code is embedded
/// in the message text.
pub const JSONRPC_ERROR_CODE_SYSTEM: i64 = -31000;
/// The transaction pool is full; re-send the same signed payload later.
pub const JSONRPC_ERROR_CODE_TX_POOL_OVERFLOW: i64 = -31001;
/// The transaction is not known (yet).
pub const JSONRPC_ERROR_CODE_NOT_FOUND: i64 = -31002;
/// The transaction is waiting in the pool.
pub const JSONRPC_ERROR_CODE_PENDING: i64 = -31006;
/// The transaction is being executed.
pub const JSONRPC_ERROR_CODE_EXECUTING: i64 = -31007;

/// System error sub-code: the transaction is already in the pool or chain.
pub const DUPLICATE_TRANSACTION_ERROR: i64 = 2000;
/// System error sub-code: the transaction timestamp is out of range.
pub const EXPIRED_TRANSACTION_ERROR: i64 = 2002;

/// Transaction result status for success.
pub const RESULT_STATUS_SUCCESS: i64 = 1;
/// First failure code of the contract revert window.
pub const RESULT_STATUS_FAILURE_CODE_REVERT: i64 = 32;
/// Last failure code of the contract revert window.
pub const RESULT_STATUS_FAILURE_CODE_END: i64 = 99;

/// An integer on the wire: `0x`-prefixed lowercase hex, sign in front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HexInt(pub i64);

impl HexInt {
    /// Formats the value the way the node expects it.
    pub fn to_hex(self) -> String {
        if self.0 < 0 {
            format!("-0x{:x}", self.0.unsigned_abs())
        } else {
            format!("0x{:x}", self.0)
        }
    }

    /// Parses a `0x`-prefixed hex integer, optionally signed.
    pub fn from_hex(s: &str) -> Result<Self> {
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let digits = rest.strip_prefix("0x").ok_or(Error::Generic(
            "hex int must carry a 0x prefix",
        ))?;
        let value = i64::from_str_radix(digits, 16)
            .map_err(|_| Error::Generic("malformed hex int"))?;
        Ok(Self(if negative { -value } else { value }))
    }
}

impl std::fmt::Display for HexInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for HexInt {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HexInt {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Bytes on the wire: `0x`-prefixed lowercase hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    /// Formats the bytes the way the node expects them.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }

    /// Parses `0x`-prefixed hex bytes.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").ok_or(Error::Generic(
            "hex bytes must carry a 0x prefix",
        ))?;
        let bytes = hex::decode(digits)
            .map_err(|_| Error::Generic("malformed hex bytes"))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for HexBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for HexBytes {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A chain account address, string-typed on the wire (`hx…` / `cx…`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address(pub String);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `data` section of a contract call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallData {
    /// The contract method.
    pub method: String,
    /// Method parameters, shaped per method.
    pub params: serde_json::Value,
}

/// A full `icx_sendTransaction` parameter set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParam {
    /// JSON-RPC API version.
    pub version: HexInt,
    /// Sender wallet address.
    pub from: Address,
    /// Target contract address.
    pub to: Address,
    /// Destination network id.
    pub nid: HexInt,
    /// Execution step limit.
    pub step_limit: HexInt,
    /// Microsecond timestamp, set at signing time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<HexInt>,
    /// Always `call` for BMC invocations.
    pub data_type: String,
    /// The contract call.
    pub data: CallData,
    /// Base64 signature, set at signing time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// An `icx_call` (read-only query) parameter set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParam {
    /// Caller address.
    pub from: Address,
    /// Target contract address.
    pub to: Address,
    /// Always `call`.
    pub data_type: String,
    /// The contract call.
    pub data: CallData,
}

/// `handleRelayMessage` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMethodParams {
    /// The source BTP address.
    pub prev: String,
    /// Base64url-encoded relay message bytes.
    pub messages: String,
}

/// `handleFragment` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentMethodParams {
    /// The source BTP address.
    pub prev: String,
    /// Base64url-encoded fragment bytes.
    pub messages: String,
    /// Fragment index: `-(N-1)` first, counting down to `0` last.
    pub index: HexInt,
}

/// `getStatus` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusParams {
    /// The source BTP address the status is asked for.
    pub target: String,
}

/// The BMC's verifier status section.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierStatusDto {
    /// Last verified source height.
    pub height: HexInt,
    /// Opaque verifier state.
    pub extra: HexBytes,
}

/// The BMC `getStatus` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BMCStatusDto {
    /// Messages sent by the destination over the link.
    pub tx_seq: HexInt,
    /// Messages received by the destination over the link.
    pub rx_seq: HexInt,
    /// Verifier view of the source chain.
    pub verifier: VerifierStatusDto,
}

/// The failure section of a transaction result.
#[derive(Debug, Clone, Deserialize)]
pub struct TxFailure {
    /// The failure code; the revert window starts at
    /// [`RESULT_STATUS_FAILURE_CODE_REVERT`].
    pub code: HexInt,
    /// Human-readable failure message.
    pub message: String,
}

/// An `icx_getTransactionResult` response, reduced to what the sender needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    /// `0x1` on success.
    pub status: HexInt,
    /// Present when `status` is a failure.
    #[serde(default)]
    pub failure: Option<TxFailure>,
}
