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

#![warn(missing_docs)]

//! # BTP Relayer Configuration Module
//!
//! A module for configuring a directed relay link:
//! * `src`: the observed source chain (BTP address + endpoint).
//! * `dst`: the destination chain the relayer submits to (BTP address,
//!   endpoint, wallet key, transaction options).

/// Utils for loading configuration from files and the environment.
pub mod utils;

use serde::Deserialize;

use btp_relayer_types::{BtpAddress, PrivateKey};

/// The default `stepLimit` used for destination transactions when the config
/// does not set one. This is the invoke-call maximum.
const fn default_step_limit() -> i64 {
    0x9502f900
}

/// Relay on the latest (not yet finalized) result by default? Off.
const fn latest_result_default() -> bool {
    false
}

/// BTPRelayerConfig is the configuration for one directed relay link.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BTPRelayerConfig {
    /// The source chain the link observes.
    pub src: SourceConfig,
    /// The destination chain the link submits relay messages to.
    pub dst: DestinationConfig,
}

/// Source-chain section: where receive statuses and proofs come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    /// The BTP address of the source BMC.
    pub address: BtpAddress,
    /// The source node endpoint.
    pub endpoint: url::Url,
}

/// Destination-chain section: where relay transactions are submitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DestinationConfig {
    /// The BTP address of the destination BMC.
    pub address: BtpAddress,
    /// The destination node JSON-RPC endpoint.
    pub endpoint: url::Url,
    /// The `stepLimit` for submitted transactions.
    #[serde(default = "default_step_limit")]
    pub step_limit: i64,
    /// Act on relay results as soon as they are observed, instead of waiting
    /// for finalization.
    #[serde(default = "latest_result_default")]
    pub latest_result: bool,
    /// The relayer wallet's signing key.
    pub private_key: PrivateKey,
}
