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

//! # ICON Sender
//!
//! The destination-chain half of the BTP relayer for ICON-style chains:
//! a JSON-RPC client, transaction signing, and the [`IconSender`] state
//! machine that fragments relay messages into transactions, retries
//! transient submission failures, and polls transaction results into the
//! link's result stream.

/// JSON-RPC transport and the `ChainClient` seam.
pub mod client;
/// The sender state machine and its bounded in-flight queue.
pub mod sender;
/// ICON JSON-RPC wire types and protocol constants.
pub mod types;
/// Transaction signing and `hx` address derivation.
pub mod wallet;

pub use client::{ChainClient, JsonRpcClient};
pub use sender::IconSender;
pub use wallet::{KeyWallet, Wallet};
