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

use tokio::sync::mpsc;

use crate::{BMCLinkStatus, ErrorCode};

/// The observed outcome of one relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayResult {
    /// The relay message id the outcome refers to.
    pub id: i64,
    /// The outcome code, [`ErrorCode::Success`] when accepted.
    pub err: ErrorCode,
    /// Whether the destination can no longer change its mind about this
    /// outcome.
    pub finalized: bool,
}

/// A destination-chain sender: turns relay messages into transactions and
/// reports their finalized outcomes on a result stream.
///
/// Implementations own their transaction queue; when it is full, `relay`
/// refuses admission with an invalid-state error and the link is expected to
/// pause until results drain the queue.
#[async_trait::async_trait]
pub trait Sender: Send + Sync + 'static {
    /// Returns the stream of relay results. May be called once.
    async fn start(&self) -> btp_relayer_utils::Result<mpsc::Receiver<RelayResult>>;

    /// Closes the result stream; in-flight polls stop on their next
    /// iteration.
    fn stop(&self);

    /// Queries the destination's BMC contract for the current link status.
    async fn get_status(&self) -> btp_relayer_utils::Result<BMCLinkStatus>;

    /// The payload byte budget of a single transaction, before the wire
    /// encoding's expansion.
    fn tx_size_limit(&self) -> i64;

    /// Margin the link subtracts from [`Self::tx_size_limit`] when sizing
    /// relay messages.
    fn margin_for_limit(&self) -> i64;

    /// Submits one logical relay message, fragmenting as needed. Returns the
    /// message id, or an invalid-state error when the queue is full.
    async fn relay(&self, id: i64, message: &[u8]) -> btp_relayer_utils::Result<i64>;
}
