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

use btp_relayer_types::BMCLinkStatus;
use btp_relayer_utils::Result;

/// A new receive status observed on the source chain.
///
/// Receivers yield these in height-ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStatus {
    /// The finalized source height.
    pub height: i64,
    /// The cumulative message sequence visible at that height.
    pub seq: i64,
}

/// Common surface of everything that can go into a relay message.
pub trait RelayMessageItem: Send + Sync {
    /// Serialized size of the item in bytes.
    fn len(&self) -> i64;

    /// Whether the item carries no payload.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advances the given link status by this item's effect, i.e. the status
    /// the destination will report once it accepts the item.
    fn update_bmc_link_status(&self, bls: &mut BMCLinkStatus) -> Result<()>;
}

/// A block update: new source headers advancing the verifier height.
pub trait BlockUpdate: RelayMessageItem {
    /// The height this update can prove messages at, or `-1` when it cannot
    /// serve as a witness and a separate block proof is required.
    fn proof_height(&self) -> i64;
}

/// A block proof: a witness for one specific, already verified height.
pub trait BlockProof: RelayMessageItem {
    /// The height the proof witnesses.
    fn proof_height(&self) -> i64;
}

/// A message proof: cross-chain messages with inclusion evidence.
pub trait MessageProof: RelayMessageItem {
    /// The last message sequence number the proof carries.
    fn last_seq(&self) -> i64;
}

/// One relay message item, tagged by kind.
pub enum RelayItem {
    /// New source headers.
    BlockUpdate(Box<dyn BlockUpdate>),
    /// A witness for a specific height.
    BlockProof(Box<dyn BlockProof>),
    /// Messages plus inclusion evidence.
    MessageProof(Box<dyn MessageProof>),
}

impl RelayItem {
    /// Serialized size of the item in bytes.
    pub fn len(&self) -> i64 {
        match self {
            Self::BlockUpdate(i) => i.len(),
            Self::BlockProof(i) => i.len(),
            Self::MessageProof(i) => i.len(),
        }
    }

    /// Whether the item carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advances the given link status by this item's effect.
    pub fn update_bmc_link_status(&self, bls: &mut BMCLinkStatus) -> Result<()> {
        match self {
            Self::BlockUpdate(i) => i.update_bmc_link_status(bls),
            Self::BlockProof(i) => i.update_bmc_link_status(bls),
            Self::MessageProof(i) => i.update_bmc_link_status(bls),
        }
    }
}

impl std::fmt::Debug for RelayItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::BlockUpdate(_) => "BlockUpdate",
            Self::BlockProof(_) => "BlockProof",
            Self::MessageProof(_) => "MessageProof",
        };
        write!(f, "{}(len={})", kind, self.len())
    }
}

/// The chain-specific receiver consumed by the link: scans the source chain
/// and produces proof material on demand, bounded by a byte budget.
#[async_trait::async_trait]
pub trait Receiver: Send + Sync + 'static {
    /// Starts scanning from the given link status and returns the stream of
    /// receive statuses (or a scan error, which is fatal for the link).
    async fn start(
        &self,
        initial: BMCLinkStatus,
    ) -> Result<mpsc::Receiver<Result<ReceiveStatus>>>;

    /// Stops the receiver and its event stream.
    fn stop(&self);

    /// The source height at which the message with the given sequence number
    /// became visible, or `0` when unknown.
    fn get_height_for_seq(&self, seq: i64) -> i64;

    /// Builds block updates extending `bls` within `budget` bytes, ascending
    /// by height. May return an empty batch when nothing is ready yet; the
    /// caller polls again.
    async fn build_block_update(
        &self,
        bls: &BMCLinkStatus,
        budget: i64,
    ) -> Result<Vec<Box<dyn BlockUpdate>>>;

    /// Builds a block proof witnessing `height` against `bls`.
    async fn build_block_proof(
        &self,
        bls: &BMCLinkStatus,
        height: i64,
    ) -> Result<Option<Box<dyn BlockProof>>>;

    /// Builds a message proof extending `bls.rx_seq` within `budget` bytes.
    async fn build_message_proof(
        &self,
        bls: &BMCLinkStatus,
        budget: i64,
    ) -> Result<Option<Box<dyn MessageProof>>>;

    /// Serializes one group of items into relay message bytes.
    async fn build_relay_message(&self, items: &[RelayItem]) -> Result<Vec<u8>>;

    /// Registers the finalized-status channel. Every status received there
    /// is a promise that the destination accepted everything up to it, so
    /// older proof material can be discarded.
    fn finalized_status(&self, statuses: mpsc::Receiver<BMCLinkStatus>);
}
