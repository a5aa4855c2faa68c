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

/// Verifier-side view carried inside a [`BMCLinkStatus`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifierStatus {
    /// The last source height the verifier has accepted.
    pub height: i64,
    /// Opaque verifier state, e.g. merkle accumulator internals.
    pub extra: Vec<u8>,
}

/// The authoritative link status as reported by the destination chain's BMC
/// contract.
///
/// `rx_seq` is monotonically non-decreasing over the life of a link. Relay
/// messages snapshot the status they expect the destination to reach once
/// accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BMCLinkStatus {
    /// Messages sent by the destination over this link.
    pub tx_seq: i64,
    /// Messages the destination has received over this link.
    pub rx_seq: i64,
    /// The verifier's view of the source chain.
    pub verifier: VerifierStatus,
}
