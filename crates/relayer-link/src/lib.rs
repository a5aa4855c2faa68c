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

//! # BTP Relay Link
//!
//! The link coordinator for one directed source→destination relay channel.
//! It interleaves the receiver's event stream with the sender's result
//! stream under a two-state relay FSM, assembles relay messages out of block
//! updates and proofs within the destination's transaction size budget, and
//! recovers from verifier-level rejections.

mod link;
mod receiver;

#[cfg(test)]
mod tests;

pub use link::{Link, RelayState};
pub use receiver::{
    BlockProof, BlockUpdate, MessageProof, ReceiveStatus, Receiver, RelayItem,
    RelayMessageItem,
};
