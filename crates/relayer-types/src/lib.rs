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
//! # BTP Relayer Types
//!
//! Protocol-level types shared between the link coordinator and the
//! chain-specific senders: BTP addresses, the on-chain link status, relay
//! results with their verifier error codes, and the `Sender` seam.

mod btp_address;
mod error_code;
mod link_status;
mod private_key;
mod relay;

pub use btp_address::BtpAddress;
pub use error_code::ErrorCode;
pub use link_status::{BMCLinkStatus, VerifierStatus};
pub use private_key::PrivateKey;
pub use relay::{RelayResult, Sender};
