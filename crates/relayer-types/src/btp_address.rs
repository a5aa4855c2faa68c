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

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use btp_relayer_utils::Error;

/// A BTP address of the form `btp://<network-id>.<blockchain>/<account>`,
/// identifying one end of a relay link.
///
/// Example: `btp://0x1.icon/cx23a91ee3dd290486a9113a6a42429825d813de53`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BtpAddress(String);

const BTP_SCHEME: &str = "btp://";

impl BtpAddress {
    /// The full network part, e.g. `0x1.icon`.
    pub fn network(&self) -> &str {
        let rest = &self.0[BTP_SCHEME.len()..];
        rest.split('/').next().unwrap_or_default()
    }

    /// The chain-specific network id, e.g. `0x1`.
    pub fn network_id(&self) -> &str {
        self.network().split('.').next().unwrap_or_default()
    }

    /// The blockchain name, e.g. `icon`.
    pub fn blockchain(&self) -> &str {
        self.network().split('.').nth(1).unwrap_or_default()
    }

    /// The account (contract or wallet address) part.
    pub fn account(&self) -> &str {
        let rest = &self.0[BTP_SCHEME.len()..];
        rest.split_once('/').map(|(_, a)| a).unwrap_or_default()
    }
}

impl FromStr for BtpAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(BTP_SCHEME)
            .ok_or_else(|| Error::InvalidBtpAddress(s.to_string()))?;
        let (network, account) = rest
            .split_once('/')
            .ok_or_else(|| Error::InvalidBtpAddress(s.to_string()))?;
        let (network_id, blockchain) = network
            .split_once('.')
            .ok_or_else(|| Error::InvalidBtpAddress(s.to_string()))?;
        if network_id.is_empty() || blockchain.is_empty() || account.is_empty() {
            return Err(Error::InvalidBtpAddress(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl std::fmt::Display for BtpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for BtpAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl<'de> Deserialize<'de> for BtpAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_parts() {
        let addr: BtpAddress =
            "btp://0x1.icon/cx23a91ee3dd290486a9113a6a42429825d813de53"
                .parse()
                .unwrap();
        assert_eq!(addr.network(), "0x1.icon");
        assert_eq!(addr.network_id(), "0x1");
        assert_eq!(addr.blockchain(), "icon");
        assert_eq!(
            addr.account(),
            "cx23a91ee3dd290486a9113a6a42429825d813de53"
        );
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in [
            "0x1.icon/cxabc",
            "btp://0x1.icon",
            "btp://icon/cxabc",
            "btp://0x1.icon/",
            "btp://.icon/cxabc",
        ] {
            assert!(bad.parse::<BtpAddress>().is_err(), "accepted {bad}");
        }
    }

    #[test]
    fn round_trips_through_serde() {
        let addr: BtpAddress = "btp://0x2.bsc/0x1234".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"btp://0x2.bsc/0x1234\"");
        let back: BtpAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
