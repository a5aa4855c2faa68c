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

use btp_relayer_utils::Error;

/// A 32-byte secp256k1 secret, deserialized from a `0x`-prefixed hex string
/// or from an env var reference (`$VAR`) containing one.
#[derive(Clone)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    /// The raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses a `0x`-prefixed 64-hex-digit string.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| Error::InvalidPrivateKey("missing 0x prefix".into()))?;
        let bytes = hex::decode(stripped)
            .map_err(|e| Error::InvalidPrivateKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidPrivateKey("expected exactly 32 bytes".into())
        })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        write!(f, "PrivateKey(..)")
    }
}

impl<'de> serde::Deserialize<'de> for PrivateKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PrivateKeyVisitor;
        impl serde::de::Visitor<'_> for PrivateKeyVisitor {
            type Value = PrivateKey;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "hex-encoded private key or an env var containing one",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if let Some(var) = value.strip_prefix('$') {
                    tracing::trace!("Reading {} from env", var);
                    let val = std::env::var(var).map_err(|e| {
                        serde::de::Error::custom(format!(
                            "error while loading this env {var}: {e}",
                        ))
                    })?;
                    PrivateKey::from_hex(&val)
                        .map_err(|e| serde::de::Error::custom(e.to_string()))
                } else {
                    PrivateKey::from_hex(value)
                        .map_err(|e| serde::de::Error::custom(e.to_string()))
                }
            }
        }

        deserializer.deserialize_str(PrivateKeyVisitor)
    }
}
