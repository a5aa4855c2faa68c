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

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Sha3_256};

use btp_relayer_types::PrivateKey;
use btp_relayer_utils::Result;

use crate::types::{Address, TransactionParam};

/// Signs transaction hashes for the relayer account.
pub trait Wallet: Send + Sync + 'static {
    /// The wallet's `hx` address.
    fn address(&self) -> Address;

    /// Signs a 32-byte transaction hash; 65 bytes `r || s || rec_id`.
    fn sign(&self, hash: &[u8]) -> Result<Vec<u8>>;
}

/// A [`Wallet`] over a raw secp256k1 key.
pub struct KeyWallet {
    key: SigningKey,
    address: Address,
}

impl KeyWallet {
    /// Builds the wallet and derives its address: `hx` plus the last 20
    /// bytes of SHA3-256 over the uncompressed public key body.
    pub fn from_private_key(secret: &PrivateKey) -> Result<Self> {
        let key = SigningKey::from_slice(secret.as_bytes())?;
        let point = key.verifying_key().to_encoded_point(false);
        let digest = Sha3_256::digest(&point.as_bytes()[1..]);
        let address =
            Address(format!("hx{}", hex::encode(&digest[digest.len() - 20..])));
        Ok(Self { key, address })
    }
}

impl Wallet for KeyWallet {
    fn address(&self) -> Address {
        self.address.clone()
    }

    fn sign(&self, hash: &[u8]) -> Result<Vec<u8>> {
        let (signature, recovery_id) = self.key.sign_prehash_recoverable(hash)?;
        let mut out = signature.to_bytes().to_vec();
        out.push(recovery_id.to_byte());
        Ok(out)
    }
}

/// The SHA3-256 signing hash of a transaction, computed over the canonical
/// serialization with the signature field excluded. This is also the hash
/// the node reports for the transaction.
pub fn transaction_hash(p: &TransactionParam) -> Result<Vec<u8>> {
    let text = serialize_transaction(p)?;
    Ok(Sha3_256::digest(text.as_bytes()).to_vec())
}

/// Canonical transaction text: `icx_sendTransaction` followed by the
/// parameters as sorted `key.value` pairs, maps braced, arrays bracketed,
/// and `\ { } [ ] .` escaped inside strings.
pub fn serialize_transaction(p: &TransactionParam) -> Result<String> {
    let mut value = serde_json::to_value(p)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.remove("signature");
    }
    let mut out = String::from("icx_sendTransaction");
    if let serde_json::Value::Object(map) = &value {
        let mut keys: Vec<_> = map.keys().collect();
        keys.sort();
        for key in keys {
            out.push('.');
            out.push_str(key);
            out.push('.');
            serialize_value(&map[key], &mut out);
        }
    }
    Ok(out)
}

fn serialize_value(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("\\0"),
        serde_json::Value::Bool(b) => {
            out.push_str(if *b { "0x1" } else { "0x0" })
        }
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => escape_into(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push('.');
                }
                serialize_value(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push('.');
                }
                out.push_str(key);
                out.push('.');
                serialize_value(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        if matches!(c, '\\' | '{' | '}' | '[' | ']' | '.') {
            out.push('\\');
        }
        out.push(c);
    }
}
