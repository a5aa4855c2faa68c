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

//! Common utilities shared across the BTP relayer crates.

/// A module used for debugging relayer lifecycle, relay progress, or other
/// relayer state.
pub mod probe;

/// An enum of all possible errors that could be encountered during the
/// execution of the BTP relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// HTTP transport error.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// ECDSA signing error.
    #[error(transparent)]
    Signature(#[from] k256::ecdsa::Error),
    /// An error object returned by the destination chain's JSON-RPC server.
    #[error("jsonrpc error code: {} message: {}", code, message)]
    JsonRpc {
        /// The JSON-RPC error code.
        code: i64,
        /// The JSON-RPC error message.
        message: String,
    },
    /// A malformed BTP address.
    #[error("Invalid BTP address: {}", _0)]
    InvalidBtpAddress(String),
    /// A malformed private key.
    #[error("Invalid private key: {}", _0)]
    InvalidPrivateKey(String),
    /// The component is not in a state that allows the requested operation,
    /// e.g. the sender's transaction queue is full.
    #[error("Invalid state: {}", _0)]
    InvalidState(String),
    /// A relay result carried a verifier code the link has no recovery for.
    #[error("Unrecoverable relay result id: {} code: {}", id, code)]
    UnrecoverableRelayResult {
        /// The relay message id the result refers to.
        id: i64,
        /// The raw verifier error code.
        code: i32,
    },
    /// A background task failed and stopped abnormally.
    #[error("Task Stopped Abnormally")]
    TaskStoppedAbnormally,
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

impl Error {
    /// Whether this error is the sender's queue-full admission refusal.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_))
    }
}

/// A type alias for the result for the BTP relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
