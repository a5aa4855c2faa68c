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

/// Wire code for a successful relay result.
pub const CODE_SUCCESS: i32 = -1;
/// Base of the BMV (message verifier) error code block.
pub const CODE_BMV_BASE: i32 = 25;

/// Outcome code carried by a relay result.
///
/// The BMV family occupies the verifier error-code block starting at
/// [`CODE_BMV_BASE`]; anything outside the known set is preserved as
/// [`ErrorCode::Other`] so the link can treat it as unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The relay message was accepted and executed.
    Success,
    /// The verifier rejected the message for an unknown reason.
    BmvUnknown,
    /// The verifier cannot verify the message yet, e.g. a height gap.
    BmvNotVerifiable,
    /// The verifier has already seen everything the message carries.
    BmvAlreadyVerified,
    /// The block witness in the message is older than the verifier allows.
    BmvRevertInvalidBlockWitnessOld,
    /// Any other code, kept verbatim.
    Other(i32),
}

impl ErrorCode {
    /// Maps a raw wire code into an [`ErrorCode`].
    pub fn from_code(code: i32) -> Self {
        match code {
            CODE_SUCCESS => Self::Success,
            c if c == CODE_BMV_BASE => Self::BmvUnknown,
            c if c == CODE_BMV_BASE + 1 => Self::BmvNotVerifiable,
            c if c == CODE_BMV_BASE + 2 => Self::BmvAlreadyVerified,
            c if c == CODE_BMV_BASE + 3 => Self::BmvRevertInvalidBlockWitnessOld,
            c => Self::Other(c),
        }
    }

    /// The raw wire code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => CODE_SUCCESS,
            Self::BmvUnknown => CODE_BMV_BASE,
            Self::BmvNotVerifiable => CODE_BMV_BASE + 1,
            Self::BmvAlreadyVerified => CODE_BMV_BASE + 2,
            Self::BmvRevertInvalidBlockWitnessOld => CODE_BMV_BASE + 3,
            Self::Other(c) => *c,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
