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

use std::path::Path;

use config::{Config, File};

use crate::BTPRelayerConfig;

/// Try to parse the [`BTPRelayerConfig`] from the given config file, with
/// `BTP_RELAYER`-prefixed environment variables taking precedence.
pub fn parse_from_file<P: AsRef<Path>>(
    path: P,
) -> btp_relayer_utils::Result<BTPRelayerConfig> {
    tracing::trace!("Loading config file: {}", path.as_ref().display());
    let ext = path
        .as_ref()
        .extension()
        .map(|e| e.to_str().unwrap_or(""))
        .unwrap_or("");
    let format = match ext {
        "json" => config::FileFormat::Json,
        _ => config::FileFormat::Toml,
    };
    let cfg = Config::builder()
        .add_source(File::from(path.as_ref()).format(format))
        .add_source(
            config::Environment::with_prefix("BTP_RELAYER").separator("__"),
        )
        .build()?;
    // deserialize with a path so config mistakes point at the broken key
    let config: Result<
        BTPRelayerConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => Ok(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}
