// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `usm config`: print the effective configuration.

use usm_runtime::UsmConfig;

pub fn execute(config: UsmConfig) -> anyhow::Result<()> {
    config.validate()?;
    print!("{}", config.to_toml()?);
    Ok(())
}
