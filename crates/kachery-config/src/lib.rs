// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Daemon configuration: a kebab-case YAML `NodeConfig` plus the `Config`
//! trait's blanket `load`/`save`, the same split used for every config type
//! in the reference workspace.

mod config_trait;
mod node;

pub use config_trait::Config;
pub use node::NodeConfig;
