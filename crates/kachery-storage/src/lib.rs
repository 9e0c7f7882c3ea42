// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Local content-addressed store. No side-car database: the filesystem
//! layout under `storage_dir` is the index, so a process restart is a no-op.

mod cas;
mod layout;
mod link_file;
mod manifest_builder;

pub use cas::{FindFileResult, KacheryStorageManager, StoreResult};
pub use link_file::{LinkFile, LinkStat};
