// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-subfeed signed-message log. No side-car database: each subfeed is a
//! flat append-only file under `storage_dir`, loaded and hash-chain-verified
//! on open, mirroring the CAS's own filesystem-as-index discipline.

mod bucket_sync;
mod layout;
mod manager;
mod store;

pub use bucket_sync::{sync_subfeed_from_bucket, SubfeedBucketSource, SubfeedJson};
pub use manager::LocalFeedManager;
pub use store::SubfeedStore;
