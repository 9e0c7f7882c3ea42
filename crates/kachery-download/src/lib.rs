// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Resolves a file by fingerprint: a CAS hit returns immediately; a miss
//! either streams a direct bucket fetch or, for a manifested file, fans out
//! bounded-concurrency chunk fetches and reassembles them.

mod downloader;
mod traits;

pub use downloader::Downloader;
pub use traits::{BucketLookup, BucketReader, RemoteFileCoordinator};
