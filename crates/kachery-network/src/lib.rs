// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bucket HTTPS client, the pubsub transport seam, and the request/response
//! routing that ties a channel membership's role x permission grants to
//! concrete file and subfeed transfers.

mod bucket_client;
mod defaults;
mod hub;
mod layout;
mod signed_url;
mod transport;

pub use bucket_client::BucketClient;
pub use defaults::{InProcessPubsubTransport, PassthroughUrlMinter};
pub use hub::HubCoordinator;
pub use signed_url::SignedUrlMinter;
pub use transport::PubsubTransport;
