// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared data model for the kachery node daemon: file identifiers, manifests,
//! channel membership, subfeed messages, the pubsub wire envelope, and the
//! error kinds every other crate in this workspace propagates.

mod channel;
mod error;
mod file_key;
mod manifest;
mod pubsub;
mod stream;
mod subfeed;

pub use channel::{ChannelAuthorization, ChannelCapability, ChannelMembership, ChannelRoles};
pub use error::KacheryError;
pub use file_key::{ChunkOf, FileKey};
pub use manifest::{FileManifest, ManifestChunk, CHUNK_SIZE};
pub use pubsub::{PubsubEnvelope, PubsubMessageBody, UploadFileStatusKind};
pub use stream::{DataStream, DataStreamProducer, StreamEvent};
pub use subfeed::{SignedSubfeedMessage, SubfeedMessageBody};

pub type Result<T> = std::result::Result<T, KacheryError>;
