// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hashing, canonical serialization, and Ed25519 signing, the primitives
//! every other crate in this workspace builds its integrity and chain
//! guarantees on top of.

mod canonical;
mod hash;
mod keypair;
mod signature;

pub use canonical::{canonicalize, to_canonical_bytes};
pub use hash::{constant_time_eq, sha1_hex, StreamingHasher};
pub use keypair::Keypair;
pub use signature::{sign, verify};
