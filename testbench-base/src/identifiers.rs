// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Identifiers of the evaluated entities and of the sampling requests.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use sha3::{Digest as _, Sha3_256};

/// The identifier of a sample source (a dataset document) on the evaluator side.
pub type SourceId = u64;

/// The number of bytes of the hash kept in an [`EntityKey::document_id`].
const DOCUMENT_ID_BYTES: usize = 12;

/// A staked entity being evaluated for a given service.
#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Debug, Serialize, Deserialize)]
pub struct EntityKey {
    pub address: String,
    pub service: String,
}

impl EntityKey {
    pub fn new(address: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            service: service.into(),
        }
    }

    /// Returns a stable document identifier for this address-service pair.
    pub fn document_id(&self) -> String {
        let mut hasher = Sha3_256::default();
        hasher.update(self.address.as_bytes());
        hasher.update(self.service.as_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..DOCUMENT_ID_BYTES])
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.service)
    }
}

/// The identifier of a sampling request created by the dispatcher.
#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        RequestId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
