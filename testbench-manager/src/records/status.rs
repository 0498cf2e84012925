// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use super::RecordError;

/// The outcome of the relay that produced a sample, as reported by the sampler.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum StatusCode {
    #[default]
    Ok,
    Relay,
    Supplier,
    OutOfSession,
    BadParams,
    PromptNotFound,
    DatabaseRead,
    PocketRpc,
    SignerNotFound,
    SignerError,
    AatSignature,
    Evaluation,
}

impl StatusCode {
    const ALL: [StatusCode; 12] = [
        StatusCode::Ok,
        StatusCode::Relay,
        StatusCode::Supplier,
        StatusCode::OutOfSession,
        StatusCode::BadParams,
        StatusCode::PromptNotFound,
        StatusCode::DatabaseRead,
        StatusCode::PocketRpc,
        StatusCode::SignerNotFound,
        StatusCode::SignerError,
        StatusCode::AatSignature,
        StatusCode::Evaluation,
    ];

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Whether the failure is imputable to the evaluated entity.
    pub fn is_punishable(self) -> bool {
        matches!(self, StatusCode::Supplier | StatusCode::Evaluation)
    }

    /// Whether a sample with this status is kept in a buffer. Failures of the sampling
    /// infrastructure say nothing about the entity and are dropped.
    pub fn is_storable(self) -> bool {
        self.is_ok() || self.is_punishable()
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        code as u32
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = RecordError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
            .ok_or(RecordError::UnknownStatusCode(value))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}({})", u32::from(*self))
    }
}
