// Copyright 2021 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use ruma::OwnedUserId;
use serde::{Deserialize, Serialize};

use crate::types::CrossSigningKey;

/// The trust we put into a cross-signing key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustLevel {
    /// Is the key trusted because of a cross-signing signature chain.
    pub cross_signing_verified: bool,
    /// Was the key marked as trusted locally.
    pub locally_verified: bool,
}

impl TrustLevel {
    /// A trust level where both flags carry the same value.
    pub fn uniform(verified: bool) -> Self {
        Self { cross_signing_verified: verified, locally_verified: verified }
    }

    /// Is the key trusted in any way.
    pub fn is_verified(&self) -> bool {
        self.cross_signing_verified || self.locally_verified
    }
}

/// A cross-signing key together with the trust we put into it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustedKey {
    /// The public cross-signing key.
    pub key: CrossSigningKey,
    /// The trust level of the key, `None` if it wasn't evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<TrustLevel>,
}

/// A point in time projection of a user identity and its trust.
///
/// The keys are ordered master key, self-signing key and, for our own
/// identity, user-signing key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    /// The user the identity belongs to.
    pub user_id: OwnedUserId,
    /// The cross-signing keys of the identity.
    pub keys: Vec<TrustedKey>,
}
