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

//! Cryptographic user identities used in Matrix.
//!
//! User identities are backed by [cross signing keys]. The user identity
//! represents a unique E2EE capable identity of any given user. We represent
//! them using the [`UserIdentity`] enum, which is either our own identity or
//! the identity of someone else.
//!
//! A [`UserIdentity`] can be used to inspect the public keys of the identity,
//! to initiate an interactive verification flow, or it can be manually marked
//! as verified.
//!
//! # Examples
//!
//! ```no_run
//! # use matrix_sdk_trust::identities::CrossSigningService;
//! # use ruma::user_id;
//! # async fn example(service: CrossSigningService) -> anyhow::Result<()> {
//! let alice = user_id!("@alice:example.org");
//!
//! if let Some(user) = service.get_user_identity(alice).await? {
//!     // Let's request the user to be verified.
//!     let verification = user.request_verification().await?;
//!
//!     // Or just mark it as verified.
//!     user.verify().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [cross signing keys]: https://spec.matrix.org/unstable/client-server-api/#cross-signing

use ruma::UserId;
use tracing::{debug, instrument};

use crate::{
    verification::VerificationCoordinator, CryptoStoreError, ManualVerifyError, SignatureError,
};

mod trust;
mod users;

pub use trust::{TrustLevel, TrustSnapshot, TrustedKey};
pub use users::{OtherUserIdentity, OwnUserIdentity, UserIdentity};

/// Lookup and manual trust of the cross-signing identities the crypto engine
/// knows about.
///
/// Identities the engine doesn't know resolve to `None`, or to not trusted,
/// never to an error.
#[derive(Clone, Debug)]
pub struct CrossSigningService {
    coordinator: VerificationCoordinator,
}

impl CrossSigningService {
    /// Create a new service on top of the given coordinator.
    pub fn new(coordinator: VerificationCoordinator) -> Self {
        Self { coordinator }
    }

    /// Get the identity of the given user.
    ///
    /// Fails if the engine returned keys that don't belong to the user or
    /// don't carry the usage their position requires.
    #[instrument(skip(self))]
    pub async fn get_user_identity(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserIdentity>, SignatureError> {
        let Some(data) = self.coordinator.engine().get_identity(user_id).await? else {
            debug!("No cross-signing identity is known for the user");
            return Ok(None);
        };

        UserIdentity::from_data(data, self.coordinator.clone()).map(Some)
    }

    /// Get the cross-signing keys of the given user and the trust we put into
    /// them.
    pub async fn get_user_cross_signing_keys(
        &self,
        user_id: &UserId,
    ) -> Result<Option<TrustSnapshot>, SignatureError> {
        match self.get_user_identity(user_id).await? {
            Some(identity) => Ok(Some(identity.to_trust_snapshot().await?)),
            None => Ok(None),
        }
    }

    /// Is the identity of the given user verified.
    pub async fn is_user_trusted(&self, user_id: &UserId) -> Result<bool, CryptoStoreError> {
        let engine = self.coordinator.engine();

        if engine.get_identity(user_id).await?.is_none() {
            return Ok(false);
        }

        engine.is_identity_verified(user_id).await
    }

    /// Manually verify the identity of another user.
    ///
    /// Returns `false` if the identity of the user isn't known.
    pub async fn trust_user(&self, user_id: &UserId) -> Result<bool, ManualVerifyError> {
        self.verify_identity(user_id).await
    }

    /// Manually verify our own identity, marking our master key as trusted.
    ///
    /// Returns `false` if we don't have a cross-signing identity yet.
    pub async fn mark_my_master_key_as_trusted(&self) -> Result<bool, ManualVerifyError> {
        self.verify_identity(self.coordinator.own_user_id()).await
    }

    async fn verify_identity(&self, user_id: &UserId) -> Result<bool, ManualVerifyError> {
        let Some(identity) = self.get_user_identity(user_id).await? else {
            return Ok(false);
        };

        identity.verify().await?;

        Ok(true)
    }
}
