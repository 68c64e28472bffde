// Copyright 2023 The Matrix.org Foundation C.I.C.
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

use async_trait::async_trait;
use ruma::{
    events::key::verification::VerificationMethod, EventId, OwnedRoomId, OwnedTransactionId,
    OwnedUserId, RoomId, UserId,
};
use serde_json::Value as JsonValue;

use crate::{
    requests::{OutgoingVerificationRequest, SignatureUploadRequest},
    types::CrossSigningKey,
    AsyncTraitDeps, CryptoStoreError, SignatureError,
};

/// The public cross-signing keys of a user, as the [`CryptoEngine`] knows
/// them.
#[derive(Clone, Debug, PartialEq)]
pub enum UserIdentityData {
    /// Our own user identity.
    Own {
        /// The unique id of our own user.
        user_id: OwnedUserId,
        /// The public master key of our identity.
        master_key: CrossSigningKey,
        /// The public self-signing key of our identity.
        self_signing_key: CrossSigningKey,
        /// The public user-signing key of our identity.
        user_signing_key: CrossSigningKey,
        /// Does our own user identity trust our own device.
        trusts_our_own_device: bool,
    },
    /// The user identity of other users.
    Other {
        /// The unique id of the user.
        user_id: OwnedUserId,
        /// The public master key of the identity.
        master_key: CrossSigningKey,
        /// The public self-signing key of the identity.
        self_signing_key: CrossSigningKey,
    },
}

impl UserIdentityData {
    /// The user the identity belongs to.
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Own { user_id, .. } | Self::Other { user_id, .. } => user_id,
        }
    }
}

/// The engine side of a verification request that was just created.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationRequestData {
    /// The ID the engine uses to correlate the messages of this flow.
    pub flow_id: OwnedTransactionId,
    /// The user we are verifying, ourselves for self-verification.
    pub other_user_id: OwnedUserId,
    /// The room the flow happens in, `None` for to-device flows.
    pub room_id: Option<OwnedRoomId>,
    /// The methods we advertised.
    pub our_methods: Vec<VerificationMethod>,
}

/// The result of preparing a self-verification request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestVerificationResult {
    /// The handle of the newly created flow.
    pub verification: VerificationRequestData,
    /// The request that delivers the `m.key.verification.request` to our other
    /// devices.
    pub request: OutgoingVerificationRequest,
}

/// The cryptographic engine that owns the key material and the trust state.
///
/// The engine performs signing and signature checks, persists keys and
/// tracks the progress of verification flows. It is shared by every identity
/// and coordinator of a session and is expected to do its own locking.
#[async_trait]
pub trait CryptoEngine: AsyncTraitDeps {
    /// Get the cross-signing keys of the given user, if we know them.
    async fn get_identity(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserIdentityData>, CryptoStoreError>;

    /// Check if the identity of the given user is considered to be verified.
    ///
    /// This returns the cached judgement of the engine, unknown identities are
    /// not verified.
    async fn is_identity_verified(&self, user_id: &UserId) -> Result<bool, CryptoStoreError>;

    /// Mark the identity of the given user as verified and sign it.
    ///
    /// Our own identity is signed with our device key, other identities with
    /// our user-signing key. The engine considers the identity verified once
    /// this returns, the returned request still needs to be uploaded.
    async fn verify_identity(
        &self,
        user_id: &UserId,
    ) -> Result<SignatureUploadRequest, SignatureError>;

    /// Create a verification request towards our other devices.
    ///
    /// Returns `None` if we don't have a cross-signing identity.
    async fn request_self_verification(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<RequestVerificationResult>, CryptoStoreError>;

    /// Render the content of a `m.key.verification.request` room message
    /// addressed to the given user.
    ///
    /// Returns `None` if we don't know the identity of the user.
    async fn verification_request_content(
        &self,
        user_id: &UserId,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<JsonValue>, CryptoStoreError>;

    /// Start tracking an in-room verification flow after its request message
    /// was sent out as the event `event_id`.
    ///
    /// Returns `None` if we don't know the identity of the user.
    async fn request_verification(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        event_id: &EventId,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<VerificationRequestData>, CryptoStoreError>;
}
