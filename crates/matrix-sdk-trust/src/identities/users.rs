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

use std::sync::{Arc, RwLock as StdRwLock};

use as_variant::as_variant;
use ruma::{
    encryption::KeyUsage, events::key::verification::VerificationMethod, OwnedRoomId,
    OwnedUserId, RoomId, TransactionId, UserId,
};
use tracing::{instrument, warn};

use super::{TrustLevel, TrustSnapshot, TrustedKey};
use crate::{
    engine::UserIdentityData,
    types::CrossSigningKey,
    verification::{VerificationCoordinator, VerificationRequest},
    CryptoStoreError, ManualVerifyError, RequestVerificationError, SignatureError,
};

/// A struct representing a E2EE capable identity of a user.
///
/// The identity is backed by public [cross signing] keys that users upload.
///
/// The user identity consists of three separate `Ed25519` keypairs:
///
/// ```text
///           ┌──────────────────────────────────────────────────────┐
///           │                    User Identity                     │
///           ├────────────────┬──────────────────┬──────────────────┤
///           │   Master Key   │ Self-signing Key │ User-signing key │
///           └────────────────┴──────────────────┴──────────────────┘
/// ```
///
/// Each key has a separate role:
/// * Master key, signs only the sub-keys, can be used as a fingerprint of the
///   identity.
/// * Self-signing key, signs devices belonging to the user that owns this
///   identity.
/// * User-signing key, signs Master keys belonging to other users.
///
/// The User-signing key is only known for our own identity, the homeserver
/// hides it from everyone else.
///
/// [cross signing]: https://spec.matrix.org/unstable/client-server-api/#cross-signing
#[derive(Clone, Debug)]
pub enum UserIdentity {
    /// Our own user identity.
    Own(OwnUserIdentity),
    /// The identity of another user.
    Other(OtherUserIdentity),
}

impl From<OwnUserIdentity> for UserIdentity {
    fn from(i: OwnUserIdentity) -> Self {
        Self::Own(i)
    }
}

impl From<OtherUserIdentity> for UserIdentity {
    fn from(i: OtherUserIdentity) -> Self {
        Self::Other(i)
    }
}

impl UserIdentity {
    /// Create a user identity from the keys the crypto engine returned.
    ///
    /// Every cross-signing key has to belong to the user of the identity and
    /// advertise the usage its position requires, our own identity has to
    /// belong to the user of the coordinator.
    pub fn from_data(
        data: UserIdentityData,
        coordinator: VerificationCoordinator,
    ) -> Result<Self, SignatureError> {
        Ok(match data {
            UserIdentityData::Own {
                user_id,
                master_key,
                self_signing_key,
                user_signing_key,
                trusts_our_own_device,
            } => {
                if user_id.as_str() != coordinator.own_user_id().as_str() {
                    return Err(SignatureError::UserIdMismatch);
                }

                master_key.check(&user_id, KeyUsage::Master)?;
                self_signing_key.check(&user_id, KeyUsage::SelfSigning)?;
                user_signing_key.check(&user_id, KeyUsage::UserSigning)?;

                OwnUserIdentity {
                    user_id,
                    master_key,
                    self_signing_key,
                    user_signing_key,
                    trusts_our_own_device,
                    coordinator,
                }
                .into()
            }
            UserIdentityData::Other { user_id, master_key, self_signing_key } => {
                master_key.check(&user_id, KeyUsage::Master)?;
                self_signing_key.check(&user_id, KeyUsage::SelfSigning)?;

                OtherUserIdentity {
                    user_id,
                    master_key,
                    self_signing_key,
                    direct_message_room: Default::default(),
                    coordinator,
                }
                .into()
            }
        })
    }

    /// The ID of the user this identity belongs to.
    pub fn user_id(&self) -> &UserId {
        match self {
            UserIdentity::Own(i) => &i.user_id,
            UserIdentity::Other(i) => &i.user_id,
        }
    }

    /// Destructure the identity into an `OwnUserIdentity` if it's our own.
    pub fn own(&self) -> Option<&OwnUserIdentity> {
        as_variant!(self, Self::Own)
    }

    /// Destructure the identity into an `OtherUserIdentity` if it isn't our
    /// own.
    pub fn other(&self) -> Option<&OtherUserIdentity> {
        as_variant!(self, Self::Other)
    }

    /// Get the public part of the Master key of this user identity.
    ///
    /// The public part of the Master key is usually used to uniquely identify
    /// the identity.
    pub fn master_key(&self) -> &CrossSigningKey {
        match self {
            UserIdentity::Own(i) => &i.master_key,
            UserIdentity::Other(i) => &i.master_key,
        }
    }

    /// Get the public part of the Self-signing key of this user identity.
    pub fn self_signing_key(&self) -> &CrossSigningKey {
        match self {
            UserIdentity::Own(i) => &i.self_signing_key,
            UserIdentity::Other(i) => &i.self_signing_key,
        }
    }

    /// Get the public part of the User-signing key, only available for our
    /// own identity.
    pub fn user_signing_key(&self) -> Option<&CrossSigningKey> {
        self.own().map(|i| &i.user_signing_key)
    }

    /// Is the user identity considered to be verified.
    ///
    /// This is the cached judgement of the crypto engine:
    ///
    /// * Our own identity is verified if it has been locally marked as
    ///   verified.
    /// * Another identity is verified if it has been signed by our
    ///   User-signing key, and our own identity is verified.
    pub async fn verified(&self) -> Result<bool, CryptoStoreError> {
        match self {
            UserIdentity::Own(i) => i.verified().await,
            UserIdentity::Other(i) => i.verified().await,
        }
    }

    /// Manually verify this [`UserIdentity`].
    ///
    /// ### Manually verifying other users
    ///
    /// The Master key of the user is signed with our own User-signing key.
    /// This will fail if the private part of the User-signing key isn't
    /// available.
    ///
    /// ### Manually verifying our own user
    ///
    /// Our own identity is marked as verified using a local flag, our own
    /// device also signs the Master key.
    ///
    /// ### Partial failures
    ///
    /// The crypto engine considers the identity verified as soon as the
    /// signature is created. If the upload of the signature fails afterwards
    /// an error is returned, but the identity stays verified locally. Retrying
    /// the call uploads a fresh signature.
    pub async fn verify(&self) -> Result<(), ManualVerifyError> {
        match self {
            UserIdentity::Own(i) => i.verify().await,
            UserIdentity::Other(i) => i.verify().await,
        }
    }

    /// Project the identity into its keys and the trust we put into them.
    ///
    /// Our own identity re-evaluates its trust, and stamps the result onto all
    /// three keys. The two keys of other identities are left unevaluated.
    pub async fn to_trust_snapshot(&self) -> Result<TrustSnapshot, CryptoStoreError> {
        match self {
            UserIdentity::Own(i) => i.to_trust_snapshot().await,
            UserIdentity::Other(i) => Ok(i.to_trust_snapshot()),
        }
    }

    /// Request an interactive verification with this `UserIdentity`.
    ///
    /// This will send out a `m.key.verification.request` event. Who such an
    /// event will be sent to depends on if we're verifying our own identity or
    /// someone else's:
    ///
    /// * Our own identity - All our E2EE capable devices will receive the event
    ///   over to-device messaging.
    /// * Someone else's identity - The event will be sent to the direct message
    ///   room we share with the user, with a freshly generated transaction id.
    ///
    /// The default methods of the [`VerificationConfig`] are advertised.
    ///
    /// [`VerificationConfig`]: crate::config::VerificationConfig
    pub async fn request_verification(
        &self,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        match self {
            UserIdentity::Own(i) => i.request_verification().await,
            UserIdentity::Other(i) => i.request_verification().await,
        }
    }

    /// Request an interactive verification with this `UserIdentity` using the
    /// selected methods.
    ///
    /// # Panics
    ///
    /// This method will panic if `methods` is empty.
    pub async fn request_verification_with_methods(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        match self {
            UserIdentity::Own(i) => i.request_verification_with_methods(methods).await,
            UserIdentity::Other(i) => i.request_verification_with_methods(methods).await,
        }
    }
}

/// Our own user identity.
#[derive(Clone, Debug)]
pub struct OwnUserIdentity {
    user_id: OwnedUserId,
    master_key: CrossSigningKey,
    self_signing_key: CrossSigningKey,
    user_signing_key: CrossSigningKey,
    trusts_our_own_device: bool,
    coordinator: VerificationCoordinator,
}

impl OwnUserIdentity {
    /// Get the public part of the User-signing key.
    pub fn user_signing_key(&self) -> &CrossSigningKey {
        &self.user_signing_key
    }

    /// Does our own identity trust the device this session runs on.
    pub fn trusts_our_own_device(&self) -> bool {
        self.trusts_our_own_device
    }

    async fn verified(&self) -> Result<bool, CryptoStoreError> {
        self.coordinator.engine().is_identity_verified(&self.user_id).await
    }

    async fn verify(&self) -> Result<(), ManualVerifyError> {
        manually_verify(&self.coordinator, &self.user_id).await
    }

    async fn to_trust_snapshot(&self) -> Result<TrustSnapshot, CryptoStoreError> {
        let trust_level = Some(TrustLevel::uniform(self.verified().await?));

        Ok(TrustSnapshot {
            user_id: self.user_id.clone(),
            keys: [&self.master_key, &self.self_signing_key, &self.user_signing_key]
                .into_iter()
                .map(|key| TrustedKey { key: key.clone(), trust_level })
                .collect(),
        })
    }

    /// Request a verification of our own identity from our other devices,
    /// advertising the default methods.
    pub async fn request_verification(
        &self,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        let methods = self.coordinator.config().default_methods().to_vec();
        self.coordinator.request_self_verification(methods).await
    }

    /// Request a verification of our own identity from our other devices,
    /// advertising the given methods.
    ///
    /// # Panics
    ///
    /// This method will panic if `methods` is empty.
    pub async fn request_verification_with_methods(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        assert!(!methods.is_empty(), "The list of verification methods can't be empty");
        self.coordinator.request_self_verification(methods).await
    }
}

/// The identity of another user.
#[derive(Clone, Debug)]
pub struct OtherUserIdentity {
    user_id: OwnedUserId,
    master_key: CrossSigningKey,
    self_signing_key: CrossSigningKey,
    direct_message_room: Arc<StdRwLock<Option<OwnedRoomId>>>,
    coordinator: VerificationCoordinator,
}

impl OtherUserIdentity {
    /// The direct message room that in-room verifications are requested in.
    pub fn direct_message_room(&self) -> Option<OwnedRoomId> {
        self.direct_message_room.read().unwrap().clone()
    }

    /// Set the direct message room we share with the user.
    ///
    /// The room is shared by all clones of this identity.
    pub fn set_direct_message_room(&self, room_id: OwnedRoomId) {
        *self.direct_message_room.write().unwrap() = Some(room_id);
    }

    async fn verified(&self) -> Result<bool, CryptoStoreError> {
        self.coordinator.engine().is_identity_verified(&self.user_id).await
    }

    async fn verify(&self) -> Result<(), ManualVerifyError> {
        manually_verify(&self.coordinator, &self.user_id).await
    }

    fn to_trust_snapshot(&self) -> TrustSnapshot {
        TrustSnapshot {
            user_id: self.user_id.clone(),
            keys: [&self.master_key, &self.self_signing_key]
                .into_iter()
                .map(|key| TrustedKey { key: key.clone(), trust_level: None })
                .collect(),
        }
    }

    /// Request a verification of this user in our direct message room,
    /// advertising the default methods.
    pub async fn request_verification(
        &self,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        let methods = self.coordinator.config().default_methods().to_vec();
        self.request_in_direct_message_room(methods).await
    }

    /// Request a verification of this user in our direct message room,
    /// advertising the given methods.
    ///
    /// # Panics
    ///
    /// This method will panic if `methods` is empty.
    pub async fn request_verification_with_methods(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        assert!(!methods.is_empty(), "The list of verification methods can't be empty");
        self.request_in_direct_message_room(methods).await
    }

    /// Request a verification of this user in the given room, sending the
    /// request message with the given transaction id.
    ///
    /// # Panics
    ///
    /// This method will panic if `methods` is empty.
    pub async fn request_verification_in_room(
        &self,
        methods: Vec<VerificationMethod>,
        room_id: &RoomId,
        transaction_id: &TransactionId,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        assert!(!methods.is_empty(), "The list of verification methods can't be empty");
        self.coordinator.request_verification(&self.user_id, room_id, transaction_id, methods).await
    }

    async fn request_in_direct_message_room(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        let room_id = self
            .direct_message_room()
            .ok_or_else(|| RequestVerificationError::NoDirectMessageRoom(self.user_id.clone()))?;

        self.request_verification_in_room(methods, &room_id, &TransactionId::new()).await
    }
}

#[instrument(skip(coordinator))]
async fn manually_verify(
    coordinator: &VerificationCoordinator,
    user_id: &UserId,
) -> Result<(), ManualVerifyError> {
    let request = coordinator.engine().verify_identity(user_id).await?;

    if let Err(e) = coordinator.sender().send_signature_upload(request).await {
        warn!("The identity was marked as verified but the signature couldn't be uploaded");
        return Err(e.into());
    }

    Ok(())
}
