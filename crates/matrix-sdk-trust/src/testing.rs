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

//! Testing facilities, an in-memory [`CryptoEngine`] and a recording
//! [`RequestSender`].
//!
//! The engine doesn't do any cryptography, signing an identity simply marks it
//! as verified. Failures can be injected to exercise the error paths.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use ruma::{
    encryption::KeyUsage, events::key::verification::VerificationMethod, EventId, OwnedEventId,
    OwnedRoomId, OwnedTransactionId, OwnedUserId, RoomId, TransactionId, UserId,
};
use serde_json::{json, Value as JsonValue};

use crate::{
    engine::{RequestVerificationResult, UserIdentityData, VerificationRequestData},
    requests::{OutgoingVerificationRequest, SignatureUploadRequest},
    types::CrossSigningKey,
    CryptoEngine, CryptoStoreError, NetworkError, RequestSender, SignatureError, SigningKeyKind,
};

/// Create a public cross-signing key for the given user and usage.
///
/// The key material is derived from the user ID and usage, so two calls with
/// the same arguments return the same key.
pub fn cross_signing_key(user_id: &UserId, usage: KeyUsage) -> CrossSigningKey {
    let public_key = format!("{}{}", user_id.localpart(), usage.as_str());

    CrossSigningKey::new(
        user_id.to_owned(),
        vec![usage],
        [(format!("ed25519:{public_key}"), public_key)].into(),
        Default::default(),
    )
}

/// An in-memory [`CryptoEngine`].
#[derive(Debug)]
pub struct MockCryptoEngine {
    own_user_id: OwnedUserId,
    identities: Mutex<HashMap<OwnedUserId, UserIdentityData>>,
    verified: Mutex<HashSet<OwnedUserId>>,
    missing_keys: Mutex<Vec<SigningKeyKind>>,
    corrupted: Mutex<HashSet<OwnedUserId>>,
    store_unavailable: AtomicBool,
    event_id_flow_ids: AtomicBool,
}

impl MockCryptoEngine {
    /// Create an engine for the session of the given user, without any known
    /// identities.
    pub fn new(own_user_id: &UserId) -> Self {
        Self {
            own_user_id: own_user_id.to_owned(),
            identities: Default::default(),
            verified: Default::default(),
            missing_keys: Default::default(),
            corrupted: Default::default(),
            store_unavailable: AtomicBool::new(false),
            event_id_flow_ids: AtomicBool::new(false),
        }
    }

    /// Create our own cross-signing identity.
    pub fn add_own_identity(&self) {
        let user_id = &self.own_user_id;

        let data = UserIdentityData::Own {
            user_id: user_id.clone(),
            master_key: cross_signing_key(user_id, KeyUsage::Master),
            self_signing_key: cross_signing_key(user_id, KeyUsage::SelfSigning),
            user_signing_key: cross_signing_key(user_id, KeyUsage::UserSigning),
            trusts_our_own_device: true,
        };

        self.identities.lock().unwrap().insert(user_id.clone(), data);
    }

    /// Learn about the cross-signing identity of another user.
    pub fn add_other_identity(&self, user_id: &UserId) {
        let data = UserIdentityData::Other {
            user_id: user_id.to_owned(),
            master_key: cross_signing_key(user_id, KeyUsage::Master),
            self_signing_key: cross_signing_key(user_id, KeyUsage::SelfSigning),
        };

        self.identities.lock().unwrap().insert(user_id.to_owned(), data);
    }

    /// Get the identity data the engine returns for the given user.
    pub fn identity_data(&self, user_id: &UserId) -> Option<UserIdentityData> {
        self.identities.lock().unwrap().get(user_id).cloned()
    }

    /// Forget the private part of the given key, signing with it will fail.
    pub fn remove_signing_key(&self, kind: SigningKeyKind) {
        self.missing_keys.lock().unwrap().push(kind);
    }

    /// Make the stored identity of the given user unreadable.
    pub fn corrupt_identity(&self, user_id: &UserId) {
        self.corrupted.lock().unwrap().insert(user_id.to_owned());
    }

    /// Make every store access fail.
    pub fn set_store_unavailable(&self, unavailable: bool) {
        self.store_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Track in-room flows under the event ID of the request message instead
    /// of the transaction ID it was sent with.
    pub fn set_event_id_flow_ids(&self, enabled: bool) {
        self.event_id_flow_ids.store(enabled, Ordering::SeqCst);
    }

    fn check_store(&self) -> Result<(), CryptoStoreError> {
        if self.store_unavailable.load(Ordering::SeqCst) {
            Err(CryptoStoreError::Unavailable("the mock store is switched off".to_owned()))
        } else {
            Ok(())
        }
    }

    fn check_identity(&self, user_id: &UserId) -> Result<(), CryptoStoreError> {
        self.check_store()?;

        if self.corrupted.lock().unwrap().contains(user_id) {
            Err(CryptoStoreError::Corrupted(format!("the identity of {user_id} can't be read")))
        } else {
            Ok(())
        }
    }

    fn has_identity(&self, user_id: &UserId) -> bool {
        self.identities.lock().unwrap().contains_key(user_id)
    }
}

#[async_trait]
impl CryptoEngine for MockCryptoEngine {
    async fn get_identity(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserIdentityData>, CryptoStoreError> {
        self.check_identity(user_id)?;
        Ok(self.identity_data(user_id))
    }

    async fn is_identity_verified(&self, user_id: &UserId) -> Result<bool, CryptoStoreError> {
        self.check_identity(user_id)?;
        Ok(self.verified.lock().unwrap().contains(user_id))
    }

    async fn verify_identity(
        &self,
        user_id: &UserId,
    ) -> Result<SignatureUploadRequest, SignatureError> {
        self.check_store()?;

        let Some(identity) = self.identity_data(user_id) else {
            return Err(SignatureError::Rejected(format!("the identity of {user_id} is unknown")));
        };

        let (signing_key, master_key) = match &identity {
            UserIdentityData::Own { master_key, .. } => (SigningKeyKind::OwnDevice, master_key),
            UserIdentityData::Other { master_key, .. } => (SigningKeyKind::UserSigning, master_key),
        };

        if self.missing_keys.lock().unwrap().contains(&signing_key) {
            return Err(SignatureError::MissingSigningKey(signing_key));
        }

        self.verified.lock().unwrap().insert(user_id.to_owned());

        let key_id = master_key.keys.keys().next().cloned().unwrap_or_default();
        let signatures: BTreeMap<_, _> =
            [(self.own_user_id.to_string(), json!({ "ed25519:MOCKDEVICE": "signature" }))].into();

        Ok(SignatureUploadRequest {
            body: json!({ user_id.as_str(): { key_id: { "signatures": signatures } } }),
        })
    }

    async fn request_self_verification(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<RequestVerificationResult>, CryptoStoreError> {
        self.check_store()?;

        if !self.has_identity(&self.own_user_id) {
            return Ok(None);
        }

        let flow_id = TransactionId::new();

        Ok(Some(RequestVerificationResult {
            verification: VerificationRequestData {
                flow_id: flow_id.clone(),
                other_user_id: self.own_user_id.clone(),
                room_id: None,
                our_methods: methods.clone(),
            },
            request: OutgoingVerificationRequest::ToDevice {
                request_id: flow_id.clone(),
                event_type: "m.key.verification.request".to_owned(),
                body: json!({
                    "messages": {
                        self.own_user_id.as_str(): {
                            "*": {
                                "from_device": "MOCKDEVICE",
                                "methods": methods,
                                "transaction_id": flow_id,
                            }
                        }
                    }
                }),
            },
        }))
    }

    async fn verification_request_content(
        &self,
        user_id: &UserId,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<JsonValue>, CryptoStoreError> {
        self.check_store()?;

        Ok(self.has_identity(user_id).then(|| {
            json!({
                "msgtype": "m.key.verification.request",
                "body": format!("{} is requesting to verify your key", self.own_user_id),
                "from_device": "MOCKDEVICE",
                "methods": methods,
                "to": user_id,
            })
        }))
    }

    async fn request_verification(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        event_id: &EventId,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<VerificationRequestData>, CryptoStoreError> {
        self.check_store()?;

        if !self.has_identity(user_id) {
            return Ok(None);
        }

        let flow_id = if self.event_id_flow_ids.load(Ordering::SeqCst) {
            event_id.as_str()
        } else {
            // The mock sender derives the event ID from the transaction ID, undo
            // that so the flow keeps the ID the message was sent with.
            let localpart = event_id.as_str().trim_start_matches('$');
            localpart.split(':').next().unwrap_or(localpart)
        };

        Ok(Some(VerificationRequestData {
            flow_id: flow_id.into(),
            other_user_id: user_id.to_owned(),
            room_id: Some(room_id.to_owned()),
            our_methods: methods,
        }))
    }
}

/// A request the [`MockRequestSender`] was asked to send.
#[derive(Clone, Debug, PartialEq)]
pub enum SentRequest {
    /// A call to [`RequestSender::send_signature_upload()`].
    SignatureUpload(SignatureUploadRequest),
    /// A call to [`RequestSender::send_verification_request()`].
    Verification(OutgoingVerificationRequest),
    /// A call to [`RequestSender::send_room_message()`].
    RoomMessage {
        /// The type of the event.
        event_type: String,
        /// The room the event was sent to.
        room_id: OwnedRoomId,
        /// The content of the event.
        content: JsonValue,
        /// The transaction ID the event was sent with.
        transaction_id: OwnedTransactionId,
    },
}

/// A [`RequestSender`] that records every request.
#[derive(Debug, Default)]
pub struct MockRequestSender {
    sent: Mutex<Vec<SentRequest>>,
    failing: AtomicBool,
}

impl MockRequestSender {
    /// Make every following request fail with a transport error, failed
    /// requests aren't recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The requests that were sent successfully, oldest first.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, request: SentRequest) -> Result<(), NetworkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport("the mock network is switched off".to_owned()));
        }

        self.sent.lock().unwrap().push(request);

        Ok(())
    }
}

#[async_trait]
impl RequestSender for MockRequestSender {
    async fn send_signature_upload(
        &self,
        request: SignatureUploadRequest,
    ) -> Result<(), NetworkError> {
        self.record(SentRequest::SignatureUpload(request))
    }

    async fn send_verification_request(
        &self,
        request: OutgoingVerificationRequest,
    ) -> Result<(), NetworkError> {
        self.record(SentRequest::Verification(request))
    }

    async fn send_room_message(
        &self,
        event_type: &str,
        room_id: &RoomId,
        content: JsonValue,
        transaction_id: &TransactionId,
    ) -> Result<OwnedEventId, NetworkError> {
        self.record(SentRequest::RoomMessage {
            event_type: event_type.to_owned(),
            room_id: room_id.to_owned(),
            content,
            transaction_id: transaction_id.to_owned(),
        })?;

        EventId::parse(format!("${transaction_id}:example.org"))
            .map_err(|e| NetworkError::Transport(e.to_string()))
    }
}
