use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use assert_matches::assert_matches;
use matrix_sdk_trust::{
    config::VerificationConfig,
    identities::CrossSigningService,
    requests::{OutgoingVerificationRequest, SignatureUploadRequest},
    types::CrossSigningKey,
    verification::{VerificationListener, VerificationRequest, VerificationRequestState},
    CryptoEngine, CryptoStoreError, NetworkError, RequestSender, RequestVerificationError,
    RequestVerificationResult, SignatureError, UserIdentity, UserIdentityData,
    VerificationCoordinator, VerificationRequestData,
};
use ruma::{
    encryption::KeyUsage, events::key::verification::VerificationMethod, room_id, user_id,
    EventId, OwnedEventId, OwnedTransactionId, OwnedUserId, RoomId, TransactionId, UserId,
};
use serde_json::{json, Value as JsonValue};

const ALICE: &str = "@alice:example.org";
const BOB: &str = "@bob:example.org";

fn key(user_id: &UserId, usage: KeyUsage) -> CrossSigningKey {
    CrossSigningKey::new(
        user_id.to_owned(),
        vec![usage.clone()],
        [(format!("ed25519:{}", usage.as_str()), usage.as_str().to_owned())].into(),
        Default::default(),
    )
}

/// An engine that knows Alice, which is us, and Bob.
#[derive(Debug, Default)]
struct Engine {
    verified: Mutex<HashSet<OwnedUserId>>,
}

#[async_trait::async_trait]
impl CryptoEngine for Engine {
    async fn get_identity(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserIdentityData>, CryptoStoreError> {
        Ok(match user_id.as_str() {
            ALICE => Some(UserIdentityData::Own {
                user_id: user_id.to_owned(),
                master_key: key(user_id, KeyUsage::Master),
                self_signing_key: key(user_id, KeyUsage::SelfSigning),
                user_signing_key: key(user_id, KeyUsage::UserSigning),
                trusts_our_own_device: true,
            }),
            BOB => Some(UserIdentityData::Other {
                user_id: user_id.to_owned(),
                master_key: key(user_id, KeyUsage::Master),
                self_signing_key: key(user_id, KeyUsage::SelfSigning),
            }),
            _ => None,
        })
    }

    async fn is_identity_verified(&self, user_id: &UserId) -> Result<bool, CryptoStoreError> {
        Ok(self.verified.lock().unwrap().contains(user_id))
    }

    async fn verify_identity(
        &self,
        user_id: &UserId,
    ) -> Result<SignatureUploadRequest, SignatureError> {
        self.verified.lock().unwrap().insert(user_id.to_owned());
        Ok(SignatureUploadRequest { body: json!({ user_id.as_str(): {} }) })
    }

    async fn request_self_verification(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<RequestVerificationResult>, CryptoStoreError> {
        let flow_id = TransactionId::new();

        Ok(Some(RequestVerificationResult {
            verification: VerificationRequestData {
                flow_id: flow_id.clone(),
                other_user_id: user_id!("@alice:example.org").to_owned(),
                room_id: None,
                our_methods: methods,
            },
            request: OutgoingVerificationRequest::ToDevice {
                request_id: flow_id,
                event_type: "m.key.verification.request".to_owned(),
                body: json!({}),
            },
        }))
    }

    async fn verification_request_content(
        &self,
        user_id: &UserId,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<JsonValue>, CryptoStoreError> {
        Ok((user_id.as_str() == BOB).then(|| {
            json!({ "msgtype": "m.key.verification.request", "methods": methods, "to": user_id })
        }))
    }

    async fn request_verification(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        event_id: &EventId,
        methods: Vec<VerificationMethod>,
    ) -> Result<Option<VerificationRequestData>, CryptoStoreError> {
        // In-room flows are identified by the event ID of the request.
        Ok(Some(VerificationRequestData {
            flow_id: event_id.as_str().into(),
            other_user_id: user_id.to_owned(),
            room_id: Some(room_id.to_owned()),
            our_methods: methods,
        }))
    }
}

#[derive(Debug, Default)]
struct Network {
    signature_uploads: Mutex<usize>,
    to_device: Mutex<Vec<OwnedTransactionId>>,
    room_messages: Mutex<Vec<(String, OwnedTransactionId)>>,
}

#[async_trait::async_trait]
impl RequestSender for Network {
    async fn send_signature_upload(&self, _: SignatureUploadRequest) -> Result<(), NetworkError> {
        *self.signature_uploads.lock().unwrap() += 1;
        Ok(())
    }

    async fn send_verification_request(
        &self,
        request: OutgoingVerificationRequest,
    ) -> Result<(), NetworkError> {
        self.to_device.lock().unwrap().push(request.request_id().to_owned());
        Ok(())
    }

    async fn send_room_message(
        &self,
        event_type: &str,
        _: &RoomId,
        _: JsonValue,
        transaction_id: &TransactionId,
    ) -> Result<OwnedEventId, NetworkError> {
        // Let other requests run while this one is on the wire.
        tokio::task::yield_now().await;

        self.room_messages
            .lock()
            .unwrap()
            .push((event_type.to_owned(), transaction_id.to_owned()));

        Ok(EventId::new(ruma::server_name!("example.org")))
    }
}

#[derive(Default)]
struct StateRecorder(Mutex<Vec<VerificationRequestState>>);

impl VerificationListener for StateRecorder {
    fn on_verification_request_updated(
        &self,
        _: &VerificationRequest,
        state: &VerificationRequestState,
    ) {
        self.0.lock().unwrap().push(state.clone());
    }
}

fn session() -> (Arc<Network>, VerificationCoordinator, CrossSigningService) {
    let network = Arc::new(Network::default());
    let coordinator = VerificationCoordinator::new(
        user_id!("@alice:example.org").to_owned(),
        Arc::new(Engine::default()),
        network.clone(),
        VerificationConfig::new().with_methods(vec![VerificationMethod::SasV1]),
    );
    let service = CrossSigningService::new(coordinator.clone());

    (network, coordinator, service)
}

#[tokio::test]
async fn test_self_verification_flow() {
    let (network, coordinator, service) = session();
    let recorder = Arc::new(StateRecorder::default());
    coordinator.add_listener(recorder.clone());

    let own = service.get_user_identity(user_id!("@alice:example.org")).await.unwrap().unwrap();
    assert_matches!(own, UserIdentity::Own(_));

    let request = own.request_verification().await.unwrap();
    assert!(request.is_self_verification());
    assert_eq!(request.our_methods(), [VerificationMethod::SasV1]);
    assert_eq!(network.to_device.lock().unwrap().as_slice(), [request.flow_id().to_owned()]);

    let (user_id, flow_id) = (own.user_id(), request.flow_id());
    assert!(coordinator.receive_progress(user_id, flow_id, VerificationRequestState::Accepted));
    assert!(coordinator.receive_progress(user_id, flow_id, VerificationRequestState::Done));

    assert!(request.is_done());
    assert!(coordinator.get_verification_requests(own.user_id()).is_empty());
    assert_eq!(
        *recorder.0.lock().unwrap(),
        [
            VerificationRequestState::Sent,
            VerificationRequestState::Accepted,
            VerificationRequestState::Done
        ]
    );
}

#[tokio::test]
async fn test_in_room_flow_uses_the_engine_flow_id() {
    let (network, coordinator, service) = session();
    let bob = service.get_user_identity(user_id!("@bob:example.org")).await.unwrap().unwrap();

    let request = bob
        .other()
        .unwrap()
        .request_verification_in_room(
            vec![VerificationMethod::SasV1],
            room_id!("!dm:example.org"),
            "t1".into(),
        )
        .await
        .unwrap();

    let messages = network.room_messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, "m.room.message");
    assert_eq!(messages[0].1.as_str(), "t1");

    // The engine tracks the flow under its own ID, the request follows it.
    assert!(request.flow_id().as_str().starts_with('$'));
    assert!(coordinator.get_verification_request(bob.user_id(), request.flow_id()).is_some());
}

#[tokio::test]
async fn test_in_room_transaction_id_is_not_reused() {
    let (network, coordinator, service) = session();
    let bob_id = user_id!("@bob:example.org");
    let bob = service.get_user_identity(bob_id).await.unwrap().unwrap();
    let bob = bob.other().unwrap();
    let room_id = room_id!("!dm:example.org");

    let request = bob
        .request_verification_in_room(vec![VerificationMethod::SasV1], room_id, "t1".into())
        .await
        .unwrap();

    let error = bob
        .request_verification_in_room(vec![VerificationMethod::SasV1], room_id, "t1".into())
        .await
        .unwrap_err();
    assert_matches!(error, RequestVerificationError::DuplicateTransaction(_));

    assert_eq!(network.room_messages.lock().unwrap().len(), 1);
    assert_eq!(coordinator.get_verification_requests(bob_id).len(), 1);
    assert!(coordinator.get_verification_request(bob_id, request.flow_id()).is_some());
}

#[tokio::test]
async fn test_concurrent_in_room_requests_share_no_transaction_id() {
    let (network, coordinator, service) = session();
    let bob_id = user_id!("@bob:example.org");
    let bob = service.get_user_identity(bob_id).await.unwrap().unwrap();
    let bob = bob.other().unwrap();
    let room_id = room_id!("!dm:example.org");

    let (first, second) = tokio::join!(
        bob.request_verification_in_room(vec![VerificationMethod::SasV1], room_id, "t2".into()),
        bob.request_verification_in_room(vec![VerificationMethod::SasV1], room_id, "t2".into()),
    );

    assert!(first.is_ok());
    assert_matches!(second, Err(RequestVerificationError::DuplicateTransaction(_)));
    assert_eq!(network.room_messages.lock().unwrap().len(), 1);
    assert_eq!(coordinator.get_verification_requests(bob_id).len(), 1);
}

#[tokio::test]
async fn test_manual_verification() {
    let (network, _, service) = session();
    let bob = user_id!("@bob:example.org");

    assert!(!service.is_user_trusted(bob).await.unwrap());
    assert!(service.trust_user(bob).await.unwrap());
    assert!(service.is_user_trusted(bob).await.unwrap());
    assert!(service.mark_my_master_key_as_trusted().await.unwrap());

    assert_eq!(*network.signature_uploads.lock().unwrap(), 2);

    let keys = service
        .get_user_cross_signing_keys(user_id!("@alice:example.org"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(keys.keys.len(), 3);
    assert!(keys.keys.iter().all(|k| k.trust_level.is_some_and(|t| t.is_verified())));
}
