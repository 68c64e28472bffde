// Copyright 2020 The Matrix.org Foundation C.I.C.
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

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock as StdRwLock},
};

use ruma::{
    events::key::verification::VerificationMethod, OwnedUserId, RoomId, TransactionId, UserId,
};
use tracing::{debug, instrument, trace, warn};

use super::requests::{
    VerificationListener, VerificationListeners, VerificationRequest, VerificationRequestState,
};
use crate::{
    config::VerificationConfig,
    engine::{RequestVerificationResult, VerificationRequestData},
    requests::ROOM_MESSAGE_EVENT_TYPE,
    CryptoEngine, RequestSender, RequestVerificationError,
};

/// The live requests, keyed by the other user and the flow id.
#[derive(Default)]
struct Registry {
    requests: HashMap<OwnedUserId, HashMap<String, VerificationRequest>>,
    /// Transaction ids of in-room requests, reserved before the request
    /// message goes out. Once the request is tracked the reservation points
    /// to the flow id the crypto engine assigned.
    transactions: HashMap<OwnedUserId, HashMap<String, Option<String>>>,
}

impl Registry {
    fn is_taken(&self, user_id: &UserId, id: &str) -> bool {
        self.requests.get(user_id).is_some_and(|r| r.contains_key(id))
            || self.transactions.get(user_id).is_some_and(|t| t.contains_key(id))
    }

    fn get(&self, user_id: &UserId, flow_id: &str) -> Option<&VerificationRequest> {
        self.requests.get(user_id)?.get(flow_id)
    }

    fn insert(&mut self, request: VerificationRequest) {
        self.requests
            .entry(request.other_user_id().to_owned())
            .or_default()
            .insert(request.flow_id().as_str().to_owned(), request);
    }

    fn release(&mut self, user_id: &UserId, transaction_id: &str) {
        if let Some(transactions) = self.transactions.get_mut(user_id) {
            transactions.remove(transaction_id);

            if transactions.is_empty() {
                self.transactions.remove(user_id);
            }
        }
    }

    fn remove(&mut self, request: &VerificationRequest) {
        let user_id = request.other_user_id();
        let flow_id = request.flow_id().as_str();

        if let Some(user_requests) = self.requests.get_mut(user_id) {
            user_requests.remove(flow_id);

            if user_requests.is_empty() {
                self.requests.remove(user_id);
            }
        }

        if let Some(transactions) = self.transactions.get_mut(user_id) {
            transactions.retain(|_, f| f.as_deref() != Some(flow_id));

            if transactions.is_empty() {
                self.transactions.remove(user_id);
            }
        }
    }
}

/// A transaction id reserved for an in-room request that isn't tracked yet.
///
/// The reservation is released on drop unless the request got tracked, this
/// covers the error paths as well as a cancelled request future.
struct Reservation<'a> {
    registry: &'a StdRwLock<Registry>,
    user_id: OwnedUserId,
    transaction_id: String,
    tracked: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.tracked {
            if let Ok(mut registry) = self.registry.write() {
                registry.release(&self.user_id, &self.transaction_id);
            }
        }
    }
}

/// Starts verification flows and keeps track of the ones that are still in
/// progress.
///
/// Every request the coordinator creates shares the coordinator's
/// [`VerificationListener`]s. Requests are forgotten once they reach
/// [`VerificationRequestState::Done`].
///
/// At most one request is created per transaction id and user: an id is
/// reserved before the request message is sent and stays reserved until the
/// request is done, even if the crypto engine tracks the flow under another
/// id.
#[derive(Clone)]
pub struct VerificationCoordinator {
    own_user_id: OwnedUserId,
    engine: Arc<dyn CryptoEngine>,
    sender: Arc<dyn RequestSender>,
    config: VerificationConfig,
    registry: Arc<StdRwLock<Registry>>,
    listeners: VerificationListeners,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for VerificationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationCoordinator")
            .field("own_user_id", &self.own_user_id)
            .field("engine", &self.engine)
            .field("sender", &self.sender)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VerificationCoordinator {
    /// Create a new coordinator for the session of `own_user_id`.
    pub fn new(
        own_user_id: OwnedUserId,
        engine: Arc<dyn CryptoEngine>,
        sender: Arc<dyn RequestSender>,
        config: VerificationConfig,
    ) -> Self {
        Self {
            own_user_id,
            engine,
            sender,
            config,
            registry: Default::default(),
            listeners: Default::default(),
        }
    }

    /// The user this session belongs to.
    pub fn own_user_id(&self) -> &UserId {
        &self.own_user_id
    }

    /// The configuration the coordinator was created with.
    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    pub(crate) fn engine(&self) -> &Arc<dyn CryptoEngine> {
        &self.engine
    }

    pub(crate) fn sender(&self) -> &Arc<dyn RequestSender> {
        &self.sender
    }

    /// Register a listener that gets notified about the state changes of every
    /// request, including the ones that already exist.
    pub fn add_listener(&self, listener: Arc<dyn VerificationListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Get a verification request that is still in progress.
    pub fn get_verification_request(
        &self,
        user_id: &UserId,
        flow_id: impl AsRef<str>,
    ) -> Option<VerificationRequest> {
        self.registry.read().unwrap().get(user_id, flow_id.as_ref()).cloned()
    }

    /// Get all the verification requests with the given user that are still in
    /// progress.
    pub fn get_verification_requests(&self, user_id: &UserId) -> Vec<VerificationRequest> {
        self.registry
            .read()
            .unwrap()
            .requests
            .get(user_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a state change the crypto engine observed for the flow with the
    /// given user and id.
    ///
    /// Returns `false` if the flow is unknown or the state change isn't valid
    /// for the current state of the request.
    pub fn receive_progress(
        &self,
        user_id: &UserId,
        flow_id: &TransactionId,
        state: VerificationRequestState,
    ) -> bool {
        let Some(request) = self.get_verification_request(user_id, flow_id) else {
            debug!(
                ?user_id,
                flow_id = flow_id.as_str(),
                "Received progress for an unknown verification flow"
            );
            return false;
        };

        let applied = request.transition(state);

        if request.is_done() {
            self.prune(&request);
        }

        applied
    }

    /// Request a verification of our own identity from our other devices.
    ///
    /// The request is sent out as a to-device message.
    #[instrument(skip_all, fields(user_id = ?self.own_user_id))]
    pub async fn request_self_verification(
        &self,
        methods: Vec<VerificationMethod>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        let Some(RequestVerificationResult { verification, request }) =
            self.engine.request_self_verification(methods).await?
        else {
            return Err(RequestVerificationError::UnknownIdentity(self.own_user_id.clone()));
        };

        let flow_id = verification.flow_id.clone();
        let verification = self.track(verification, None)?;

        trace!(flow_id = flow_id.as_str(), "Sending out a self-verification request");

        if let Err(e) = self.sender.send_verification_request(request).await {
            warn!(
                flow_id = flow_id.as_str(),
                "The crypto engine tracks the self-verification request but it couldn't be sent"
            );
            self.prune(&verification);

            return Err(e.into());
        }

        verification.transition(VerificationRequestState::Sent);

        Ok(verification)
    }

    /// Request a verification of another user inside of the given room.
    ///
    /// The `room_id` should point to a direct message room shared with the
    /// user, the `transaction_id` is used to send the request message and has
    /// to be unique among the requests with this user that are in progress.
    #[instrument(skip_all, fields(user_id = ?user_id, room_id = ?room_id, flow_id = transaction_id.as_str()))]
    pub async fn request_verification(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
        transaction_id: &TransactionId,
        methods: Vec<VerificationMethod>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        let reservation = self.reserve(user_id, transaction_id)?;

        let content = self
            .engine
            .verification_request_content(user_id, methods.clone())
            .await?
            .ok_or_else(|| RequestVerificationError::UnknownIdentity(user_id.to_owned()))?;

        let event_id = self
            .sender
            .send_room_message(ROOM_MESSAGE_EVENT_TYPE, room_id, content, transaction_id)
            .await?;

        trace!(?event_id, "Sent out the verification request message");

        let verification =
            match self.engine.request_verification(user_id, room_id, &event_id, methods).await {
                Ok(Some(v)) => v,
                Ok(None) => {
                    warn!(
                        ?event_id,
                        "The verification request was sent but the crypto engine \
                         doesn't know the identity of the user anymore"
                    );
                    return Err(RequestVerificationError::UnknownIdentity(user_id.to_owned()));
                }
                Err(e) => {
                    warn!(
                        ?event_id,
                        "The verification request was sent but the crypto engine couldn't \
                         start tracking it"
                    );
                    return Err(e.into());
                }
            };

        if verification.flow_id.as_str() != transaction_id.as_str() {
            debug!(
                engine_flow_id = verification.flow_id.as_str(),
                "The crypto engine tracks the request under a different flow id"
            );
        }

        let verification = self.track(verification, Some(reservation))?;
        verification.transition(VerificationRequestState::Sent);

        Ok(verification)
    }

    fn reserve(
        &self,
        user_id: &UserId,
        transaction_id: &TransactionId,
    ) -> Result<Reservation<'_>, RequestVerificationError> {
        let mut registry = self.registry.write().unwrap();

        if registry.is_taken(user_id, transaction_id.as_str()) {
            return Err(RequestVerificationError::DuplicateTransaction(transaction_id.to_owned()));
        }

        registry
            .transactions
            .entry(user_id.to_owned())
            .or_default()
            .insert(transaction_id.as_str().to_owned(), None);

        Ok(Reservation {
            registry: &self.registry,
            user_id: user_id.to_owned(),
            transaction_id: transaction_id.as_str().to_owned(),
            tracked: false,
        })
    }

    /// Start tracking a request, binding the reservation, if any, to the flow
    /// id of the request.
    fn track(
        &self,
        data: VerificationRequestData,
        reservation: Option<Reservation<'_>>,
    ) -> Result<VerificationRequest, RequestVerificationError> {
        let request =
            VerificationRequest::new(self.own_user_id.clone(), data, self.listeners.clone());
        let flow_id = request.flow_id().as_str();

        let mut registry = self.registry.write().unwrap();

        // The reservation of this very request doesn't count as a duplicate.
        let own_reservation = reservation.as_ref().is_some_and(|r| r.transaction_id == flow_id);

        if registry.get(request.other_user_id(), flow_id).is_some()
            || (!own_reservation && registry.is_taken(request.other_user_id(), flow_id))
        {
            warn!(flow_id, "The crypto engine returned a flow id that is already in use");
            drop(registry);

            let flow_id = request.flow_id().to_owned();
            return Err(RequestVerificationError::DuplicateTransaction(flow_id));
        }

        if let Some(mut reservation) = reservation {
            if let Some(slot) = registry
                .transactions
                .get_mut(&reservation.user_id)
                .and_then(|t| t.get_mut(&reservation.transaction_id))
            {
                *slot = Some(flow_id.to_owned());
            }

            reservation.tracked = true;
        }

        registry.insert(request.clone());

        Ok(request)
    }

    fn prune(&self, request: &VerificationRequest) {
        self.registry.write().unwrap().remove(request);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use ruma::{
        events::key::verification::{cancel::CancelCode, VerificationMethod},
        room_id, user_id, TransactionId,
    };

    use super::VerificationCoordinator;
    use crate::{
        config::VerificationConfig,
        requests::{OutgoingVerificationRequest, ROOM_MESSAGE_EVENT_TYPE},
        testing::{MockCryptoEngine, MockRequestSender, SentRequest},
        verification::{CancelInfo, VerificationRequestState},
        RequestVerificationError,
    };

    fn coordinator() -> (Arc<MockCryptoEngine>, Arc<MockRequestSender>, VerificationCoordinator) {
        let own_user_id = user_id!("@alice:example.org");
        let engine = Arc::new(MockCryptoEngine::new(own_user_id));
        let sender = Arc::new(MockRequestSender::default());

        engine.add_own_identity();
        engine.add_other_identity(user_id!("@bob:example.org"));

        let coordinator = VerificationCoordinator::new(
            own_user_id.to_owned(),
            engine.clone(),
            sender.clone(),
            VerificationConfig::new(),
        );

        (engine, sender, coordinator)
    }

    #[tokio::test]
    async fn test_self_verification() {
        let (_, sender, coordinator) = coordinator();

        let request =
            coordinator.request_self_verification(vec![VerificationMethod::SasV1]).await.unwrap();

        assert!(request.is_self_verification());
        assert_eq!(request.state(), VerificationRequestState::Sent);
        assert!(request.room_id().is_none());

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_matches!(
            &sent[0],
            SentRequest::Verification(OutgoingVerificationRequest::ToDevice { request_id, .. })
                if request_id.as_str() == request.flow_id().as_str()
        );

        assert!(coordinator
            .get_verification_request(coordinator.own_user_id(), request.flow_id())
            .is_some());
    }

    #[tokio::test]
    async fn test_in_room_verification() {
        let (_, sender, coordinator) = coordinator();
        let bob = user_id!("@bob:example.org");
        let room_id = room_id!("!abc:example.org");
        let transaction_id: &TransactionId = "t1".into();

        let request = coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap();

        assert_eq!(request.flow_id(), transaction_id);
        assert_eq!(request.other_user_id(), bob);
        assert_eq!(request.room_id(), Some(room_id));
        assert_eq!(request.our_methods(), [VerificationMethod::SasV1]);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_matches!(
            &sent[0],
            SentRequest::RoomMessage { event_type, transaction_id: sent_id, .. }
                if event_type == ROOM_MESSAGE_EVENT_TYPE && sent_id.as_str() == "t1"
        );

        // The same transaction id can't be reused while the flow is alive.
        let error = coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap_err();
        assert_matches!(error, RequestVerificationError::DuplicateTransaction(_));
        assert_eq!(sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_rejected() {
        let (_, sender, coordinator) = coordinator();

        let error = coordinator
            .request_verification(
                user_id!("@carol:example.org"),
                room_id!("!abc:example.org"),
                &TransactionId::new(),
                vec![VerificationMethod::SasV1],
            )
            .await
            .unwrap_err();

        assert_matches!(error, RequestVerificationError::UnknownIdentity(_));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_send_failures_are_propagated() {
        let (_, sender, coordinator) = coordinator();
        sender.set_failing(true);

        let error = coordinator
            .request_self_verification(vec![VerificationMethod::SasV1])
            .await
            .unwrap_err();

        assert_matches!(error, RequestVerificationError::Http(_));
        assert!(coordinator.get_verification_requests(coordinator.own_user_id()).is_empty());
    }

    #[tokio::test]
    async fn test_finished_requests_are_pruned() {
        let (_, _, coordinator) = coordinator();
        let bob = user_id!("@bob:example.org");

        let request = coordinator
            .request_verification(
                bob,
                room_id!("!abc:example.org"),
                &TransactionId::new(),
                vec![VerificationMethod::SasV1],
            )
            .await
            .unwrap();

        let flow_id = request.flow_id();
        let cancelled = VerificationRequestState::Cancelled(CancelInfo::new(
            CancelCode::Timeout,
            "The verification timed out",
            false,
        ));

        assert!(!coordinator.receive_progress(bob, flow_id, VerificationRequestState::Done));
        assert!(coordinator.receive_progress(bob, flow_id, cancelled));
        assert_eq!(coordinator.get_verification_requests(bob).len(), 1);

        assert!(coordinator.receive_progress(bob, flow_id, VerificationRequestState::Done));
        assert!(coordinator.get_verification_requests(bob).is_empty());
        assert!(request.is_cancelled());

        assert!(!coordinator.receive_progress(bob, flow_id, VerificationRequestState::Done));
    }

    #[tokio::test]
    async fn test_transaction_id_stays_reserved_under_another_flow_id() {
        let (engine, sender, coordinator) = coordinator();
        engine.set_event_id_flow_ids(true);

        let bob = user_id!("@bob:example.org");
        let room_id = room_id!("!abc:example.org");
        let transaction_id: &TransactionId = "t1".into();

        let request = coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap();
        assert_ne!(request.flow_id().as_str(), "t1");

        let error = coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap_err();
        assert_matches!(error, RequestVerificationError::DuplicateTransaction(_));
        assert_eq!(sender.sent().len(), 1);
        assert_eq!(coordinator.get_verification_requests(bob).len(), 1);

        // Once the flow is done the transaction id can be used again.
        let flow_id = request.flow_id();
        assert!(coordinator.receive_progress(bob, flow_id, VerificationRequestState::Accepted));
        assert!(coordinator.receive_progress(bob, flow_id, VerificationRequestState::Done));

        coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap();
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_request_releases_the_transaction_id() {
        let (_, sender, coordinator) = coordinator();
        let bob = user_id!("@bob:example.org");
        let room_id = room_id!("!abc:example.org");
        let transaction_id: &TransactionId = "t1".into();

        sender.set_failing(true);
        let error = coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap_err();
        assert_matches!(error, RequestVerificationError::Http(_));

        sender.set_failing(false);
        coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_progress_is_scoped_to_the_user() {
        let (engine, _, coordinator) = coordinator();
        let bob = user_id!("@bob:example.org");
        let carol = user_id!("@carol:example.org");
        engine.add_other_identity(carol);

        let room_id = room_id!("!abc:example.org");
        let transaction_id: &TransactionId = "t1".into();

        let bob_request = coordinator
            .request_verification(bob, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap();
        let carol_request = coordinator
            .request_verification(carol, room_id, transaction_id, vec![VerificationMethod::SasV1])
            .await
            .unwrap();
        assert_eq!(bob_request.flow_id(), carol_request.flow_id());

        assert!(coordinator.receive_progress(
            carol,
            transaction_id,
            VerificationRequestState::Accepted
        ));

        assert_eq!(carol_request.state(), VerificationRequestState::Accepted);
        assert_eq!(bob_request.state(), VerificationRequestState::Sent);
    }
}
