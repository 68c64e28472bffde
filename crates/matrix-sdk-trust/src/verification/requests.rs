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

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, RwLock as StdRwLock},
};

use eyeball::{ObservableWriteGuard, SharedObservable};
use futures_core::Stream;
use ruma::{
    events::key::verification::{cancel::CancelCode, VerificationMethod},
    OwnedUserId, RoomId, TransactionId, UserId,
};
use tracing::{debug, warn};

use crate::engine::VerificationRequestData;

/// Information about the cancellation of a verification request.
#[derive(Clone, Debug, PartialEq)]
pub struct CancelInfo {
    cancelled_by_us: bool,
    cancel_code: CancelCode,
    reason: String,
}

impl CancelInfo {
    /// Create a new `CancelInfo`.
    pub fn new(cancel_code: CancelCode, reason: impl Into<String>, cancelled_by_us: bool) -> Self {
        Self { cancelled_by_us, cancel_code, reason: reason.into() }
    }

    /// Get the human readable reason of the cancellation.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get the `CancelCode` that cancelled this verification.
    pub fn cancel_code(&self) -> &CancelCode {
        &self.cancel_code
    }

    /// Was the verification cancelled by us?
    pub fn cancelled_by_us(&self) -> bool {
        self.cancelled_by_us
    }
}

/// The state of a verification request.
///
/// ```text
/// Created -> Sent -> Accepted ---> Done
///                 -> Declined ---> Done
///                 -> Cancelled --> Done
///                 -> TimedOut ---> Done
/// ```
///
/// A request can additionally be cancelled or time out after it was
/// accepted, and the crypto engine may cancel a request before it was sent.
#[derive(Clone, Debug, PartialEq)]
pub enum VerificationRequestState {
    /// The request was created but not yet sent out.
    Created,
    /// The request was sent out and waits for the other side.
    Sent,
    /// The other side accepted the request.
    Accepted,
    /// The other side declined the request.
    Declined,
    /// The request was cancelled.
    Cancelled(CancelInfo),
    /// The other side didn't answer in time.
    TimedOut,
    /// The verification flow has concluded, the request won't change anymore.
    Done,
}

impl VerificationRequestState {
    fn can_transition_to(&self, next: &VerificationRequestState) -> bool {
        use VerificationRequestState::*;

        matches!(
            (self, next),
            (Created, Sent)
                | (Created, Cancelled(_))
                | (Sent, Accepted | Declined | Cancelled(_) | TimedOut)
                | (Accepted, Cancelled(_) | TimedOut)
                | (Accepted | Declined | Cancelled(_) | TimedOut, Done)
        )
    }
}

/// A listener that is notified about every state change of the verification
/// requests of a [`VerificationCoordinator`].
///
/// The callback is invoked synchronously from the task that applied the
/// change. A panicking listener is logged and doesn't affect other listeners.
///
/// [`VerificationCoordinator`]: super::VerificationCoordinator
pub trait VerificationListener: Send + Sync {
    /// Called after `request` moved into `state`.
    fn on_verification_request_updated(
        &self,
        request: &VerificationRequest,
        state: &VerificationRequestState,
    );
}

pub(crate) type VerificationListeners = Arc<StdRwLock<Vec<Arc<dyn VerificationListener>>>>;

struct RequestInner {
    own_user_id: OwnedUserId,
    data: VerificationRequestData,
    state: SharedObservable<VerificationRequestState>,
    cancel_info: StdRwLock<Option<CancelInfo>>,
    listeners: VerificationListeners,
}

/// An object controlling an interactive verification flow.
///
/// Clones share the same flow.
#[derive(Clone)]
pub struct VerificationRequest {
    inner: Arc<RequestInner>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for VerificationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationRequest")
            .field("flow_id", &self.flow_id())
            .field("other_user_id", &self.other_user_id())
            .field("room_id", &self.room_id())
            .field("state", &self.state())
            .finish()
    }
}

impl VerificationRequest {
    pub(crate) fn new(
        own_user_id: OwnedUserId,
        data: VerificationRequestData,
        listeners: VerificationListeners,
    ) -> Self {
        Self {
            inner: RequestInner {
                own_user_id,
                data,
                state: SharedObservable::new(VerificationRequestState::Created),
                cancel_info: Default::default(),
                listeners,
            }
            .into(),
        }
    }

    /// Get the transaction id of this verification request.
    pub fn flow_id(&self) -> &TransactionId {
        &self.inner.data.flow_id
    }

    /// Get our own user id.
    pub fn own_user_id(&self) -> &UserId {
        &self.inner.own_user_id
    }

    /// Get the user id of the other user participating in this verification
    /// flow.
    pub fn other_user_id(&self) -> &UserId {
        &self.inner.data.other_user_id
    }

    /// Get the room id if the verification is happening inside a room.
    pub fn room_id(&self) -> Option<&RoomId> {
        self.inner.data.room_id.as_deref()
    }

    /// The verification methods we advertised.
    pub fn our_methods(&self) -> &[VerificationMethod] {
        &self.inner.data.our_methods
    }

    /// Get the current state of the request.
    pub fn state(&self) -> VerificationRequestState {
        self.inner.state.get()
    }

    /// Has this verification finished.
    pub fn is_done(&self) -> bool {
        self.state() == VerificationRequestState::Done
    }

    /// Has the verification been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel_info.read().unwrap().is_some()
    }

    /// Is this a verification of our own identity.
    pub fn is_self_verification(&self) -> bool {
        self.inner.own_user_id == self.inner.data.other_user_id
    }

    /// Get info about the cancellation if the verification request has been
    /// cancelled.
    pub fn cancel_info(&self) -> Option<CancelInfo> {
        self.inner.cancel_info.read().unwrap().clone()
    }

    /// Listen for changes in the verification request.
    ///
    /// The stream yields the latest state whenever it changes, a slow consumer
    /// may skip intermediate states. It ends when the last clone of the
    /// request is dropped.
    pub fn changes(&self) -> impl Stream<Item = VerificationRequestState> {
        self.inner.state.subscribe()
    }

    /// Move the request into a new state.
    ///
    /// Returns `false`, leaving the request untouched, if the transition isn't
    /// allowed from the current state.
    pub(crate) fn transition(&self, next: VerificationRequestState) -> bool {
        {
            let mut state = self.inner.state.write();

            if !state.can_transition_to(&next) {
                warn!(
                    flow_id = self.flow_id().as_str(),
                    from = ?*state,
                    to = ?next,
                    "Ignoring an invalid verification request state change"
                );
                return false;
            }

            debug!(
                flow_id = self.flow_id().as_str(),
                from = ?*state,
                to = ?next,
                "Verification request changed state"
            );

            if let VerificationRequestState::Cancelled(info) = &next {
                *self.inner.cancel_info.write().unwrap() = Some(info.clone());
            }

            ObservableWriteGuard::set(&mut state, next.clone());
        }

        self.notify_listeners(&next);

        true
    }

    fn notify_listeners(&self, state: &VerificationRequestState) {
        let listeners = self.inner.listeners.read().unwrap().clone();

        for listener in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| {
                listener.on_verification_request_updated(self, state)
            }));

            if result.is_err() {
                warn!(
                    flow_id = self.flow_id().as_str(),
                    "A verification listener panicked while handling a state change"
                );
            }
        }
    }
}
