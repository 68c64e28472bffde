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
use ruma::{OwnedEventId, RoomId, TransactionId};
use serde_json::Value as JsonValue;

use crate::{
    requests::{OutgoingVerificationRequest, SignatureUploadRequest},
    AsyncTraitDeps, NetworkError,
};

/// The network layer that delivers the requests the trust machinery creates.
///
/// No timeouts or retries are applied on this side, an implementation that
/// wants them has to bring its own.
#[async_trait]
pub trait RequestSender: AsyncTraitDeps {
    /// Upload new cross-signing signatures.
    async fn send_signature_upload(&self, request: SignatureUploadRequest)
        -> Result<(), NetworkError>;

    /// Send out a verification message, either to-device or in a room.
    async fn send_verification_request(
        &self,
        request: OutgoingVerificationRequest,
    ) -> Result<(), NetworkError>;

    /// Send a message-like event into a room.
    ///
    /// Returns the event ID the homeserver assigned to the event.
    async fn send_room_message(
        &self,
        event_type: &str,
        room_id: &RoomId,
        content: JsonValue,
        transaction_id: &TransactionId,
    ) -> Result<OwnedEventId, NetworkError>;
}
