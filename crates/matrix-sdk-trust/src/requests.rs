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

//! Outgoing requests produced by the [`CryptoEngine`] that the
//! [`RequestSender`] needs to deliver.
//!
//! The bodies are opaque to this crate, they are rendered by the engine and
//! only forwarded.
//!
//! [`CryptoEngine`]: crate::CryptoEngine
//! [`RequestSender`]: crate::RequestSender

use ruma::{OwnedTransactionId, TransactionId};
use serde_json::Value as JsonValue;

/// The event type that in-room verification requests are sent as.
pub const ROOM_MESSAGE_EVENT_TYPE: &str = "m.room.message";

/// A request that uploads new signatures of cross-signing keys or devices.
#[derive(Clone, Debug, PartialEq)]
pub struct SignatureUploadRequest {
    /// The JSON body of the `/keys/signatures/upload` request.
    pub body: JsonValue,
}

/// A verification message that needs to be sent out.
#[derive(Clone, Debug, PartialEq)]
pub enum OutgoingVerificationRequest {
    /// The verification message is sent out as a to-device event.
    ToDevice {
        /// The unique ID of the request.
        request_id: OwnedTransactionId,
        /// The type of the to-device event.
        event_type: String,
        /// The JSON body of the `/sendToDevice` request.
        body: JsonValue,
    },
}

impl OutgoingVerificationRequest {
    /// The unique ID of the request.
    pub fn request_id(&self) -> &TransactionId {
        match self {
            Self::ToDevice { request_id, .. } => request_id,
        }
    }
}
