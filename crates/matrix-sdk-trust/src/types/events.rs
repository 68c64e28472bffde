// Copyright 2022 The Matrix.org Foundation C.I.C.
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

use ruma::{EventId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A room event as produced by the sync, pagination or decryption pipelines.
///
/// Only the fields the dispatcher looks at are typed, the content is left as
/// it came over the wire.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Event {
    /// The globally unique ID of the event, missing for local echoes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<OwnedEventId>,

    /// The room the event belongs to, sync responses strip it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<OwnedRoomId>,

    /// The sender of the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<OwnedUserId>,

    /// The type of the event, e.g. `m.room.message`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The content of the event.
    #[serde(default)]
    pub content: JsonValue,
}

impl Event {
    /// Deserialize an event from its JSON form.
    pub fn from_json(json: JsonValue) -> serde_json::Result<Self> {
        serde_json::from_value(json)
    }

    /// The event ID, if the event has one.
    pub fn event_id(&self) -> Option<&EventId> {
        self.event_id.as_deref()
    }

    /// The room ID, if the event carries one.
    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_deref()
    }
}

/// An event that was sent directly to our device, outside of any room.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ToDeviceEvent {
    /// The sender of the event.
    pub sender: OwnedUserId,

    /// The type of the event, e.g. `m.key.verification.request`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// The content of the event.
    #[serde(default)]
    pub content: JsonValue,
}

/// The result of successfully decrypting a room event.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DecryptionResult {
    /// The decrypted event, in its JSON form.
    pub clear_event: JsonValue,
    /// The Curve25519 key of the device that sent us the room key.
    pub sender_curve25519_key: String,
    /// The Ed25519 key the sender claimed to own.
    pub claimed_ed25519_key: Option<String>,
    /// The chain of Curve25519 keys through which the room key was forwarded.
    #[serde(default)]
    pub forwarding_curve25519_chain: Vec<String>,
}

/// The reason an event couldn't be decrypted.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecryptionError {
    /// The room key that encrypted the event is unknown to us.
    #[error("{error}")]
    MissingRoomKey {
        /// A human readable description of the failure.
        error: String,
        /// The code the sender gave when it withheld the key from us.
        withheld_code: Option<String>,
    },
    /// The Megolm decryption itself failed.
    #[error("{error}")]
    Megolm {
        /// A human readable description of the failure.
        error: String,
    },
    /// The event or its decrypted payload was malformed.
    #[error("{error}")]
    Serialization {
        /// A human readable description of the failure.
        error: String,
    },
    /// The crypto store failed while we were looking for the room key.
    #[error("{error}")]
    Store {
        /// A human readable description of the failure.
        error: String,
    },
}
