// Copyright 2020 Damir Jelić
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

use async_trait::async_trait;
use ruma::RoomId;

use crate::{
    types::{DecryptionError, DecryptionResult, Event, ToDeviceEvent},
    ListenerError,
};

/// This trait allows any type implementing `SessionListener` to specify
/// callbacks for each category of event the session produces.
///
/// The [`EventDispatcher`] calls each method when the corresponding event is
/// dispatched. Every method has a default implementation that ignores the
/// event, so listeners only implement what they are interested in.
///
/// Returning an error, or panicking, only affects the listener itself: the
/// error is logged and the remaining listeners are still notified.
///
/// # Examples
///
/// ```
/// use matrix_sdk_trust::{types::Event, ListenerError, SessionListener};
/// use ruma::RoomId;
///
/// struct MessagePrinter;
///
/// #[async_trait::async_trait]
/// impl SessionListener for MessagePrinter {
///     async fn on_live_event(&self, room_id: &RoomId, event: &Event) -> Result<(), ListenerError> {
///         if event.event_type == "m.room.message" {
///             println!("{room_id}: {}", event.content["body"]);
///         }
///
///         Ok(())
///     }
/// }
/// ```
///
/// [`EventDispatcher`]: crate::EventDispatcher
#[async_trait]
pub trait SessionListener: Send + Sync {
    /// Fires when an event arrives through a live sync, outside of the
    /// initial sync.
    async fn on_live_event(&self, _: &RoomId, _: &Event) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Fires when an event was loaded by back-pagination.
    async fn on_paginated_event(&self, _: &RoomId, _: &Event) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Fires when an event got decrypted.
    ///
    /// The event and room ID are empty strings if the event didn't carry them.
    async fn on_event_decrypted(
        &self,
        _event_id: &str,
        _room_id: &str,
        _: &DecryptionResult,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Fires when an event couldn't be decrypted.
    ///
    /// The event and room ID are empty strings if the event didn't carry them.
    async fn on_event_decryption_error(
        &self,
        _event_id: &str,
        _room_id: &str,
        _: &DecryptionError,
    ) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Fires when a to-device event arrives through a live sync.
    async fn on_live_to_device_event(&self, _: &ToDeviceEvent) -> Result<(), ListenerError> {
        Ok(())
    }
}
