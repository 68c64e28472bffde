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

//! Module containing customized types modeling Matrix keys and events.
//!
//! These types are used by the trust and dispatching machinery, the crypto
//! engine and the network layer convert their own representations into them.

mod cross_signing_key;
mod events;

pub use cross_signing_key::{CrossSigningKey, CrossSigningKeySignatures};
pub use events::{DecryptionError, DecryptionResult, Event, ToDeviceEvent};
