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

//! Interactive verification flows.
//!
//! A verification flow upgrades a user identity from unknown to verified. It
//! starts with a `m.key.verification.request` message:
//!
//! * Our own identity - The request is sent to all our other devices using
//!   to-device messaging, see
//!   [`VerificationCoordinator::request_self_verification()`].
//! * Someone else's identity - The request is sent as a message into a direct
//!   message room we share with the user, see
//!   [`VerificationCoordinator::request_verification()`].
//!
//! The [`VerificationRequest`] returned by either method follows the progress
//! of the flow. The crypto engine reports the progress, which is fed back
//! through [`VerificationCoordinator::receive_progress()`].
//!
//! # Examples
//!
//! ```no_run
//! # use futures_util::{pin_mut, StreamExt};
//! # use matrix_sdk_trust::verification::{VerificationCoordinator, VerificationRequestState};
//! # async fn example(coordinator: VerificationCoordinator) -> anyhow::Result<()> {
//! let methods = coordinator.config().default_methods().to_vec();
//! let request = coordinator.request_self_verification(methods).await?;
//! let changes = request.changes();
//! pin_mut!(changes);
//!
//! while let Some(state) = changes.next().await {
//!     match state {
//!         VerificationRequestState::Done => break,
//!         VerificationRequestState::Cancelled(info) => {
//!             println!("The verification was cancelled: {}", info.reason());
//!         }
//!         _ => (),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod requests;

pub use coordinator::VerificationCoordinator;
pub use requests::{CancelInfo, VerificationListener, VerificationRequest, VerificationRequestState};
