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
#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations, missing_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use async_trait::async_trait;

pub mod config;
mod engine;
mod error;
mod event_dispatcher;
pub mod identities;
pub mod logger;
pub mod requests;
mod sender;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;
pub mod verification;

pub use engine::{
    CryptoEngine, RequestVerificationResult, UserIdentityData, VerificationRequestData,
};
pub use error::{
    CryptoStoreError, ListenerError, ManualVerifyError, NetworkError, RequestVerificationError,
    SignatureError, SigningKeyKind,
};
pub use event_dispatcher::{EventDispatcher, SessionListener};
pub use identities::{CrossSigningService, UserIdentity};
pub use sender::RequestSender;
pub use verification::{VerificationCoordinator, VerificationRequest};

/// Super trait for the collaborator traits, [`CryptoEngine`] and
/// [`RequestSender`]. Implementations are shared between tasks.
pub trait AsyncTraitDeps: std::fmt::Debug + Send + Sync {}
impl<T: std::fmt::Debug + Send + Sync> AsyncTraitDeps for T {}

#[cfg(all(test, not(target_arch = "wasm32")))]
#[ctor::ctor]
fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .init();
}
