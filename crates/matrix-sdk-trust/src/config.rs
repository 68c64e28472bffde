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

use std::fmt::{self, Debug};

use ruma::events::key::verification::VerificationMethod;
use tokio::runtime::Handle;

/// The verification methods we advertise when the caller doesn't choose any.
pub const SUPPORTED_METHODS: &[VerificationMethod] = &[
    VerificationMethod::SasV1,
    VerificationMethod::QrCodeShowV1,
    VerificationMethod::ReciprocateV1,
];

/// Configuration for the verification requests a session starts.
///
/// # Examples
///
/// ```
/// use matrix_sdk_trust::config::VerificationConfig;
/// use ruma::events::key::verification::VerificationMethod;
///
/// // Only advertise emoji based verification.
/// let config = VerificationConfig::new().with_methods(vec![VerificationMethod::SasV1]);
/// assert_eq!(config.default_methods(), [VerificationMethod::SasV1]);
/// ```
#[derive(Clone, Debug)]
pub struct VerificationConfig {
    default_methods: Vec<VerificationMethod>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self { default_methods: SUPPORTED_METHODS.to_vec() }
    }
}

impl VerificationConfig {
    /// Create a new default `VerificationConfig`.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the methods that are advertised when a verification is requested
    /// without an explicit list of methods.
    ///
    /// # Panics
    ///
    /// This method will panic if `methods` is empty.
    #[must_use]
    pub fn with_methods(mut self, methods: Vec<VerificationMethod>) -> Self {
        assert!(!methods.is_empty(), "The list of verification methods can't be empty");
        self.default_methods = methods;
        self
    }

    /// The methods advertised by default.
    pub fn default_methods(&self) -> &[VerificationMethod] {
        &self.default_methods
    }
}

/// Configuration for the [`EventDispatcher`].
///
/// By default dispatch tasks are spawned on the runtime that is current when
/// the dispatcher gets created.
///
/// [`EventDispatcher`]: crate::EventDispatcher
#[derive(Clone, Default)]
pub struct DispatcherConfig {
    pub(crate) runtime: Option<Handle>,
}

#[cfg(not(tarpaulin_include))]
impl Debug for DispatcherConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("DispatcherConfig")
            .field("custom_runtime", &self.runtime.is_some())
            .finish()
    }
}

impl DispatcherConfig {
    /// Create a new default `DispatcherConfig`.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Run the listener notifications on the given runtime instead of the
    /// current one.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}
