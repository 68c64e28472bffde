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

use ruma::{encryption::KeyUsage, OwnedTransactionId, OwnedUserId};
use serde_json::Error as SerdeError;
use thiserror::Error;

/// Error type for the crypto store that backs the [`CryptoEngine`].
///
/// [`CryptoEngine`]: crate::CryptoEngine
#[derive(Error, Debug)]
pub enum CryptoStoreError {
    /// The store couldn't be reached, e.g. the database is locked or closed.
    #[error("the crypto store is unavailable: {0}")]
    Unavailable(String),

    /// The store returned data that couldn't be interpreted.
    #[error("the crypto store is corrupted: {0}")]
    Corrupted(String),

    /// A value couldn't be (de)serialized on its way to or from the store.
    #[error(transparent)]
    Serialization(#[from] SerdeError),
}

/// The private cross-signing key that an operation needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKeyKind {
    /// The private part of the user-signing key.
    UserSigning,
    /// The Ed25519 key of our own device.
    OwnDevice,
}

/// Error type describing failures while signing or checking signatures of
/// cross-signing keys.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The private key needed to create the signature isn't available locally.
    #[error("the private {0:?} key is missing, can't create a signature")]
    MissingSigningKey(SigningKeyKind),

    /// The user ID of a key doesn't match the identity it is part of, or we
    /// tried to sign an identity with a key that must not sign it.
    #[error("the user id of the key doesn't match the identity")]
    UserIdMismatch,

    /// A cross-signing key doesn't advertise the usage its position requires.
    #[error("the cross-signing key of {user_id} is missing the {expected:?} usage")]
    MissingKeyUsage {
        /// The owner of the offending key.
        user_id: OwnedUserId,
        /// The usage that the key was expected to have.
        expected: KeyUsage,
    },

    /// The crypto engine refused to produce the signature.
    #[error("the signing operation was rejected: {0}")]
    Rejected(String),

    /// The store failed while the signature was being created or persisted.
    #[error(transparent)]
    Store(#[from] CryptoStoreError),
}

/// Error type for failures of the [`RequestSender`].
///
/// [`RequestSender`]: crate::RequestSender
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The request never reached the homeserver.
    #[error("the request couldn't be sent: {0}")]
    Transport(String),

    /// The homeserver answered with an error.
    #[error("the server returned an error, status {status}: {message}")]
    Server {
        /// The HTTP status code of the response.
        status: u16,
        /// The error message the server returned.
        message: String,
    },
}

/// Error raised by a [`SessionListener`] callback.
///
/// These errors never leave the [`EventDispatcher`], they are logged at the
/// boundary of the listener that produced them.
///
/// [`SessionListener`]: crate::SessionListener
/// [`EventDispatcher`]: crate::EventDispatcher
#[derive(Error, Debug)]
pub enum ListenerError {
    /// The listener returned an error.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The listener panicked while handling the event.
    #[error("the listener panicked: {0}")]
    Panicked(String),
}

/// Error for the manual verification step, when we manually sign users.
#[derive(Error, Debug)]
pub enum ManualVerifyError {
    /// Error that happens when we try to upload the user signature.
    #[error(transparent)]
    Http(#[from] NetworkError),
    /// Error that happens when we try to sign the user.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Error when requesting a verification.
#[derive(Error, Debug)]
pub enum RequestVerificationError {
    /// The crypto store failed while the request was being prepared.
    #[error(transparent)]
    Store(#[from] CryptoStoreError),

    /// The verification request message couldn't be sent out.
    #[error(transparent)]
    Http(#[from] NetworkError),

    /// The crypto engine doesn't know a cross-signing identity for the user,
    /// so it can't create a verification request for it.
    #[error("no cross-signing identity is known for {0}")]
    UnknownIdentity(OwnedUserId),

    /// We don't know a direct message room shared with the user, in-room
    /// verification requests need one.
    #[error("no direct message room is known for {0}")]
    NoDirectMessageRoom(OwnedUserId),

    /// A verification with the same transaction id is still in progress.
    #[error("a verification with the transaction id {0} is already in progress")]
    DuplicateTransaction(OwnedTransactionId),
}
