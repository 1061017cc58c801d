/*******************************************************************************
*   (c) 2022 ZondaX GmbH
*
*  Licensed under the Apache License, Version 2.0 (the "License");
*  you may not use this file except in compliance with the License.
*  You may obtain a copy of the License at
*
*      http://www.apache.org/licenses/LICENSE-2.0
*
*  Unless required by applicable law or agreed to in writing, software
*  distributed under the License is distributed on an "AS IS" BASIS,
*  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
*  See the License for the specific language governing permissions and
*  limitations under the License.
********************************************************************************/
/// Errors raised on the host before (or without) talking to the device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Derivation path deeper than the device accepts
    #[error("maximum bip32 depth = 10 (got {0})")]
    PathTooLong(usize),

    /// Frame payload does not fit the one byte length field
    #[error("frame payload of {0} bytes exceeds 255")]
    PayloadTooLarge(usize),

    /// Parent public key is not a valid secp256k1 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Chain code must be 32 bytes
    #[error("invalid chain code length {0}")]
    InvalidChainCode(usize),

    /// Public derivation cannot produce hardened children
    #[error("index {0:#x} is hardened")]
    HardenedIndex(u32),

    /// Derived key is degenerate, the next index should be used
    #[error("invalid child key")]
    InvalidChildKey,

    /// The transaction cannot be empty
    #[error("transaction cannot be empty")]
    EmptyTransaction,

    /// At least one signing index is required
    #[error("no signing indices")]
    NoIndices,

    /// The index count must fit in one byte
    #[error("too many signing indices ({0})")]
    TooManyIndices(usize),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Avalanche App Error
#[derive(Debug, thiserror::Error)]
pub enum AvaxError<E: std::error::Error> {
    /// Session has been disconnected
    #[error("ledger is not connected")]
    NotConnected,

    /// The Avalanche app is not open on the device
    #[error("Avalanche app is not running on the ledger")]
    AppNotRunning,

    /// The device is locked
    #[error("ledger is locked")]
    DeviceLocked,

    /// User declined to provide the key
    #[error("user rejected the key request")]
    RejectedKeyProvide,

    /// User declined to sign
    #[error("user rejected the signature request")]
    RejectedSignature,

    /// The device returned a different hash than the one expected
    #[error("returned hash {found} does not match requested {expected}")]
    HashMismatch {
        /// Hex of the host computed hash
        expected: String,
        /// Hex of the hash echoed by the device
        found: String,
    },

    /// Host side failure
    #[error(transparent)]
    Host(#[from] HostError),

    /// Device response could not be parsed
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),

    /// Signature response is malformed
    #[error("received an invalid signature")]
    InvalidSignature,

    /// Unknown status word
    #[error("APDU error code {0:#06x}")]
    Apdu(u16),

    /// Opaque transport failure
    #[error("transport error: {0}")]
    Transport(E),

    /// Utf8 conversion related error
    #[error("UTF8Error error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}
