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
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::derive::ChildKey;
use crate::path::PathSuffix;

/// Short address id length
pub const SHORT_ID_LEN: usize = 20;

/// RIPEMD160(SHA256(data))
pub fn hash160(data: &[u8]) -> [u8; SHORT_ID_LEN] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// SHA256(data)
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA256(SHA256(data))
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// Digest the device computes over an uploaded transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxDigest {
    /// SHA256(tx)
    Sha256,
    /// SHA256(SHA256(tx))
    DoubleSha256,
}

impl TxDigest {
    /// Hash `tx` with this digest
    pub fn hash(self, tx: &[u8]) -> [u8; 32] {
        match self {
            TxDigest::Sha256 => sha256(tx),
            TxDigest::DoubleSha256 => double_sha256(tx),
        }
    }
}

/// Avalanche address (raw bytes, formatting is left to the caller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    /// RIPEMD160(SHA256(compressed public key))
    pub short_id: [u8; SHORT_ID_LEN],
    /// Path below the account prefix
    pub path_suffix: PathSuffix,
}

impl From<&ChildKey> for Address {
    fn from(key: &ChildKey) -> Self {
        Address {
            short_id: hash160(&key.public_key),
            path_suffix: key.path_suffix,
        }
    }
}
