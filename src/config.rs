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
use crate::address::TxDigest;
use crate::error::HostError;
use crate::params::*;

/// Instruction codes of the app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instructions {
    /// Version
    pub version: u8,
    /// Address prompt
    pub prompt_public_key: u8,
    /// Extended public key
    pub prompt_ext_public_key: u8,
    /// Hash signing
    pub sign_hash: u8,
    /// Transaction signing
    pub sign_transaction: u8,
}

/// P1 values of the signature collection frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignFlags {
    /// Opening frame (hash or transaction preamble)
    pub first: u8,
    /// Signature request with more to follow
    pub sign_next: u8,
    /// Last signature request
    pub sign_last: u8,
}

/// P1 values of the transaction upload frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFlags {
    /// Payload chunk with more to follow
    pub next: u8,
    /// Last payload chunk
    pub last: u8,
}

/// Immutable app configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// APDU class
    pub cla: u8,
    /// Instruction codes
    pub ins: Instructions,
    /// P1 of the address prompt
    pub p1_prompt_address: u8,
    /// Hash signing flags
    pub hash_flags: SignFlags,
    /// Transaction signing flags
    pub tx_flags: SignFlags,
    /// Transaction upload flags
    pub chunk_flags: ChunkFlags,
    /// Account prefix, hardened on the wire
    pub account_path: Vec<u32>,
    /// Number of hardened leading elements in full paths
    pub harden_count: usize,
    /// Transaction bytes per frame
    pub chunk_size: usize,
    /// Digest used to verify the hash returned after upload
    pub tx_digest: TxDigest,
    /// Bytes to drop from the end of each signature response
    pub signature_trailer: usize,
    /// App name reported by the device
    pub app_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            cla: CLA,
            ins: Instructions {
                version: INS_VERSION,
                prompt_public_key: INS_PROMPT_PUBLIC_KEY,
                prompt_ext_public_key: INS_PROMPT_EXT_PUBLIC_KEY,
                sign_hash: INS_SIGN_HASH,
                sign_transaction: INS_SIGN_TRANSACTION,
            },
            p1_prompt_address: P1_PROMPT_ADDRESS,
            hash_flags: SignFlags {
                first: P1_FIRST,
                sign_next: P1_HASH_SIGN_NEXT,
                sign_last: P1_HASH_SIGN_LAST,
            },
            tx_flags: SignFlags {
                first: P1_FIRST,
                sign_next: P1_TX_SIGN_NEXT,
                sign_last: P1_TX_SIGN_LAST,
            },
            chunk_flags: ChunkFlags {
                next: P1_TX_CHUNK_NEXT,
                last: P1_TX_CHUNK_LAST,
            },
            account_path: ACCOUNT_PATH.to_vec(),
            harden_count: HARDEN_COUNT,
            chunk_size: TX_CHUNK_SIZE,
            tx_digest: TxDigest::DoubleSha256,
            signature_trailer: 0,
            app_name: APP_NAME.to_string(),
        }
    }
}

impl AppConfig {
    /// Check the values against protocol limits
    pub fn validate(&self) -> Result<(), HostError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_LEN {
            return Err(HostError::InvalidConfig("chunk size must be within 1..=255"));
        }
        // full paths append change and index
        if self.account_path.len() + 2 > MAX_PATH_DEPTH {
            return Err(HostError::InvalidConfig("account path too deep"));
        }
        if self.harden_count > self.account_path.len() {
            return Err(HostError::InvalidConfig(
                "harden count exceeds account path length",
            ));
        }
        Ok(())
    }
}
