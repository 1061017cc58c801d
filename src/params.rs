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
//! Wire constants of the Avalanche Ledger app

/// APDU Class byte
pub const CLA: u8 = 0x80;

/// Dashboard class byte (device level requests)
pub const CLA_DASHBOARD: u8 = 0xb0;
/// Name, version and flags of the running app
pub const INS_APP_INFO: u8 = 0x01;

/// Retrieve app version, commit and name
pub const INS_VERSION: u8 = 0x00;
/// Display an address on the device and return its short id
pub const INS_PROMPT_PUBLIC_KEY: u8 = 0x02;
/// Return the extended public key (public key + chain code)
pub const INS_PROMPT_EXT_PUBLIC_KEY: u8 = 0x03;
/// Sign a 32 byte hash with one or more keys
pub const INS_SIGN_HASH: u8 = 0x04;
/// Upload and sign a serialized transaction
pub const INS_SIGN_TRANSACTION: u8 = 0x05;

/// P1 for the address prompt
pub const P1_PROMPT_ADDRESS: u8 = 0x04;

/// P1 opening a hash or transaction signing session
pub const P1_FIRST: u8 = 0x00;
/// P1 for a hash signature request when more will follow
pub const P1_HASH_SIGN_NEXT: u8 = 0x01;
/// P1 for the last hash signature request
pub const P1_HASH_SIGN_LAST: u8 = 0x81;
/// P1 for a transaction chunk when more will follow
pub const P1_TX_CHUNK_NEXT: u8 = 0x01;
/// P1 for the last transaction chunk
pub const P1_TX_CHUNK_LAST: u8 = 0x81;
/// P1 for a transaction signature request when more will follow
pub const P1_TX_SIGN_NEXT: u8 = 0x02;
/// P1 for the last transaction signature request
pub const P1_TX_SIGN_LAST: u8 = 0x82;

/// Largest payload a single frame can carry (one byte length field)
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Transaction bytes sent per frame
pub const TX_CHUNK_SIZE: usize = 230;

/// Maximum bip32 depth accepted by the device
pub const MAX_PATH_DEPTH: usize = 10;

/// BIP32 hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Account prefix m/44'/9000'/0'
pub const ACCOUNT_PATH: [u32; 3] = [44, 9000, 0];

/// Number of hardened leading elements in every full path
pub const HARDEN_COUNT: usize = 3;

/// Name reported by the app, `version()` fails when another app answers
pub const APP_NAME: &str = "Avalanche";

/// Compressed public key length
pub const COMPRESSED_PK_LEN: usize = 33;

/// Chain code length
pub const CHAIN_CODE_LEN: usize = 32;

/// Signature response length: r + s + v
pub const SIGNATURE_LEN: usize = 65;

/// Status words the session interprets
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWord {
    /// Success
    NoError = 0x9000,
    /// User declined on device
    ConditionsNotSatisfied = 0x6985,
    /// Security status not satisfied (PIN not entered)
    SecurityStatus = 0x6982,
    /// Device is locked
    Locked = 0x5515,
    /// Instruction not supported by the running app
    InsNotSupported = 0x6D00,
    /// Class not supported by the running app
    ClaNotSupported = 0x6E00,
    /// No app open (dashboard)
    AppNotOpen = 0x6511,
    /// No app open (newer firmware)
    AppNotOpenDashboard = 0x6D02,
}

impl StatusWord {
    /// Match a raw status word against the known set
    pub fn from_u16(code: u16) -> Option<Self> {
        let sw = match code {
            0x9000 => Self::NoError,
            0x6985 => Self::ConditionsNotSatisfied,
            0x6982 => Self::SecurityStatus,
            0x5515 => Self::Locked,
            0x6D00 => Self::InsNotSupported,
            0x6E00 => Self::ClaNotSupported,
            0x6511 => Self::AppNotOpen,
            0x6D02 => Self::AppNotOpenDashboard,
            _ => return None,
        };
        Some(sw)
    }
}
