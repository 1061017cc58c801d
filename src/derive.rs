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
//! Non-hardened public child key derivation (secp256k1)
//!
//! Only one level below the extended public key is derived: the device
//! exports the key at `m/44'/9000'/0'/change` and every address index is a
//! direct child of it. No child chain code is produced.

use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{NonZeroScalar, ProjectivePoint, PublicKey};
use sha2::Sha512;

use crate::error::HostError;
use crate::params::{CHAIN_CODE_LEN, COMPRESSED_PK_LEN, HARDENED};
use crate::path::PathSuffix;

type HmacSha512 = Hmac<Sha512>;

/// Extended public key exported by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    public_key: PublicKey,
    chain_code: [u8; CHAIN_CODE_LEN],
    change: u32,
}

/// Public key derived on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildKey {
    /// Compressed SEC1 public key
    pub public_key: [u8; COMPRESSED_PK_LEN],
    /// Path below the account prefix that produced this key
    pub path_suffix: PathSuffix,
}

impl ChildKey {
    /// Address index of this key
    pub fn index(&self) -> u32 {
        self.path_suffix.index
    }
}

impl ExtendedPublicKey {
    /// Build from a SEC1 public key (33 or 65 bytes) and a chain code.
    ///
    /// `change` is the last path element of the exported key, children are
    /// reported as `change/index`.
    pub fn new(public_key: &[u8], chain_code: &[u8], change: u32) -> Result<Self, HostError> {
        let public_key =
            PublicKey::from_sec1_bytes(public_key).map_err(|_| HostError::InvalidPublicKey)?;
        let chain_code: [u8; CHAIN_CODE_LEN] = chain_code
            .try_into()
            .map_err(|_| HostError::InvalidChainCode(chain_code.len()))?;

        Ok(ExtendedPublicKey {
            public_key,
            chain_code,
            change,
        })
    }

    /// Parent public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Compressed parent public key
    pub fn compressed(&self) -> [u8; COMPRESSED_PK_LEN] {
        compress(&self.public_key)
    }

    /// Chain code
    pub fn chain_code(&self) -> &[u8; CHAIN_CODE_LEN] {
        &self.chain_code
    }

    /// Change element of the exported path
    pub fn change(&self) -> u32 {
        self.change
    }

    /// Derive the child at `index`
    pub fn child(&self, index: u32) -> Result<ChildKey, HostError> {
        let public_key = derive_point(&self.public_key, &self.chain_code, index)?;
        Ok(ChildKey {
            public_key,
            path_suffix: PathSuffix {
                change: self.change,
                index,
            },
        })
    }
}

/// Derive the compressed child public key at `index` from a SEC1 encoded
/// parent key and its chain code.
///
/// Fails with [`HostError::InvalidChildKey`] when the tweak is out of range
/// or the child is the point at infinity; callers decide whether to move on
/// to the next index.
pub fn derive_child(
    parent_pubkey: &[u8],
    chain_code: &[u8; CHAIN_CODE_LEN],
    index: u32,
) -> Result<[u8; COMPRESSED_PK_LEN], HostError> {
    let parent =
        PublicKey::from_sec1_bytes(parent_pubkey).map_err(|_| HostError::InvalidPublicKey)?;
    derive_point(&parent, chain_code, index)
}

fn derive_point(
    parent: &PublicKey,
    chain_code: &[u8; CHAIN_CODE_LEN],
    index: u32,
) -> Result<[u8; COMPRESSED_PK_LEN], HostError> {
    if index & HARDENED != 0 {
        return Err(HostError::HardenedIndex(index));
    }

    let mut mac = HmacSha512::new_from_slice(chain_code)
        .map_err(|_| HostError::InvalidChainCode(chain_code.len()))?;
    mac.update(&compress(parent));
    mac.update(&index.to_be_bytes());
    let intermediary = mac.finalize().into_bytes();

    // I_R is discarded
    let tweak =
        NonZeroScalar::try_from(&intermediary[..32]).map_err(|_| HostError::InvalidChildKey)?;
    let point = ProjectivePoint::GENERATOR * *tweak + parent.to_projective();

    // from_affine rejects the identity
    let child =
        PublicKey::from_affine(point.to_affine()).map_err(|_| HostError::InvalidChildKey)?;

    Ok(compress(&child))
}

fn compress(key: &PublicKey) -> [u8; COMPRESSED_PK_LEN] {
    let encoded = key.to_encoded_point(true);
    let mut out = [0u8; COMPRESSED_PK_LEN];
    out.copy_from_slice(encoded.as_bytes());
    out
}
