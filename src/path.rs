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
//! BIP32 path serialization

use byteorder::{BigEndian, ByteOrder};

use crate::error::HostError;
use crate::params::{HARDENED, MAX_PATH_DEPTH};

/// Change / address index pair appended to the account prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathSuffix {
    /// 0 for receiving addresses, 1 for internal (change) addresses
    pub change: u32,
    /// Address index
    pub index: u32,
}

impl PathSuffix {
    /// Receiving address at `index` (`0/index`)
    pub const fn receiving(index: u32) -> Self {
        PathSuffix { change: 0, index }
    }

    /// Internal address at `index` (`1/index`)
    pub const fn internal(index: u32) -> Self {
        PathSuffix { change: 1, index }
    }

    /// Path elements `[change, index]`
    pub fn to_path(self) -> [u32; 2] {
        [self.change, self.index]
    }
}

/// Serialize `path` as `[len][u32 BE]*`, setting the hardened bit on the
/// first `harden_count` elements.
pub fn serialize_path(path: &[u32], harden_count: usize) -> Result<Vec<u8>, HostError> {
    if path.len() > MAX_PATH_DEPTH {
        return Err(HostError::PathTooLong(path.len()));
    }

    let mut m = vec![0u8; 1 + path.len() * 4];
    m[0] = path.len() as u8;

    for (i, element) in path.iter().enumerate() {
        let value = if i < harden_count {
            HARDENED | element
        } else {
            *element
        };
        let pos = 1 + i * 4;
        BigEndian::write_u32(&mut m[pos..pos + 4], value);
    }

    Ok(m)
}

/// Serialize `prefix` followed by `suffix`
pub fn serialize_full_path(
    prefix: &[u32],
    suffix: PathSuffix,
    harden_count: usize,
) -> Result<Vec<u8>, HostError> {
    let path: Vec<u32> = prefix.iter().copied().chain(suffix.to_path()).collect();
    serialize_path(&path, harden_count)
}
