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
//! In-memory emulation of the Avalanche app used by the session tests

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::elliptic_curve::PrimeField;
use k256::{NonZeroScalar, SecretKey};
use ledger_transport::{APDUAnswer, APDUCommand, Exchange};
use sha2::Sha512;

use ledger_avalanche::{double_sha256, hash160, params};

/// Chain code of the emulated change-level key
pub const CHAIN_CODE: [u8; 32] = [0x42; 32];

const SW_OK: u16 = 0x9000;
const SW_REJECTED: u16 = 0x6985;
const SW_CLA_NOT_SUPPORTED: u16 = 0x6e00;
const SW_WRONG_DATA: u16 = 0x6a80;

/// Frame as received by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

/// Misbehaviour to inject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    None,
    /// User declines the address prompt
    RejectAddress,
    /// User declines the signature prompt (first signing frame)
    RejectSignature,
    /// The echoed / computed hash is altered
    CorruptHash,
    /// Another app is open
    AppClosed,
    /// Another app answers the version request
    OtherApp,
    /// App info reply cut after the app name
    TruncatedAppInfo,
    /// Transport fails with this text on every signing frame
    TransportText(&'static str),
}

#[derive(Debug, thiserror::Error)]
#[error("mock transport: {0}")]
pub struct MockError(pub String);

struct State {
    secret: SecretKey,
    fault: Fault,
    frames: Vec<Recorded>,
    tx: Vec<u8>,
    hash: Option<[u8; 32]>,
}

/// Emulated device, clones share state
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<State>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_fault(Fault::None)
    }

    pub fn with_fault(fault: Fault) -> Self {
        let secret = SecretKey::from_slice(&[0x11; 32]).unwrap();
        MockDevice {
            state: Arc::new(Mutex::new(State {
                secret,
                fault,
                frames: vec![],
                tx: vec![],
                hash: None,
            })),
        }
    }

    /// Frames received so far
    pub fn frames(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().frames.clone()
    }

    /// Frames received with `ins`
    pub fn frames_with(&self, ins: u8) -> Vec<Recorded> {
        self.frames().into_iter().filter(|f| f.ins == ins).collect()
    }

    /// Transaction bytes reassembled from the uploaded chunks
    pub fn uploaded_tx(&self) -> Vec<u8> {
        self.state.lock().unwrap().tx.clone()
    }

    /// Uncompressed change-level public key
    pub fn public_key(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state.secret.public_key().to_encoded_point(false).as_bytes().to_vec()
    }

    fn handle(&self, cmd: Recorded) -> Result<(Vec<u8>, u16), MockError> {
        let mut state = self.state.lock().unwrap();
        state.frames.push(cmd.clone());

        if state.fault == Fault::AppClosed && cmd.cla == params::CLA {
            return Ok((vec![], SW_CLA_NOT_SUPPORTED));
        }

        match (cmd.cla, cmd.ins) {
            // dashboard app info
            (params::CLA_DASHBOARD, params::INS_APP_INFO) => {
                let mut data = vec![0x01, 9];
                data.extend_from_slice(b"Avalanche");
                if state.fault == Fault::TruncatedAppInfo {
                    return Ok((data, SW_OK));
                }
                data.push(5);
                data.extend_from_slice(b"0.5.2");
                data.extend_from_slice(&[1, 0x00]);
                Ok((data, SW_OK))
            }
            (params::CLA, params::INS_VERSION) => {
                let mut data = vec![0, 5, 2, 0xab, 0xcd, 0x00];
                if state.fault == Fault::OtherApp {
                    data.extend_from_slice(b"Bitcoin");
                } else {
                    data.extend_from_slice(b"Avalanche");
                }
                Ok((data, SW_OK))
            }
            (params::CLA, params::INS_PROMPT_PUBLIC_KEY) => {
                if state.fault == Fault::RejectAddress {
                    return Ok((vec![], SW_REJECTED));
                }
                // hrp followed by a five element path
                let path = parse_path(&cmd.data[cmd.data.len() - 21..]);
                let child = child_key(&state.secret, path[4]);
                let pk = child.verifying_key().to_encoded_point(true);
                Ok((hash160(pk.as_bytes()).to_vec(), SW_OK))
            }
            (params::CLA, params::INS_PROMPT_EXT_PUBLIC_KEY) => {
                let path = parse_path(&cmd.data);
                if path.len() != 4 {
                    return Ok((vec![], SW_WRONG_DATA));
                }
                let pk = state.secret.public_key().to_encoded_point(false);
                let mut data = vec![pk.as_bytes().len() as u8];
                data.extend_from_slice(pk.as_bytes());
                data.push(CHAIN_CODE.len() as u8);
                data.extend_from_slice(&CHAIN_CODE);
                Ok((data, SW_OK))
            }
            (params::CLA, params::INS_SIGN_HASH) => match cmd.p1 {
                params::P1_FIRST => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&cmd.data[1..33]);
                    state.hash = Some(hash);
                    if state.fault == Fault::CorruptHash {
                        hash[0] ^= 0xff;
                    }
                    Ok((hash.to_vec(), SW_OK))
                }
                params::P1_HASH_SIGN_NEXT | params::P1_HASH_SIGN_LAST => {
                    sign_frame(&mut state, &cmd, params::P1_HASH_SIGN_LAST)
                }
                _ => Ok((vec![], SW_WRONG_DATA)),
            },
            (params::CLA, params::INS_SIGN_TRANSACTION) => match cmd.p1 {
                params::P1_FIRST => {
                    state.tx.clear();
                    state.hash = None;
                    Ok((vec![], SW_OK))
                }
                params::P1_TX_CHUNK_NEXT => {
                    state.tx.extend_from_slice(&cmd.data);
                    Ok((vec![], SW_OK))
                }
                params::P1_TX_CHUNK_LAST => {
                    state.tx.extend_from_slice(&cmd.data);
                    let mut hash = double_sha256(&state.tx);
                    state.hash = Some(hash);
                    if state.fault == Fault::CorruptHash {
                        hash[31] ^= 0x01;
                    }
                    Ok((hash.to_vec(), SW_OK))
                }
                params::P1_TX_SIGN_NEXT | params::P1_TX_SIGN_LAST => {
                    sign_frame(&mut state, &cmd, params::P1_TX_SIGN_LAST)
                }
                _ => Ok((vec![], SW_WRONG_DATA)),
            },
            _ => Ok((vec![], 0x6d00)),
        }
    }
}

fn sign_frame(state: &mut State, cmd: &Recorded, last: u8) -> Result<(Vec<u8>, u16), MockError> {
    if let Fault::TransportText(text) = state.fault {
        return Err(MockError(text.to_string()));
    }
    if state.fault == Fault::RejectSignature {
        return Ok((vec![], SW_REJECTED));
    }

    let hash = match state.hash {
        Some(hash) => hash,
        None => return Ok((vec![], SW_WRONG_DATA)),
    };
    let path = parse_path(&cmd.data);
    let key = child_key(&state.secret, path[1]);
    let (sig, recid) = key.sign_prehash_recoverable(&hash).unwrap();

    let mut data = sig.to_bytes().to_vec();
    data.push(recid.to_byte());

    if cmd.p1 == last {
        state.hash = None;
    }
    Ok((data, SW_OK))
}

fn child_key(secret: &SecretKey, index: u32) -> SigningKey {
    let parent = secret.public_key().to_encoded_point(true);

    let mut mac = Hmac::<Sha512>::new_from_slice(&CHAIN_CODE).unwrap();
    mac.update(parent.as_bytes());
    mac.update(&index.to_be_bytes());
    let i = mac.finalize().into_bytes();

    let tweak = NonZeroScalar::try_from(&i[..32]).unwrap();
    let child = *secret.to_nonzero_scalar() + *tweak;
    SigningKey::from_bytes(&child.to_repr()).unwrap()
}

fn parse_path(data: &[u8]) -> Vec<u32> {
    let len = data[0] as usize;
    (0..len)
        .map(|i| {
            let at = 1 + i * 4;
            u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
                & !params::HARDENED
        })
        .collect()
}

#[async_trait]
impl Exchange for MockDevice {
    type Error = MockError;
    type AnswerType = Vec<u8>;

    async fn exchange<I>(
        &self,
        command: &APDUCommand<I>,
    ) -> Result<APDUAnswer<Self::AnswerType>, Self::Error>
    where
        I: Deref<Target = [u8]> + Send + Sync,
    {
        let recorded = Recorded {
            cla: command.cla,
            ins: command.ins,
            p1: command.p1,
            p2: command.p2,
            data: command.data.deref().to_vec(),
        };
        assert!(recorded.data.len() <= 255, "frame payload too large");

        // let other tasks run between frames, like a real round trip
        tokio::task::yield_now().await;

        let (mut answer, sw) = self.handle(recorded)?;
        answer.extend_from_slice(&sw.to_be_bytes());

        APDUAnswer::from_answer(answer).map_err(|_| MockError("short answer".to_string()))
    }
}
