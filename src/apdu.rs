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
//! Frame construction and status handling

use ledger_transport::APDUCommand;

use crate::error::{AvaxError, HostError};
use crate::params::{StatusWord, MAX_PAYLOAD_LEN};

/// Builder for a single command frame.
///
/// Every frame owns its payload; nothing is shared between frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    cla: u8,
    ins: u8,
    p1: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Start a frame with P1 = 0 and no payload, P2 is always 0
    pub fn new(cla: u8, ins: u8) -> Self {
        Frame {
            cla,
            ins,
            p1: 0,
            payload: Vec::new(),
        }
    }

    /// Set P1
    pub fn p1(mut self, p1: u8) -> Self {
        self.p1 = p1;
        self
    }

    /// Append a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Append bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.payload.extend_from_slice(data);
        self
    }

    /// Finish the frame, checking the payload fits the length byte
    pub fn build(self) -> Result<APDUCommand<Vec<u8>>, HostError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(HostError::PayloadTooLarge(self.payload.len()));
        }

        Ok(APDUCommand {
            cla: self.cla,
            ins: self.ins,
            p1: self.p1,
            p2: 0,
            data: self.payload,
        })
    }
}

/// What the user is asked to approve during an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Prompt {
    None,
    KeyProvide,
    Signature,
}

impl Prompt {
    fn rejected<E: std::error::Error>(self) -> Option<AvaxError<E>> {
        match self {
            Prompt::None => None,
            Prompt::KeyProvide => Some(AvaxError::RejectedKeyProvide),
            Prompt::Signature => Some(AvaxError::RejectedSignature),
        }
    }
}

/// Map a status word onto the error taxonomy
pub(crate) fn check_status<E: std::error::Error>(
    retcode: u16,
    prompt: Prompt,
) -> Result<(), AvaxError<E>> {
    let err = match StatusWord::from_u16(retcode) {
        Some(StatusWord::NoError) => return Ok(()),
        Some(StatusWord::ConditionsNotSatisfied) => {
            prompt.rejected().unwrap_or(AvaxError::Apdu(retcode))
        }
        Some(StatusWord::Locked) | Some(StatusWord::SecurityStatus) => AvaxError::DeviceLocked,
        Some(StatusWord::InsNotSupported)
        | Some(StatusWord::ClaNotSupported)
        | Some(StatusWord::AppNotOpen)
        | Some(StatusWord::AppNotOpenDashboard) => AvaxError::AppNotRunning,
        None => {
            log::warn!("unexpected status word {:#06x}", retcode);
            AvaxError::Apdu(retcode)
        }
    };
    Err(err)
}

const REJECTED_MARKERS: &[&str] = &[
    "6985",
    "conditions not satisfied",
    "conditions of use not satisfied",
];
const LOCKED_MARKERS: &[&str] = &["5515", "6982", "locked", "security status not satisfied"];
const APP_MARKERS: &[&str] = &[
    "6e00",
    "6d00",
    "6511",
    "6d02",
    "cla not supported",
    "ins not supported",
    "app does not seem to be open",
];
const DISCONNECTED_MARKERS: &[&str] = &["device not found", "not connected"];

/// Classify an opaque transport error by its text.
///
/// Used only when the transport does not hand back a status word.
pub(crate) fn classify_transport<E: std::error::Error>(err: E, prompt: Prompt) -> AvaxError<E> {
    let text = err.to_string().to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));

    if has(REJECTED_MARKERS) {
        if let Some(rejected) = prompt.rejected() {
            return rejected;
        }
    }
    if has(LOCKED_MARKERS) {
        return AvaxError::DeviceLocked;
    }
    if has(APP_MARKERS) {
        return AvaxError::AppNotRunning;
    }
    if has(DISCONNECTED_MARKERS) {
        return AvaxError::NotConnected;
    }
    AvaxError::Transport(err)
}
