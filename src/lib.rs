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
//! Support library for the Avalanche Ledger Nano S/X app
//!
//! The device exports a single extended public key at
//! `m/44'/9000'/0'/0`; every receiving address is derived from it on the
//! host. Signing requests reference keys by address index below the
//! account prefix `m/44'/9000'/0'`.

#![deny(trivial_casts, trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(missing_docs)]

use std::fmt;
use std::str;
use std::sync::Arc;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use ledger_transport::{APDUCommand, Exchange};
use log::{debug, trace, warn};
use tokio::sync::Mutex;

mod address;
mod apdu;
mod config;
mod derive;
mod error;
pub mod params;
mod path;

pub use address::{double_sha256, hash160, sha256, Address, TxDigest, SHORT_ID_LEN};
pub use apdu::Frame;
pub use config::{AppConfig, ChunkFlags, Instructions, SignFlags};
pub use derive::{derive_child, ChildKey, ExtendedPublicKey};
pub use error::{AvaxError, HostError};
pub use ledger_zondax_generic::AppInfo;
pub use path::{serialize_full_path, serialize_path, PathSuffix};

use apdu::Prompt;
use params::SIGNATURE_LEN;

/// Change element of the exported extended public key
const XPUB_CHANGE: u32 = 0;

/// Avalanche App Version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Version Major
    pub major: u8,
    /// Version Minor
    pub minor: u8,
    /// Version Patch
    pub patch: u8,
    /// Commit hash (hex)
    pub commit: String,
    /// Application name
    pub name: String,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Signature returned by the device (r, s, v)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Key that produced the signature
    pub path_suffix: PathSuffix,
    /// r value
    pub r: [u8; 32],
    /// s value
    pub s: [u8; 32],
    /// recovery id
    pub v: u8,
}

impl Signature {
    /// `r || s || v`
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }

    /// Convert into a `k256` ECDSA signature (drops v)
    pub fn to_ecdsa(&self) -> Result<k256::ecdsa::Signature, k256::ecdsa::Error> {
        k256::ecdsa::Signature::from_scalars(self.r, self.s)
    }
}

/// Result of a transaction signing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Transaction hash confirmed by both host and device
    pub hash: [u8; 32],
    /// One signature per requested index, in request order
    pub signatures: Vec<Signature>,
}

/// A signing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningRequest {
    /// Sign a precomputed hash
    Hash {
        /// Hash to sign
        hash: [u8; 32],
        /// Receiving address indices to sign with
        indices: Vec<u32>,
    },
    /// Upload and sign a serialized transaction
    Transaction {
        /// Serialized unsigned transaction
        tx: Vec<u8>,
        /// Receiving address indices to sign with
        indices: Vec<u32>,
        /// Change output path shown to the user
        change_path: Option<PathSuffix>,
    },
}

/// Result of [`AvalancheApp::sign`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signed {
    /// Signatures over a hash
    Hash(Vec<Signature>),
    /// Signed transaction
    Transaction(SignedTransaction),
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport released
    Disconnected,
    /// Transport held, extended public key not fetched yet
    Connected,
    /// Extended public key cached
    Ready,
}

struct Session<E> {
    transport: Option<E>,
    xpub: Option<Arc<ExtendedPublicKey>>,
}

impl<E> Session<E>
where
    E: Exchange,
    E::Error: std::error::Error,
{
    fn transport(&self) -> Result<&E, AvaxError<E::Error>> {
        self.transport.as_ref().ok_or(AvaxError::NotConnected)
    }
}

/// Avalanche App
///
/// Every operation holds the transport for its whole duration, so frames
/// of concurrent calls never interleave.
pub struct AvalancheApp<E> {
    config: AppConfig,
    session: Mutex<Session<E>>,
}

impl<E> AvalancheApp<E>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    /// Create a new app handle with the default configuration
    pub fn new(transport: E) -> Self {
        AvalancheApp {
            config: AppConfig::default(),
            session: Mutex::new(Session {
                transport: Some(transport),
                xpub: None,
            }),
        }
    }

    /// Create a new app handle with a custom configuration
    pub fn with_config(transport: E, config: AppConfig) -> Result<Self, HostError> {
        config.validate()?;
        Ok(AvalancheApp {
            config,
            session: Mutex::new(Session {
                transport: Some(transport),
                xpub: None,
            }),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        let session = self.session.lock().await;
        match (&session.transport, &session.xpub) {
            (None, _) => SessionState::Disconnected,
            (Some(_), None) => SessionState::Connected,
            (Some(_), Some(_)) => SessionState::Ready,
        }
    }

    /// Retrieve the app version.
    ///
    /// Fails with [`AvaxError::AppNotRunning`] when the answering app is not
    /// the configured one.
    pub async fn version(&self) -> Result<Version, AvaxError<E::Error>> {
        debug!("Requesting version");
        let session = self.session.lock().await;
        let transport = session.transport()?;

        let command = Frame::new(self.config.cla, self.config.ins.version).build()?;
        let response = send(transport, command, Prompt::None).await?;

        let version = parse_version::<E::Error>(&response)?;
        if version.name != self.config.app_name {
            warn!("{} is running instead of {}", version.name, self.config.app_name);
            return Err(AvaxError::AppNotRunning);
        }
        Ok(version)
    }

    /// Retrieve dashboard level app information (name, version, flags)
    pub async fn app_info(&self) -> Result<AppInfo, AvaxError<E::Error>> {
        debug!("Requesting app info");
        let session = self.session.lock().await;
        let transport = session.transport()?;

        let command = Frame::new(params::CLA_DASHBOARD, params::INS_APP_INFO).build()?;
        let response = send(transport, command, Prompt::None).await?;

        parse_app_info::<E::Error>(&response)
    }

    /// Display the receiving address at `index` on the device and return it
    /// once the user confirms
    pub async fn address(&self, hrp: &str, index: u32) -> Result<Address, AvaxError<E::Error>> {
        self.address_at(hrp, PathSuffix::receiving(index)).await
    }

    /// Display the address at `suffix` on the device and return it once the
    /// user confirms
    pub async fn address_at(
        &self,
        hrp: &str,
        suffix: PathSuffix,
    ) -> Result<Address, AvaxError<E::Error>> {
        debug!("Requesting address {}/{}", suffix.change, suffix.index);
        let session = self.session.lock().await;
        let transport = session.transport()?;

        let path = self.full_path(suffix)?;
        let command = Frame::new(self.config.cla, self.config.ins.prompt_public_key)
            .p1(self.config.p1_prompt_address)
            .bytes(hrp.as_bytes())
            .bytes(&path)
            .build()?;
        let response = send(transport, command, Prompt::KeyProvide).await?;

        Ok(Address {
            short_id: parse_short_id::<E::Error>(&response)?,
            path_suffix: suffix,
        })
    }

    /// Extended public key of the account, fetched once per session
    pub async fn extended_public_key(
        &self,
    ) -> Result<Arc<ExtendedPublicKey>, AvaxError<E::Error>> {
        let mut session = self.session.lock().await;
        if let Some(xpub) = &session.xpub {
            return Ok(xpub.clone());
        }

        debug!("Requesting extended public key");
        let transport = session.transport()?;

        let mut account = self.config.account_path.clone();
        account.push(XPUB_CHANGE);
        let path = serialize_path(&account, self.config.harden_count)?;
        let command = Frame::new(self.config.cla, self.config.ins.prompt_ext_public_key)
            .bytes(&path)
            .build()?;
        let response = send(transport, command, Prompt::KeyProvide).await?;

        let xpub = Arc::new(parse_extended_public_key::<E::Error>(
            &response,
            XPUB_CHANGE,
        )?);
        session.xpub = Some(xpub.clone());
        Ok(xpub)
    }

    /// Derive the receiving keys at `indices` on the host
    pub async fn derive_children(
        &self,
        indices: &[u32],
    ) -> Result<Vec<ChildKey>, AvaxError<E::Error>> {
        // the session lock is released here, derivation runs without it
        let xpub = self.extended_public_key().await?;

        indices
            .iter()
            .map(|index| xpub.child(*index).map_err(AvaxError::from))
            .collect()
    }

    /// Receiving addresses at `indices`, derived on the host
    pub async fn addresses(&self, indices: &[u32]) -> Result<Vec<Address>, AvaxError<E::Error>> {
        let children = self.derive_children(indices).await?;
        Ok(children.iter().map(Address::from).collect())
    }

    /// Sign `hash` with the receiving keys at `indices`.
    ///
    /// Signatures are returned in the order of `indices`.
    pub async fn sign_hash(
        &self,
        hash: &[u8; 32],
        indices: &[u32],
    ) -> Result<Vec<Signature>, AvaxError<E::Error>> {
        self.sign_hash_at(hash, &receiving(indices)).await
    }

    /// Sign `hash` with the keys at `paths` (receiving or internal).
    ///
    /// Signatures are returned in the order of `paths`.
    pub async fn sign_hash_at(
        &self,
        hash: &[u8; 32],
        paths: &[PathSuffix],
    ) -> Result<Vec<Signature>, AvaxError<E::Error>> {
        let count = check_indices(paths)?;

        debug!("Signing hash {} with {} keys", hex::encode(hash), count);
        let session = self.session.lock().await;
        let transport = session.transport()?;

        let prefix = serialize_path(&self.config.account_path, self.config.harden_count)?;
        let command = Frame::new(self.config.cla, self.config.ins.sign_hash)
            .p1(self.config.hash_flags.first)
            .byte(count)
            .bytes(hash)
            .bytes(&prefix)
            .build()?;
        let echoed = send(transport, command, Prompt::Signature).await?;
        verify_hash::<E::Error>(hash, &echoed)?;

        self.collect_signatures(
            transport,
            self.config.ins.sign_hash,
            self.config.hash_flags,
            paths,
        )
        .await
    }

    /// Upload `tx` and sign it with the receiving keys at `indices`.
    ///
    /// The hash returned by the device after the last chunk must match the
    /// host computed digest before any signature is requested. A failure in
    /// any phase aborts the whole session; retries must start over.
    pub async fn sign_transaction(
        &self,
        tx: &[u8],
        indices: &[u32],
        change_path: Option<PathSuffix>,
    ) -> Result<SignedTransaction, AvaxError<E::Error>> {
        self.sign_transaction_at(tx, &receiving(indices), change_path).await
    }

    /// Same as [`AvalancheApp::sign_transaction`] with the signing keys
    /// given as full suffixes, so internal (change) keys can sign too
    pub async fn sign_transaction_at(
        &self,
        tx: &[u8],
        paths: &[PathSuffix],
        change_path: Option<PathSuffix>,
    ) -> Result<SignedTransaction, AvaxError<E::Error>> {
        if tx.is_empty() {
            return Err(HostError::EmptyTransaction.into());
        }
        let count = check_indices(paths)?;

        debug!("Signing transaction ({} bytes) with {} keys", tx.len(), count);
        let session = self.session.lock().await;
        let transport = session.transport()?;

        let ins = self.config.ins.sign_transaction;
        let prefix = serialize_path(&self.config.account_path, self.config.harden_count)?;
        let mut preamble = Frame::new(self.config.cla, ins)
            .p1(self.config.tx_flags.first)
            .byte(count)
            .bytes(&prefix);
        if let Some(change) = change_path {
            preamble = preamble.bytes(&self.full_path(change)?);
        }
        send(transport, preamble.build()?, Prompt::Signature).await?;

        let chunks = tx.chunks(self.config.chunk_size);
        let last = chunks.len() - 1;
        let mut response = Vec::new();
        for (i, chunk) in chunks.enumerate() {
            let p1 = if i == last {
                self.config.chunk_flags.last
            } else {
                self.config.chunk_flags.next
            };
            let command = Frame::new(self.config.cla, ins)
                .p1(p1)
                .bytes(chunk)
                .build()?;
            response = send(transport, command, Prompt::Signature).await?;
        }

        let found = response
            .get(..32)
            .ok_or(AvaxError::InvalidResponse("missing transaction hash"))?;
        let hash = self.config.tx_digest.hash(tx);
        verify_hash::<E::Error>(&hash, found)?;

        let signatures = self
            .collect_signatures(transport, ins, self.config.tx_flags, paths)
            .await?;

        Ok(SignedTransaction { hash, signatures })
    }

    /// Dispatch a [`SigningRequest`]
    pub async fn sign(&self, request: &SigningRequest) -> Result<Signed, AvaxError<E::Error>> {
        match request {
            SigningRequest::Hash { hash, indices } => {
                self.sign_hash(hash, indices).await.map(Signed::Hash)
            }
            SigningRequest::Transaction {
                tx,
                indices,
                change_path,
            } => self
                .sign_transaction(tx, indices, *change_path)
                .await
                .map(Signed::Transaction),
        }
    }

    /// Release the transport. Later device operations fail with
    /// [`AvaxError::NotConnected`]; calling this again is a no-op.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.transport.take().is_some() {
            debug!("Disconnected");
        }
        session.xpub = None;
    }

    fn full_path(&self, suffix: PathSuffix) -> Result<Vec<u8>, HostError> {
        serialize_full_path(&self.config.account_path, suffix, self.config.harden_count)
    }

    /// One exchange per key, P1 marks whether more will follow
    async fn collect_signatures(
        &self,
        transport: &E,
        ins: u8,
        flags: SignFlags,
        paths: &[PathSuffix],
    ) -> Result<Vec<Signature>, AvaxError<E::Error>> {
        let mut signatures = Vec::with_capacity(paths.len());

        for (i, suffix) in paths.iter().copied().enumerate() {
            let p1 = if i == paths.len() - 1 {
                flags.sign_last
            } else {
                flags.sign_next
            };

            let path = serialize_path(&suffix.to_path(), 0)?;
            let command = Frame::new(self.config.cla, ins)
                .p1(p1)
                .bytes(&path)
                .build()?;
            let response = send(transport, command, Prompt::Signature).await?;

            let signature =
                parse_signature::<E::Error>(&response, self.config.signature_trailer, suffix)?;
            debug!("{}/{} signed", suffix.change, suffix.index);
            signatures.push(signature);
        }

        Ok(signatures)
    }
}

async fn send<E>(
    transport: &E,
    command: APDUCommand<Vec<u8>>,
    prompt: Prompt,
) -> Result<Vec<u8>, AvaxError<E::Error>>
where
    E: Exchange + Send + Sync,
    E::Error: std::error::Error,
{
    trace!(
        "=> {:02x}{:02x}{:02x}{:02x} {}",
        command.cla,
        command.ins,
        command.p1,
        command.p2,
        hex::encode(&command.data)
    );

    let answer = transport
        .exchange(&command)
        .await
        .map_err(|err| apdu::classify_transport(err, prompt))?;

    trace!("<= {:04x} {}", answer.retcode(), hex::encode(answer.data()));
    apdu::check_status::<E::Error>(answer.retcode(), prompt)?;

    Ok(answer.data().to_vec())
}

fn receiving(indices: &[u32]) -> Vec<PathSuffix> {
    indices.iter().copied().map(PathSuffix::receiving).collect()
}

fn check_indices<T>(indices: &[T]) -> Result<u8, HostError> {
    if indices.is_empty() {
        return Err(HostError::NoIndices);
    }
    u8::try_from(indices.len()).map_err(|_| HostError::TooManyIndices(indices.len()))
}

fn verify_hash<E: std::error::Error>(expected: &[u8], found: &[u8]) -> Result<(), AvaxError<E>> {
    if expected != found {
        warn!(
            "returned hash {} does not match requested {}",
            hex::encode(found),
            hex::encode(expected)
        );
        return Err(AvaxError::HashMismatch {
            expected: hex::encode(expected),
            found: hex::encode(found),
        });
    }
    Ok(())
}

fn parse_version<E: std::error::Error>(response: &[u8]) -> Result<Version, AvaxError<E>> {
    if response.len() < 3 {
        return Err(AvaxError::InvalidResponse("version too short"));
    }

    // [major][minor][patch][commit..]0x00[name..]
    let mut rem = response[3..].split(|b| *b == 0x00);
    let commit = hex::encode(rem.next().unwrap_or(&[]));
    let name = str::from_utf8(rem.next().unwrap_or(&[]))?.to_owned();

    Ok(Version {
        major: response[0],
        minor: response[1],
        patch: response[2],
        commit,
        name,
    })
}

/// `[format][name_len][name][version_len][version][flags_len][flags]`
fn parse_app_info<E: std::error::Error>(response: &[u8]) -> Result<AppInfo, AvaxError<E>> {
    if response.first() != Some(&1) {
        return Err(AvaxError::InvalidResponse("unknown app info format"));
    }

    let mut at = 1;
    let mut fields = [&[][..]; 3];
    for field in fields.iter_mut() {
        *field = length_prefixed(response, &mut at)
            .ok_or(AvaxError::InvalidResponse("truncated app info"))?;
    }
    let [name, version, flag_bytes] = fields;
    let flags = flag_bytes.first().copied().unwrap_or(0);

    Ok(AppInfo {
        app_name: str::from_utf8(name)?.to_owned(),
        app_version: str::from_utf8(version)?.to_owned(),
        flag_len: flag_bytes.len() as u8,
        flags_value: flags,
        flag_recovery: flags & 0x01 != 0,
        flag_signed_mcu_code: flags & 0x02 != 0,
        flag_onboarded: flags & 0x04 != 0,
        flag_pin_validated: flags & 0x80 != 0,
    })
}

/// `[len][bytes]` at `*at`, advancing past it
fn length_prefixed<'a>(response: &'a [u8], at: &mut usize) -> Option<&'a [u8]> {
    let len = *response.get(*at)? as usize;
    let value = response.get(*at + 1..*at + 1 + len)?;
    *at += 1 + len;
    Some(value)
}

/// Firmware either returns the short id or the public key itself
fn parse_short_id<E: std::error::Error>(
    response: &[u8],
) -> Result<[u8; SHORT_ID_LEN], AvaxError<E>> {
    match response.len() {
        SHORT_ID_LEN => {
            let mut short_id = [0u8; SHORT_ID_LEN];
            short_id.copy_from_slice(response);
            Ok(short_id)
        }
        33 | 65 => {
            let key = k256::PublicKey::from_sec1_bytes(response)
                .map_err(|_| AvaxError::Host(HostError::InvalidPublicKey))?;
            Ok(hash160(key.to_encoded_point(true).as_bytes()))
        }
        _ => Err(AvaxError::InvalidResponse("unexpected address length")),
    }
}

/// `[pk_len][pk][cc_len][cc]`
fn parse_extended_public_key<E: std::error::Error>(
    response: &[u8],
    change: u32,
) -> Result<ExtendedPublicKey, AvaxError<E>> {
    let mut at = 0;
    let public_key = length_prefixed(response, &mut at)
        .ok_or(AvaxError::InvalidResponse("truncated extended public key"))?;
    let chain_code = length_prefixed(response, &mut at)
        .ok_or(AvaxError::InvalidResponse("truncated extended public key"))?;

    Ok(ExtendedPublicKey::new(public_key, chain_code, change)?)
}

fn parse_signature<E: std::error::Error>(
    response: &[u8],
    trailer: usize,
    path_suffix: PathSuffix,
) -> Result<Signature, AvaxError<E>> {
    let end = response
        .len()
        .checked_sub(trailer)
        .ok_or(AvaxError::InvalidSignature)?;
    let raw = &response[..end];
    if raw.len() < SIGNATURE_LEN {
        return Err(AvaxError::InvalidSignature);
    }

    let mut r = [0u8; 32];
    r.copy_from_slice(&raw[..32]);
    let mut s = [0u8; 32];
    s.copy_from_slice(&raw[32..64]);

    Ok(Signature {
        path_suffix,
        r,
        s,
        v: raw[64],
    })
}
