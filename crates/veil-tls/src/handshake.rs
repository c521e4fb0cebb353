use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use veil_core::{codec_from_slice, codec_to_vec, MAX_RECORD_PAYLOAD};

pub const HELLO_RANDOM_LEN: usize = 32;
pub const VERIFY_DATA_LEN: usize = 32;
pub const TRANSCRIPT_HASH_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("malformed flight payload")]
    Malformed,
    #[error("flight of {0} bytes exceeds record capacity")]
    FlightTooLarge(usize),
    #[error("peer offered unsupported wire version {0:#06x}")]
    UnsupportedVersion(u16),
    #[error("no mutually acceptable cipher suite")]
    SuiteMismatch,
    #[error("finished message verification failed")]
    FinishedVerification,
}

/// Client -> Server opening flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientHello {
    pub version: u16,
    pub cipher_suites: Vec<u16>,
    pub client_random: [u8; HELLO_RANDOM_LEN],
    pub key_share: Vec<u8>,
}

/// Server -> Client response flight. `verify_data` is the server's key
/// confirmation over the transcript; the remaining fields form the core that
/// both sides feed into the transcript before the MAC is computed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerHello {
    pub version: u16,
    pub cipher_suite: u16,
    pub server_random: [u8; HELLO_RANDOM_LEN],
    pub key_share: Vec<u8>,
    pub certificate_chain: Vec<Vec<u8>>,
    pub verify_data: Vec<u8>,
}

impl ServerHello {
    /// Encoding of everything except `verify_data`, as bound into the
    /// transcript. The receiver reconstructs this from the decoded fields,
    /// so the encoding must be deterministic.
    pub fn encode_core(&self) -> Result<Vec<u8>, HandshakeError> {
        #[derive(Serialize)]
        struct Core<'a> {
            version: u16,
            cipher_suite: u16,
            server_random: &'a [u8; HELLO_RANDOM_LEN],
            key_share: &'a [u8],
            certificate_chain: &'a [Vec<u8>],
        }

        codec_to_vec(&Core {
            version: self.version,
            cipher_suite: self.cipher_suite,
            server_random: &self.server_random,
            key_share: &self.key_share,
            certificate_chain: &self.certificate_chain,
        })
        .map_err(|_| HandshakeError::Malformed)
    }
}

/// Client -> Server closing flight: key confirmation completing the
/// exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientFinished {
    pub verify_data: Vec<u8>,
}

/// One handshake message as carried in a handshake record payload. The
/// envelope keeps flight identification explicit on the wire so an
/// out-of-order message can never masquerade as the expected one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Flight {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    ClientFinished(ClientFinished),
}

impl Flight {
    pub fn name(&self) -> &'static str {
        match self {
            Flight::ClientHello(_) => "client hello",
            Flight::ServerHello(_) => "server hello",
            Flight::ClientFinished(_) => "client finished",
        }
    }
}

pub fn encode_flight(flight: &Flight) -> Result<Vec<u8>, HandshakeError> {
    let bytes = codec_to_vec(flight).map_err(|_| HandshakeError::Malformed)?;
    if bytes.len() > MAX_RECORD_PAYLOAD {
        return Err(HandshakeError::FlightTooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode_flight(bytes: &[u8]) -> Result<Flight, HandshakeError> {
    codec_from_slice(bytes).map_err(|_| HandshakeError::Malformed)
}

/// Running hash over every handshake byte exchanged so far.
#[derive(Debug, Clone)]
pub struct Transcript {
    hasher: Sha256,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn current_hash(&self) -> [u8; TRANSCRIPT_HASH_LEN] {
        let digest = self.hasher.clone().finalize();
        let mut out = [0u8; TRANSCRIPT_HASH_LEN];
        out.copy_from_slice(&digest);
        out
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

/// Key-confirmation MAC over the current transcript hash.
pub fn finished_mac(
    finished_key: &[u8],
    transcript_hash: &[u8; TRANSCRIPT_HASH_LEN],
) -> Result<Vec<u8>, HandshakeError> {
    let mut mac =
        HmacSha256::new_from_slice(finished_key).map_err(|_| HandshakeError::Malformed)?;
    mac.update(transcript_hash);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Constant-time comparison of a presented finished MAC against the expected
/// value. Any mismatch collapses to a single error.
pub fn verify_finished(
    finished_key: &[u8],
    transcript_hash: &[u8; TRANSCRIPT_HASH_LEN],
    presented: &[u8],
) -> Result<(), HandshakeError> {
    let expected = finished_mac(finished_key, transcript_hash)?;
    if expected.len() != presented.len() || expected.ct_eq(presented).unwrap_u8() == 0 {
        return Err(HandshakeError::FinishedVerification);
    }
    Ok(())
}
