use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit as GcmKeyInit},
    Aes128Gcm,
};
use chacha20poly1305::{ChaCha20Poly1305, Key as ChaChaKey, Nonce as ChaChaNonce};
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use veil_core::SecureRandom;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::suite::CipherSuite;

/// Identifies which direction a session operates from when splitting derived
/// key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

pub const KEY_SHARE_LEN: usize = 32;
pub const MAX_KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const FINISHED_KEY_LEN: usize = 32;

const LABEL_CLIENT_WRITE_KEY: &[u8] = b"veil1 client write key";
const LABEL_SERVER_WRITE_KEY: &[u8] = b"veil1 server write key";
const LABEL_CLIENT_WRITE_IV: &[u8] = b"veil1 client write iv";
const LABEL_SERVER_WRITE_IV: &[u8] = b"veil1 server write iv";
const LABEL_CLIENT_FINISHED: &[u8] = b"veil1 finished client";
const LABEL_SERVER_FINISHED: &[u8] = b"veil1 finished server";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("failed to encrypt record payload")]
    Encrypt,
    #[error("record authentication failed")]
    AuthenticationFailure,
    #[error("session key material malformed")]
    InvalidKey,
    #[error("key derivation failed")]
    Derive,
    #[error("malformed key exchange material")]
    MalformedKeyShare,
}

/// Full output of the key schedule: both directions' record keys plus the
/// finished-confirmation keys. Owned by exactly one session and zeroed on
/// drop.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct KeySchedule {
    client_write_key: [u8; MAX_KEY_LEN],
    server_write_key: [u8; MAX_KEY_LEN],
    client_write_iv: [u8; IV_LEN],
    server_write_iv: [u8; IV_LEN],
    client_finished_key: [u8; FINISHED_KEY_LEN],
    server_finished_key: [u8; FINISHED_KEY_LEN],
}

impl KeySchedule {
    pub fn send_key(&self, role: Role) -> &[u8; MAX_KEY_LEN] {
        match role {
            Role::Client => &self.client_write_key,
            Role::Server => &self.server_write_key,
        }
    }

    pub fn recv_key(&self, role: Role) -> &[u8; MAX_KEY_LEN] {
        self.send_key(role.peer())
    }

    pub fn send_iv(&self, role: Role) -> &[u8; IV_LEN] {
        match role {
            Role::Client => &self.client_write_iv,
            Role::Server => &self.server_write_iv,
        }
    }

    pub fn recv_iv(&self, role: Role) -> &[u8; IV_LEN] {
        self.send_iv(role.peer())
    }

    pub fn finished_key(&self, role: Role) -> &[u8; FINISHED_KEY_LEN] {
        match role {
            Role::Client => &self.client_finished_key,
            Role::Server => &self.server_finished_key,
        }
    }
}

/// Bulk crypto consumed by the engine: record protection plus key-schedule
/// derivation. Implementations are stateless; the engine supplies keys,
/// nonces, and secrets per call.
pub trait CryptoCapability: Send + Sync {
    /// AEAD-seal `plaintext`, returning ciphertext with the tag appended.
    fn seal(
        &self,
        suite: CipherSuite,
        key: &[u8],
        nonce: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// AEAD-open `ciphertext` (tag included). Any mismatch is reported as
    /// [`CryptoError::AuthenticationFailure`] with no further detail.
    fn open(
        &self,
        suite: CipherSuite,
        key: &[u8],
        nonce: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Expand the handshake shared secret into the session key schedule.
    fn derive_schedule(
        &self,
        suite: CipherSuite,
        shared_secret: &[u8],
        salt: &[u8],
    ) -> Result<KeySchedule, CryptoError>;
}

/// Ephemeral key agreement consumed by the handshake. The engine defers the
/// agreement itself to a delegated task so callers choose where it runs.
pub trait KeyExchange: Send + Sync {
    /// Generate an ephemeral keypair, returning `(public, secret)` bytes.
    fn generate_keypair(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Compute the shared secret between a local secret and a peer public.
    fn agree(&self, secret: &[u8], peer_public: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Default capability backed by the RustCrypto AEAD and HKDF crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoCapability;

impl RustCryptoCapability {
    fn suite_key(suite: CipherSuite, key: &[u8]) -> Result<&[u8], CryptoError> {
        key.get(..suite.key_len()).ok_or(CryptoError::InvalidKey)
    }
}

impl CryptoCapability for RustCryptoCapability {
    fn seal(
        &self,
        suite: CipherSuite,
        key: &[u8],
        nonce: &[u8; IV_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = Self::suite_key(suite, key)?;
        match suite {
            CipherSuite::AES_128_GCM_SHA256 => Aes128Gcm::new(GenericArray::from_slice(key))
                .encrypt(GenericArray::from_slice(nonce), plaintext)
                .map_err(|_| CryptoError::Encrypt),
            _ => ChaCha20Poly1305::new(ChaChaKey::from_slice(key))
                .encrypt(ChaChaNonce::from_slice(nonce), plaintext)
                .map_err(|_| CryptoError::Encrypt),
        }
    }

    fn open(
        &self,
        suite: CipherSuite,
        key: &[u8],
        nonce: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = Self::suite_key(suite, key)?;
        match suite {
            CipherSuite::AES_128_GCM_SHA256 => Aes128Gcm::new(GenericArray::from_slice(key))
                .decrypt(GenericArray::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::AuthenticationFailure),
            _ => ChaCha20Poly1305::new(ChaChaKey::from_slice(key))
                .decrypt(ChaChaNonce::from_slice(nonce), ciphertext)
                .map_err(|_| CryptoError::AuthenticationFailure),
        }
    }

    fn derive_schedule(
        &self,
        _suite: CipherSuite,
        shared_secret: &[u8],
        salt: &[u8],
    ) -> Result<KeySchedule, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), shared_secret);

        let mut schedule = KeySchedule {
            client_write_key: [0u8; MAX_KEY_LEN],
            server_write_key: [0u8; MAX_KEY_LEN],
            client_write_iv: [0u8; IV_LEN],
            server_write_iv: [0u8; IV_LEN],
            client_finished_key: [0u8; FINISHED_KEY_LEN],
            server_finished_key: [0u8; FINISHED_KEY_LEN],
        };

        let expansions: [(&[u8], &mut [u8]); 6] = [
            (LABEL_CLIENT_WRITE_KEY, &mut schedule.client_write_key),
            (LABEL_SERVER_WRITE_KEY, &mut schedule.server_write_key),
            (LABEL_CLIENT_WRITE_IV, &mut schedule.client_write_iv),
            (LABEL_SERVER_WRITE_IV, &mut schedule.server_write_iv),
            (LABEL_CLIENT_FINISHED, &mut schedule.client_finished_key),
            (LABEL_SERVER_FINISHED, &mut schedule.server_finished_key),
        ];
        for (label, out) in expansions {
            hkdf.expand(label, out).map_err(|_| CryptoError::Derive)?;
        }

        Ok(schedule)
    }
}

/// X25519 ephemeral key agreement.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519KeyExchange;

impl KeyExchange for X25519KeyExchange {
    fn generate_keypair(&self) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let secret = StaticSecret::from(SecureRandom::array::<32>());
        let public = PublicKey::from(&secret);
        Ok((public.as_bytes().to_vec(), secret.to_bytes().to_vec()))
    }

    fn agree(&self, secret: &[u8], peer_public: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| CryptoError::MalformedKeyShare)?;
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::MalformedKeyShare)?;
        let shared = StaticSecret::from(secret).diffie_hellman(&PublicKey::from(peer));
        Ok(shared.as_bytes().to_vec())
    }
}

/// XOR a record sequence number into the static IV to form the per-record
/// nonce. Counters never repeat within a session.
pub(crate) fn compose_nonce(iv: &[u8; IV_LEN], sequence: u64) -> [u8; IV_LEN] {
    let mut nonce = *iv;
    for (slot, byte) in nonce[4..].iter_mut().zip(sequence.to_be_bytes()) {
        *slot ^= byte;
    }
    nonce
}
