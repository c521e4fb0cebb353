use std::fmt;
use std::sync::Arc;

use crate::crypto::{CryptoCapability, KeyExchange, RustCryptoCapability, X25519KeyExchange};
use crate::suite::CipherSuite;

/// Opaque handle to identity private-key material. The engine carries it for
/// the session's lifetime but never interprets the bytes; interpretation
/// belongs to whatever loader produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKeyHandle(Vec<u8>);

impl PrivateKeyHandle {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self(raw.into())
    }
}

impl fmt::Debug for PrivateKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyHandle")
            .field("len", &self.0.len())
            .finish()
    }
}

/// Identity material supplied by an external certificate/key loader:
/// a validated certificate chain plus the matching private-key handle.
/// Both are opaque at this layer.
#[derive(Debug, Clone)]
pub struct IdentityMaterial {
    pub certificate_chain: Vec<Vec<u8>>,
    pub private_key: PrivateKeyHandle,
}

/// Per-engine construction parameters. Everything an engine consults at
/// runtime is captured here explicitly; there is no process-wide provider
/// state.
#[derive(Clone)]
pub struct EngineConfig {
    pub(crate) suite: CipherSuite,
    pub(crate) crypto: Arc<dyn CryptoCapability>,
    pub(crate) key_exchange: Arc<dyn KeyExchange>,
    pub(crate) identity: Option<IdentityMaterial>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            suite: CipherSuite::AES_128_GCM_SHA256,
            crypto: Arc::new(RustCryptoCapability),
            key_exchange: Arc::new(X25519KeyExchange),
            identity: None,
        }
    }

    pub fn with_suite(mut self, suite: CipherSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoCapability>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_key_exchange(mut self, key_exchange: Arc<dyn KeyExchange>) -> Self {
        self.key_exchange = key_exchange;
        self
    }

    pub fn with_identity(mut self, identity: IdentityMaterial) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("suite", &self.suite)
            .field("identity", &self.identity.is_some())
            .finish_non_exhaustive()
    }
}
