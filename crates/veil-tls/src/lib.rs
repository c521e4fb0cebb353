//! Minimal non-blocking TLS record/handshake engine.
//!
//! Two [`TlsEngine`] instances (one client, one server) talk only through
//! caller-managed [`IoBuffer`]s: each side's [`TlsEngine::wrap`] output is
//! fed to the peer's [`TlsEngine::unwrap`] until both report
//! [`HandshakeStatus::Finished`], after which the same calls protect
//! application data. Expensive key agreement is handed back to the caller as
//! [`DelegatedTask`]s, so the caller decides which thread pays for it. The
//! engine owns no sockets and spawns no threads.
//!
//! ```no_run
//! use veil_core::IoBuffer;
//! use veil_tls::{EngineConfig, TlsEngine};
//!
//! let mut client = TlsEngine::client(EngineConfig::new());
//! let mut server = TlsEngine::server(EngineConfig::new());
//! client.begin_handshake()?;
//! server.begin_handshake()?;
//!
//! let mut empty = IoBuffer::allocate(0);
//! let mut wire = IoBuffer::allocate(client.packet_buffer_size());
//! let _ = client.wrap(&mut empty, &mut wire)?;
//! // ... shuttle `wire` to the server, run delegated tasks, repeat.
//! # Ok::<(), veil_tls::EngineError>(())
//! ```

pub mod config;
pub mod crypto;
pub mod engine;
pub mod handshake;
pub mod session;
pub mod suite;

pub use config::{EngineConfig, IdentityMaterial, PrivateKeyHandle};
pub use crypto::{
    CryptoCapability, CryptoError, KeyExchange, KeySchedule, Role, RustCryptoCapability,
    X25519KeyExchange,
};
pub use engine::{EngineError, EngineResult, HandshakeStatus, Status, TlsEngine};
pub use session::{DelegatedTask, Phase};
pub use suite::{CipherSuite, ProtocolVersion, MAX_PLAINTEXT_LEN};

pub use veil_core::IoBuffer;
