use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};
use veil_core::{
    IoBuffer, RecordError, RecordHeader, RecordType, SecureRandom, RECORD_HEADER_LEN,
};
use zeroize::Zeroizing;

use crate::config::EngineConfig;
use crate::crypto::{compose_nonce, CryptoError, Role, KEY_SHARE_LEN};
use crate::handshake::{
    decode_flight, encode_flight, finished_mac, verify_finished, ClientFinished, ClientHello,
    Flight, HandshakeError, ServerHello, VERIFY_DATA_LEN,
};
use crate::session::{
    ComputeInputs, ComputeState, DelegatedTask, HandshakeMaterial, Phase, Session,
};
use crate::suite::{CipherSuite, ProtocolVersion, MAX_PLAINTEXT_LEN};

/// Fatal (or call-fatal) conditions surfaced by [`TlsEngine`]. Everything
/// except `IllegalState` latches the session closed; repeated calls keep
/// returning the same condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("record authentication failed")]
    AuthenticationFailure,
    #[error("operation not valid in the current engine state")]
    IllegalState,
}

/// Outcome category of a single wrap/unwrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// Destination cannot hold the output; nothing was consumed or produced.
    BufferTooSmall,
    /// Source holds less than one complete record; nothing was consumed.
    BufferUnderflow,
    Closed,
}

/// What the handshake needs next before it can make further progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    NeedUnwrap,
    NeedWrap,
    NeedTask,
    /// Returned exactly once per side, on the call that completes the
    /// handshake.
    Finished,
    NotHandshaking,
}

/// Per-call accounting. `bytes_consumed` and `bytes_produced` always equal
/// the source/destination position deltas the caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: Status,
    pub handshake: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

impl EngineResult {
    fn signal(status: Status, handshake: HandshakeStatus) -> Self {
        Self {
            status,
            handshake,
            bytes_consumed: 0,
            bytes_produced: 0,
        }
    }

    fn progressed(handshake: HandshakeStatus, bytes_consumed: usize, bytes_produced: usize) -> Self {
        Self {
            status: Status::Ok,
            handshake,
            bytes_consumed,
            bytes_produced,
        }
    }
}

enum Gate {
    Proceed,
    Blocked(EngineResult),
}

/// Non-blocking TLS engine for one side of a session.
///
/// The engine owns no transport and no threads. Callers move bytes between a
/// client and a server engine through [`IoBuffer`]s, alternating `wrap` and
/// `unwrap` and running any [`DelegatedTask`]s the engine hands back, until
/// both sides report [`HandshakeStatus::Finished`]; afterwards the same two
/// calls carry application data. Calls on one engine must be serialized by
/// the caller; distinct engines share nothing.
pub struct TlsEngine {
    session: Session,
    config: EngineConfig,
}

impl TlsEngine {
    pub fn client(config: EngineConfig) -> Self {
        Self::new(Role::Client, config)
    }

    pub fn server(config: EngineConfig) -> Self {
        Self::new(Role::Server, config)
    }

    fn new(role: Role, config: EngineConfig) -> Self {
        Self {
            session: Session::new(role, config.suite),
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.session.role
    }

    pub fn cipher_suite(&self) -> CipherSuite {
        self.session.suite
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.session.version
    }

    pub fn is_handshake_complete(&self) -> bool {
        self.session.phase == Phase::Finished
    }

    /// Certificate chain presented by the peer, opaque bytes. Empty until a
    /// `ServerHello` has been accepted (and always empty on the server).
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.session.hs.peer_certificates
    }

    /// Minimum destination capacity for `wrap`: one full record with header
    /// and authentication tag. Stable for the life of the engine.
    pub fn packet_buffer_size(&self) -> usize {
        self.session.suite.max_record_len()
    }

    /// Minimum destination capacity for `unwrap`. Stable for the life of
    /// the engine.
    pub fn application_buffer_size(&self) -> usize {
        MAX_PLAINTEXT_LEN
    }

    /// Start the handshake. Valid exactly once, before any wrap/unwrap.
    pub fn begin_handshake(&mut self) -> Result<(), EngineError> {
        if let Some(fatal) = &self.session.fatal {
            return Err(fatal.clone());
        }
        if self.session.begun || self.session.phase != Phase::Start {
            return Err(EngineError::IllegalState);
        }
        self.session.begun = true;
        debug!(role = ?self.session.role, suite = ?self.session.suite, "handshake started");
        Ok(())
    }

    /// Hand out the pending delegated task, if any. Each queued computation
    /// is handed out once; run it before the next wrap/unwrap can proceed.
    pub fn delegated_task(&mut self) -> Option<DelegatedTask> {
        self.session.take_task()
    }

    /// Latch the session closed. Subsequent wrap/unwrap report
    /// [`Status::Closed`]. Key material is dropped (and zeroed) here.
    pub fn close(&mut self) {
        if self.session.fatal.is_none() && self.session.phase != Phase::Closed {
            debug!(role = ?self.session.role, "session closed");
            self.session.phase = Phase::Closed;
            self.session.schedule = None;
            self.session.hs = HandshakeMaterial::default();
        }
    }

    /// Encode cleartext from `src` into protocol records in `dst` (or emit
    /// the next handshake flight while the handshake is in progress).
    pub fn wrap(
        &mut self,
        src: &mut IoBuffer<'_>,
        dst: &mut IoBuffer<'_>,
    ) -> Result<EngineResult, EngineError> {
        self.guard()?;
        if self.session.phase == Phase::Closed {
            return Ok(EngineResult::signal(
                Status::Closed,
                HandshakeStatus::NotHandshaking,
            ));
        }
        if self.session.is_handshaking() {
            match self.poll_delegated()? {
                Gate::Blocked(result) => Ok(result),
                Gate::Proceed => self.handshake_wrap(dst),
            }
        } else {
            self.wrap_application(src, dst)
        }
    }

    /// Decode one protocol record from `src` into cleartext in `dst` (or
    /// consume the next handshake flight while the handshake is in
    /// progress).
    pub fn unwrap(
        &mut self,
        src: &mut IoBuffer<'_>,
        dst: &mut IoBuffer<'_>,
    ) -> Result<EngineResult, EngineError> {
        self.guard()?;
        if self.session.phase == Phase::Closed {
            return Ok(EngineResult::signal(
                Status::Closed,
                HandshakeStatus::NotHandshaking,
            ));
        }
        if self.session.is_handshaking() {
            match self.poll_delegated()? {
                Gate::Blocked(result) => Ok(result),
                Gate::Proceed => self.handshake_unwrap(src),
            }
        } else {
            self.unwrap_application(src, dst)
        }
    }

    fn guard(&self) -> Result<(), EngineError> {
        if let Some(fatal) = &self.session.fatal {
            return Err(fatal.clone());
        }
        if !self.session.begun {
            return Err(EngineError::IllegalState);
        }
        Ok(())
    }

    fn fail(&mut self, err: EngineError) -> EngineError {
        debug!(role = ?self.session.role, error = %err, "session failed");
        self.session.fatal = Some(err.clone());
        self.session.phase = Phase::Closed;
        self.session.schedule = None;
        self.session.hs = HandshakeMaterial::default();
        err
    }

    fn fail_crypto(&mut self, err: CryptoError) -> EngineError {
        let mapped = match err {
            CryptoError::AuthenticationFailure => EngineError::AuthenticationFailure,
            other => EngineError::ProtocolViolation(other.to_string()),
        };
        self.fail(mapped)
    }

    fn fail_handshake(&mut self, err: HandshakeError) -> EngineError {
        let mapped = match err {
            HandshakeError::FinishedVerification => EngineError::AuthenticationFailure,
            other => EngineError::ProtocolViolation(other.to_string()),
        };
        self.fail(mapped)
    }

    /// Consume the delegated-task slot: install finished computations,
    /// propagate failures, and block progress while work is outstanding.
    fn poll_delegated(&mut self) -> Result<Gate, EngineError> {
        match self.session.poll_compute() {
            ComputeState::Idle => Ok(Gate::Proceed),
            ComputeState::Pending => Ok(Gate::Blocked(EngineResult::signal(
                Status::Ok,
                HandshakeStatus::NeedTask,
            ))),
            ComputeState::Ready(output) => {
                if let Some(public) = output.local_public {
                    self.session.hs.local_public = Some(public);
                }
                self.session.schedule = Some(output.schedule);
                trace!(role = ?self.session.role, "session keys installed");
                Ok(Gate::Proceed)
            }
            ComputeState::Failed(err) => Err(self.fail_crypto(err)),
        }
    }

    /// The handshake direction the engine is waiting on in its current
    /// phase, used when a call makes no progress.
    fn pending_status(&self) -> HandshakeStatus {
        match (self.session.role, self.session.phase) {
            (Role::Client, Phase::Start)
            | (Role::Client, Phase::ServerHelloReceived)
            | (Role::Server, Phase::ClientHelloReceived) => HandshakeStatus::NeedWrap,
            (_, Phase::Finished) | (_, Phase::Closed) => HandshakeStatus::NotHandshaking,
            _ => HandshakeStatus::NeedUnwrap,
        }
    }

    fn handshake_wrap(&mut self, dst: &mut IoBuffer<'_>) -> Result<EngineResult, EngineError> {
        match (self.session.role, self.session.phase) {
            (Role::Client, Phase::Start) => self.send_client_hello(dst),
            (Role::Client, Phase::ServerHelloReceived) => self.send_client_finished(dst),
            (Role::Server, Phase::ClientHelloReceived) => self.send_server_hello(dst),
            _ => Ok(EngineResult::signal(Status::Ok, self.pending_status())),
        }
    }

    fn send_client_hello(&mut self, dst: &mut IoBuffer<'_>) -> Result<EngineResult, EngineError> {
        let key_exchange = Arc::clone(&self.config.key_exchange);
        let (public, secret) = match key_exchange.generate_keypair() {
            Ok(pair) => pair,
            Err(err) => return Err(self.fail_crypto(err)),
        };
        let client_random: [u8; 32] = SecureRandom::array();

        let hello = ClientHello {
            version: self.session.version.wire(),
            cipher_suites: vec![self.session.suite.id()],
            client_random,
            key_share: public,
        };
        let payload = match encode_flight(&Flight::ClientHello(hello)) {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail_handshake(err)),
        };

        let Some(total) = self.emit_record(dst, RecordType::Handshake, &payload)? else {
            return Ok(EngineResult::signal(
                Status::BufferTooSmall,
                HandshakeStatus::NeedWrap,
            ));
        };

        self.session.hs.client_random = Some(client_random);
        self.session.hs.local_secret = Some(Zeroizing::new(secret));
        self.session.hs.transcript.update(&payload);
        self.advance_after_send();
        debug!(role = ?self.session.role, "client hello sent");
        Ok(EngineResult::progressed(HandshakeStatus::NeedUnwrap, 0, total))
    }

    fn send_server_hello(&mut self, dst: &mut IoBuffer<'_>) -> Result<EngineResult, EngineError> {
        let Some(schedule) = self.session.schedule.clone() else {
            return Ok(EngineResult::signal(Status::Ok, HandshakeStatus::NeedTask));
        };
        let server_random = self
            .session
            .hs
            .server_random
            .ok_or(EngineError::IllegalState)?;
        let key_share = self
            .session
            .hs
            .local_public
            .clone()
            .ok_or(EngineError::IllegalState)?;
        let certificate_chain = self
            .config
            .identity
            .as_ref()
            .map(|identity| identity.certificate_chain.clone())
            .unwrap_or_default();

        let mut hello = ServerHello {
            version: self.session.version.wire(),
            cipher_suite: self.session.suite.id(),
            server_random,
            key_share,
            certificate_chain,
            verify_data: Vec::new(),
        };
        let core = match hello.encode_core() {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail_handshake(err)),
        };

        let mut transcript = self.session.hs.transcript.clone();
        transcript.update(&core);
        let verify_data = match finished_mac(
            schedule.finished_key(Role::Server),
            &transcript.current_hash(),
        ) {
            Ok(mac) => mac,
            Err(err) => return Err(self.fail_handshake(err)),
        };
        hello.verify_data = verify_data.clone();

        let payload = match encode_flight(&Flight::ServerHello(hello)) {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail_handshake(err)),
        };
        let Some(total) = self.emit_record(dst, RecordType::Handshake, &payload)? else {
            return Ok(EngineResult::signal(
                Status::BufferTooSmall,
                HandshakeStatus::NeedWrap,
            ));
        };

        transcript.update(&verify_data);
        self.session.hs.transcript = transcript;
        self.advance_after_send();
        debug!(role = ?self.session.role, "server hello sent");
        Ok(EngineResult::progressed(HandshakeStatus::NeedUnwrap, 0, total))
    }

    fn send_client_finished(
        &mut self,
        dst: &mut IoBuffer<'_>,
    ) -> Result<EngineResult, EngineError> {
        let Some(schedule) = self.session.schedule.clone() else {
            return Ok(EngineResult::signal(Status::Ok, HandshakeStatus::NeedTask));
        };
        let pending = self
            .session
            .hs
            .pending_peer_verify
            .clone()
            .ok_or(EngineError::IllegalState)?;

        let mut transcript = self.session.hs.transcript.clone();
        if verify_finished(
            schedule.finished_key(Role::Server),
            &transcript.current_hash(),
            &pending,
        )
        .is_err()
        {
            return Err(self.fail(EngineError::AuthenticationFailure));
        }
        transcript.update(&pending);

        let verify_data = match finished_mac(
            schedule.finished_key(Role::Client),
            &transcript.current_hash(),
        ) {
            Ok(mac) => mac,
            Err(err) => return Err(self.fail_handshake(err)),
        };
        let payload = match encode_flight(&Flight::ClientFinished(ClientFinished {
            verify_data: verify_data.clone(),
        })) {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail_handshake(err)),
        };
        let Some(total) = self.emit_record(dst, RecordType::Handshake, &payload)? else {
            return Ok(EngineResult::signal(
                Status::BufferTooSmall,
                HandshakeStatus::NeedWrap,
            ));
        };

        transcript.update(&verify_data);
        self.session.hs.transcript = transcript;
        self.session.hs.pending_peer_verify = None;
        self.advance_after_send();
        self.session.phase = Phase::Finished;
        debug!(role = ?self.session.role, "handshake complete");
        Ok(EngineResult::progressed(HandshakeStatus::Finished, 0, total))
    }

    fn handshake_unwrap(&mut self, src: &mut IoBuffer<'_>) -> Result<EngineResult, EngineError> {
        let (header, payload, total) = match self.read_record(src) {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                return Ok(EngineResult::signal(
                    Status::BufferUnderflow,
                    self.pending_status(),
                ))
            }
            Err(err) => return Err(self.fail(err)),
        };
        if header.record_type != RecordType::Handshake {
            return Err(self.fail(EngineError::ProtocolViolation(
                "application data record during handshake".into(),
            )));
        }

        let flight = match decode_flight(&payload) {
            Ok(flight) => flight,
            Err(err) => return Err(self.fail_handshake(err)),
        };

        match (self.session.role, self.session.phase, flight) {
            (Role::Server, Phase::Start, Flight::ClientHello(hello)) => {
                self.accept_client_hello(src, hello, &payload, total)
            }
            (Role::Client, Phase::ClientHelloSent, Flight::ServerHello(hello)) => {
                self.accept_server_hello(src, hello, total)
            }
            (Role::Server, Phase::ServerHelloSent, Flight::ClientFinished(finished)) => {
                self.accept_client_finished(src, finished, total)
            }
            (_, phase, flight) => Err(self.fail(EngineError::ProtocolViolation(format!(
                "unexpected {} flight in phase {phase:?}",
                flight.name()
            )))),
        }
    }

    fn accept_client_hello(
        &mut self,
        src: &mut IoBuffer<'_>,
        hello: ClientHello,
        payload: &[u8],
        total: usize,
    ) -> Result<EngineResult, EngineError> {
        if ProtocolVersion::from_wire(hello.version) != Some(self.session.version) {
            return Err(self.fail_handshake(HandshakeError::UnsupportedVersion(hello.version)));
        }
        if !hello.cipher_suites.contains(&self.session.suite.id()) {
            return Err(self.fail_handshake(HandshakeError::SuiteMismatch));
        }
        if hello.key_share.len() != KEY_SHARE_LEN {
            return Err(self.fail(EngineError::ProtocolViolation(
                "malformed client key share".into(),
            )));
        }

        let server_random: [u8; 32] = SecureRandom::array();
        let mut salt = Vec::with_capacity(64);
        salt.extend_from_slice(&hello.client_random);
        salt.extend_from_slice(&server_random);

        self.session.queue_compute(ComputeInputs {
            suite: self.session.suite,
            key_exchange: Arc::clone(&self.config.key_exchange),
            crypto: Arc::clone(&self.config.crypto),
            local_secret: None,
            peer_public: hello.key_share,
            salt,
        });

        self.session.hs.client_random = Some(hello.client_random);
        self.session.hs.server_random = Some(server_random);
        self.session.hs.transcript.update(payload);
        self.consume(src, total)?;
        self.advance_after_receive();
        debug!(role = ?self.session.role, "client hello accepted");
        Ok(EngineResult::progressed(HandshakeStatus::NeedTask, total, 0))
    }

    fn accept_server_hello(
        &mut self,
        src: &mut IoBuffer<'_>,
        hello: ServerHello,
        total: usize,
    ) -> Result<EngineResult, EngineError> {
        if ProtocolVersion::from_wire(hello.version) != Some(self.session.version) {
            return Err(self.fail_handshake(HandshakeError::UnsupportedVersion(hello.version)));
        }
        if hello.cipher_suite != self.session.suite.id() {
            return Err(self.fail_handshake(HandshakeError::SuiteMismatch));
        }
        if hello.key_share.len() != KEY_SHARE_LEN {
            return Err(self.fail(EngineError::ProtocolViolation(
                "malformed server key share".into(),
            )));
        }
        if hello.verify_data.len() != VERIFY_DATA_LEN {
            return Err(self.fail(EngineError::ProtocolViolation(
                "malformed server finished data".into(),
            )));
        }

        let core = match hello.encode_core() {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.fail_handshake(err)),
        };
        let client_random = self
            .session
            .hs
            .client_random
            .ok_or(EngineError::IllegalState)?;
        let local_secret = self
            .session
            .hs
            .local_secret
            .take()
            .ok_or(EngineError::IllegalState)?;

        let mut salt = Vec::with_capacity(64);
        salt.extend_from_slice(&client_random);
        salt.extend_from_slice(&hello.server_random);

        self.session.queue_compute(ComputeInputs {
            suite: self.session.suite,
            key_exchange: Arc::clone(&self.config.key_exchange),
            crypto: Arc::clone(&self.config.crypto),
            local_secret: Some(local_secret),
            peer_public: hello.key_share,
            salt,
        });

        self.session.hs.server_random = Some(hello.server_random);
        self.session.hs.pending_peer_verify = Some(hello.verify_data);
        self.session.hs.peer_certificates = hello.certificate_chain;
        self.session.hs.transcript.update(&core);
        self.consume(src, total)?;
        self.advance_after_receive();
        debug!(role = ?self.session.role, "server hello accepted");
        Ok(EngineResult::progressed(HandshakeStatus::NeedTask, total, 0))
    }

    fn accept_client_finished(
        &mut self,
        src: &mut IoBuffer<'_>,
        finished: ClientFinished,
        total: usize,
    ) -> Result<EngineResult, EngineError> {
        let Some(schedule) = self.session.schedule.clone() else {
            return Err(EngineError::IllegalState);
        };
        if verify_finished(
            schedule.finished_key(Role::Client),
            &self.session.hs.transcript.current_hash(),
            &finished.verify_data,
        )
        .is_err()
        {
            return Err(self.fail(EngineError::AuthenticationFailure));
        }

        self.session.hs.transcript.update(&finished.verify_data);
        self.consume(src, total)?;
        self.advance_after_receive();
        self.session.phase = Phase::Finished;
        debug!(role = ?self.session.role, "handshake complete");
        Ok(EngineResult::progressed(HandshakeStatus::Finished, total, 0))
    }

    fn wrap_application(
        &mut self,
        src: &mut IoBuffer<'_>,
        dst: &mut IoBuffer<'_>,
    ) -> Result<EngineResult, EngineError> {
        let Some(schedule) = self.session.schedule.clone() else {
            return Err(EngineError::IllegalState);
        };
        let take = src.remaining().min(MAX_PLAINTEXT_LEN);
        if take == 0 {
            return Ok(EngineResult::signal(
                Status::Ok,
                HandshakeStatus::NotHandshaking,
            ));
        }

        let role = self.session.role;
        let suite = self.session.suite;
        let nonce = compose_nonce(schedule.send_iv(role), self.session.send_seq);
        let plaintext = src.remaining_slice()[..take].to_vec();
        let crypto = Arc::clone(&self.config.crypto);
        let sealed = match crypto.seal(suite, schedule.send_key(role), &nonce, &plaintext) {
            Ok(sealed) => sealed,
            Err(err) => return Err(self.fail_crypto(err)),
        };

        let Some(total) = self.emit_record(dst, RecordType::ApplicationData, &sealed)? else {
            return Ok(EngineResult::signal(
                Status::BufferTooSmall,
                HandshakeStatus::NotHandshaking,
            ));
        };

        self.consume(src, take)?;
        let Some(next_seq) = self.session.send_seq.checked_add(1) else {
            return Err(self.fail(EngineError::ProtocolViolation(
                "send sequence space exhausted".into(),
            )));
        };
        self.session.send_seq = next_seq;
        trace!(role = ?self.session.role, bytes = take, "application record wrapped");
        Ok(EngineResult::progressed(
            HandshakeStatus::NotHandshaking,
            take,
            total,
        ))
    }

    fn unwrap_application(
        &mut self,
        src: &mut IoBuffer<'_>,
        dst: &mut IoBuffer<'_>,
    ) -> Result<EngineResult, EngineError> {
        let (header, payload, total) = match self.read_record(src) {
            Ok(Some(parts)) => parts,
            Ok(None) => {
                return Ok(EngineResult::signal(
                    Status::BufferUnderflow,
                    HandshakeStatus::NotHandshaking,
                ))
            }
            Err(err) => return Err(self.fail(err)),
        };
        if header.record_type != RecordType::ApplicationData {
            return Err(self.fail(EngineError::ProtocolViolation(
                "handshake record after completion".into(),
            )));
        }

        let Some(schedule) = self.session.schedule.clone() else {
            return Err(EngineError::IllegalState);
        };
        let role = self.session.role;
        let nonce = compose_nonce(schedule.recv_iv(role), self.session.recv_seq);
        let crypto = Arc::clone(&self.config.crypto);
        let opened = match crypto.open(self.session.suite, schedule.recv_key(role), &nonce, &payload)
        {
            Ok(opened) => opened,
            Err(err) => return Err(self.fail_crypto(err)),
        };

        if opened.len() > dst.remaining() {
            return Ok(EngineResult::signal(
                Status::BufferTooSmall,
                HandshakeStatus::NotHandshaking,
            ));
        }
        if dst.put_slice(&opened).is_err() {
            return Ok(EngineResult::signal(
                Status::BufferTooSmall,
                HandshakeStatus::NotHandshaking,
            ));
        }

        self.consume(src, total)?;
        let Some(next_seq) = self.session.recv_seq.checked_add(1) else {
            return Err(self.fail(EngineError::ProtocolViolation(
                "receive sequence space exhausted".into(),
            )));
        };
        self.session.recv_seq = next_seq;
        trace!(role = ?self.session.role, bytes = opened.len(), "application record unwrapped");
        Ok(EngineResult::progressed(
            HandshakeStatus::NotHandshaking,
            total,
            opened.len(),
        ))
    }

    /// Parse one complete record from the source without consuming it.
    /// `Ok(None)` means the source does not yet hold a full record.
    fn read_record(
        &self,
        src: &IoBuffer<'_>,
    ) -> Result<Option<(RecordHeader, Vec<u8>, usize)>, EngineError> {
        let avail = src.remaining_slice();
        let header = match RecordHeader::decode(avail) {
            Ok(header) => header,
            Err(RecordError::Incomplete { .. }) => return Ok(None),
            Err(err) => return Err(EngineError::ProtocolViolation(err.to_string())),
        };
        let total = header.total_len();
        if avail.len() < total {
            return Ok(None);
        }
        Ok(Some((
            header,
            avail[RECORD_HEADER_LEN..total].to_vec(),
            total,
        )))
    }

    /// Atomic record write: either the whole record lands in `dst` or
    /// nothing does (`Ok(None)`).
    fn emit_record(
        &mut self,
        dst: &mut IoBuffer<'_>,
        record_type: RecordType,
        payload: &[u8],
    ) -> Result<Option<usize>, EngineError> {
        let header = match RecordHeader::new(record_type, payload.len()) {
            Ok(header) => header,
            Err(err) => return Err(self.fail(EngineError::ProtocolViolation(err.to_string()))),
        };
        let total = header.total_len();
        if dst.remaining() < total {
            return Ok(None);
        }
        let mut framed = Vec::with_capacity(total);
        framed.extend_from_slice(&header.encode());
        framed.extend_from_slice(payload);
        if dst.put_slice(&framed).is_err() {
            return Ok(None);
        }
        Ok(Some(total))
    }

    fn consume(&mut self, src: &mut IoBuffer<'_>, count: usize) -> Result<(), EngineError> {
        src.advance(count)
            .map_err(|err| self.fail(EngineError::ProtocolViolation(err.to_string())))
    }

    fn advance_after_send(&mut self) {
        if let Some(next) = self.session.phase.after_send(self.session.role) {
            self.session.phase = next;
        }
    }

    fn advance_after_receive(&mut self) {
        if let Some(next) = self.session.phase.after_receive(self.session.role) {
            self.session.phase = next;
        }
    }
}
