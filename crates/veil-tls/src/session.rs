use std::fmt;
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::crypto::{CryptoCapability, CryptoError, KeyExchange, KeySchedule, Role};
use crate::engine::EngineError;
use crate::handshake::Transcript;
use crate::suite::{CipherSuite, ProtocolVersion};

/// Handshake phase of one side of a session. Phases only move forward; the
/// per-role transition tables below are the sole way to advance through the
/// flight exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    ClientHelloSent,
    ClientHelloReceived,
    ServerHelloSent,
    ServerHelloReceived,
    KeyExchangeSent,
    KeyExchangeReceived,
    Finished,
    Closed,
}

impl Phase {
    /// Phase reached when the engine emits the flight due in this phase.
    pub(crate) fn after_send(self, role: Role) -> Option<Phase> {
        match (role, self) {
            (Role::Client, Phase::Start) => Some(Phase::ClientHelloSent),
            (Role::Client, Phase::ServerHelloReceived) => Some(Phase::KeyExchangeSent),
            (Role::Server, Phase::ClientHelloReceived) => Some(Phase::ServerHelloSent),
            _ => None,
        }
    }

    /// Phase reached when the engine accepts the flight due in this phase.
    pub(crate) fn after_receive(self, role: Role) -> Option<Phase> {
        match (role, self) {
            (Role::Server, Phase::Start) => Some(Phase::ClientHelloReceived),
            (Role::Client, Phase::ClientHelloSent) => Some(Phase::ServerHelloReceived),
            (Role::Server, Phase::ServerHelloSent) => Some(Phase::KeyExchangeReceived),
            _ => None,
        }
    }

    pub(crate) fn is_handshaking(self) -> bool {
        !matches!(self, Phase::Finished | Phase::Closed)
    }
}

/// Inputs captured when a peer key share arrives; consumed once by the
/// delegated computation.
pub(crate) struct ComputeInputs {
    pub suite: CipherSuite,
    pub key_exchange: Arc<dyn KeyExchange>,
    pub crypto: Arc<dyn CryptoCapability>,
    /// Client engines agree with their existing ephemeral secret; server
    /// engines leave this empty and generate a keypair inside the task.
    pub local_secret: Option<Zeroizing<Vec<u8>>>,
    pub peer_public: Vec<u8>,
    pub salt: Vec<u8>,
}

pub(crate) struct ComputeOutput {
    pub schedule: KeySchedule,
    /// Public half generated inside the task (server side only).
    pub local_public: Option<Vec<u8>>,
}

struct ComputeCell {
    inputs: Option<ComputeInputs>,
    outcome: Option<Result<ComputeOutput, CryptoError>>,
}

/// A unit of deferred expensive computation (key agreement plus key-schedule
/// derivation). The engine never runs these itself: the caller fetches the
/// task via [`TlsEngine::delegated_task`](crate::TlsEngine::delegated_task)
/// and runs it on whichever thread should pay the cost. Until every pending
/// task has run, the engine keeps answering `NeedTask`.
pub struct DelegatedTask {
    cell: Arc<Mutex<ComputeCell>>,
}

impl DelegatedTask {
    /// Execute the deferred computation. Runs at most once; failures are
    /// surfaced by the next engine call as a fatal session condition.
    pub fn run(self) {
        let mut cell = match self.cell.lock() {
            Ok(cell) => cell,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(inputs) = cell.inputs.take() else {
            return;
        };
        cell.outcome = Some(execute(inputs));
    }
}

impl fmt::Debug for DelegatedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedTask").finish_non_exhaustive()
    }
}

fn execute(inputs: ComputeInputs) -> Result<ComputeOutput, CryptoError> {
    let (local_public, secret) = match inputs.local_secret {
        Some(secret) => (None, secret),
        None => {
            let (public, secret) = inputs.key_exchange.generate_keypair()?;
            (Some(public), Zeroizing::new(secret))
        }
    };
    let shared = inputs.key_exchange.agree(&secret, &inputs.peer_public)?;
    let shared = Zeroizing::new(shared);
    let schedule = inputs
        .crypto
        .derive_schedule(inputs.suite, &shared, &inputs.salt)?;
    Ok(ComputeOutput {
        schedule,
        local_public,
    })
}

/// What the engine learns when it polls the delegated-task slot.
pub(crate) enum ComputeState {
    Idle,
    Pending,
    Ready(ComputeOutput),
    Failed(CryptoError),
}

struct ComputeSlot {
    cell: Arc<Mutex<ComputeCell>>,
    handed_out: bool,
}

/// Handshake-time material: randoms, shares, and the running transcript.
/// The ephemeral secret is consumed into the delegated computation; the
/// public parts stay for introspection.
#[derive(Default)]
pub(crate) struct HandshakeMaterial {
    pub transcript: Transcript,
    pub client_random: Option<[u8; 32]>,
    pub server_random: Option<[u8; 32]>,
    pub local_secret: Option<Zeroizing<Vec<u8>>>,
    pub local_public: Option<Vec<u8>>,
    pub pending_peer_verify: Option<Vec<u8>>,
    pub peer_certificates: Vec<Vec<u8>>,
}

/// Single-session state owned by an engine: role, negotiated parameters,
/// phase, key material, and the delegated-task slot.
pub(crate) struct Session {
    pub role: Role,
    pub suite: CipherSuite,
    pub version: ProtocolVersion,
    pub phase: Phase,
    pub begun: bool,
    pub schedule: Option<KeySchedule>,
    pub send_seq: u64,
    pub recv_seq: u64,
    pub hs: HandshakeMaterial,
    compute: Option<ComputeSlot>,
    pub fatal: Option<EngineError>,
}

impl Session {
    pub fn new(role: Role, suite: CipherSuite) -> Self {
        Self {
            role,
            suite,
            version: ProtocolVersion::V1,
            phase: Phase::Start,
            begun: false,
            schedule: None,
            send_seq: 0,
            recv_seq: 0,
            hs: HandshakeMaterial::default(),
            compute: None,
            fatal: None,
        }
    }

    /// Park a computation for the caller to execute.
    pub fn queue_compute(&mut self, inputs: ComputeInputs) {
        self.compute = Some(ComputeSlot {
            cell: Arc::new(Mutex::new(ComputeCell {
                inputs: Some(inputs),
                outcome: None,
            })),
            handed_out: false,
        });
    }

    /// Hand the pending task to the caller, once.
    pub fn take_task(&mut self) -> Option<DelegatedTask> {
        let slot = self.compute.as_mut()?;
        if slot.handed_out {
            return None;
        }
        slot.handed_out = true;
        Some(DelegatedTask {
            cell: Arc::clone(&slot.cell),
        })
    }

    /// Check the delegated-task slot, consuming a finished computation.
    pub fn poll_compute(&mut self) -> ComputeState {
        let Some(slot) = &self.compute else {
            return ComputeState::Idle;
        };
        let outcome = {
            let mut cell = match slot.cell.lock() {
                Ok(cell) => cell,
                Err(poisoned) => poisoned.into_inner(),
            };
            match cell.outcome.take() {
                Some(outcome) => outcome,
                None => return ComputeState::Pending,
            }
        };
        self.compute = None;
        match outcome {
            Ok(output) => ComputeState::Ready(output),
            Err(err) => ComputeState::Failed(err),
        }
    }

    pub fn is_handshaking(&self) -> bool {
        self.phase.is_handshaking()
    }
}
