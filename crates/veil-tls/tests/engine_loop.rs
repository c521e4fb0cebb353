use veil_core::IoBuffer;
use veil_tls::{
    CipherSuite, EngineConfig, EngineError, HandshakeStatus, IdentityMaterial, PrivateKeyHandle,
    Status, TlsEngine,
};

const MESSAGE_SIZES: [usize; 5] = [64, 128, 512, 1024, 4096];
const FILLER: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn run_delegated_tasks(engine: &mut TlsEngine) {
    while let Some(task) = engine.delegated_task() {
        task.run();
    }
}

fn note_finished(status: HandshakeStatus, flag: &mut bool) {
    if status == HandshakeStatus::Finished {
        assert!(!*flag, "finished reported twice for one side");
        *flag = true;
    }
}

/// Drive both engines to completion through the supplied wire buffers,
/// checking the byte accounting of every call against the observable buffer
/// position deltas.
fn drive_handshake(
    client: &mut TlsEngine,
    server: &mut TlsEngine,
    c2s: &mut IoBuffer<'_>,
    s2c: &mut IoBuffer<'_>,
) {
    client.begin_handshake().expect("client begin");
    server.begin_handshake().expect("server begin");

    let mut empty = IoBuffer::allocate(0);
    let mut client_app = IoBuffer::allocate(client.application_buffer_size());
    let mut server_app = IoBuffer::allocate(server.application_buffer_size());

    let mut client_finished = false;
    let mut server_finished = false;
    let mut rounds = 0;

    while !(client_finished && server_finished) {
        rounds += 1;
        assert!(rounds <= 10, "handshake did not converge");

        let before = c2s.position();
        let result = client.wrap(&mut empty, c2s).expect("client wrap");
        assert_eq!(result.bytes_produced, c2s.position() - before);
        assert_eq!(result.bytes_consumed, 0);
        if result.handshake == HandshakeStatus::NeedTask {
            run_delegated_tasks(client);
        }
        note_finished(result.handshake, &mut client_finished);

        let before = s2c.position();
        let result = server.wrap(&mut empty, s2c).expect("server wrap");
        assert_eq!(result.bytes_produced, s2c.position() - before);
        assert_eq!(result.bytes_consumed, 0);
        if result.handshake == HandshakeStatus::NeedTask {
            run_delegated_tasks(server);
        }
        note_finished(result.handshake, &mut server_finished);

        c2s.flip();
        s2c.flip();

        let consumed_before = s2c.position();
        let produced_before = client_app.position();
        let result = client.unwrap(s2c, &mut client_app).expect("client unwrap");
        assert_eq!(result.bytes_consumed, s2c.position() - consumed_before);
        assert_eq!(result.bytes_produced, client_app.position() - produced_before);
        if result.handshake == HandshakeStatus::NeedTask {
            run_delegated_tasks(client);
        }
        note_finished(result.handshake, &mut client_finished);

        let consumed_before = c2s.position();
        let produced_before = server_app.position();
        let result = server.unwrap(c2s, &mut server_app).expect("server unwrap");
        assert_eq!(result.bytes_consumed, c2s.position() - consumed_before);
        assert_eq!(result.bytes_produced, server_app.position() - produced_before);
        if result.handshake == HandshakeStatus::NeedTask {
            run_delegated_tasks(server);
        }
        note_finished(result.handshake, &mut server_finished);

        c2s.compact();
        s2c.compact();
    }

    assert!(client.is_handshake_complete());
    assert!(server.is_handshake_complete());
}

fn engine_pair(suite: CipherSuite) -> (TlsEngine, TlsEngine) {
    (
        TlsEngine::client(EngineConfig::new().with_suite(suite)),
        TlsEngine::server(EngineConfig::new().with_suite(suite)),
    )
}

fn handshaken_pair() -> (TlsEngine, TlsEngine) {
    let (mut client, mut server) = engine_pair(CipherSuite::AES_128_GCM_SHA256);
    let mut c2s = IoBuffer::allocate(client.packet_buffer_size());
    let mut s2c = IoBuffer::allocate(server.packet_buffer_size());
    drive_handshake(&mut client, &mut server, &mut c2s, &mut s2c);
    (client, server)
}

fn message_of(len: usize) -> Vec<u8> {
    FILLER.iter().copied().cycle().take(len).collect()
}

/// One client-to-server message through fresh buffers, returning what the
/// server read.
fn send_message(client: &mut TlsEngine, server: &mut TlsEngine, message: &[u8]) -> Vec<u8> {
    let mut cleartext = IoBuffer::allocate(message.len());
    cleartext.put_slice(message).expect("fill cleartext");
    cleartext.flip();

    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    let result = client.wrap(&mut cleartext, &mut wire).expect("wrap");
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_consumed, message.len());
    assert_eq!(result.bytes_produced, wire.position());
    wire.flip();

    let mut received = IoBuffer::allocate(server.application_buffer_size().max(message.len()));
    let result = server.unwrap(&mut wire, &mut received).expect("unwrap");
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_produced, received.position());
    received.flip();
    received.remaining_slice().to_vec()
}

#[test]
fn handshake_completes_once_per_side_with_heap_buffers() {
    let (mut client, mut server) = engine_pair(CipherSuite::AES_128_GCM_SHA256);
    let mut c2s = IoBuffer::allocate(client.packet_buffer_size());
    let mut s2c = IoBuffer::allocate(server.packet_buffer_size());
    drive_handshake(&mut client, &mut server, &mut c2s, &mut s2c);
}

#[test]
fn handshake_completes_with_pinned_buffers() {
    let (mut client, mut server) = engine_pair(CipherSuite::AES_128_GCM_SHA256);
    let mut c2s_region = vec![0u8; client.packet_buffer_size()];
    let mut s2c_region = vec![0u8; server.packet_buffer_size()];
    let mut c2s = IoBuffer::pinned(&mut c2s_region);
    let mut s2c = IoBuffer::pinned(&mut s2c_region);
    drive_handshake(&mut client, &mut server, &mut c2s, &mut s2c);

    let echoed = send_message(&mut client, &mut server, &message_of(64));
    assert_eq!(echoed, message_of(64));
}

#[test]
fn sixty_four_byte_message_round_trips() {
    let (mut client, mut server) = handshaken_pair();
    let message = message_of(64);

    let mut cleartext = IoBuffer::allocate(64);
    cleartext.put_slice(&message).expect("fill");
    cleartext.flip();
    let source_limit = cleartext.limit();

    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    client.wrap(&mut cleartext, &mut wire).expect("wrap");
    wire.flip();

    let mut received = IoBuffer::allocate(server.application_buffer_size());
    server.unwrap(&mut wire, &mut received).expect("unwrap");
    received.flip();

    assert_eq!(received.limit(), source_limit);
    assert_eq!(received.remaining_slice(), &message[..]);
}

#[test]
fn common_message_sizes_round_trip() {
    let (mut client, mut server) = handshaken_pair();
    for size in MESSAGE_SIZES {
        let message = message_of(size);
        assert_eq!(send_message(&mut client, &mut server, &message), message);
    }
}

#[test]
fn chacha_suite_handshakes_and_round_trips() {
    let (mut client, mut server) = engine_pair(CipherSuite::CHACHA20_POLY1305_SHA256);
    let mut c2s = IoBuffer::allocate(client.packet_buffer_size());
    let mut s2c = IoBuffer::allocate(server.packet_buffer_size());
    drive_handshake(&mut client, &mut server, &mut c2s, &mut s2c);

    let message = message_of(512);
    assert_eq!(send_message(&mut client, &mut server, &message), message);
}

#[test]
fn server_to_client_direction_works_too() {
    let (mut client, mut server) = handshaken_pair();
    let message = message_of(128);
    assert_eq!(send_message(&mut server, &mut client, &message), message);
}

#[test]
fn wrap_into_undersized_destination_has_no_side_effects() {
    let (mut client, mut server) = handshaken_pair();
    let message = message_of(64);

    let mut cleartext = IoBuffer::allocate(64);
    cleartext.put_slice(&message).expect("fill");
    cleartext.flip();

    // Required output is header + ciphertext + tag; one byte short must
    // consume and produce nothing.
    let required = 5 + 64 + 16;
    let mut tight = IoBuffer::allocate(required - 1);
    let result = client.wrap(&mut cleartext, &mut tight).expect("wrap");
    assert_eq!(result.status, Status::BufferTooSmall);
    assert_eq!((result.bytes_consumed, result.bytes_produced), (0, 0));
    assert_eq!(cleartext.position(), 0);
    assert_eq!(tight.position(), 0);

    // The failed attempt must not desynchronize the record stream.
    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    let result = client.wrap(&mut cleartext, &mut wire).expect("retry");
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.bytes_produced, required);
    wire.flip();

    let mut received = IoBuffer::allocate(server.application_buffer_size());
    server.unwrap(&mut wire, &mut received).expect("unwrap");
    received.flip();
    assert_eq!(received.remaining_slice(), &message[..]);
}

#[test]
fn unwrap_with_three_of_five_header_bytes_underflows() {
    let (mut client, mut server) = handshaken_pair();

    let mut cleartext = IoBuffer::allocate(64);
    cleartext.put_slice(&message_of(64)).expect("fill");
    cleartext.flip();
    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    client.wrap(&mut cleartext, &mut wire).expect("wrap");
    wire.flip();

    let mut partial = IoBuffer::allocate(3);
    partial
        .put_slice(&wire.remaining_slice()[..3])
        .expect("partial header");
    partial.flip();

    let mut received = IoBuffer::allocate(server.application_buffer_size());
    let result = server.unwrap(&mut partial, &mut received).expect("unwrap");
    assert_eq!(result.status, Status::BufferUnderflow);
    assert_eq!((result.bytes_consumed, result.bytes_produced), (0, 0));
    assert_eq!(partial.position(), 0);

    // Once the full record is available the same engine consumes it.
    let result = server.unwrap(&mut wire, &mut received).expect("full unwrap");
    assert_eq!(result.status, Status::Ok);
}

#[test]
fn undersized_unwrap_destination_is_retryable() {
    let (mut client, mut server) = handshaken_pair();
    let message = message_of(256);

    let mut cleartext = IoBuffer::allocate(256);
    cleartext.put_slice(&message).expect("fill");
    cleartext.flip();
    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    client.wrap(&mut cleartext, &mut wire).expect("wrap");
    wire.flip();

    let mut small = IoBuffer::allocate(255);
    let result = server.unwrap(&mut wire, &mut small).expect("unwrap");
    assert_eq!(result.status, Status::BufferTooSmall);
    assert_eq!((result.bytes_consumed, result.bytes_produced), (0, 0));
    assert_eq!(wire.position(), 0);

    let mut roomy = IoBuffer::allocate(server.application_buffer_size());
    let result = server.unwrap(&mut wire, &mut roomy).expect("retry");
    assert_eq!(result.status, Status::Ok);
    roomy.flip();
    assert_eq!(roomy.remaining_slice(), &message[..]);
}

#[test]
fn tampered_ciphertext_is_fatal_and_latches() {
    let (mut client, mut server) = handshaken_pair();

    let mut cleartext = IoBuffer::allocate(64);
    cleartext.put_slice(&message_of(64)).expect("fill");
    cleartext.flip();
    let mut wire_region = vec![0u8; client.packet_buffer_size()];
    {
        let mut wire = IoBuffer::pinned(&mut wire_region);
        client.wrap(&mut cleartext, &mut wire).expect("wrap");
    }

    // Flip one ciphertext byte past the record header.
    wire_region[7] ^= 0x01;
    let mut tampered = IoBuffer::pinned(&mut wire_region);

    let mut received = IoBuffer::allocate(server.application_buffer_size());
    let err = server.unwrap(&mut tampered, &mut received).unwrap_err();
    assert_eq!(err, EngineError::AuthenticationFailure);

    // The session is unusable from here on, and the condition repeats.
    let mut empty = IoBuffer::allocate(0);
    let mut out = IoBuffer::allocate(server.packet_buffer_size());
    assert_eq!(
        server.unwrap(&mut empty, &mut out).unwrap_err(),
        EngineError::AuthenticationFailure
    );
    assert_eq!(
        server.wrap(&mut empty, &mut out).unwrap_err(),
        EngineError::AuthenticationFailure
    );
}

#[test]
fn suite_mismatch_is_a_protocol_violation() {
    let mut client =
        TlsEngine::client(EngineConfig::new().with_suite(CipherSuite::AES_128_GCM_SHA256));
    let mut server =
        TlsEngine::server(EngineConfig::new().with_suite(CipherSuite::CHACHA20_POLY1305_SHA256));
    client.begin_handshake().expect("client begin");
    server.begin_handshake().expect("server begin");

    let mut empty = IoBuffer::allocate(0);
    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    client.wrap(&mut empty, &mut wire).expect("client hello");
    wire.flip();

    let mut sink = IoBuffer::allocate(server.application_buffer_size());
    let err = server.unwrap(&mut wire, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::ProtocolViolation(_)));

    // Fatal conditions repeat verbatim.
    let mut empty = IoBuffer::allocate(0);
    let repeat = server.unwrap(&mut empty, &mut sink).unwrap_err();
    assert_eq!(err, repeat);
}

#[test]
fn replayed_client_hello_is_out_of_order() {
    let mut client = TlsEngine::client(EngineConfig::new());
    let mut server = TlsEngine::server(EngineConfig::new());
    client.begin_handshake().expect("client begin");
    server.begin_handshake().expect("server begin");

    let mut empty = IoBuffer::allocate(0);
    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    client.wrap(&mut empty, &mut wire).expect("client hello");
    wire.flip();
    let hello_bytes = wire.remaining_slice().to_vec();

    let mut sink = IoBuffer::allocate(server.application_buffer_size());
    server.unwrap(&mut wire, &mut sink).expect("accept hello");
    run_delegated_tasks(&mut server);
    let mut s2c = IoBuffer::allocate(server.packet_buffer_size());
    server.wrap(&mut empty, &mut s2c).expect("server hello");

    // A second copy of the same hello is now out of order.
    let mut replay = IoBuffer::allocate(hello_bytes.len());
    replay.put_slice(&hello_bytes).expect("replay");
    replay.flip();
    let err = server.unwrap(&mut replay, &mut sink).unwrap_err();
    assert!(matches!(err, EngineError::ProtocolViolation(_)));
}

#[test]
fn delegated_task_must_drain_before_progress() {
    let mut client = TlsEngine::client(EngineConfig::new());
    let mut server = TlsEngine::server(EngineConfig::new());
    client.begin_handshake().expect("client begin");
    server.begin_handshake().expect("server begin");

    let mut empty = IoBuffer::allocate(0);
    let mut wire = IoBuffer::allocate(client.packet_buffer_size());
    client.wrap(&mut empty, &mut wire).expect("client hello");
    wire.flip();

    let mut sink = IoBuffer::allocate(server.application_buffer_size());
    let result = server.unwrap(&mut wire, &mut sink).expect("accept hello");
    assert_eq!(result.handshake, HandshakeStatus::NeedTask);

    // Without draining, the engine refuses to move and produces nothing.
    let mut s2c = IoBuffer::allocate(server.packet_buffer_size());
    let stalled = server.wrap(&mut empty, &mut s2c).expect("stalled wrap");
    assert_eq!(stalled.handshake, HandshakeStatus::NeedTask);
    assert_eq!(stalled.bytes_produced, 0);

    let task = server.delegated_task().expect("task available");
    assert!(server.delegated_task().is_none(), "task handed out once");
    task.run();

    let result = server.wrap(&mut empty, &mut s2c).expect("server hello");
    assert_eq!(result.status, Status::Ok);
    assert!(result.bytes_produced > 0);
}

#[test]
fn server_identity_chain_reaches_the_client() {
    let chain = vec![vec![0xA1u8; 48], vec![0xB2u8; 32]];
    let mut client = TlsEngine::client(EngineConfig::new());
    let mut server = TlsEngine::server(EngineConfig::new().with_identity(IdentityMaterial {
        certificate_chain: chain.clone(),
        private_key: PrivateKeyHandle::new([0x55u8; 32]),
    }));

    let mut c2s = IoBuffer::allocate(client.packet_buffer_size());
    let mut s2c = IoBuffer::allocate(server.packet_buffer_size());
    drive_handshake(&mut client, &mut server, &mut c2s, &mut s2c);

    assert_eq!(client.peer_certificates(), &chain[..]);
}
