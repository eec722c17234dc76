//! End-to-end tests for the Loee SSH agent.
//!
//! These exercise the real wire codec, protocol, connection, and handler
//! modules together rather than re-deriving the wire format inline; the
//! in-process socket-pair test mirrors spec.md §8 scenario 6 (host-key
//! signature verification) layered on top of a real session-bind then
//! sign-request round trip.

use byteorder::{BigEndian, ByteOrder};
use loee_ssh_agent::approval::AlwaysAllow;
use loee_ssh_agent::connection::Connection;
use loee_ssh_agent::handler::{RequestHandler, SocketType};
use loee_ssh_agent::keys::{ecdsa_signature_to_ssh, ed25519_signature_to_ssh, encode_ecdsa_p256_public_key, encode_ed25519_public_key, KeyAlgorithm};
use loee_ssh_agent::known_hosts::KnownHostsStore;
use loee_ssh_agent::policy::PolicyEnforcer;
use loee_ssh_agent::protocol::{self, SSH_AGENTC_EXTENSION, SSH_AGENTC_REQUEST_IDENTITIES, SSH_AGENTC_SIGN_REQUEST, SSH_AGENT_FAILURE, SSH_AGENT_IDENTITIES_ANSWER, SSH_AGENT_SIGN_RESPONSE};
use loee_ssh_agent::vault::{InMemoryKeyVault, KeyIdentifier, StaticSigner};
use loee_ssh_agent::wire;
use ed25519_dalek::{Signature as Ed25519Signature, Signer as Ed25519Signer, SigningKey, Verifier, VerifyingKey};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

async fn read_frame(stream: &mut UnixStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read length prefix");
    let len = BigEndian::read_u32(&len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.expect("read frame body");
    body
}

fn build_handler(approval_allows: bool, signing_key: &SigningKey) -> (Arc<RequestHandler>, Vec<u8>) {
    let verifying_bytes = *signing_key.verifying_key().as_bytes();
    let blob = encode_ed25519_public_key(&verifying_bytes);

    let mut vault = InMemoryKeyVault::new();
    let seed = *signing_key.as_bytes();
    let blob_for_signer = blob.clone();
    vault.insert(
        KeyIdentifier("test-key".into()),
        StaticSigner::new(KeyAlgorithm::Ed25519, blob_for_signer, "test@host".into(), move |payload| {
            let key = SigningKey::from_bytes(&seed);
            let sig: Ed25519Signature = key.sign(payload);
            Ok(ed25519_signature_to_ssh(&sig.to_bytes()))
        }),
    );

    let approval: Option<Box<dyn loee_ssh_agent::approval::ApprovalPrompt>> = if approval_allows {
        Some(Box::new(AlwaysAllow))
    } else {
        None
    };

    let handler = Arc::new(RequestHandler::new(
        Box::new(vault),
        KnownHostsStore::new(),
        approval,
        None,
        PolicyEnforcer::new(),
    ));
    (handler, blob)
}

/// Build a SIGN_REQUEST `data` payload that looks like a publickey
/// userauth request embedding `session_id`, matching §4.2's introspection
/// shape.
fn build_userauth_payload(session_id: &[u8], pubkey_blob: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    wire::write_string(&mut data, session_id);
    data.push(50); // SSH_MSG_USERAUTH_REQUEST
    wire::write_string(&mut data, b"alice");
    wire::write_string(&mut data, b"ssh-connection");
    wire::write_string(&mut data, b"publickey");
    wire::write_bool(&mut data, true);
    wire::write_string(&mut data, b"ssh-ed25519");
    wire::write_string(&mut data, pubkey_blob);
    data
}

#[tokio::test]
async fn identity_listing_and_signing_round_trip_over_a_real_socket() {
    let signing_key = SigningKey::from_bytes(&[0x42u8; 32]);
    let (handler, expected_blob) = build_handler(false, &signing_key);

    let (client, server) = UnixStream::pair().expect("socket pair");
    let connection = Connection::new(server, handler, SocketType::Local);
    let task = tokio::spawn(connection.run());
    let mut client = client;

    client
        .write_all(&protocol::wrap_frame(vec![SSH_AGENTC_REQUEST_IDENTITIES]))
        .await
        .expect("send request-identities");
    let identities_body = read_frame(&mut client).await;
    assert_eq!(identities_body[0], SSH_AGENT_IDENTITIES_ANSWER);
    let mut r = wire::Reader::new(&identities_body[1..]);
    let count = r.read_u32().unwrap();
    assert_eq!(count, 1);
    let key_blob = r.read_string().unwrap();
    let comment = r.read_utf8_string().unwrap();
    assert_eq!(key_blob, expected_blob);
    assert_eq!(comment, "test@host");

    let payload = b"loee agent e2e verification";
    let mut sign_body = vec![SSH_AGENTC_SIGN_REQUEST];
    wire::write_string(&mut sign_body, &key_blob);
    wire::write_string(&mut sign_body, payload);
    wire::write_u32(&mut sign_body, 0);
    client
        .write_all(&protocol::wrap_frame(sign_body))
        .await
        .expect("send sign-request");

    let sign_resp_body = read_frame(&mut client).await;
    assert_eq!(sign_resp_body[0], SSH_AGENT_SIGN_RESPONSE);
    let mut r = wire::Reader::new(&sign_resp_body[1..]);
    let signature_blob = r.read_string().unwrap();

    let mut sig_reader = wire::Reader::new(&signature_blob);
    let algo = sig_reader.read_utf8_string().unwrap();
    assert_eq!(algo, "ssh-ed25519");
    let raw_sig = sig_reader.read_string().unwrap();
    let sig_array: [u8; 64] = raw_sig.try_into().expect("64-byte ed25519 signature");
    let verifying_key = VerifyingKey::from_bytes(signing_key.verifying_key().as_bytes()).unwrap();
    verifying_key
        .verify(payload, &Ed25519Signature::from_bytes(&sig_array))
        .expect("signature must verify against the listed public key");

    drop(client);
    let _ = task.await;
}

#[tokio::test]
async fn session_bind_then_matching_sign_request_observes_host_context_over_the_wire() {
    let signing_key = SigningKey::from_bytes(&[0x11u8; 32]);
    let (handler, key_blob) = build_handler(true, &signing_key);

    // A distinct ed25519 "host key" signs the session id, independent of
    // the client's own identity key.
    let host_signing_key = SigningKey::from_bytes(&[0x22u8; 32]);
    let host_key_blob = encode_ed25519_public_key(host_signing_key.verifying_key().as_bytes());
    let session_id = b"session-xyz".to_vec();
    let host_sig: Ed25519Signature = host_signing_key.sign(&session_id);
    let host_key_signature = ed25519_signature_to_ssh(&host_sig.to_bytes());

    let (client, server) = UnixStream::pair().expect("socket pair");
    let connection = Connection::new(server, handler, SocketType::Forwarded);
    let task = tokio::spawn(connection.run());
    let mut client = client;

    let mut bind_body = vec![SSH_AGENTC_EXTENSION];
    wire::write_string(&mut bind_body, protocol::SESSION_BIND_EXTENSION.as_bytes());
    wire::write_string(&mut bind_body, b"example.com");
    wire::write_string(&mut bind_body, &host_key_blob);
    wire::write_string(&mut bind_body, &session_id);
    wire::write_string(&mut bind_body, &host_key_signature);
    wire::write_bool(&mut bind_body, true);
    client
        .write_all(&protocol::wrap_frame(bind_body))
        .await
        .expect("send session-bind");
    let bind_resp = read_frame(&mut client).await;
    assert_eq!(bind_resp[0], protocol::SSH_AGENT_SUCCESS);

    let data = build_userauth_payload(&session_id, &key_blob);
    let mut sign_body = vec![SSH_AGENTC_SIGN_REQUEST];
    wire::write_string(&mut sign_body, &key_blob);
    wire::write_string(&mut sign_body, &data);
    wire::write_u32(&mut sign_body, 0);
    client
        .write_all(&protocol::wrap_frame(sign_body))
        .await
        .expect("send sign-request");

    let sign_resp = read_frame(&mut client).await;
    assert_eq!(sign_resp[0], SSH_AGENT_SIGN_RESPONSE);

    drop(client);
    let _ = task.await;
}

#[tokio::test]
async fn forwarded_sign_denied_without_approval_callback_configured_as_deny() {
    let signing_key = SigningKey::from_bytes(&[0x33u8; 32]);
    let verifying_bytes = *signing_key.verifying_key().as_bytes();
    let blob = encode_ed25519_public_key(&verifying_bytes);

    let mut vault = InMemoryKeyVault::new();
    let seed = *signing_key.as_bytes();
    vault.insert(
        KeyIdentifier("k".into()),
        StaticSigner::new(KeyAlgorithm::Ed25519, blob.clone(), "c".into(), move |payload| {
            let key = SigningKey::from_bytes(&seed);
            let sig: Ed25519Signature = key.sign(payload);
            Ok(ed25519_signature_to_ssh(&sig.to_bytes()))
        }),
    );
    let handler = Arc::new(RequestHandler::new(
        Box::new(vault),
        KnownHostsStore::new(),
        Some(Box::new(loee_ssh_agent::approval::AlwaysDeny)),
        None,
        PolicyEnforcer::new(),
    ));

    let (client, server) = UnixStream::pair().expect("socket pair");
    let connection = Connection::new(server, handler, SocketType::Forwarded);
    let task = tokio::spawn(connection.run());
    let mut client = client;

    let mut sign_body = vec![SSH_AGENTC_SIGN_REQUEST];
    wire::write_string(&mut sign_body, &blob);
    wire::write_string(&mut sign_body, b"anything");
    wire::write_u32(&mut sign_body, 0);
    client
        .write_all(&protocol::wrap_frame(sign_body))
        .await
        .expect("send sign-request");

    let resp = read_frame(&mut client).await;
    assert_eq!(resp[0], SSH_AGENT_FAILURE);

    drop(client);
    let _ = task.await;
}

#[test]
fn ecdsa_p256_host_key_signature_is_verified_through_the_public_helpers() {
    use p256::ecdsa::{signature::Signer as P256Signer, SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
    use sha2::{Digest, Sha256};

    let signing_key = P256SigningKey::from_bytes(&[0x7u8; 32].into()).unwrap();
    let verifying_key = P256VerifyingKey::from(&signing_key);
    let session_id = b"ecdsa-session-id";
    let digest = Sha256::digest(session_id);
    let signature: p256::ecdsa::Signature = signing_key.sign(&digest);

    let point = verifying_key.to_encoded_point(false);
    let mut point_bytes = [0u8; 65];
    point_bytes.copy_from_slice(point.as_bytes());
    let host_key_blob = encode_ecdsa_p256_public_key(&point_bytes);
    let signature_blob = ecdsa_signature_to_ssh(&signature.to_bytes()).unwrap();

    assert!(loee_ssh_agent::hostkey::verify_host_signature(
        &host_key_blob,
        session_id,
        &signature_blob
    ));
    assert!(!loee_ssh_agent::hostkey::verify_host_signature(
        &host_key_blob,
        b"a-different-session-id",
        &signature_blob
    ));
}
