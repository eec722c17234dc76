//! Typed SSH agent protocol messages, layered over the wire primitives in
//! [`crate::wire`]. Framing (the outer `uint32 length` prefix) is handled
//! by [`crate::connection`]; this module parses and serializes message
//! *bodies* only.

use crate::wire::{self, Reader, WireError};

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENT_SUCCESS: u8 = 6;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
pub const SSH_AGENTC_EXTENSION: u8 = 27;

/// The session-bind extension name this agent recognizes.
pub const SESSION_BIND_EXTENSION: &str = "session-bind@pl.loee";

const SSH_MSG_USERAUTH_REQUEST: u8 = 50;

#[derive(Debug, Clone)]
pub struct SessionBindInfo {
    pub hostname: String,
    pub host_key_blob: Vec<u8>,
    pub session_id: Vec<u8>,
    pub host_key_signature: Vec<u8>,
    pub is_forwarded: bool,
}

#[derive(Debug, Clone)]
pub enum AgentRequest {
    RequestIdentities,
    SignRequest {
        key_blob: Vec<u8>,
        data: Vec<u8>,
        flags: u32,
    },
    SessionBind(SessionBindInfo),
    /// A recognized-but-unhandled or wholly unknown message type.
    Unknown(u8),
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub key_blob: Vec<u8>,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub enum AgentResponse {
    Failure,
    Success,
    IdentitiesAnswer(Vec<Identity>),
    SignResponse(Vec<u8>),
}

/// Parse a message body (the bytes following the outer frame length, i.e.
/// starting with the type byte).
pub fn parse_request(body: &[u8]) -> Result<AgentRequest, WireError> {
    let mut r = Reader::new(body);
    let msg_type = r.read_byte()?;
    match msg_type {
        SSH_AGENTC_REQUEST_IDENTITIES => Ok(AgentRequest::RequestIdentities),
        SSH_AGENTC_SIGN_REQUEST => {
            let key_blob = r.read_string()?;
            let data = r.read_string()?;
            let flags = r.read_u32()?;
            Ok(AgentRequest::SignRequest {
                key_blob,
                data,
                flags,
            })
        }
        SSH_AGENTC_EXTENSION => {
            let name = r.read_utf8_string()?;
            if name == SESSION_BIND_EXTENSION {
                let hostname = r.read_utf8_string()?;
                let host_key_blob = r.read_string()?;
                let session_id = r.read_string()?;
                let host_key_signature = r.read_string()?;
                let is_forwarded = r.read_bool()?;
                Ok(AgentRequest::SessionBind(SessionBindInfo {
                    hostname,
                    host_key_blob,
                    session_id,
                    host_key_signature,
                    is_forwarded,
                }))
            } else {
                Ok(AgentRequest::Unknown(SSH_AGENTC_EXTENSION))
            }
        }
        other => Ok(AgentRequest::Unknown(other)),
    }
}

/// Serialize a response body and wrap it with the `uint32` frame length.
pub fn serialize_response(resp: &AgentResponse) -> Vec<u8> {
    let mut body = Vec::new();
    match resp {
        AgentResponse::Failure => body.push(SSH_AGENT_FAILURE),
        AgentResponse::Success => body.push(SSH_AGENT_SUCCESS),
        AgentResponse::IdentitiesAnswer(identities) => {
            body.push(SSH_AGENT_IDENTITIES_ANSWER);
            wire::write_u32(&mut body, identities.len() as u32);
            for id in identities {
                wire::write_string(&mut body, &id.key_blob);
                wire::write_string(&mut body, id.comment.as_bytes());
            }
        }
        AgentResponse::SignResponse(sig) => {
            body.push(SSH_AGENT_SIGN_RESPONSE);
            wire::write_string(&mut body, sig);
        }
    }
    wrap_frame(body)
}

/// Prefix a message body with its `uint32` frame length.
pub fn wrap_frame(body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    wire::write_u32(&mut out, body.len() as u32);
    out.extend_from_slice(&body);
    out
}

/// Fields recovered from a SIGN_REQUEST `data` payload when it looks like
/// an SSH `publickey` userauth request. Advisory only: failing to parse
/// this never blocks the sign itself.
#[derive(Debug, Clone)]
pub struct SignPayloadIntrospection {
    pub session_id: Vec<u8>,
    pub username: String,
    pub service: String,
    pub algorithm: String,
    pub pubkey_blob: Vec<u8>,
}

/// Attempt to parse a SIGN_REQUEST `data` field as a publickey userauth
/// payload. Returns `None` on any deviation from the expected shape; this
/// is advisory context for the approval callback, not a validity gate.
pub fn introspect_sign_payload(data: &[u8]) -> Option<SignPayloadIntrospection> {
    let mut r = Reader::new(data);
    let session_id = r.read_string().ok()?;
    if r.read_byte().ok()? != SSH_MSG_USERAUTH_REQUEST {
        return None;
    }
    let username = r.read_utf8_string().ok()?;
    let service = r.read_utf8_string().ok()?;
    let method = r.read_utf8_string().ok()?;
    if method != "publickey" {
        return None;
    }
    let _has_signature = r.read_bool().ok()?;
    let algorithm = r.read_utf8_string().ok()?;
    let pubkey_blob = r.read_string().ok()?;
    Some(SignPayloadIntrospection {
        session_id,
        username,
        service,
        algorithm,
        pubkey_blob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identities_literal_frame() {
        let frame = serialize_response(&AgentResponse::IdentitiesAnswer(vec![]));
        assert_eq!(frame, vec![0, 0, 0, 5, 0x0C, 0, 0, 0, 0]);
    }

    #[test]
    fn one_identity_literal_body() {
        let frame = serialize_response(&AgentResponse::IdentitiesAnswer(vec![Identity {
            key_blob: vec![0xAA, 0xBB],
            comment: "test".into(),
        }]));
        let expected_body = [
            0x0C, 0, 0, 0, 1, 0, 0, 0, 2, 0xAA, 0xBB, 0, 0, 0, 4, 0x74, 0x65, 0x73, 0x74,
        ];
        assert_eq!(&frame[4..], &expected_body[..]);
        assert_eq!(frame[0..4], (expected_body.len() as u32).to_be_bytes());
    }

    #[test]
    fn sign_request_literal_parse() {
        let body = [
            0x0D, 0, 0, 0, 3, 1, 2, 3, 0, 0, 0, 2, 4, 5, 0, 0, 0, 0,
        ];
        match parse_request(&body).unwrap() {
            AgentRequest::SignRequest {
                key_blob,
                data,
                flags,
            } => {
                assert_eq!(key_blob, vec![1, 2, 3]);
                assert_eq!(data, vec![4, 5]);
                assert_eq!(flags, 0);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn request_identities_has_no_payload() {
        assert!(matches!(
            parse_request(&[SSH_AGENTC_REQUEST_IDENTITIES]).unwrap(),
            AgentRequest::RequestIdentities
        ));
    }

    #[test]
    fn unknown_type_is_unknown() {
        assert!(matches!(
            parse_request(&[200]).unwrap(),
            AgentRequest::Unknown(200)
        ));
    }

    #[test]
    fn session_bind_extension_parses() {
        let mut body = Vec::new();
        body.push(SSH_AGENTC_EXTENSION);
        wire::write_string(&mut body, SESSION_BIND_EXTENSION.as_bytes());
        wire::write_string(&mut body, b"example.com");
        wire::write_string(&mut body, b"hostkeyblob");
        wire::write_string(&mut body, b"sessionid");
        wire::write_string(&mut body, b"signature");
        wire::write_bool(&mut body, true);

        match parse_request(&body).unwrap() {
            AgentRequest::SessionBind(info) => {
                assert_eq!(info.hostname, "example.com");
                assert_eq!(info.host_key_blob, b"hostkeyblob");
                assert_eq!(info.session_id, b"sessionid");
                assert_eq!(info.host_key_signature, b"signature");
                assert!(info.is_forwarded);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_extension_is_unknown() {
        let mut body = Vec::new();
        body.push(SSH_AGENTC_EXTENSION);
        wire::write_string(&mut body, b"other-extension@example.com");
        assert!(matches!(
            parse_request(&body).unwrap(),
            AgentRequest::Unknown(SSH_AGENTC_EXTENSION)
        ));
    }

    #[test]
    fn introspection_requires_publickey_method() {
        let mut data = Vec::new();
        wire::write_string(&mut data, b"sid");
        data.push(SSH_MSG_USERAUTH_REQUEST);
        wire::write_string(&mut data, b"alice");
        wire::write_string(&mut data, b"ssh-connection");
        wire::write_string(&mut data, b"password");
        assert!(introspect_sign_payload(&data).is_none());
    }

    #[test]
    fn introspection_extracts_publickey_fields() {
        let mut data = Vec::new();
        wire::write_string(&mut data, b"sid");
        data.push(SSH_MSG_USERAUTH_REQUEST);
        wire::write_string(&mut data, b"alice");
        wire::write_string(&mut data, b"ssh-connection");
        wire::write_string(&mut data, b"publickey");
        wire::write_bool(&mut data, true);
        wire::write_string(&mut data, b"ssh-ed25519");
        wire::write_string(&mut data, b"pubkeyblob");

        let info = introspect_sign_payload(&data).unwrap();
        assert_eq!(info.session_id, b"sid");
        assert_eq!(info.username, "alice");
        assert_eq!(info.service, "ssh-connection");
        assert_eq!(info.algorithm, "ssh-ed25519");
        assert_eq!(info.pubkey_blob, b"pubkeyblob");
    }
}
