//! Upstream-agent proxy (C6): forwards identity listing and sign
//! requests to whatever agent was already on `SSH_AUTH_SOCK` before this
//! agent's own sockets were exported.
//!
//! Grounded on `radicle-ssh`'s `ClientStream for UnixStream` request/read
//! pattern, simplified to the spec's "fresh connection per call, blocking
//! I/O in a dedicated task" model — no persistent client state, no retry.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use crate::protocol::{self, Identity};
use crate::wire::{self, Reader, MAX_MESSAGE_LEN};

/// Captures the upstream socket path from the environment. Must be
/// called **before** this agent's own socket paths are written into
/// `SSH_AUTH_SOCK` for any downstream process. Returns `None` if the
/// variable is unset/empty or equals either of this agent's own socket
/// paths.
pub fn capture_upstream_path(own_local: &std::path::Path, own_forwarded: &std::path::Path) -> Option<PathBuf> {
    let raw = std::env::var("SSH_AUTH_SOCK").ok()?;
    if raw.is_empty() {
        return None;
    }
    let path = PathBuf::from(raw);
    if path == own_local || path == own_forwarded {
        return None;
    }
    Some(path)
}

pub struct UpstreamProxy {
    socket_path: PathBuf,
}

impl UpstreamProxy {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Connect, send `body`, and read back one framed response body.
    /// Any I/O error or oversize response yields `None`.
    fn request(&self, body: Vec<u8>) -> Option<Vec<u8>> {
        let mut stream = UnixStream::connect(&self.socket_path).ok()?;
        let frame = protocol::wrap_frame(body);
        stream.write_all(&frame).ok()?;
        stream.flush().ok()?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).ok()?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            return None;
        }
        let mut response = vec![0u8; len];
        stream.read_exact(&mut response).ok()?;
        Some(response)
    }

    /// All errors collapse to an empty identity list.
    pub fn request_identities(&self) -> Vec<Identity> {
        let mut body = Vec::new();
        body.push(protocol::SSH_AGENTC_REQUEST_IDENTITIES);
        let Some(response) = self.request(body) else {
            return Vec::new();
        };
        let mut r = Reader::new(&response);
        let Ok(msg_type) = r.read_byte() else {
            return Vec::new();
        };
        if msg_type != protocol::SSH_AGENT_IDENTITIES_ANSWER {
            return Vec::new();
        }
        let Ok(count) = r.read_u32() else {
            return Vec::new();
        };
        let mut identities = Vec::new();
        for _ in 0..count {
            let Ok(key_blob) = r.read_string() else {
                break;
            };
            let Ok(comment) = r.read_utf8_string() else {
                break;
            };
            identities.push(Identity { key_blob, comment });
        }
        identities
    }

    /// All errors collapse to `None`.
    pub fn sign_request(&self, key_blob: &[u8], data: &[u8], flags: u32) -> Option<Vec<u8>> {
        let mut body = Vec::new();
        body.push(protocol::SSH_AGENTC_SIGN_REQUEST);
        wire::write_string(&mut body, key_blob);
        wire::write_string(&mut body, data);
        wire::write_u32(&mut body, flags);

        let response = self.request(body)?;
        let mut r = Reader::new(&response);
        if r.read_byte().ok()? != protocol::SSH_AGENT_SIGN_RESPONSE {
            return None;
        }
        r.read_string().ok()
    }
}
