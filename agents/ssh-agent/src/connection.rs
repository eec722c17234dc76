//! Connection handler (C8): one per accepted socket. Owns the stream, a
//! growing byte buffer, and drives the read/frame/dispatch/write loop.
//!
//! Grounded on the teacher's `handle_connection` read loop, generalized
//! from its two fixed `read_exact` calls to the spec's scratch-buffer
//! accumulation so a frame split across TCP-like partial reads is handled
//! without re-entering the kernel per field.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::handler::{RequestHandler, SocketType};
use crate::protocol::{self, AgentResponse};

const READ_CHUNK: usize = 4096;

pub struct Connection {
    stream: UnixStream,
    handler: Arc<RequestHandler>,
    socket_type: SocketType,
    buffer: Vec<u8>,
}

impl Connection {
    pub fn new(stream: UnixStream, handler: Arc<RequestHandler>, socket_type: SocketType) -> Self {
        Self {
            stream,
            handler,
            socket_type,
            buffer: Vec::new(),
        }
    }

    /// Run the read/dispatch/write loop until the peer disconnects or a
    /// write fails. Parse errors yield a framed `Failure` and keep the
    /// connection open.
    pub async fn run(mut self) {
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(n) => self.buffer.extend_from_slice(&scratch[..n]),
            }

            while let Some(body) = self.extract_frame() {
                let response = match protocol::parse_request(&body) {
                    Ok(request) => self.handler.handle(request, self.socket_type),
                    Err(_) => AgentResponse::Failure,
                };
                let frame = protocol::serialize_response(&response);
                if !self.write_all(&frame).await {
                    return;
                }
            }
        }
    }

    /// Pull one length-prefixed body out of the front of `buffer`, if a
    /// complete frame is present.
    fn extract_frame(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if self.buffer.len() < 4 + len {
            return None;
        }
        let body = self.buffer[4..4 + len].to_vec();
        self.buffer.drain(0..4 + len);
        Some(body)
    }

    /// Loop short writes until complete; any write failure closes the
    /// connection.
    async fn write_all(&mut self, bytes: &[u8]) -> bool {
        self.stream.write_all(bytes).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::known_hosts::KnownHostsStore;
    use crate::policy::PolicyEnforcer;
    use crate::vault::InMemoryKeyVault;
    use tokio::io::AsyncWriteExt as _;

    fn test_handler() -> Arc<RequestHandler> {
        Arc::new(RequestHandler::new(
            Box::new(InMemoryKeyVault::new()),
            KnownHostsStore::new(),
            None,
            None,
            PolicyEnforcer::new(),
        ))
    }

    #[tokio::test]
    async fn request_identities_round_trips_over_socket_pair() {
        let (client, server) = UnixStream::pair().unwrap();
        let handler = test_handler();
        let conn = Connection::new(server, handler, SocketType::Local);
        let task = tokio::spawn(conn.run());

        let mut client = client;
        let body = vec![protocol::SSH_AGENTC_REQUEST_IDENTITIES];
        let frame = protocol::wrap_frame(body);
        client.write_all(&frame).await.unwrap();

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut resp = vec![0u8; len];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], protocol::SSH_AGENT_IDENTITIES_ANSWER);

        drop(client);
        let _ = task.await;
    }

    #[tokio::test]
    async fn split_frame_across_reads_still_parses() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = test_handler();
        let conn = Connection::new(server, handler, SocketType::Local);
        let task = tokio::spawn(conn.run());

        let frame = protocol::wrap_frame(vec![protocol::SSH_AGENTC_REQUEST_IDENTITIES]);
        client.write_all(&frame[0..2]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        client.write_all(&frame[2..]).await.unwrap();

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut resp = vec![0u8; len];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], protocol::SSH_AGENT_IDENTITIES_ANSWER);

        drop(client);
        let _ = task.await;
    }

    #[tokio::test]
    async fn unparseable_body_yields_failure_and_keeps_connection_open() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = test_handler();
        let conn = Connection::new(server, handler, SocketType::Local);
        let task = tokio::spawn(conn.run());

        // SIGN_REQUEST type byte with a truncated body: unreadable.
        let frame = protocol::wrap_frame(vec![protocol::SSH_AGENTC_SIGN_REQUEST]);
        client.write_all(&frame).await.unwrap();

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut resp = vec![0u8; len];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], protocol::SSH_AGENT_FAILURE);

        // Connection must still be alive for a second request.
        let frame = protocol::wrap_frame(vec![protocol::SSH_AGENTC_REQUEST_IDENTITIES]);
        client.write_all(&frame).await.unwrap();
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut resp = vec![0u8; len];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], protocol::SSH_AGENT_IDENTITIES_ANSWER);

        drop(client);
        let _ = task.await;
    }
}
