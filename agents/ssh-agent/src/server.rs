//! Server & lifecycle (C9): binds the two trust-split listeners, accepts
//! connections onto a live task set, and tears both down cleanly on a
//! termination signal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UnixListener;
use tokio::task::JoinSet;

use crate::connection::Connection;
use crate::handler::{RequestHandler, SocketType};
use crate::transport;

const LISTEN_BACKLOG: u32 = 16;

pub struct Server {
    local_path: PathBuf,
    forwarded_path: PathBuf,
    handler: Arc<RequestHandler>,
}

impl Server {
    pub fn new(local_path: PathBuf, forwarded_path: PathBuf, handler: Arc<RequestHandler>) -> Self {
        Self {
            local_path,
            forwarded_path,
            handler,
        }
    }

    /// Bind both sockets and accept connections until a termination
    /// signal arrives, then unlink both socket paths before returning.
    pub async fn run(self) -> Result<()> {
        let local_listener = transport::bind_listener(&self.local_path, LISTEN_BACKLOG)?;
        tracing::info!("listening (local, auto-approve) on {}", self.local_path.display());

        let forwarded_listener = transport::bind_listener(&self.forwarded_path, LISTEN_BACKLOG)?;
        tracing::info!(
            "listening (forwarded, approval-gated) on {}",
            self.forwarded_path.display()
        );

        let mut local_tasks = JoinSet::new();
        let mut forwarded_tasks = JoinSet::new();
        let result = tokio::select! {
            r = accept_loop(local_listener, self.handler.clone(), SocketType::Local, &mut local_tasks) => r,
            r = accept_loop(forwarded_listener, self.handler.clone(), SocketType::Forwarded, &mut forwarded_tasks) => r,
            _ = wait_for_termination() => {
                tracing::info!("termination signal received, shutting down");
                Ok(())
            }
        };

        local_tasks.shutdown().await;
        forwarded_tasks.shutdown().await;
        transport::unlink_socket(&self.local_path);
        transport::unlink_socket(&self.forwarded_path);
        result
    }
}

async fn accept_loop(
    listener: UnixListener,
    handler: Arc<RequestHandler>,
    socket_type: SocketType,
    tasks: &mut JoinSet<()>,
) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let connection = Connection::new(stream, handler.clone(), socket_type);
        tasks.spawn(connection.run());
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::known_hosts::KnownHostsStore;
    use crate::policy::PolicyEnforcer;
    use crate::protocol;
    use crate::vault::InMemoryKeyVault;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixStream;

    fn test_handler() -> Arc<RequestHandler> {
        Arc::new(RequestHandler::new(
            Box::new(InMemoryKeyVault::new()),
            KnownHostsStore::new(),
            None,
            None,
            PolicyEnforcer::new(),
        ))
    }

    async fn round_trip_identities(path: &std::path::Path) {
        let mut client = UnixStream::connect(path).await.unwrap();
        let frame = protocol::wrap_frame(vec![protocol::SSH_AGENTC_REQUEST_IDENTITIES]);
        client.write_all(&frame).await.unwrap();
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut resp = vec![0u8; len];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], protocol::SSH_AGENT_IDENTITIES_ANSWER);
    }

    #[tokio::test]
    async fn local_listener_accepts_and_answers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.sock");
        let listener = transport::bind_listener(&path, 5).unwrap();
        let handler = test_handler();

        let mut tasks = JoinSet::new();
        tokio::spawn(async move {
            let _ = accept_loop(listener, handler, SocketType::Local, &mut tasks).await;
        });

        round_trip_identities(&path).await;
    }

    #[tokio::test]
    async fn forwarded_listener_accepts_and_answers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwarded.sock");
        let listener = transport::bind_listener(&path, 5).unwrap();
        let handler = test_handler();

        let mut tasks = JoinSet::new();
        tokio::spawn(async move {
            let _ = accept_loop(listener, handler, SocketType::Forwarded, &mut tasks).await;
        });

        round_trip_identities(&path).await;
    }
}
