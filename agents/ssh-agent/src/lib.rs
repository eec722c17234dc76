//! Loee SSH agent: a dual-socket SSH authentication agent that binds a
//! cryptographically verified host identity to each forwarded session
//! before any signature is released over it.
//!
//! - Local socket: auto-approved, for same-host clients.
//! - Forwarded socket: approval-gated, host-identity-verified via
//!   `session-bind@pl.loee` and the `known_hosts` store.
//!
//! See `handler::RequestHandler` for the dispatch logic and
//! `server::Server` for socket lifecycle.

pub mod approval;
pub mod connection;
pub mod handler;
pub mod hostkey;
pub mod known_hosts;
pub mod keys;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod upstream;
pub mod vault;
pub mod wire;

use std::sync::Arc;

use anyhow::{Context, Result};
use loee_agent_core::RedactedLoggerBuilder;
use tracing::Level;

use approval::TtyApprovalPrompt;
use handler::RequestHandler;
use known_hosts::KnownHostsStore;
use policy::PolicyEnforcer;
use server::Server;
use vault::InMemoryKeyVault;

/// Entry point shared by the binary and integration tests: initializes
/// logging, loads collaborators from the environment, and runs the
/// server until a termination signal arrives.
pub async fn run_agent() -> Result<()> {
    RedactedLoggerBuilder::new(Level::INFO)
        .include_target(false)
        .init()?;

    let local_path = transport::default_local_socket_path();
    let forwarded_path = transport::default_forwarded_socket_path();

    let upstream = upstream::capture_upstream_path(&local_path, &forwarded_path)
        .map(upstream::UpstreamProxy::new);
    if upstream.is_some() {
        tracing::info!("upstream agent discovered on SSH_AUTH_SOCK, proxying as fallback");
    }

    let known_hosts_path = known_hosts_path();
    let known_hosts = if known_hosts_path.exists() {
        KnownHostsStore::load_from_path(&known_hosts_path)
            .with_context(|| format!("failed to read known_hosts at {}", known_hosts_path.display()))?
    } else {
        tracing::warn!("no known_hosts file at {}; all hosts unknown", known_hosts_path.display());
        KnownHostsStore::new()
    };

    let vault: Box<dyn vault::KeyVault> = Box::new(InMemoryKeyVault::new());
    let policy = PolicyEnforcer::from_env();

    let handler = Arc::new(RequestHandler::new(
        vault,
        known_hosts,
        Some(Box::new(TtyApprovalPrompt)),
        upstream,
        policy,
    ));

    Server::new(local_path, forwarded_path, handler).run().await
}

fn known_hosts_path() -> std::path::PathBuf {
    std::env::var("LOEE_AGENT_KNOWN_HOSTS")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".ssh")
                .join("known_hosts")
        })
}
