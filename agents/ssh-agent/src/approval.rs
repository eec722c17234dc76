//! ApprovalPrompt collaborator surface: the forwarded-socket gate that
//! must resolve to a definite allow/deny before a sign proceeds.

use crate::protocol::SignPayloadIntrospection;
use crate::session::VerifiedHostContext;
use crate::vault::ApprovalSubject;

/// `approve(signer, introspection_or_none, host_context_or_none) -> bool`.
/// Must tolerate `None` for both context fields and may suspend
/// indefinitely while a user decides; it must not block other
/// connections' progress.
pub trait ApprovalPrompt: Send + Sync {
    fn approve(
        &self,
        subject: ApprovalSubject<'_>,
        introspection: Option<&SignPayloadIntrospection>,
        host_context: Option<&VerifiedHostContext>,
    ) -> bool;
}

/// Prompts on `/dev/tty`, falling back to stdin/stdout, the way the
/// original biometric confirm path did for software keys.
pub struct TtyApprovalPrompt;

impl ApprovalPrompt for TtyApprovalPrompt {
    fn approve(
        &self,
        subject: ApprovalSubject<'_>,
        introspection: Option<&SignPayloadIntrospection>,
        host_context: Option<&VerifiedHostContext>,
    ) -> bool {
        let fingerprint = match subject {
            ApprovalSubject::Local(signer) => signer.fingerprint(),
            ApprovalSubject::Proxy(proxy) => proxy.fingerprint.clone(),
        };
        let host_desc = host_context
            .map(|ctx| format!("{} ({:?})", ctx.hostname, ctx.verification))
            .or_else(|| introspection.map(|i| i.username.clone()))
            .unwrap_or_else(|| "unknown host".to_string());
        let prompt = format!(
            "Allow SSH signature with key {fingerprint} for {host_desc}? [y/N] "
        );
        prompt_confirm_blocking(&prompt).unwrap_or(false)
    }
}

fn prompt_confirm_blocking(prompt: &str) -> std::io::Result<bool> {
    use std::io::{Read, Write};
    if let Ok(mut tty) = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty")
    {
        let _ = write!(tty, "{prompt}");
        let _ = tty.flush();
        let mut buf = [0u8; 3];
        let n = tty.read(&mut buf).unwrap_or(0);
        let s = String::from_utf8_lossy(&buf[..n]).to_lowercase();
        return Ok(s.starts_with('y'));
    }
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let s = input.trim().to_lowercase();
    Ok(s == "y" || s == "yes")
}

/// Test double that always allows.
pub struct AlwaysAllow;

impl ApprovalPrompt for AlwaysAllow {
    fn approve(
        &self,
        _subject: ApprovalSubject<'_>,
        _introspection: Option<&SignPayloadIntrospection>,
        _host_context: Option<&VerifiedHostContext>,
    ) -> bool {
        true
    }
}

/// Test double that always denies.
pub struct AlwaysDeny;

impl ApprovalPrompt for AlwaysDeny {
    fn approve(
        &self,
        _subject: ApprovalSubject<'_>,
        _introspection: Option<&SignPayloadIntrospection>,
        _host_context: Option<&VerifiedHostContext>,
    ) -> bool {
        false
    }
}
