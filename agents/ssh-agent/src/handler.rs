//! Request handler (C7): the dispatcher sitting between the connection
//! layer (C8) and the KeyVault/known_hosts/upstream collaborators.
//!
//! One `RequestHandler` is shared across every connection; its internal
//! state (the session-binding table) is mutex-guarded so it is safe to
//! call re-entrantly from concurrently running connection tasks.

use std::sync::Mutex;

use crate::approval::ApprovalPrompt;
use crate::hostkey::verify_host_signature;
use crate::known_hosts::KnownHostsStore;
use crate::policy::{PolicyEnforcer, SignatureDecision};
use crate::protocol::{self, AgentRequest, AgentResponse, Identity, SessionBindInfo};
use crate::session::{SessionBindingTable, VerifiedHostContext};
use crate::upstream::UpstreamProxy;
use crate::vault::{ApprovalSubject, KeyVault, ProxySignerView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Local,
    Forwarded,
}

pub struct RequestHandler {
    vault: Box<dyn KeyVault>,
    known_hosts: KnownHostsStore,
    approval: Option<Box<dyn ApprovalPrompt>>,
    upstream: Option<UpstreamProxy>,
    bindings: SessionBindingTable,
    policy: Mutex<PolicyEnforcer>,
}

impl RequestHandler {
    pub fn new(
        vault: Box<dyn KeyVault>,
        known_hosts: KnownHostsStore,
        approval: Option<Box<dyn ApprovalPrompt>>,
        upstream: Option<UpstreamProxy>,
        policy: PolicyEnforcer,
    ) -> Self {
        Self {
            vault,
            known_hosts,
            approval,
            upstream,
            bindings: SessionBindingTable::new(),
            policy: Mutex::new(policy),
        }
    }

    pub fn handle(&self, request: AgentRequest, socket_type: SocketType) -> AgentResponse {
        match request {
            AgentRequest::RequestIdentities => self.handle_request_identities(),
            AgentRequest::SessionBind(info) => self.handle_session_bind(info),
            AgentRequest::SignRequest {
                key_blob,
                data,
                flags,
            } => self.handle_sign_request(key_blob, data, flags, socket_type),
            AgentRequest::Unknown(_) => AgentResponse::Failure,
        }
    }

    fn handle_request_identities(&self) -> AgentResponse {
        let mut identities: Vec<Identity> = self
            .vault
            .list_all_signers()
            .into_iter()
            .map(|signer| Identity {
                key_blob: signer.public_key_blob().to_vec(),
                comment: signer.comment().to_string(),
            })
            .collect();
        if let Some(upstream) = &self.upstream {
            identities.extend(upstream.request_identities());
        }
        AgentResponse::IdentitiesAnswer(identities)
    }

    fn handle_session_bind(&self, info: SessionBindInfo) -> AgentResponse {
        if !verify_host_signature(&info.host_key_blob, &info.session_id, &info.host_key_signature) {
            return AgentResponse::Failure;
        }
        let verification = self.known_hosts.verify(&info.hostname, 22, &info.host_key_blob);
        self.bindings.bind(
            info.session_id,
            VerifiedHostContext {
                hostname: info.hostname,
                verification,
                is_forwarded: info.is_forwarded,
            },
        );
        AgentResponse::Success
    }

    fn handle_sign_request(
        &self,
        key_blob: Vec<u8>,
        data: Vec<u8>,
        _flags: u32,
        socket_type: SocketType,
    ) -> AgentResponse {
        let local_signer = self
            .vault
            .list_all_signers()
            .into_iter()
            .find(|s| s.public_key_blob() == key_blob.as_slice());

        let introspection = protocol::introspect_sign_payload(&data);
        let host_context = introspection
            .as_ref()
            .and_then(|i| self.bindings.lookup(&i.session_id));

        let fingerprint = local_signer
            .as_ref()
            .map(|s| s.fingerprint())
            .unwrap_or_else(|| crate::keys::fingerprint(&key_blob));
        let hostname = host_context.as_ref().map(|c| c.hostname.as_str());
        let decision = self.check_policy(&fingerprint, hostname);
        if matches!(decision, SignatureDecision::Denied { .. }) {
            return AgentResponse::Failure;
        }

        // RequireConfirm/RequireBiometric must themselves trigger the
        // approval callback even on the local socket; they are additional
        // reasons to ask, never a bypass of the forwarded-socket gate.
        let confirmation_required = matches!(
            decision,
            SignatureDecision::RequireConfirm { .. } | SignatureDecision::RequireBiometric { .. }
        );

        if socket_type == SocketType::Forwarded || confirmation_required {
            let approved = match &self.approval {
                Some(approval) => {
                    if let Some(signer) = &local_signer {
                        approval.approve(
                            ApprovalSubject::Local(signer.as_ref()),
                            introspection.as_ref(),
                            host_context.as_ref(),
                        )
                    } else if self.upstream.is_some() {
                        let proxy = ProxySignerView::from_blob(key_blob.clone());
                        approval.approve(
                            ApprovalSubject::Proxy(&proxy),
                            introspection.as_ref(),
                            host_context.as_ref(),
                        )
                    } else {
                        false
                    }
                }
                // No collaborator to ask: a required confirmation can't be
                // satisfied, so it denies rather than silently passing.
                None => !confirmation_required,
            };
            if !approved {
                return AgentResponse::Failure;
            }
        }

        self.record_signature(&fingerprint, hostname);

        if let Some(signer) = &local_signer {
            return match signer.sign(&data) {
                Ok(sig) => AgentResponse::SignResponse(sig),
                Err(e) => {
                    tracing::warn!("signing failed: {e}");
                    AgentResponse::Failure
                }
            };
        }

        if let Some(upstream) = &self.upstream {
            return match upstream.sign_request(&key_blob, &data, _flags) {
                Some(sig) => AgentResponse::SignResponse(sig),
                None => AgentResponse::Failure,
            };
        }

        AgentResponse::Failure
    }

    fn check_policy(&self, fingerprint: &str, hostname: Option<&str>) -> SignatureDecision {
        self.policy
            .lock()
            .expect("policy lock poisoned")
            .check_signature(fingerprint, hostname)
    }

    fn record_signature(&self, fingerprint: &str, hostname: Option<&str>) {
        self.policy
            .lock()
            .expect("policy lock poisoned")
            .record_signature(fingerprint, hostname);
    }
}
