//! Supplemental signing policy (SPEC_FULL.md §4.12): rate limiting,
//! per-key and per-host allow/deny lists, and time-of-day windows,
//! consulted by the request handler (C7) before the mandatory
//! forwarded-socket approval gate runs.
//!
//! Keyed by key fingerprint ([`crate::keys::fingerprint`]) and hostname
//! string rather than a vault-internal credential id, since the core has
//! no notion of a persistent credential identity (KeyVault is an
//! external collaborator). A `Denied` decision here always short-circuits
//! to `Failure` exactly like a failed approval; `RequireConfirm` and
//! `RequireBiometric` are only ever additional reasons to invoke the
//! approval callback, never a bypass of it.

use anyhow::{Context, Result};
use loee_agent_core::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Policy configuration for SSH key usage.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SigningPolicy {
    #[serde(default)]
    pub global: GlobalPolicy,

    /// Per-key policies, keyed by fingerprint (`SHA256:...`).
    #[serde(default)]
    pub key_policies: HashMap<String, KeyPolicy>,

    /// Per-host policies, keyed by hostname glob pattern.
    #[serde(default)]
    pub host_policies: HashMap<String, HostPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GlobalPolicy {
    #[serde(default)]
    pub require_confirm: bool,

    #[serde(default)]
    pub min_interval_ms: u64,

    #[serde(default)]
    pub max_signatures_per_hour: u32,

    /// Emergency lockdown: deny every signature regardless of key/host.
    #[serde(default)]
    pub deny_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    #[serde(default)]
    pub denied_hosts: Vec<String>,

    #[serde(default)]
    pub require_confirm: bool,

    #[serde(default)]
    pub require_biometric: bool,

    #[serde(default)]
    pub max_uses_per_day: u32,

    /// `"HH:MM-HH:MM"`, 24h format.
    #[serde(default)]
    pub allowed_time_range: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_hosts: Vec::new(),
            denied_hosts: Vec::new(),
            require_confirm: false,
            require_biometric: false,
            max_uses_per_day: 0,
            allowed_time_range: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Allowed key fingerprints for this host; empty means all allowed.
    #[serde(default)]
    pub allowed_keys: Vec<String>,

    #[serde(default)]
    pub require_confirm: bool,

    #[serde(default)]
    pub max_connections_per_hour: u32,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_keys: Vec::new(),
            require_confirm: false,
            max_connections_per_hour: 0,
        }
    }
}

pub struct PolicyEnforcer {
    policy: SigningPolicy,
    state: PolicyState,
}

#[derive(Debug, Default)]
struct PolicyState {
    last_sign: Option<Instant>,
    signature_timestamps: Vec<Instant>,
    key_usage: HashMap<String, KeyUsageState>,
    host_usage: HashMap<String, HostUsageState>,
}

#[derive(Debug)]
struct KeyUsageState {
    daily_count: u32,
    last_reset: Instant,
}

#[derive(Debug)]
struct HostUsageState {
    hourly_count: u32,
    last_reset: Instant,
}

impl PolicyEnforcer {
    /// A permissive enforcer with no policy loaded.
    pub fn new() -> Self {
        Self::with_policy(SigningPolicy::default())
    }

    pub fn with_policy(policy: SigningPolicy) -> Self {
        Self {
            policy,
            state: PolicyState::default(),
        }
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(AgentError::from)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        let policy: SigningPolicy = toml::from_str(&content)
            .map_err(|e| AgentError::Configuration(e.to_string()))
            .with_context(|| format!("failed to parse policy file {}", path.display()))?;
        Ok(Self::with_policy(policy))
    }

    /// Load `LOEE_AGENT_POLICY_FILE` if set and present, else
    /// `~/.loee/agent-policy.toml` if present, else a permissive default.
    pub fn from_env() -> Self {
        let policy_path = std::env::var("LOEE_AGENT_POLICY_FILE")
            .ok()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".loee").join("agent-policy.toml")));

        if let Some(path) = policy_path {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(enforcer) => {
                        tracing::info!("loaded signing policy from {}", path.display());
                        return enforcer;
                    }
                    Err(e) => tracing::warn!("failed to parse policy file {}: {e}", path.display()),
                }
            }
        }
        Self::new()
    }

    pub fn check_signature(&mut self, fingerprint: &str, hostname: Option<&str>) -> SignatureDecision {
        if self.policy.global.deny_all {
            return SignatureDecision::Denied {
                reason: "agent is in lockdown mode".to_string(),
            };
        }

        if self.policy.global.min_interval_ms > 0 {
            if let Some(last) = self.state.last_sign {
                if last.elapsed() < Duration::from_millis(self.policy.global.min_interval_ms) {
                    return SignatureDecision::Denied {
                        reason: format!(
                            "rate limit: {}ms interval required",
                            self.policy.global.min_interval_ms
                        ),
                    };
                }
            }
        }

        if self.policy.global.max_signatures_per_hour > 0 {
            self.cleanup_old_timestamps();
            if self.state.signature_timestamps.len()
                >= self.policy.global.max_signatures_per_hour as usize
            {
                return SignatureDecision::Denied {
                    reason: format!(
                        "hourly limit exceeded: {} signatures per hour",
                        self.policy.global.max_signatures_per_hour
                    ),
                };
            }
        }

        if let Some(key_policy) = self.policy.key_policies.get(fingerprint).cloned() {
            if !key_policy.enabled {
                return SignatureDecision::Denied {
                    reason: "key is disabled".to_string(),
                };
            }

            if let Some(hostname) = hostname {
                if !key_policy.denied_hosts.is_empty()
                    && matches_any_pattern(hostname, &key_policy.denied_hosts)
                {
                    return SignatureDecision::Denied {
                        reason: format!("host '{hostname}' is denied for this key"),
                    };
                }
                if !key_policy.allowed_hosts.is_empty()
                    && !matches_any_pattern(hostname, &key_policy.allowed_hosts)
                {
                    return SignatureDecision::Denied {
                        reason: format!("host '{hostname}' is not in allowed list for this key"),
                    };
                }
            }

            if key_policy.max_uses_per_day > 0 {
                let usage = self
                    .state
                    .key_usage
                    .entry(fingerprint.to_string())
                    .or_default();
                usage.reset_if_needed();
                if usage.daily_count >= key_policy.max_uses_per_day {
                    return SignatureDecision::Denied {
                        reason: format!(
                            "daily limit exceeded for key: {} uses per day",
                            key_policy.max_uses_per_day
                        ),
                    };
                }
            }

            if let Some(time_range) = &key_policy.allowed_time_range {
                if !is_within_time_range(time_range) {
                    return SignatureDecision::Denied {
                        reason: format!("key usage not allowed at this time (allowed: {time_range})"),
                    };
                }
            }

            if key_policy.require_biometric {
                return SignatureDecision::RequireBiometric {
                    reason: "biometric authentication required by policy".to_string(),
                };
            }
            if key_policy.require_confirm {
                return SignatureDecision::RequireConfirm {
                    reason: "confirmation required by policy".to_string(),
                };
            }
        }

        if let Some(hostname) = hostname {
            if let Some(host_policy) = self.find_host_policy(hostname).cloned() {
                if !host_policy.enabled {
                    return SignatureDecision::Denied {
                        reason: format!("host '{hostname}' is disabled"),
                    };
                }
                if !host_policy.allowed_keys.is_empty()
                    && !host_policy.allowed_keys.iter().any(|k| k == fingerprint)
                {
                    return SignatureDecision::Denied {
                        reason: format!("key not allowed for host '{hostname}'"),
                    };
                }
                if host_policy.max_connections_per_hour > 0 {
                    let usage = self
                        .state
                        .host_usage
                        .entry(hostname.to_string())
                        .or_default();
                    usage.reset_if_needed();
                    if usage.hourly_count >= host_policy.max_connections_per_hour {
                        return SignatureDecision::Denied {
                            reason: format!(
                                "hourly limit exceeded for host '{hostname}': {} connections per hour",
                                host_policy.max_connections_per_hour
                            ),
                        };
                    }
                }
                if host_policy.require_confirm {
                    return SignatureDecision::RequireConfirm {
                        reason: format!("host '{hostname}' requires confirmation"),
                    };
                }
            }
        }

        if self.policy.global.require_confirm {
            return SignatureDecision::RequireConfirm {
                reason: "confirmation required by policy".to_string(),
            };
        }

        SignatureDecision::Allowed
    }

    pub fn record_signature(&mut self, fingerprint: &str, hostname: Option<&str>) {
        self.state.last_sign = Some(Instant::now());
        self.state.signature_timestamps.push(Instant::now());

        let usage = self
            .state
            .key_usage
            .entry(fingerprint.to_string())
            .or_default();
        usage.daily_count += 1;

        if let Some(hostname) = hostname {
            let usage = self
                .state
                .host_usage
                .entry(hostname.to_string())
                .or_default();
            usage.hourly_count += 1;
        }
    }

    fn cleanup_old_timestamps(&mut self) {
        let one_hour_ago = Instant::now() - Duration::from_secs(3600);
        self.state.signature_timestamps.retain(|&t| t > one_hour_ago);
    }

    fn find_host_policy(&self, hostname: &str) -> Option<&HostPolicy> {
        if let Some(policy) = self.policy.host_policies.get(hostname) {
            return Some(policy);
        }
        self.policy
            .host_policies
            .iter()
            .find(|(pattern, _)| glob_match::glob_match(pattern, hostname))
            .map(|(_, policy)| policy)
    }
}

impl Default for PolicyEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_any_pattern(hostname: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| glob_match::glob_match(p, hostname))
}

fn is_within_time_range(time_range: &str) -> bool {
    let parts: Vec<&str> = time_range.split('-').collect();
    if parts.len() != 2 {
        return true;
    }
    let now = chrono::Local::now().time();
    let start_time = chrono::NaiveTime::parse_from_str(parts[0], "%H:%M").ok();
    let end_time = chrono::NaiveTime::parse_from_str(parts[1], "%H:%M").ok();
    match (start_time, end_time) {
        (Some(start), Some(end)) => {
            if start <= end {
                now >= start && now <= end
            } else {
                now >= start || now <= end
            }
        }
        _ => true,
    }
}

impl KeyUsageState {
    fn reset_if_needed(&mut self) {
        if self.last_reset.elapsed() >= Duration::from_secs(86400) {
            self.daily_count = 0;
            self.last_reset = Instant::now();
        }
    }
}

impl HostUsageState {
    fn reset_if_needed(&mut self) {
        if self.last_reset.elapsed() >= Duration::from_secs(3600) {
            self.hourly_count = 0;
            self.last_reset = Instant::now();
        }
    }
}

impl Default for KeyUsageState {
    fn default() -> Self {
        Self {
            daily_count: 0,
            last_reset: Instant::now(),
        }
    }
}

impl Default for HostUsageState {
    fn default() -> Self {
        Self {
            hourly_count: 0,
            last_reset: Instant::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SignatureDecision {
    Allowed,
    RequireConfirm { reason: String },
    RequireBiometric { reason: String },
    Denied { reason: String },
}
