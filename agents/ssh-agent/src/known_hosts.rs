//! known_hosts store (C4): loading, lookup-name derivation, and host-key
//! verification against a plaintext or OpenSSH-hashed known_hosts file.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

#[derive(Debug, Clone)]
enum HostField {
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
    Plain(Vec<String>),
}

#[derive(Debug, Clone)]
struct KnownHostEntry {
    host_field: HostField,
    key_blob: Vec<u8>,
}

#[derive(Debug, Default, Clone)]
pub struct KnownHostsStore {
    entries: Vec<KnownHostEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostVerification {
    Verified(String),
    Mismatch(String),
    Unknown(String),
}

impl KnownHostsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse known_hosts content. Malformed lines are skipped, matching
    /// OpenSSH's own tolerance of stray or truncated entries.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(4, char::is_whitespace);
            let host_part = match parts.next() {
                Some(p) if !p.is_empty() => p,
                _ => continue,
            };
            let _key_type = match parts.next() {
                Some(p) if !p.is_empty() => p,
                _ => continue,
            };
            let key_b64 = match parts.next() {
                Some(p) if !p.is_empty() => p,
                _ => continue,
            };
            let key_blob = match STANDARD.decode(key_b64) {
                Ok(blob) => blob,
                Err(_) => continue,
            };

            let host_field = if let Some(hashed) = parse_hashed_host(host_part) {
                hashed
            } else {
                HostField::Plain(host_part.split(',').map(str::to_string).collect())
            };

            entries.push(KnownHostEntry {
                host_field,
                key_blob,
            });
        }
        Self { entries }
    }

    pub fn load_from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// `[hostname]` if `port == 22`, else `[hostname, "[hostname]:port"]`.
    pub fn lookup_names(hostname: &str, port: u16) -> Vec<String> {
        if port == 22 {
            vec![hostname.to_string()]
        } else {
            vec![hostname.to_string(), format!("[{hostname}]:{port}")]
        }
    }

    fn entry_matches_host(entry: &KnownHostEntry, lookup_names: &[String]) -> bool {
        match &entry.host_field {
            HostField::Plain(names) => names
                .iter()
                .any(|n| lookup_names.iter().any(|l| l == n)),
            HostField::Hashed { salt, hash } => lookup_names.iter().any(|name| {
                hmac_sha1(salt, name.as_bytes())
                    .map(|computed| computed == *hash)
                    .unwrap_or(false)
            }),
        }
    }

    pub fn verify(&self, hostname: &str, port: u16, candidate_blob: &[u8]) -> HostVerification {
        let lookup_names = Self::lookup_names(hostname, port);
        let mut host_matched = false;
        for entry in &self.entries {
            if Self::entry_matches_host(entry, &lookup_names) {
                host_matched = true;
                if entry.key_blob == candidate_blob {
                    return HostVerification::Verified(hostname.to_string());
                }
            }
        }
        if host_matched {
            HostVerification::Mismatch(hostname.to_string())
        } else {
            HostVerification::Unknown(hostname.to_string())
        }
    }

    /// Union of plain names from entries whose key blob matches. Hashed
    /// entries cannot reverse-map and are omitted.
    pub fn hostnames_for_key(&self, blob: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for entry in &self.entries {
            if entry.key_blob != blob {
                continue;
            }
            if let HostField::Plain(plain_names) = &entry.host_field {
                for n in plain_names {
                    if !names.contains(n) {
                        names.push(n.clone());
                    }
                }
            }
        }
        names
    }
}

fn parse_hashed_host(host_part: &str) -> Option<HostField> {
    let rest = host_part.strip_prefix("|1|")?;
    let mut pieces = rest.splitn(2, '|');
    let salt_b64 = pieces.next()?;
    let hash_b64 = pieces.next()?;
    let salt = STANDARD.decode(salt_b64).ok()?;
    let hash = STANDARD.decode(hash_b64).ok()?;
    Some(HostField::Hashed { salt, hash })
}

fn hmac_sha1(key: &[u8], msg: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha1::new_from_slice(key).ok()?;
    mac.update(msg);
    Some(mac.finalize().into_bytes().to_vec())
}
