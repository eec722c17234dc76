//! KeyVault collaborator surface.
//!
//! The core treats the vault as an external capability: load failures are
//! just a missing key, never an error variant the caller has to unwrap.
//! Grounded on the trait-plus-mock shape of a `BiometricProvider`/
//! `MockBiometricProvider` pair used elsewhere in this codebase.

use crate::keys::KeyAlgorithm;

/// Opaque handle a `KeyVault` uses to identify one of its keys. The core
/// never interprets this beyond equality and passing it back to `load`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyIdentifier(pub String);

/// A signing capability: enough to answer an identities listing and to
/// produce an SSH-wire signature on demand.
pub trait Signer: Send + Sync {
    fn algorithm(&self) -> KeyAlgorithm;
    fn public_key_blob(&self) -> &[u8];
    fn comment(&self) -> &str;
    fn fingerprint(&self) -> String {
        crate::keys::fingerprint(self.public_key_blob())
    }
    /// Sign `payload`, returning the SSH-wire signature form directly
    /// (e.g. via [`crate::keys::ed25519_signature_to_ssh`]).
    fn sign(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// External key storage. Implementations may back onto an OS keychain, a
/// hardware token, or (for tests) an in-memory map.
#[cfg_attr(test, mockall::automock)]
pub trait KeyVault: Send + Sync {
    fn list(&self) -> Vec<KeyIdentifier>;
    fn load(&self, id: &KeyIdentifier) -> Option<Box<dyn Signer>>;

    /// Convenience used by the request handler: every signer this vault
    /// currently holds, skipping any identifier that fails to load.
    fn list_all_signers(&self) -> Vec<Box<dyn Signer>> {
        self.list()
            .into_iter()
            .filter_map(|id| self.load(&id))
            .collect()
    }
}

/// A signer backed by raw in-process key material. Used by the built-in
/// `InMemoryKeyVault` and by tests.
pub struct StaticSigner {
    pub algorithm: KeyAlgorithm,
    pub public_key_blob: Vec<u8>,
    pub comment: String,
    signing_fn: Box<dyn Fn(&[u8]) -> anyhow::Result<Vec<u8>> + Send + Sync>,
}

impl StaticSigner {
    pub fn new(
        algorithm: KeyAlgorithm,
        public_key_blob: Vec<u8>,
        comment: String,
        signing_fn: impl Fn(&[u8]) -> anyhow::Result<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            algorithm,
            public_key_blob,
            comment,
            signing_fn: Box::new(signing_fn),
        }
    }
}

impl Signer for StaticSigner {
    fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    fn public_key_blob(&self) -> &[u8] {
        &self.public_key_blob
    }

    fn comment(&self) -> &str {
        &self.comment
    }

    fn sign(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        (self.signing_fn)(payload)
    }
}

/// A minimal in-memory vault, keyed by comment. Not a production keychain
/// integration — a runnable default so the agent works end-to-end without
/// an external collaborator wired in.
#[derive(Default)]
pub struct InMemoryKeyVault {
    signers: std::collections::HashMap<String, std::sync::Arc<StaticSigner>>,
}

impl InMemoryKeyVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: KeyIdentifier, signer: StaticSigner) {
        self.signers.insert(id.0, std::sync::Arc::new(signer));
    }
}

impl KeyVault for InMemoryKeyVault {
    fn list(&self) -> Vec<KeyIdentifier> {
        self.signers.keys().cloned().map(KeyIdentifier).collect()
    }

    fn load(&self, id: &KeyIdentifier) -> Option<Box<dyn Signer>> {
        self.signers.get(&id.0).map(|s| {
            let cloned: Box<dyn Signer> = Box::new(ClonedSigner(s.clone()));
            cloned
        })
    }
}

/// Adapter so a shared `Arc<StaticSigner>` can be handed out as an owned
/// `Box<dyn Signer>` without re-signing logic per call site.
struct ClonedSigner(std::sync::Arc<StaticSigner>);

impl Signer for ClonedSigner {
    fn algorithm(&self) -> KeyAlgorithm {
        self.0.algorithm()
    }
    fn public_key_blob(&self) -> &[u8] {
        self.0.public_key_blob()
    }
    fn comment(&self) -> &str {
        self.0.comment()
    }
    fn sign(&self, payload: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.0.sign(payload)
    }
}

/// A synthesized stand-in for an upstream-proxied key during the approval
/// gate: only `public_key_blob`, `algorithm` and `fingerprint` are
/// populated; `sign` is never called on it (the real signature comes back
/// from C6). Modeled as a dedicated view rather than a `Signer` impl whose
/// `sign` would have to panic.
#[derive(Debug, Clone)]
pub struct ProxySignerView {
    pub algorithm: Option<KeyAlgorithm>,
    pub public_key_blob: Vec<u8>,
    pub fingerprint: String,
}

impl ProxySignerView {
    pub fn from_blob(public_key_blob: Vec<u8>) -> Self {
        let algorithm = crate::keys::parse_public_key_blob(&public_key_blob)
            .ok()
            .map(|p| p.algorithm());
        let fingerprint = crate::keys::fingerprint(&public_key_blob);
        Self {
            algorithm,
            public_key_blob,
            fingerprint,
        }
    }
}

/// Either a local `Signer` or a synthesized proxy view, as passed to the
/// approval callback.
pub enum ApprovalSubject<'a> {
    Local(&'a dyn Signer),
    Proxy(&'a ProxySignerView),
}
