//! Session-binding table (C7 state): links a `session-bind` observed on
//! any connection to the `VerifiedHostContext` a subsequent sign request
//! with a matching `session_id` should see.
//!
//! Guarded by a single mutex; operations are point reads/writes and never
//! held across I/O. Bindings never expire during process lifetime — see
//! SPEC_FULL.md §9 / DESIGN.md for the resolved open question.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::known_hosts::HostVerification;

#[derive(Debug, Clone)]
pub struct VerifiedHostContext {
    pub hostname: String,
    pub verification: HostVerification,
    pub is_forwarded: bool,
}

#[derive(Default)]
pub struct SessionBindingTable {
    bindings: Mutex<HashMap<Vec<u8>, VerifiedHostContext>>,
}

impl SessionBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, session_id: Vec<u8>, context: VerifiedHostContext) {
        let mut bindings = self.bindings.lock().expect("session binding lock poisoned");
        bindings.insert(session_id, context);
    }

    pub fn lookup(&self, session_id: &[u8]) -> Option<VerifiedHostContext> {
        let bindings = self.bindings.lock().expect("session binding lock poisoned");
        bindings.get(session_id).cloned()
    }
}
