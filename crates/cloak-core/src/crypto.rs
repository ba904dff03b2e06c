//! Signing capability.
//!
//! The transport never holds key material policy of its own: it asks an
//! [`Authenticator`] to sign outbound payloads and to check inbound ones.
//! Key generation and distribution belong to the owning protocol node.
//!
//! Every signature covers the session nonce followed by the payload:
//!
//! ```text
//! nonce: i32 (BE) ‖ payload
//! ```
//!
//! so a frame captured in one session does not verify in another.

use std::collections::BTreeMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::types::NodeId;

/// Signs outbound payloads and verifies inbound ones.
pub trait Authenticator: Send {
    /// Sign `payload` under `nonce`.
    fn sign(&self, nonce: i32, payload: &[u8]) -> Vec<u8>;

    /// Check that `signature` is `from`'s signature over `payload` under
    /// `nonce`.
    fn verify(&self, from: NodeId, nonce: i32, payload: &[u8], signature: &[u8]) -> bool;
}

/// Bytes actually covered by a signature.
pub fn signed_message(nonce: i32, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + payload.len());
    message.extend_from_slice(&nonce.to_be_bytes());
    message.extend_from_slice(payload);
    message
}

/// Ed25519 signatures with a static table of peer keys.
#[derive(Debug, Clone)]
pub struct Ed25519Authenticator {
    signing_key: SigningKey,
    peers: BTreeMap<NodeId, VerifyingKey>,
}

impl Ed25519Authenticator {
    /// Create from our own signing key. No peers are known yet.
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key, peers: BTreeMap::new() }
    }

    /// Create from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    /// Our public key, for distribution to peers.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Register (or replace) the public key for `node`.
    pub fn add_peer(&mut self, node: NodeId, key: VerifyingKey) {
        self.peers.insert(node, key);
    }

    /// Builder form of [`Self::add_peer`].
    #[must_use]
    pub fn with_peer(mut self, node: NodeId, key: VerifyingKey) -> Self {
        self.add_peer(node, key);
        self
    }

    /// Forget the key for `node`. Its frames stop verifying.
    pub fn remove_peer(&mut self, node: NodeId) -> Option<VerifyingKey> {
        self.peers.remove(&node)
    }

    /// Public key registered for `node`.
    pub fn peer_key(&self, node: NodeId) -> Option<&VerifyingKey> {
        self.peers.get(&node)
    }
}

impl Authenticator for Ed25519Authenticator {
    fn sign(&self, nonce: i32, payload: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(&signed_message(nonce, payload));
        signature.to_bytes().to_vec()
    }

    fn verify(&self, from: NodeId, nonce: i32, payload: &[u8], signature: &[u8]) -> bool {
        let Some(key) = self.peers.get(&from) else {
            tracing::debug!(node_id = %from, "no verifying key for sender");
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };

        key.verify(&signed_message(nonce, payload), &signature).is_ok()
    }
}
