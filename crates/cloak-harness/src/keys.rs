//! Seeded key material.

use cloak_core::{Ed25519Authenticator, NodeId};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Authenticators for nodes `1..=count`, each holding every other node's
/// verifying key. The same seed always yields the same keys.
pub fn keyring(seed: u64, count: u32) -> Vec<Ed25519Authenticator> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut authenticators: Vec<Ed25519Authenticator> = (0..count)
        .map(|_| {
            let mut secret = [0u8; 32];
            rng.fill_bytes(&mut secret);
            Ed25519Authenticator::from_seed(secret)
        })
        .collect();

    let keys: Vec<_> = authenticators.iter().map(Ed25519Authenticator::verifying_key).collect();
    for (i, authenticator) in authenticators.iter_mut().enumerate() {
        for (j, key) in keys.iter().enumerate().filter(|(j, _)| *j != i) {
            authenticator.add_peer(NodeId(j as u32 + 1), *key);
        }
    }
    authenticators
}
