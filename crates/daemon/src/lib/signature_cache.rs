//! Cached BLS validation of registry-key deposit signatures.
//!
//! Verification results are keyed by pubkey and reused as long as the key's
//! `(deposit_signature, withdrawal_credentials)` pair is unchanged; a change
//! of the Lido withdrawal credential invalidates every entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lido_council_shared::bls;
use lido_council_shared::eth::{ForkVersion, Hash256, PublicKeyBytes, SignatureBytes};
use lido_council_shared::keys::RegistryKey;

use crate::prometheus_metrics;

/// The underlying verifier. Split out so the cache can be exercised with a
/// counting stub.
pub trait DepositSignatureChecker {
    fn verify(
        &self,
        pubkey: &PublicKeyBytes,
        withdrawal_credentials: Hash256,
        signature: &SignatureBytes,
    ) -> bool;
}

pub struct BlsSignatureChecker {
    fork_version: ForkVersion,
}

impl BlsSignatureChecker {
    pub fn new(fork_version: ForkVersion) -> Self {
        Self { fork_version }
    }
}

impl DepositSignatureChecker for BlsSignatureChecker {
    fn verify(
        &self,
        pubkey: &PublicKeyBytes,
        withdrawal_credentials: Hash256,
        signature: &SignatureBytes,
    ) -> bool {
        bls::verify_deposit_signature(
            pubkey,
            withdrawal_credentials,
            bls::DEPOSIT_AMOUNT_GWEI,
            signature,
            self.fork_version,
        )
    }
}

#[derive(Clone)]
struct CacheEntry {
    deposit_signature: SignatureBytes,
    withdrawal_credentials: Hash256,
    valid: bool,
}

struct CacheState {
    lido_wc: Option<Hash256>,
    entries: HashMap<PublicKeyBytes, CacheEntry>,
}

pub struct KeySignatureValidator<C: DepositSignatureChecker> {
    checker: C,
    state: Mutex<CacheState>,
    metrics: Option<Arc<prometheus_metrics::Metrics>>,
}

impl<C: DepositSignatureChecker> KeySignatureValidator<C> {
    pub fn new(checker: C) -> Self {
        Self {
            checker,
            state: Mutex::new(CacheState {
                lido_wc: None,
                entries: HashMap::new(),
            }),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<prometheus_metrics::Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the keys whose deposit signature does not verify against the
    /// Lido withdrawal credential. Only keys whose `(signature, wc)` differ
    /// from the cached entry hit the underlying verifier.
    pub fn get_invalid_keys(&self, keys: &[RegistryKey], lido_wc: Hash256) -> Vec<RegistryKey> {
        let mut state = self.state.lock().expect("signature cache lock poisoned");
        if state.lido_wc != Some(lido_wc) {
            if state.lido_wc.is_some() {
                tracing::warn!(
                    new_wc = %lido_wc,
                    "Lido withdrawal credential changed, revalidating all keys"
                );
            }
            state.entries.clear();
            state.lido_wc = Some(lido_wc);
        }

        let mut invalid = Vec::new();
        let mut verified_count: u64 = 0;
        let mut cached_count: u64 = 0;
        for key in keys {
            let cached_valid = state.entries.get(&key.key).and_then(|entry| {
                (entry.deposit_signature == key.deposit_signature
                    && entry.withdrawal_credentials == lido_wc)
                    .then_some(entry.valid)
            });
            let valid = match cached_valid {
                Some(valid) => {
                    cached_count += 1;
                    valid
                }
                None => {
                    verified_count += 1;
                    let valid = self.checker.verify(&key.key, lido_wc, &key.deposit_signature);
                    state.entries.insert(
                        key.key,
                        CacheEntry {
                            deposit_signature: key.deposit_signature,
                            withdrawal_credentials: lido_wc,
                            valid,
                        },
                    );
                    valid
                }
            };
            if !valid {
                invalid.push(key.clone());
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .guardian
                .validated_keys
                .with_label_values(&["verified"])
                .inc_by(verified_count);
            metrics
                .guardian
                .validated_keys
                .with_label_values(&["cached"])
                .inc_by(cached_count);
        }
        if !invalid.is_empty() {
            tracing::warn!(count = invalid.len(), "Registry keys with invalid deposit signatures");
        }
        invalid
    }
}
