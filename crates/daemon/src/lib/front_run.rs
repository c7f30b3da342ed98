//! Detection of deposits that front-run Lido: a foreign withdrawal
//! credential claiming a Lido-registered pubkey before Lido's own deposit
//! redirects the stake to the attacker.

use std::collections::{HashMap, HashSet};

use lido_council_shared::deposit::{DepositEventGroup, VerifiedDepositEvent};
use lido_council_shared::eth::{Hash256, PublicKeyBytes};
use lido_council_shared::keys::RegistryKey;

use crate::keys_api::{KeysApiError, KeysIndex};

/// Current-cycle check: vetted-unused keys whose pubkey already appears
/// on-chain under a non-Lido withdrawal credential with a valid signature.
/// Depositing such a key would hand the stake to the foreign credential.
pub fn find_front_run_attempts(
    deposited_events: &DepositEventGroup,
    lido_withdrawal_credentials: Hash256,
    vetted_unused_keys: &[RegistryKey],
) -> Vec<RegistryKey> {
    let foreign_pubkeys: HashSet<&PublicKeyBytes> = deposited_events
        .events
        .iter()
        .filter(|event| event.withdrawal_credentials != lido_withdrawal_credentials && event.valid)
        .map(|event| &event.pubkey)
        .collect();

    vetted_unused_keys
        .iter()
        .filter(|key| foreign_pubkeys.contains(&key.key))
        .cloned()
        .collect()
}

/// The earliest valid Lido deposit per pubkey.
fn canonical_lido_deposits(
    deposited_events: &DepositEventGroup,
    lido_withdrawal_credentials: Hash256,
) -> HashMap<&PublicKeyBytes, &VerifiedDepositEvent> {
    let mut canonical: HashMap<&PublicKeyBytes, &VerifiedDepositEvent> = HashMap::new();
    for event in &deposited_events.events {
        if event.withdrawal_credentials != lido_withdrawal_credentials || !event.valid {
            continue;
        }
        canonical
            .entry(&event.pubkey)
            .and_modify(|existing| {
                if event.is_earlier_than(existing) {
                    *existing = event;
                }
            })
            .or_insert(event);
    }
    canonical
}

/// Pubkeys whose earliest valid non-Lido deposit precedes the canonical Lido
/// deposit. These are suspected historical front-runs.
pub fn find_front_run_pubkeys(
    deposited_events: &DepositEventGroup,
    lido_withdrawal_credentials: Hash256,
) -> Vec<PublicKeyBytes> {
    let canonical = canonical_lido_deposits(deposited_events, lido_withdrawal_credentials);

    let mut suspected: HashSet<PublicKeyBytes> = HashSet::new();
    for event in &deposited_events.events {
        if event.withdrawal_credentials == lido_withdrawal_credentials || !event.valid {
            continue;
        }
        if let Some(lido_deposit) = canonical.get(&event.pubkey) {
            if event.is_earlier_than(lido_deposit) {
                suspected.insert(event.pubkey);
            }
        }
    }
    suspected.into_iter().collect()
}

/// Historical check: did a front-run already land against a key Lido owns?
/// A one-shot global verdict confirmed through the keys-index, since only
/// Lido-registered pubkeys are in scope.
pub async fn is_theft_happened<KA: KeysIndex>(
    keys_api: &KA,
    deposited_events: &DepositEventGroup,
    lido_withdrawal_credentials: Hash256,
) -> Result<bool, KeysApiError> {
    let suspected = find_front_run_pubkeys(deposited_events, lido_withdrawal_credentials);
    if suspected.is_empty() {
        return Ok(false);
    }
    tracing::warn!(
        count = suspected.len(),
        "Suspected front-run deposits found, confirming key ownership with the keys-index"
    );

    let response = keys_api.find_keys(&suspected).await?;
    let theft = !response.data.is_empty();
    if theft {
        tracing::error!(
            confirmed = response.data.len(),
            "Front-run against Lido-owned keys confirmed"
        );
    }
    Ok(theft)
}
