//! Classifies vetted-unused keys shared between operators or modules into a
//! single canonical original plus duplicates to unvet.

use std::collections::HashMap;

use itertools::Itertools;

use lido_council_shared::deposit::SigningKeyEvent;
use lido_council_shared::eth::{Address, PublicKeyBytes};
use lido_council_shared::keys::RegistryKey;

/// A vetted key instance tagged with the module it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VettedKey {
    pub module_id: u32,
    pub key: RegistryKey,
}

impl VettedKey {
    fn identity(&self) -> (u32, u32, u32) {
        (self.module_id, self.key.operator_index, self.key.index)
    }
}

/// Picks the canonical original for every duplicated pubkey and returns all
/// the non-canonical instances.
///
/// Tie-break order: the instance whose `SigningKeyAdded` event is earliest by
/// `(block_number, log_index)` wins; when no instance has any add-event on
/// record, the lowest `(module_id, operator_index, index)` wins. Instances of
/// the same pubkey carrying *different* deposit signatures are all unsafe and
/// all reported.
pub fn find_duplicated_keys(vetted: &[VettedKey], events: &[SigningKeyEvent]) -> Vec<VettedKey> {
    let by_pubkey: HashMap<PublicKeyBytes, Vec<&VettedKey>> = vetted
        .iter()
        .map(|instance| (instance.key.key, instance))
        .into_group_map();

    // earliest add-event per (module, operator, pubkey)
    let mut earliest_event: HashMap<(Address, u64, PublicKeyBytes), (u64, u32)> = HashMap::new();
    for event in events {
        let entry_key = (event.module_address, event.operator_index, event.pubkey);
        let candidate = event.ordering_key();
        earliest_event
            .entry(entry_key)
            .and_modify(|existing| {
                if candidate < *existing {
                    *existing = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut duplicates = Vec::new();
    for (pubkey, instances) in by_pubkey {
        if instances.len() < 2 {
            continue;
        }

        let signatures_differ = instances
            .iter()
            .any(|instance| instance.key.deposit_signature != instances[0].key.deposit_signature);
        if signatures_differ {
            tracing::warn!(
                pubkey = %pubkey,
                "Duplicated pubkey with diverging deposit signatures, unvetting all instances"
            );
            duplicates.extend(instances.into_iter().cloned());
            continue;
        }

        let event_key = |instance: &VettedKey| {
            earliest_event
                .get(&(
                    instance.key.module_address,
                    instance.key.operator_index as u64,
                    pubkey,
                ))
                .copied()
        };

        let any_event_known = instances.iter().any(|instance| event_key(instance).is_some());
        let original = if any_event_known {
            // instances without history lose to any instance with one
            instances
                .iter()
                .filter(|instance| event_key(instance).is_some())
                .min_by_key(|instance| (event_key(instance), instance.identity()))
                .copied()
                .expect("at least one instance has an event")
        } else {
            instances
                .iter()
                .min_by_key(|instance| instance.identity())
                .copied()
                .expect("group has at least two instances")
        };

        duplicates.extend(
            instances
                .into_iter()
                .filter(|instance| instance.identity() != original.identity())
                .cloned(),
        );
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use lido_council_shared::eth::{Address, Hash256, SignatureBytes};

    fn registry_key(
        pubkey_byte: u8,
        signature_byte: u8,
        operator_index: u32,
        index: u32,
        module_address: Address,
    ) -> RegistryKey {
        RegistryKey {
            key: PublicKeyBytes::repeat_byte(pubkey_byte),
            deposit_signature: SignatureBytes::repeat_byte(signature_byte),
            operator_index,
            used: false,
            index,
            module_address,
        }
    }

    fn vetted(module_id: u32, key: RegistryKey) -> VettedKey {
        VettedKey { module_id, key }
    }

    fn add_event(
        module_address: Address,
        operator_index: u64,
        pubkey_byte: u8,
        block_number: u64,
        log_index: u32,
    ) -> SigningKeyEvent {
        SigningKeyEvent {
            module_address,
            operator_index,
            pubkey: PublicKeyBytes::repeat_byte(pubkey_byte),
            block_number,
            block_hash: Hash256::repeat_byte(1),
            log_index,
        }
    }

    #[test]
    fn unique_keys_produce_no_duplicates() {
        let module = Address::repeat_byte(0xa0);
        let vetted_keys = vec![
            vetted(1, registry_key(1, 9, 0, 0, module)),
            vetted(1, registry_key(2, 9, 0, 1, module)),
        ];
        assert!(find_duplicated_keys(&vetted_keys, &[]).is_empty());
    }

    #[test]
    fn earliest_add_event_wins_across_operators() {
        let module = Address::repeat_byte(0xa0);
        let vetted_keys = vec![
            vetted(1, registry_key(7, 9, 1, 0, module)),
            vetted(1, registry_key(7, 9, 2, 3, module)),
        ];
        // operator 2 registered the key first despite the higher index
        let events = vec![
            add_event(module, 1, 7, 100, 0),
            add_event(module, 2, 7, 90, 5),
        ];

        let duplicates = find_duplicated_keys(&vetted_keys, &events);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].key.operator_index, 1);
    }

    #[test]
    fn same_block_events_compare_by_log_index() {
        let module = Address::repeat_byte(0xa0);
        let vetted_keys = vec![
            vetted(1, registry_key(7, 9, 1, 0, module)),
            vetted(1, registry_key(7, 9, 2, 0, module)),
        ];
        let events = vec![
            add_event(module, 1, 7, 100, 4),
            add_event(module, 2, 7, 100, 2),
        ];

        let duplicates = find_duplicated_keys(&vetted_keys, &events);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].key.operator_index, 1);
    }

    #[test]
    fn missing_history_falls_back_to_lowest_identity() {
        let module_a = Address::repeat_byte(0xa0);
        let module_b = Address::repeat_byte(0xb0);
        let vetted_keys = vec![
            vetted(2, registry_key(7, 9, 0, 0, module_b)),
            vetted(1, registry_key(7, 9, 5, 2, module_a)),
        ];

        let duplicates = find_duplicated_keys(&vetted_keys, &[]);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].module_id, 2);
    }

    #[test]
    fn instance_without_history_loses_to_recorded_one() {
        let module = Address::repeat_byte(0xa0);
        let vetted_keys = vec![
            vetted(1, registry_key(7, 9, 1, 0, module)),
            vetted(1, registry_key(7, 9, 2, 0, module)),
        ];
        let events = vec![add_event(module, 2, 7, 50, 0)];

        let duplicates = find_duplicated_keys(&vetted_keys, &events);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].key.operator_index, 1);
    }

    #[test]
    fn diverging_signatures_unvet_every_instance() {
        let module = Address::repeat_byte(0xa0);
        let vetted_keys = vec![
            vetted(1, registry_key(7, 9, 1, 0, module)),
            vetted(1, registry_key(7, 8, 2, 0, module)),
        ];
        let events = vec![add_event(module, 1, 7, 10, 0)];

        let mut duplicates = find_duplicated_keys(&vetted_keys, &events);
        duplicates.sort_by_key(|instance| instance.key.operator_index);
        assert_eq!(duplicates.len(), 2);
    }

    #[test]
    fn duplicate_within_one_operator_keeps_the_lower_index() {
        let module = Address::repeat_byte(0xa0);
        let vetted_keys = vec![
            vetted(1, registry_key(7, 9, 1, 4, module)),
            vetted(1, registry_key(7, 9, 1, 2, module)),
        ];

        let duplicates = find_duplicated_keys(&vetted_keys, &[]);
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].key.index, 4);
    }
}
