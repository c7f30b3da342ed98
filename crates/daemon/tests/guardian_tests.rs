//! End-to-end cycles of the guardian pipeline against canned collaborators.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lido_council_daemon::deposits::{DepositsError, DepositsRegistry};
use lido_council_daemon::eth_client::{CompactSignature, ContractError, SecurityModule};
use lido_council_daemon::guardian::{GuardianConfig, GuardianError, GuardianService};
use lido_council_daemon::keys_api::{
    ElBlockSnapshot, GroupedOperators, KeysApiError, KeysIndex, KeysResponse, OperatorsResponse,
    ResponseMeta,
};
use lido_council_daemon::messenger::{GuardianMessage, GuardianMessenger, InMemoryMessageBus};
use lido_council_daemon::prometheus_metrics::Metrics;
use lido_council_daemon::signature_cache::{DepositSignatureChecker, KeySignatureValidator};
use lido_council_daemon::signing_keys::{SigningKeysError, SigningKeysRegistry};

use lido_council_shared::deposit::{DepositEventGroup, SigningKeyEvent, VerifiedDepositEvent};
use lido_council_shared::eth::{Address, Hash256, PublicKeyBytes, SignatureBytes};
use lido_council_shared::keys::{Operator, RegistryKey, StakingModule, StakingModuleType};

const LIDO_WC: Hash256 = Hash256::repeat_byte(0x01);
const FOREIGN_WC: Hash256 = Hash256::repeat_byte(0x02);
const MODULE_ADDRESS: Address = Address::repeat_byte(0xa0);

fn snapshot(block_number: u64, hash_byte: u8, last_changed_byte: u8) -> ElBlockSnapshot {
    ElBlockSnapshot {
        block_number,
        block_hash: Hash256::repeat_byte(hash_byte),
        last_changed_block_hash: Hash256::repeat_byte(last_changed_byte),
        timestamp: 1_700_000_000 + block_number,
    }
}

fn staking_module(id: u32, nonce: u64) -> StakingModule {
    StakingModule {
        id,
        staking_module_address: MODULE_ADDRESS,
        nonce,
        module_type: StakingModuleType::CuratedOnchainV1,
    }
}

fn operator(index: u32, staking_limit: u64, deposited: u64, added: u64) -> Operator {
    Operator {
        index,
        staking_limit,
        total_deposited_validators: deposited,
        total_added_validators: added,
        reward_address: Address::repeat_byte(0xee),
    }
}

fn registry_key(pubkey: PublicKeyBytes, operator_index: u32, index: u32) -> RegistryKey {
    RegistryKey {
        key: pubkey,
        deposit_signature: SignatureBytes::repeat_byte(0x44),
        operator_index,
        used: false,
        index,
        module_address: MODULE_ADDRESS,
    }
}

fn deposit_event(
    pubkey: PublicKeyBytes,
    withdrawal_credentials: Hash256,
    block_number: u64,
    log_index: u32,
    valid: bool,
) -> VerifiedDepositEvent {
    VerifiedDepositEvent {
        block_number,
        block_hash: Hash256::repeat_byte(0x50),
        log_index,
        pubkey,
        withdrawal_credentials,
        amount: 32_000_000_000,
        signature: SignatureBytes::repeat_byte(0x55),
        deposit_count: 0,
        deposit_data_root: Hash256::ZERO,
        tx_hash: Hash256::ZERO,
        valid,
    }
}

struct Cycle {
    operators: Vec<GroupedOperators>,
    keys: Vec<RegistryKey>,
    snapshot: ElBlockSnapshot,
    keys_last_changed: Option<Hash256>,
}

struct MockKeysApi {
    cycles: Mutex<VecDeque<Cycle>>,
    find_pool: Vec<RegistryKey>,
}

impl MockKeysApi {
    fn new(cycles: Vec<Cycle>, find_pool: Vec<RegistryKey>) -> Self {
        Self {
            cycles: Mutex::new(cycles.into()),
            find_pool,
        }
    }

    fn current(&self) -> Cycle {
        let cycles = self.cycles.lock().unwrap();
        let cycle = cycles.front().expect("mock keys api ran out of cycles");
        Cycle {
            operators: cycle.operators.clone(),
            keys: cycle.keys.clone(),
            snapshot: cycle.snapshot.clone(),
            keys_last_changed: cycle.keys_last_changed,
        }
    }

    fn advance(&self) {
        let mut cycles = self.cycles.lock().unwrap();
        if cycles.len() > 1 {
            cycles.pop_front();
        }
    }
}

impl KeysIndex for MockKeysApi {
    async fn get_operators(&self) -> Result<OperatorsResponse, KeysApiError> {
        let cycle = self.current();
        Ok(OperatorsResponse {
            data: cycle.operators,
            meta: ResponseMeta {
                el_block_snapshot: cycle.snapshot,
            },
        })
    }

    async fn get_keys(&self) -> Result<KeysResponse, KeysApiError> {
        let cycle = self.current();
        self.advance();
        let mut meta_snapshot = cycle.snapshot;
        if let Some(overridden) = cycle.keys_last_changed {
            meta_snapshot.last_changed_block_hash = overridden;
        }
        Ok(KeysResponse {
            data: cycle.keys,
            meta: ResponseMeta {
                el_block_snapshot: meta_snapshot,
            },
        })
    }

    async fn find_keys(&self, pubkeys: &[PublicKeyBytes]) -> Result<KeysResponse, KeysApiError> {
        let requested: HashSet<_> = pubkeys.iter().collect();
        let cycle = self.current();
        Ok(KeysResponse {
            data: self
                .find_pool
                .iter()
                .filter(|key| requested.contains(&key.key))
                .cloned()
                .collect(),
            meta: ResponseMeta {
                el_block_snapshot: cycle.snapshot,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UnvetCall {
    module_id: u32,
    nonce: u64,
    operator_ids: Vec<u8>,
    vetted_keys_by_operator: Vec<u8>,
}

struct MockSecurityModule {
    version: u64,
    guardian_index: i64,
    deposits_paused: bool,
    module_paused: bool,
    pause_delay_ms: u64,
    pause_v3_calls: AtomicUsize,
    pause_v2_calls: AtomicUsize,
    unvet_calls: Mutex<Vec<UnvetCall>>,
}

impl MockSecurityModule {
    fn new(version: u64) -> Self {
        Self {
            version,
            guardian_index: 0,
            deposits_paused: false,
            module_paused: false,
            pause_delay_ms: 0,
            pause_v3_calls: AtomicUsize::new(0),
            pause_v2_calls: AtomicUsize::new(0),
            unvet_calls: Mutex::new(Vec::new()),
        }
    }
}

impl SecurityModule for MockSecurityModule {
    async fn version(&self, _block_hash: Hash256) -> Result<u64, ContractError> {
        Ok(self.version)
    }
    async fn get_guardian_index(&self, _guardian: Address, _block_hash: Hash256) -> Result<i64, ContractError> {
        Ok(self.guardian_index)
    }
    async fn get_attest_message_prefix(&self, _block_hash: Hash256) -> Result<Hash256, ContractError> {
        Ok(Hash256::repeat_byte(0xd1))
    }
    async fn get_pause_message_prefix(&self, _block_hash: Hash256) -> Result<Hash256, ContractError> {
        Ok(Hash256::repeat_byte(0xd2))
    }
    async fn get_unvet_message_prefix(&self, _block_hash: Hash256) -> Result<Hash256, ContractError> {
        Ok(Hash256::repeat_byte(0xd3))
    }
    async fn is_deposits_paused(&self, _block_hash: Hash256) -> Result<bool, ContractError> {
        Ok(self.deposits_paused)
    }
    async fn is_module_deposits_paused(&self, _module_id: u32, _block_hash: Hash256) -> Result<bool, ContractError> {
        Ok(self.module_paused)
    }
    async fn pause_deposits_v3(&self, _block_number: u64, _sig: CompactSignature) -> Result<Hash256, ContractError> {
        if self.pause_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.pause_delay_ms)).await;
        }
        self.pause_v3_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Hash256::repeat_byte(0xf3))
    }
    async fn pause_deposits_v2(
        &self,
        _block_number: u64,
        _module_id: u32,
        _sig: CompactSignature,
    ) -> Result<Hash256, ContractError> {
        self.pause_v2_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Hash256::repeat_byte(0xf2))
    }
    async fn unvet_signing_keys(
        &self,
        _block_number: u64,
        _block_hash: Hash256,
        module_id: u32,
        nonce: u64,
        operator_ids: Vec<u8>,
        vetted_keys_by_operator: Vec<u8>,
        _sig: CompactSignature,
    ) -> Result<Hash256, ContractError> {
        self.unvet_calls.lock().unwrap().push(UnvetCall {
            module_id,
            nonce,
            operator_ids,
            vetted_keys_by_operator,
        });
        Ok(Hash256::repeat_byte(0xf1))
    }
}

struct MockDeposits {
    group: DepositEventGroup,
    root: Hash256,
}

impl MockDeposits {
    fn new(events: Vec<VerifiedDepositEvent>) -> Self {
        Self {
            group: DepositEventGroup {
                events,
                start_block: 0,
                end_block: 0,
            },
            root: Hash256::repeat_byte(0xc0),
        }
    }
}

impl DepositsRegistry for MockDeposits {
    async fn update_events_cache(&mut self, _current_block: u64) -> Result<(), DepositsError> {
        Ok(())
    }
    async fn get_all_deposited_events(
        &mut self,
        block_number: u64,
        _block_hash: Hash256,
    ) -> Result<DepositEventGroup, DepositsError> {
        let mut group = self.group.clone();
        group.end_block = block_number;
        Ok(group)
    }
    async fn get_deposit_root(&self, _block_hash: Hash256) -> Result<Hash256, DepositsError> {
        Ok(self.root)
    }
}

struct MockSigningKeys {
    events: Vec<SigningKeyEvent>,
}

impl SigningKeysRegistry for MockSigningKeys {
    async fn update_events_cache(
        &mut self,
        _module_addresses: &[Address],
        _current_block: u64,
    ) -> Result<(), SigningKeysError> {
        Ok(())
    }
    async fn events_for_pubkeys(
        &self,
        pubkeys: &HashSet<PublicKeyBytes>,
        _current_block: u64,
    ) -> Result<Vec<SigningKeyEvent>, SigningKeysError> {
        Ok(self
            .events
            .iter()
            .filter(|event| pubkeys.contains(&event.pubkey))
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
struct MockChecker {
    invalid: HashSet<PublicKeyBytes>,
}

impl DepositSignatureChecker for MockChecker {
    fn verify(&self, pubkey: &PublicKeyBytes, _wc: Hash256, _signature: &SignatureBytes) -> bool {
        !self.invalid.contains(pubkey)
    }
}

type TestGuardian = GuardianService<
    MockKeysApi,
    Arc<MockSecurityModule>,
    MockDeposits,
    MockSigningKeys,
    Arc<InMemoryMessageBus>,
    MockChecker,
>;

struct Harness {
    guardian: TestGuardian,
    bus: Arc<InMemoryMessageBus>,
    security: Arc<MockSecurityModule>,
}

fn test_signer() -> alloy::signers::local::PrivateKeySigner {
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
        .parse()
        .expect("valid key")
}

fn build_harness(
    keys_api: MockKeysApi,
    security: MockSecurityModule,
    deposits: MockDeposits,
    signing_keys: MockSigningKeys,
    checker: MockChecker,
) -> Harness {
    let metrics = Arc::new(Metrics::new("guardian_test"));
    let bus = Arc::new(InMemoryMessageBus::new());
    let security = Arc::new(security);
    let messenger = GuardianMessenger::new(
        Arc::clone(&bus),
        test_signer(),
        "defender".to_owned(),
        false,
        Arc::clone(&metrics),
    );
    let guardian = GuardianService::new(
        GuardianConfig::new(LIDO_WC, false),
        keys_api,
        Arc::clone(&security),
        deposits,
        signing_keys,
        KeySignatureValidator::new(checker),
        messenger,
        None,
        metrics,
    );
    Harness {
        guardian,
        bus,
        security,
    }
}

fn single_module_cycle(snapshot: ElBlockSnapshot, operators: Vec<Operator>, keys: Vec<RegistryKey>) -> Cycle {
    Cycle {
        operators: vec![GroupedOperators {
            operators,
            module: staking_module(1, 5),
        }],
        keys,
        snapshot,
        keys_last_changed: None,
    }
}

#[tokio::test]
async fn clean_cycle_attests_the_deposit_and_pings() {
    let clean_key = registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0);
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 1, 0, 1)],
                vec![clean_key],
            )],
            vec![],
        ),
        MockSecurityModule::new(3),
        MockDeposits::new(vec![]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    let processed = harness.guardian.handle_new_block().await.unwrap();
    assert!(processed);
    assert_eq!(harness.bus.kinds(), vec!["deposit", "ping"]);

    match &harness.bus.messages()[0] {
        GuardianMessage::Deposit {
            staking_module_id,
            nonce,
            block_number,
            ..
        } => {
            assert_eq!(*staking_module_id, 1);
            assert_eq!(*nonce, 5);
            assert_eq!(*block_number, 100);
        }
        other => panic!("expected deposit message, got {other:?}"),
    }

    // identical snapshot again: the block guard skips the cycle entirely
    let processed = harness.guardian.handle_new_block().await.unwrap();
    assert!(!processed);
    assert_eq!(harness.bus.kinds(), vec!["deposit", "ping"]);
}

#[tokio::test]
async fn unchanged_contract_state_is_signed_once_per_window() {
    let clean_key = registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0);
    let operators = vec![operator(1, 1, 0, 1)];
    let harness = build_harness(
        MockKeysApi::new(
            vec![
                single_module_cycle(snapshot(20, 0x10, 0x20), operators.clone(), vec![clean_key.clone()]),
                // same deposit root, nonce and registry view, same 10-block window
                single_module_cycle(snapshot(22, 0x11, 0x20), operators.clone(), vec![clean_key.clone()]),
                // next window
                single_module_cycle(snapshot(30, 0x12, 0x20), operators, vec![clean_key]),
            ],
            vec![],
        ),
        MockSecurityModule::new(3),
        MockDeposits::new(vec![]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    assert!(harness.guardian.handle_new_block().await.unwrap());
    assert!(harness.guardian.handle_new_block().await.unwrap());
    assert!(harness.guardian.handle_new_block().await.unwrap());

    let deposits = harness
        .bus
        .kinds()
        .iter()
        .filter(|kind| **kind == "deposit")
        .count();
    assert_eq!(deposits, 2, "middle cycle must not re-sign the unchanged state");
}

#[tokio::test]
async fn historical_front_run_pauses_and_withholds_attestations() {
    let stolen = PublicKeyBytes::repeat_byte(0x77);
    let clean_key = registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0);
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 1, 0, 1)],
                vec![clean_key],
            )],
            // the keys-index confirms Lido owns the stolen pubkey
            vec![registry_key(stolen, 9, 0)],
        ),
        MockSecurityModule::new(3),
        MockDeposits::new(vec![
            deposit_event(stolen, FOREIGN_WC, 99, 0, true),
            deposit_event(stolen, LIDO_WC, 100, 0, true),
        ]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    assert!(harness.guardian.handle_new_block().await.unwrap());

    assert_eq!(harness.bus.kinds(), vec!["pause", "ping"]);
    assert_eq!(harness.security.pause_v3_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.security.pause_v2_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pre_v3_module_pauses_per_module() {
    let stolen = PublicKeyBytes::repeat_byte(0x77);
    let clean_key = registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0);
    let cycle = Cycle {
        operators: vec![
            GroupedOperators {
                operators: vec![operator(1, 1, 0, 1)],
                module: staking_module(1, 5),
            },
            GroupedOperators {
                operators: vec![],
                module: StakingModule {
                    id: 2,
                    staking_module_address: Address::repeat_byte(0xb0),
                    nonce: 7,
                    module_type: StakingModuleType::Sdvt,
                },
            },
        ],
        keys: vec![clean_key],
        snapshot: snapshot(100, 0x10, 0x20),
        keys_last_changed: None,
    };
    let harness = build_harness(
        MockKeysApi::new(vec![cycle], vec![registry_key(stolen, 9, 0)]),
        MockSecurityModule::new(2),
        MockDeposits::new(vec![
            deposit_event(stolen, FOREIGN_WC, 99, 0, true),
            deposit_event(stolen, LIDO_WC, 100, 0, true),
        ]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    assert!(harness.guardian.handle_new_block().await.unwrap());

    let pauses = harness
        .bus
        .messages()
        .iter()
        .filter_map(|message| match message {
            GuardianMessage::Pause { staking_module_id, .. } => Some(*staking_module_id),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(pauses, vec![Some(1), Some(2)]);
    assert_eq!(harness.security.pause_v2_calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.security.pause_v3_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inconsistent_keys_index_view_aborts_without_messages() {
    let clean_key = registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0);
    let mut bad_cycle = single_module_cycle(
        snapshot(100, 0x10, 0x20),
        vec![operator(1, 1, 0, 1)],
        vec![clean_key.clone()],
    );
    bad_cycle.keys_last_changed = Some(Hash256::repeat_byte(0x21));
    let good_cycle = single_module_cycle(
        snapshot(100, 0x10, 0x20),
        vec![operator(1, 1, 0, 1)],
        vec![clean_key],
    );

    let harness = build_harness(
        MockKeysApi::new(vec![bad_cycle, good_cycle], vec![]),
        MockSecurityModule::new(3),
        MockDeposits::new(vec![]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    let result = harness.guardian.handle_new_block().await;
    assert!(matches!(
        result,
        Err(GuardianError::InconsistentLastChangedBlockHash { .. })
    ));
    assert!(harness.bus.messages().is_empty());

    // the processed-block state was not advanced, so the same block retries
    // and succeeds once the view is consistent
    assert!(harness.guardian.handle_new_block().await.unwrap());
    assert_eq!(harness.bus.kinds(), vec!["deposit", "ping"]);
}

#[tokio::test]
async fn vetted_duplicate_unvets_the_later_operator() {
    let shared = PublicKeyBytes::repeat_byte(0x77);
    let op2_keys = |limit: u64| {
        let mut keys = vec![registry_key(shared, 1, 0)];
        keys.push(registry_key(PublicKeyBytes::repeat_byte(0x30), 2, 0));
        keys.push(registry_key(PublicKeyBytes::repeat_byte(0x31), 2, 1));
        keys.push(registry_key(PublicKeyBytes::repeat_byte(0x32), 2, 2));
        keys.push(registry_key(shared, 2, 3));
        (
            vec![operator(1, 1, 0, 1), operator(2, limit, 0, 4)],
            keys,
        )
    };
    let (operators_limited, keys_limited) = op2_keys(3);
    let (operators_raised, keys_raised) = op2_keys(4);

    let events = vec![
        SigningKeyEvent {
            module_address: MODULE_ADDRESS,
            operator_index: 1,
            pubkey: shared,
            block_number: 50,
            block_hash: Hash256::repeat_byte(0x51),
            log_index: 0,
        },
        SigningKeyEvent {
            module_address: MODULE_ADDRESS,
            operator_index: 2,
            pubkey: shared,
            block_number: 60,
            block_hash: Hash256::repeat_byte(0x52),
            log_index: 0,
        },
    ];

    let harness = build_harness(
        MockKeysApi::new(
            vec![
                single_module_cycle(snapshot(100, 0x10, 0x20), operators_limited, keys_limited),
                single_module_cycle(snapshot(110, 0x11, 0x22), operators_raised, keys_raised),
            ],
            vec![],
        ),
        MockSecurityModule::new(3),
        MockDeposits::new(vec![]),
        MockSigningKeys { events },
        MockChecker::default(),
    );

    // duplicate exists but sits beyond operator 2's staking limit: harmless
    assert!(harness.guardian.handle_new_block().await.unwrap());
    assert_eq!(harness.bus.kinds(), vec!["deposit", "ping"]);
    assert!(harness.security.unvet_calls.lock().unwrap().is_empty());

    // the limit rises to 4, the duplicate becomes vetted-unused: unvet
    // operator 2 back to 3 vetted keys, operator 1 untouched
    assert!(harness.guardian.handle_new_block().await.unwrap());
    let kinds = harness.bus.kinds();
    assert_eq!(kinds.iter().filter(|kind| **kind == "deposit").count(), 1);
    assert!(kinds.contains(&"unvet"));

    let calls = harness.security.unvet_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.module_id, 1);
    assert_eq!(call.nonce, 5);
    let mut expected_operator = vec![0u8; 7];
    expected_operator.push(2);
    assert_eq!(call.operator_ids, expected_operator);
    let mut expected_count = vec![0u8; 15];
    expected_count.push(3);
    assert_eq!(call.vetted_keys_by_operator, expected_count);
}

#[tokio::test]
async fn front_run_attempt_unvets_and_withholds_the_attestation() {
    let targeted = PublicKeyBytes::repeat_byte(0x88);
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 2, 0, 2)],
                vec![
                    registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0),
                    registry_key(targeted, 1, 1),
                ],
            )],
            vec![],
        ),
        MockSecurityModule::new(3),
        // a valid foreign-credential deposit already claims the pubkey
        MockDeposits::new(vec![deposit_event(targeted, FOREIGN_WC, 50, 0, true)]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    assert!(harness.guardian.handle_new_block().await.unwrap());

    let kinds = harness.bus.kinds();
    assert!(kinds.contains(&"unvet"));
    assert!(!kinds.contains(&"deposit"), "front-run attempt must withhold attestation");
    assert!(!kinds.contains(&"pause"), "no theft against deposited keys, no pause");
    assert_eq!(harness.security.pause_v3_calls.load(Ordering::SeqCst), 0);

    let calls = harness.security.unvet_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let mut expected_count = vec![0u8; 15];
    expected_count.push(1);
    assert_eq!(
        calls[0].vetted_keys_by_operator, expected_count,
        "operator must be unvetted down to the flagged key index"
    );
}

#[tokio::test]
async fn invalid_deposit_signature_unvets_the_key() {
    let broken = PublicKeyBytes::repeat_byte(0x99);
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 2, 0, 2)],
                vec![
                    registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0),
                    registry_key(broken, 1, 1),
                ],
            )],
            vec![],
        ),
        MockSecurityModule::new(3),
        MockDeposits::new(vec![]),
        MockSigningKeys { events: vec![] },
        MockChecker {
            invalid: [broken].into_iter().collect(),
        },
    );

    assert!(harness.guardian.handle_new_block().await.unwrap());

    let kinds = harness.bus.kinds();
    assert!(kinds.contains(&"unvet"));
    assert!(!kinds.contains(&"deposit"));
}

#[tokio::test]
async fn already_paused_module_sends_nothing_but_ping() {
    let stolen = PublicKeyBytes::repeat_byte(0x77);
    let mut security = MockSecurityModule::new(3);
    security.deposits_paused = true;
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 1, 0, 1)],
                vec![registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0)],
            )],
            vec![registry_key(stolen, 9, 0)],
        ),
        security,
        MockDeposits::new(vec![
            deposit_event(stolen, FOREIGN_WC, 99, 0, true),
            deposit_event(stolen, LIDO_WC, 100, 0, true),
        ]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    assert!(harness.guardian.handle_new_block().await.unwrap());
    assert_eq!(harness.bus.kinds(), vec!["ping"]);
    assert_eq!(harness.security.pause_v3_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unregistered_guardian_stands_by() {
    let mut security = MockSecurityModule::new(3);
    security.guardian_index = -1;
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 1, 0, 1)],
                vec![registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0)],
            )],
            vec![],
        ),
        security,
        MockDeposits::new(vec![]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    let processed = harness.guardian.handle_new_block().await.unwrap();
    assert!(!processed);
    assert!(harness.bus.messages().is_empty());
}

#[tokio::test]
async fn overlapping_cycles_submit_the_pause_transaction_once() {
    let stolen = PublicKeyBytes::repeat_byte(0x77);
    let mut security = MockSecurityModule::new(3);
    security.pause_delay_ms = 100;
    let harness = build_harness(
        MockKeysApi::new(
            vec![single_module_cycle(
                snapshot(100, 0x10, 0x20),
                vec![operator(1, 1, 0, 1)],
                vec![registry_key(PublicKeyBytes::repeat_byte(0x66), 1, 0)],
            )],
            vec![registry_key(stolen, 9, 0)],
        ),
        security,
        MockDeposits::new(vec![
            deposit_event(stolen, FOREIGN_WC, 99, 0, true),
            deposit_event(stolen, LIDO_WC, 100, 0, true),
        ]),
        MockSigningKeys { events: vec![] },
        MockChecker::default(),
    );

    let guardian = Arc::new(harness.guardian);
    let first = {
        let guardian = Arc::clone(&guardian);
        tokio::spawn(async move { guardian.tick().await })
    };
    let second = {
        let guardian = Arc::clone(&guardian);
        tokio::spawn(async move { guardian.tick().await })
    };
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(
        harness.security.pause_v3_calls.load(Ordering::SeqCst),
        1,
        "the overlapping cycle must be skipped while the pause is in flight"
    );
}
