//! The per-block decision pipeline.
//!
//! Each cycle pins a keys-index snapshot, refreshes the deposit index
//! against it, classifies every module's vetted keys (invalid, duplicated,
//! front-run) and either attests the deposit, withholds the signature, or
//! escalates with pause / unvet messages. The cycle is atomic from the
//! guard's point of view: any infrastructure failure aborts it without
//! advancing the processed-block state, so the next tick retries the same
//! view. Messages already published stand.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use lido_council_shared::cycle::{BlockData, ContractsState, StakingModuleData};
use lido_council_shared::eth::{Address, Hash256};
use lido_council_shared::keys::select_vetted_unused_keys;
use thiserror::Error;

use crate::block_guard::{BlockGuard, StateChangeDetector, StateMeta};
use crate::consts::GUARDIAN_DEPOSIT_RESIGNING_BLOCKS;
use crate::deposits::{DepositsError, DepositsRegistry};
use crate::duplicates::{self, VettedKey};
use crate::eth_client::{ContractError, DefaultProvider, SecurityModule, WalletMonitor};
use crate::front_run;
use crate::keys_api::{ElBlockSnapshot, KeysApiError, KeysIndex};
use crate::messenger::{GuardianMessenger, MessageBus, MessageSignature, MessengerError};
use crate::prometheus_metrics::{self, outcome};
use crate::signature_cache::{DepositSignatureChecker, KeySignatureValidator};
use crate::signing_keys::{SigningKeysError, SigningKeysRegistry};
use crate::util::OneAtTime;

use lido_council_shared::attestation::{pack_operator_ids, pack_vetted_counts};
use lido_council_shared::util::usize_to_u64;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error(transparent)]
    KeysApi(#[from] KeysApiError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Deposits(#[from] DepositsError),

    #[error(transparent)]
    SigningKeys(#[from] SigningKeysError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(
        "Keys-index changed mid-cycle: operators view at {operators_view}, keys view at {keys_view}"
    )]
    InconsistentLastChangedBlockHash {
        operators_view: Hash256,
        keys_view: Hash256,
    },
}

pub struct GuardianConfig {
    pub lido_withdrawal_credentials: Hash256,
    pub dry_run: bool,
    pub resigning_blocks: u64,
}

impl GuardianConfig {
    pub fn new(lido_withdrawal_credentials: Hash256, dry_run: bool) -> Self {
        Self {
            lido_withdrawal_credentials,
            dry_run,
            resigning_blocks: GUARDIAN_DEPOSIT_RESIGNING_BLOCKS,
        }
    }
}

pub struct GuardianService<KA, SM, DR, SK, MB, C>
where
    KA: KeysIndex,
    SM: SecurityModule,
    DR: DepositsRegistry,
    SK: SigningKeysRegistry,
    MB: MessageBus,
    C: DepositSignatureChecker,
{
    keys_api: KA,
    security_module: SM,
    deposits: tokio::sync::Mutex<DR>,
    signing_keys: tokio::sync::Mutex<SK>,
    signature_validator: KeySignatureValidator<C>,
    messenger: GuardianMessenger<MB>,
    wallet: Option<Arc<WalletMonitor<DefaultProvider>>>,
    block_guard: BlockGuard,
    state_detector: StateChangeDetector,
    tick_guard: OneAtTime,
    pause_guard: OneAtTime,
    unvet_guard: OneAtTime,
    lido_withdrawal_credentials: Hash256,
    dry_run: bool,
    metrics: Arc<prometheus_metrics::Metrics>,
}

impl<KA, SM, DR, SK, MB, C> GuardianService<KA, SM, DR, SK, MB, C>
where
    KA: KeysIndex,
    SM: SecurityModule,
    DR: DepositsRegistry,
    SK: SigningKeysRegistry,
    MB: MessageBus,
    C: DepositSignatureChecker,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GuardianConfig,
        keys_api: KA,
        security_module: SM,
        deposits: DR,
        signing_keys: SK,
        signature_validator: KeySignatureValidator<C>,
        messenger: GuardianMessenger<MB>,
        wallet: Option<Arc<WalletMonitor<DefaultProvider>>>,
        metrics: Arc<prometheus_metrics::Metrics>,
    ) -> Self {
        Self {
            keys_api,
            security_module,
            deposits: tokio::sync::Mutex::new(deposits),
            signing_keys: tokio::sync::Mutex::new(signing_keys),
            signature_validator,
            messenger,
            wallet,
            block_guard: BlockGuard::new(),
            state_detector: StateChangeDetector::new(config.resigning_blocks),
            tick_guard: OneAtTime::new(),
            pause_guard: OneAtTime::new(),
            unvet_guard: OneAtTime::new(),
            lido_withdrawal_credentials: config.lido_withdrawal_credentials,
            dry_run: config.dry_run,
            metrics,
        }
    }

    /// Scheduler entry point. Overlapping invocations are skipped whole.
    pub async fn tick(&self) {
        let Some(_permit) = self.tick_guard.try_acquire() else {
            tracing::debug!("Previous guardian cycle still running, skipping tick");
            self.metrics
                .guardian
                .tick_outcome
                .with_label_values(&[outcome::SKIPPED])
                .inc();
            return;
        };

        match self.handle_new_block().await {
            Ok(true) => {
                self.metrics
                    .guardian
                    .tick_outcome
                    .with_label_values(&[outcome::SUCCESS])
                    .inc();
            }
            Ok(false) => {
                self.metrics
                    .guardian
                    .tick_outcome
                    .with_label_values(&[outcome::SKIPPED])
                    .inc();
            }
            Err(error) => {
                tracing::error!("Guardian cycle failed: {error}");
                self.metrics
                    .guardian
                    .tick_outcome
                    .with_label_values(&[outcome::ERROR])
                    .inc();
            }
        }
    }

    /// One full cycle; returns `Ok(false)` when there was nothing to do.
    pub async fn handle_new_block(&self) -> Result<bool, GuardianError> {
        let operators_response = self.keys_api.get_operators().await?;
        let snapshot = operators_response.meta.el_block_snapshot.clone();
        let state_meta = StateMeta {
            block_number: snapshot.block_number,
            block_hash: snapshot.block_hash,
        };

        if !self.block_guard.is_need_to_process_new_state(state_meta) {
            tracing::debug!(
                block_number = snapshot.block_number,
                "No new block state, nothing to process"
            );
            return Ok(false);
        }

        let keys_response = self.keys_api.get_keys().await?;
        let keys_view = keys_response.meta.el_block_snapshot.last_changed_block_hash;
        if keys_view != snapshot.last_changed_block_hash {
            // the registry mutated between the two reads; this view is not
            // linearizable and must not produce any attestation
            return Err(GuardianError::InconsistentLastChangedBlockHash {
                operators_view: snapshot.last_changed_block_hash,
                keys_view,
            });
        }

        let guardian_index = self
            .security_module
            .get_guardian_index(self.messenger.guardian_address(), snapshot.block_hash)
            .await?;
        if guardian_index < 0 {
            tracing::warn!(
                guardian = %self.messenger.guardian_address(),
                "Guardian address is not registered in the security module, standing by"
            );
            return Ok(false);
        }

        {
            let mut deposits = self.deposits.lock().await;
            deposits.update_events_cache(snapshot.block_number).await?;
        }
        let (deposited_events, deposit_root) = {
            let mut deposits = self.deposits.lock().await;
            let events = deposits
                .get_all_deposited_events(snapshot.block_number, snapshot.block_hash)
                .await?;
            let root = deposits.get_deposit_root(snapshot.block_hash).await?;
            (events, root)
        };

        if let Some(wallet) = &self.wallet {
            if let Err(error) = wallet.update_balance(snapshot.block_number).await {
                tracing::warn!("Failed to refresh wallet balance: {error}");
            }
        }

        let security_version = self.security_module.version(snapshot.block_hash).await?;
        let module_ids: Vec<u32> = operators_response.data.iter().map(|group| group.module.id).collect();
        let already_paused_deposits = self
            .read_already_paused(security_version, &module_ids, snapshot.block_hash)
            .await?;

        let theft_happened = front_run::is_theft_happened(
            &self.keys_api,
            &deposited_events,
            self.lido_withdrawal_credentials,
        )
        .await?;

        let block_data = BlockData {
            block_number: snapshot.block_number,
            block_hash: snapshot.block_hash,
            deposit_root,
            deposited_events,
            guardian_address: self.messenger.guardian_address(),
            guardian_index,
            lido_withdrawal_credentials: self.lido_withdrawal_credentials,
            security_version,
            already_paused_deposits,
            theft_happened,
            wallet_balance_critical: self
                .wallet
                .as_ref()
                .map(|wallet| wallet.is_balance_critical())
                .unwrap_or(false),
        };

        let mut modules = self.collect_module_data(&operators_response, &keys_response, &snapshot);
        self.classify_keys(&mut modules, &snapshot).await?;

        if block_data.theft_happened && !block_data.already_paused_deposits {
            self.handle_pause(&block_data, &modules).await;
        }

        let attest_prefix = self
            .security_module
            .get_attest_message_prefix(snapshot.block_hash)
            .await?;
        futures::future::join_all(
            modules
                .iter_mut()
                .map(|module| self.process_module(module, &block_data, attest_prefix)),
        )
        .await;

        self.messenger.ping(&block_data, module_ids).await?;

        self.block_guard.set_last_processed_state_meta(state_meta);
        self.metrics.guardian.block_number.set(snapshot.block_number);
        tracing::info!(
            block_number = snapshot.block_number,
            modules = modules.len(),
            theft_happened = block_data.theft_happened,
            "Guardian cycle complete"
        );
        Ok(true)
    }

    async fn read_already_paused(
        &self,
        security_version: u64,
        module_ids: &[u32],
        block_hash: Hash256,
    ) -> Result<bool, GuardianError> {
        if security_version >= 3 {
            return Ok(self.security_module.is_deposits_paused(block_hash).await?);
        }
        // pre-v3 pausing is per module: the global flag only holds when every
        // module is already paused
        if module_ids.is_empty() {
            return Ok(false);
        }
        for module_id in module_ids {
            if !self
                .security_module
                .is_module_deposits_paused(*module_id, block_hash)
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn collect_module_data(
        &self,
        operators_response: &crate::keys_api::OperatorsResponse,
        keys_response: &crate::keys_api::KeysResponse,
        snapshot: &ElBlockSnapshot,
    ) -> Vec<StakingModuleData> {
        operators_response
            .data
            .iter()
            .map(|group| {
                let unused_keys: Vec<_> = keys_response
                    .data
                    .iter()
                    .filter(|key| {
                        !key.used && key.module_address == group.module.staking_module_address
                    })
                    .cloned()
                    .collect();
                let vetted_unused_keys = select_vetted_unused_keys(&group.operators, &unused_keys);
                StakingModuleData {
                    module_id: group.module.id,
                    module_address: group.module.staking_module_address,
                    nonce: group.module.nonce,
                    block_hash: snapshot.block_hash,
                    last_changed_block_hash: snapshot.last_changed_block_hash,
                    unused_keys,
                    vetted_unused_keys,
                    duplicated_keys: Vec::new(),
                    front_run_keys: Vec::new(),
                    invalid_keys: Vec::new(),
                }
            })
            .collect()
    }

    /// Global classification pass: BLS-invalid keys first, then duplicates
    /// over the remaining vetted keys across all modules.
    async fn classify_keys(
        &self,
        modules: &mut [StakingModuleData],
        snapshot: &ElBlockSnapshot,
    ) -> Result<(), GuardianError> {
        for module in modules.iter_mut() {
            module.invalid_keys = self
                .signature_validator
                .get_invalid_keys(&module.vetted_unused_keys, self.lido_withdrawal_credentials);
        }

        let module_addresses: Vec<Address> = modules.iter().map(|module| module.module_address).collect();
        {
            let mut signing_keys = self.signing_keys.lock().await;
            signing_keys
                .update_events_cache(&module_addresses, snapshot.block_number)
                .await?;
        }

        let vetted: Vec<VettedKey> = modules
            .iter()
            .flat_map(|module| {
                let invalid: HashSet<_> = module
                    .invalid_keys
                    .iter()
                    .map(|key| (key.operator_index, key.index))
                    .collect();
                module
                    .vetted_unused_keys
                    .iter()
                    .filter(move |key| !invalid.contains(&(key.operator_index, key.index)))
                    .map(|key| VettedKey {
                        module_id: module.module_id,
                        key: key.clone(),
                    })
            })
            .collect();
        let pubkeys: HashSet<_> = vetted.iter().map(|instance| instance.key.key).collect();
        let events = self
            .signing_keys
            .lock()
            .await
            .events_for_pubkeys(&pubkeys, snapshot.block_number)
            .await?;

        let duplicated = duplicates::find_duplicated_keys(&vetted, &events);
        for module in modules.iter_mut() {
            module.duplicated_keys = duplicated
                .iter()
                .filter(|instance| instance.module_id == module.module_id)
                .map(|instance| instance.key.clone())
                .collect();
        }
        Ok(())
    }

    /// Pause escalation. Exactly one branch emits for a given version; all
    /// failures are logged without failing the cycle.
    async fn handle_pause(&self, block_data: &BlockData, modules: &[StakingModuleData]) {
        let prefix = match self
            .security_module
            .get_pause_message_prefix(block_data.block_hash)
            .await
        {
            Ok(prefix) => prefix,
            Err(error) => {
                tracing::error!("Failed to read pause message prefix: {error}");
                return;
            }
        };

        if block_data.security_version >= 3 {
            match self.messenger.broadcast_pause_v3(prefix, block_data).await {
                Ok(signature) => self.submit_pause_v3(block_data.block_number, signature).await,
                Err(error) => tracing::error!("Failed to broadcast pause message: {error}"),
            }
            return;
        }

        for module in modules {
            match self
                .security_module
                .is_module_deposits_paused(module.module_id, block_data.block_hash)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(
                        module_id = module.module_id,
                        "Failed to read module pause state: {error}"
                    );
                    continue;
                }
            }
            match self
                .messenger
                .broadcast_pause_v2(prefix, block_data, module.module_id)
                .await
            {
                Ok(signature) => {
                    self.submit_pause_v2(block_data.block_number, module.module_id, signature)
                        .await
                }
                Err(error) => tracing::error!(
                    module_id = module.module_id,
                    "Failed to broadcast pause message: {error}"
                ),
            }
        }
    }

    async fn submit_pause_v3(&self, block_number: u64, signature: MessageSignature) {
        let Some(_permit) = self.pause_guard.try_acquire() else {
            tracing::debug!("Pause transaction already in flight");
            return;
        };
        if self.dry_run {
            tracing::info!("DRY_RUN: skipping pauseDeposits transaction");
            return;
        }
        match self
            .security_module
            .pause_deposits_v3(block_number, signature.to_compact())
            .await
        {
            Ok(tx_hash) => tracing::info!(%tx_hash, "Pause transaction submitted"),
            Err(error) => tracing::error!("Pause transaction failed: {error}"),
        }
    }

    async fn submit_pause_v2(&self, block_number: u64, module_id: u32, signature: MessageSignature) {
        let Some(_permit) = self.pause_guard.try_acquire() else {
            tracing::debug!("Pause transaction already in flight");
            return;
        };
        if self.dry_run {
            tracing::info!("DRY_RUN: skipping pauseDeposits transaction");
            return;
        }
        match self
            .security_module
            .pause_deposits_v2(block_number, module_id, signature.to_compact())
            .await
        {
            Ok(tx_hash) => tracing::info!(%tx_hash, module_id, "Pause transaction submitted"),
            Err(error) => tracing::error!(module_id, "Pause transaction failed: {error}"),
        }
    }

    async fn process_module(
        &self,
        module: &mut StakingModuleData,
        block_data: &BlockData,
        attest_prefix: Hash256,
    ) {
        module.front_run_keys = front_run::find_front_run_attempts(
            &block_data.deposited_events,
            self.lido_withdrawal_credentials,
            &module.vetted_unused_keys,
        );
        self.report_module_metrics(module);

        if module.has_flagged_keys() {
            self.handle_unvetting(module, block_data).await;
        }

        if !Self::can_deposit(module, block_data) {
            tracing::warn!(
                module_id = module.module_id,
                front_run = module.front_run_keys.len(),
                invalid = module.invalid_keys.len(),
                duplicated = module.duplicated_keys.len(),
                theft_happened = block_data.theft_happened,
                already_paused = block_data.already_paused_deposits,
                "Deposits are unsafe, withholding attestation"
            );
            return;
        }

        self.handle_correct_keys(module, block_data, attest_prefix).await;
    }

    fn can_deposit(module: &StakingModuleData, block_data: &BlockData) -> bool {
        !block_data.theft_happened
            && !block_data.already_paused_deposits
            && !module.has_flagged_keys()
    }

    fn report_module_metrics(&self, module: &StakingModuleData) {
        let module_id = module.module_id.to_string();
        let set = |category: &str, value: usize| {
            self.metrics
                .guardian
                .module_keys
                .with_label_values(&[&module_id, category])
                .set(usize_to_u64(value));
        };
        set("unused", module.unused_keys.len());
        set("vetted_unused", module.vetted_unused_keys.len());
        set("duplicated", module.duplicated_keys.len());
        set("front_run", module.front_run_keys.len());
        set("invalid", module.invalid_keys.len());
    }

    /// Builds and broadcasts the unvet payload for every operator holding a
    /// flagged key: the operator's vetted count drops to its lowest flagged
    /// key index.
    async fn handle_unvetting(&self, module: &StakingModuleData, block_data: &BlockData) {
        let mut new_limits: BTreeMap<u64, u128> = BTreeMap::new();
        for key in module
            .front_run_keys
            .iter()
            .chain(&module.invalid_keys)
            .chain(&module.duplicated_keys)
        {
            let operator = key.operator_index as u64;
            let limit = key.index as u128;
            new_limits
                .entry(operator)
                .and_modify(|existing| *existing = (*existing).min(limit))
                .or_insert(limit);
        }
        if new_limits.is_empty() {
            return;
        }

        let operator_ids: Vec<u64> = new_limits.keys().copied().collect();
        let counts: Vec<u128> = new_limits.values().copied().collect();
        let packed_operators = pack_operator_ids(&operator_ids);
        let packed_counts = pack_vetted_counts(&counts);
        tracing::warn!(
            module_id = module.module_id,
            operators = ?operator_ids,
            new_limits = ?counts,
            "Unvetting flagged keys"
        );

        let prefix = match self
            .security_module
            .get_unvet_message_prefix(block_data.block_hash)
            .await
        {
            Ok(prefix) => prefix,
            Err(error) => {
                tracing::error!("Failed to read unvet message prefix: {error}");
                return;
            }
        };

        let signature = match self
            .messenger
            .broadcast_unvet(prefix, block_data, module, &packed_operators, &packed_counts)
            .await
        {
            Ok(signature) => signature,
            Err(error) => {
                tracing::error!(
                    module_id = module.module_id,
                    "Failed to broadcast unvet message: {error}"
                );
                return;
            }
        };

        let Some(_permit) = self.unvet_guard.try_acquire() else {
            tracing::debug!("Unvet transaction already in flight");
            return;
        };
        if self.dry_run {
            tracing::info!("DRY_RUN: skipping unvetSigningKeys transaction");
            return;
        }
        match self
            .security_module
            .unvet_signing_keys(
                block_data.block_number,
                block_data.block_hash,
                module.module_id,
                module.nonce,
                packed_operators,
                packed_counts,
                signature.to_compact(),
            )
            .await
        {
            Ok(tx_hash) => tracing::info!(%tx_hash, module_id = module.module_id, "Unvet transaction submitted"),
            Err(error) => tracing::error!(
                module_id = module.module_id,
                "Unvet transaction failed: {error}"
            ),
        }
    }

    /// All keys clean: attest the deposit unless the same contract state was
    /// already signed within the current re-signing window.
    async fn handle_correct_keys(
        &self,
        module: &StakingModuleData,
        block_data: &BlockData,
        attest_prefix: Hash256,
    ) {
        let state = ContractsState {
            deposit_root: block_data.deposit_root,
            nonce: module.nonce,
            block_number: block_data.block_number,
            last_changed_block_hash: module.last_changed_block_hash,
        };
        if self.state_detector.is_same_contracts_state(module.module_id, &state) {
            tracing::debug!(
                module_id = module.module_id,
                "Contract state unchanged within the re-signing window, not re-signing"
            );
            return;
        }

        match self
            .messenger
            .broadcast_deposit(attest_prefix, block_data, module)
            .await
        {
            Ok(()) => self.state_detector.set_contracts_state(module.module_id, state),
            Err(error) => tracing::error!(
                module_id = module.module_id,
                "Failed to broadcast deposit message: {error}"
            ),
        }
    }
}
