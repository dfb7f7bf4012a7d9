//! The ledger service: every flow writes locally first, then on chain.
//!
//! Validation, duplicate and not-found errors abort before any write. When
//! the chain write fails after the local write, the failure is persisted on
//! the record (a failed `PendingProof` for batches, a failed `ChainStatus` for
//! products and stages) and the caller receives `PartialFailure`.
//!
//! A write that was broadcast but not confirmed in time keeps its hash. It is
//! looked up before anything is sent again, so a late confirmation is never
//! duplicated.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use agritrace_chain::{
    envelope, ChainConfig, ChainError, ChainNode, ChainRecorder, ContractGateway, NewProduct,
    OnChainProduct, RecordedTx, StageUpdate, TxOutcome, VerificationReader, VerificationResult,
    DEFAULT_STAGE_STATUS,
};
use agritrace_storage::{
    now_rfc3339, BatchMeta, BatchRecord, ChainStatus, LedgerStore, ProductRecord, ProofAction,
    StageRecord, StageStatus,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{PartialRecord, Result, ServiceError};
use crate::locks::KeyedLocks;
use crate::request::{
    BatchWrite, ChainReceipt, NewBatch, NewProductRequest, PaymentOutcome, PaymentResolution,
    ProductRetryReport, ProductWrite, RetryReport, StageRequest, StageWrite,
};
use crate::validate;

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    recorder: ChainRecorder,
    gateway: ContractGateway,
    verifier: VerificationReader,
    locks: KeyedLocks,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>, node: Arc<dyn ChainNode>, config: &ChainConfig) -> Self {
        let timeout = Duration::from_secs(config.confirmation_timeout_secs);
        Self {
            store,
            recorder: ChainRecorder::new(node.clone(), config.gas.clone(), timeout),
            gateway: ContractGateway::new(node.clone(), config.gas.clone(), timeout),
            verifier: VerificationReader::new(node, config.explorer_url.clone()),
            locks: KeyedLocks::default(),
        }
    }

    /// Receipt polling interval for chain writes (500 ms unless changed).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.recorder = self.recorder.with_poll_interval(poll_interval);
        self.gateway = self.gateway.with_poll_interval(poll_interval);
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    // ── Batches ──────────────────────────────────────────────────────────────

    /// Register a batch and anchor `{action: addBatch, batchId, meta}`.
    pub async fn add_batch(&self, request: NewBatch) -> Result<BatchWrite> {
        let batch_id = validate::required("batchId", &request.batch_id)?.to_string();
        validate::address("farmerAddr", &request.farmer_addr)?;
        if let Some(date) = non_empty(&request.harvest_date) {
            validate::harvest_date("harvestDate", date)?;
        }
        if let Some(price) = non_empty(&request.price_eth) {
            validate::amount("priceEth", price)?;
        }

        let _guard = self.locks.lock(batch_key(&batch_id)).await;
        if self.store.batch_exists(&batch_id).await? {
            return Err(ServiceError::Duplicate(format!(
                "batch already exists: {}",
                batch_id
            )));
        }

        let meta = BatchMeta {
            farmer_addr: request.farmer_addr.trim().to_string(),
            crop_type: request.crop_type,
            harvest_date: request.harvest_date,
            location: request.location,
            price_eth: request.price_eth,
            ..Default::default()
        };
        let mut record = BatchRecord::new(&batch_id, meta);
        let payload = envelope(
            ProofAction::AddBatch.as_str(),
            &json!({"batchId": batch_id, "meta": record.meta}),
        );
        let pending_id = record.push_pending(ProofAction::AddBatch, payload, None);
        self.store.insert_batch(record).await?;

        self.anchor_pending(&batch_id, &pending_id).await
    }

    /// Append an event and anchor `{action: addEvent, batchId, event}`.
    pub async fn add_event(&self, batch_id: &str, event: Value) -> Result<BatchWrite> {
        let batch_id = validate::required("batchId", batch_id)?;
        if event.is_null() {
            return Err(ServiceError::Validation("event is required".to_string()));
        }

        let _guard = self.locks.lock(batch_key(batch_id)).await;
        let mut record = self.store.get_batch(batch_id).await?;
        let version = record.version;

        record.events.push(event.clone());
        let payload = envelope(
            ProofAction::AddEvent.as_str(),
            &json!({"batchId": batch_id, "event": event}),
        );
        let pending_id = record.push_pending(ProofAction::AddEvent, payload, None);
        self.store.update_batch(record, version).await?;

        self.anchor_pending(batch_id, &pending_id).await
    }

    /// Mark the batch delivered and anchor `{action: confirmDelivery, batchId, timestamp}`.
    pub async fn confirm_delivery(&self, batch_id: &str) -> Result<BatchWrite> {
        let batch_id = validate::required("batchId", batch_id)?;

        let _guard = self.locks.lock(batch_key(batch_id)).await;
        let mut record = self.store.get_batch(batch_id).await?;
        let version = record.version;

        record.meta.delivered = true;
        let payload = envelope(
            ProofAction::ConfirmDelivery.as_str(),
            &json!({"batchId": batch_id, "timestamp": now_rfc3339()}),
        );
        let pending_id = record.push_pending(ProofAction::ConfirmDelivery, payload, None);
        self.store.update_batch(record, version).await?;

        self.anchor_pending(batch_id, &pending_id).await
    }

    /// Send `price_eth` (or the batch's registered price) to the farmer.
    ///
    /// A batch is paid at most once. Attempts that never reached the chain
    /// are discarded by the next call. A payment that was broadcast but not
    /// confirmed blocks further attempts until [`LedgerService::resolve_payment`]
    /// settles it.
    pub async fn pay_farmer(&self, batch_id: &str, price_eth: Option<&str>) -> Result<BatchWrite> {
        let batch_id = validate::required("batchId", batch_id)?;

        let _guard = self.locks.lock(batch_key(batch_id)).await;
        let mut record = self.store.get_batch(batch_id).await?;
        let version = record.version;

        let price = match price_eth.map(str::trim).filter(|p| !p.is_empty()) {
            Some(price) => price.to_string(),
            None => non_empty(&record.meta.price_eth)
                .map(str::to_string)
                .ok_or_else(|| ServiceError::Validation("priceEth is required".to_string()))?,
        };
        let amount = validate::amount("priceEth", &price)?;
        let farmer = validate::address("farmerAddr", &record.meta.farmer_addr)?;

        if record.meta.paid {
            return Err(ServiceError::Duplicate(format!(
                "batch already paid: {}",
                batch_id
            )));
        }
        if let Some(open) = record.unresolved_payment() {
            return Err(ServiceError::Conflict(format!(
                "batch {} has an unconfirmed payment {} ({}); resolve it before paying again",
                batch_id,
                open.id,
                open.tx_hash.as_deref().unwrap_or_default()
            )));
        }
        let discarded = record.discard_unsent_payments();
        if discarded > 0 {
            debug!("Discarded {} unsent payment attempt(s) of batch {}", discarded, batch_id);
        }

        let payload = envelope(
            ProofAction::PayFarmer.as_str(),
            &json!({"batchId": batch_id, "to": record.meta.farmer_addr, "amountEth": price}),
        );
        let pending_id = record.push_pending(ProofAction::PayFarmer, payload, Some(price.clone()));
        let version = self.store.update_batch(record.clone(), version).await?;
        record.version = version;

        match self.recorder.transfer(farmer, amount).await {
            Ok(tx) => {
                record.confirm_pending(&pending_id, &tx.tx_hash);
                record.meta.paid = true;
                record.meta.payment_tx = Some(tx.tx_hash.clone());
                let record = self.save_batch(record, Some(&tx)).await?;
                info!("Paid {} to farmer of batch {} in tx {}", price, batch_id, tx.tx_hash);
                Ok(BatchWrite {
                    batch: record,
                    tx_hash: tx.tx_hash,
                })
            }
            Err(err) => {
                record.fail_pending(&pending_id, &err.to_string());
                match err.unconfirmed_tx() {
                    Some(tx_hash) => {
                        record.note_unconfirmed(&pending_id, tx_hash);
                        warn!(
                            "Payment for batch {} sent in {} but not confirmed: {}",
                            batch_id, tx_hash, err
                        );
                    }
                    None => warn!("Payment for batch {} was not sent: {}", batch_id, err),
                }
                let record = self.save_batch(record, None).await?;
                Err(ServiceError::PartialFailure {
                    record: Box::new(PartialRecord::Batch(record)),
                    source: err,
                })
            }
        }
    }

    /// Look up the batch's unconfirmed payment once and settle it.
    ///
    /// A confirmed transfer marks the batch paid. A reverted or dropped one
    /// is released so the batch can be paid again. A transfer still waiting
    /// to be mined changes nothing.
    pub async fn resolve_payment(&self, batch_id: &str) -> Result<PaymentResolution> {
        let batch_id = validate::required("batchId", batch_id)?;

        let _guard = self.locks.lock(batch_key(batch_id)).await;
        let mut record = self.store.get_batch(batch_id).await?;
        let (pending_id, tx_hash) = match record.unresolved_payment() {
            Some(open) => (open.id.clone(), open.tx_hash.clone().unwrap_or_default()),
            None => {
                return Err(ServiceError::NotFound(format!(
                    "batch {} has no unconfirmed payment",
                    batch_id
                )))
            }
        };

        let outcome = match self.look_up(&tx_hash).await? {
            Lookup::Landed => {
                record.confirm_pending(&pending_id, &tx_hash);
                record.meta.paid = true;
                record.meta.payment_tx = Some(tx_hash.clone());
                PaymentOutcome::Confirmed
            }
            Lookup::InFlight => {
                return Ok(PaymentResolution {
                    outcome: PaymentOutcome::Pending,
                    tx_hash,
                    batch: record,
                })
            }
            Lookup::Reverted(reason) => {
                record.clear_unconfirmed(&pending_id, &reason);
                PaymentOutcome::Reverted
            }
            Lookup::Dropped(reason) => {
                record.clear_unconfirmed(&pending_id, &reason);
                PaymentOutcome::Dropped
            }
        };

        let batch = self.save_batch(record, None).await?;
        info!("Payment {} of batch {} resolved as {:?}", tx_hash, batch_id, outcome);
        Ok(PaymentResolution {
            outcome,
            tx_hash,
            batch,
        })
    }

    pub async fn read_batch(&self, batch_id: &str) -> Result<BatchRecord> {
        Ok(self.store.get_batch(batch_id).await?)
    }

    pub async fn list_batches(&self) -> Result<Vec<BatchRecord>> {
        Ok(self.store.list_batches().await?)
    }

    /// Re-submit every retryable pending proof of a batch with its original
    /// payload. Payments are never re-sent.
    pub async fn retry_pending(&self, batch_id: &str) -> Result<RetryReport> {
        let batch_id = validate::required("batchId", batch_id)?;

        let _guard = self.locks.lock(batch_key(batch_id)).await;
        let mut record = self.store.get_batch(batch_id).await?;

        let mut confirmed = Vec::new();
        let mut still_pending = Vec::new();
        let mut skipped = Vec::new();

        let pending: Vec<_> = record.pending_proofs.clone();
        for proof in pending {
            if !proof.action.is_retryable() {
                skipped.push(proof.id);
                continue;
            }
            match self.recorder.record_envelope(&proof.payload).await {
                Ok(tx) => {
                    record.confirm_pending(&proof.id, &tx.tx_hash);
                    info!("Retried {} of batch {}: tx {}", proof.id, batch_id, tx.tx_hash);
                    confirmed.push(proof.id);
                }
                Err(err) => {
                    record.fail_pending(&proof.id, &err.to_string());
                    warn!("Retry of {} for batch {} failed: {}", proof.id, batch_id, err);
                    still_pending.push(proof.id);
                }
            }
        }

        let batch = if confirmed.is_empty() && still_pending.is_empty() {
            record
        } else {
            self.save_batch(record, None).await?
        };

        Ok(RetryReport {
            confirmed,
            still_pending,
            skipped,
            batch,
        })
    }

    /// Anchor the payload of one pending proof and persist the outcome.
    /// Caller holds the batch lock.
    async fn anchor_pending(&self, batch_id: &str, pending_id: &str) -> Result<BatchWrite> {
        let mut record = self.store.get_batch(batch_id).await?;
        let payload = record
            .pending(pending_id)
            .map(|p| p.payload.clone())
            .ok_or_else(|| {
                ServiceError::Storage(format!("pending proof {} vanished from {}", pending_id, batch_id))
            })?;

        match self.recorder.record_envelope(&payload).await {
            Ok(tx) => {
                record.confirm_pending(pending_id, &tx.tx_hash);
                let record = self.save_batch(record, Some(&tx)).await?;
                Ok(BatchWrite {
                    batch: record,
                    tx_hash: tx.tx_hash,
                })
            }
            Err(err) => {
                record.fail_pending(pending_id, &err.to_string());
                let record = self.save_batch(record, None).await?;
                warn!(
                    "Batch {} saved but {} was not anchored: {}",
                    batch_id, pending_id, err
                );
                Err(ServiceError::PartialFailure {
                    record: Box::new(PartialRecord::Batch(record)),
                    source: err,
                })
            }
        }
    }

    /// Write `record` back at its current version and return the stored copy.
    async fn save_batch(&self, record: BatchRecord, tx: Option<&RecordedTx>) -> Result<BatchRecord> {
        let batch_id = record.batch_id.clone();
        let version = record.version;
        if let Err(err) = self.store.update_batch(record, version).await {
            if let Some(tx) = tx {
                error!(
                    "Transaction {} confirmed but batch {} could not be updated: {}",
                    tx.tx_hash, batch_id, err
                );
            }
            return Err(err.into());
        }
        Ok(self.store.get_batch(&batch_id).await?)
    }

    // ── Products ─────────────────────────────────────────────────────────────

    /// Store a product locally, then register it with the contract.
    pub async fn register_product(&self, request: NewProductRequest) -> Result<ProductWrite> {
        let product_id = validate::required("product_id", &request.product_id)?.to_string();
        let product_name = validate::required("product_name", &request.product_name)?;
        let farmer_name = validate::required("farmer_name", &request.farmer_name)?;
        let farmer_location = validate::required("farmer_location", &request.farmer_location)?;
        let crop_type = validate::required("crop_type", &request.crop_type)?;
        validate::harvest_date("harvest_date", &request.harvest_date)?;

        let _guard = self.locks.lock(product_key(&product_id)).await;
        if self.store.product_exists(&product_id).await? {
            return Err(ServiceError::Duplicate(format!(
                "product already exists: {}",
                product_id
            )));
        }
        // Nothing is written for an id the contract already holds, or when
        // the node cannot answer.
        if self.gateway.product_exists(&product_id).await? {
            return Err(ServiceError::Duplicate(format!(
                "product already registered on chain: {}",
                product_id
            )));
        }

        let now = now_rfc3339();
        let record = ProductRecord {
            product_id: product_id.clone(),
            product_name: product_name.to_string(),
            farmer_name: farmer_name.to_string(),
            farmer_location: farmer_location.to_string(),
            crop_type: crop_type.to_string(),
            harvest_date: request.harvest_date.trim().to_string(),
            chain: ChainStatus::default(),
            stages: Vec::new(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        };
        self.store.insert_product(record.clone()).await?;

        let call = product_call(&record)?;

        let mut record = self.store.get_product(&product_id).await?;
        match self.gateway.add_product(&call).await {
            Ok(outcome) => {
                record.chain.confirm(&outcome.tx_hash_hex());
                let product = self.save_product(record).await?;
                Ok(ProductWrite {
                    product,
                    blockchain: ChainReceipt::from(outcome),
                })
            }
            Err(err) => {
                note_failure(&mut record.chain, &err);
                let product = self.save_product(record).await?;
                warn!("Product {} saved but not registered on chain: {}", product_id, err);
                Err(ServiceError::PartialFailure {
                    record: Box::new(PartialRecord::Product(product)),
                    source: err,
                })
            }
        }
    }

    /// Append a stage locally, then send `updateStage`.
    ///
    /// Status defaults to `Completed`; a `Completed` stage gets `completedAt`.
    pub async fn record_stage(&self, product_id: &str, request: StageRequest) -> Result<StageWrite> {
        let product_id = validate::required("product_id", product_id)?;
        let stage_name = validate::required("stage_name", &request.stage_name)?.to_string();
        let location = validate::required("location", &request.location)?.to_string();
        let status = StageStatus::new(
            non_empty(&request.status).unwrap_or(DEFAULT_STAGE_STATUS),
        );
        let notes = request.notes.unwrap_or_default();

        let _guard = self.locks.lock(product_key(product_id)).await;
        let mut record = self.store.get_product(product_id).await?;
        let version = record.version;

        let now = now_rfc3339();
        record.stages.push(StageRecord {
            stage_name,
            completed_at: status.is_completed().then(|| now.clone()),
            status,
            location,
            notes: (!notes.is_empty()).then_some(notes),
            chain: ChainStatus::default(),
            recorded_at: now,
        });
        let index = record.stages.len() - 1;
        let version = self.store.update_product(record.clone(), version).await?;
        record.version = version;

        let call = stage_call(product_id, &record.stages[index]);

        match self.gateway.update_stage(&call).await {
            Ok(outcome) => {
                record.stages[index].chain.confirm(&outcome.tx_hash_hex());
                let product = self.save_product(record).await?;
                Ok(StageWrite {
                    product_id: product_id.to_string(),
                    stage: product.stages[index].clone(),
                    blockchain: ChainReceipt::from(outcome),
                })
            }
            Err(err) => {
                note_failure(&mut record.stages[index].chain, &err);
                let product = self.save_product(record).await?;
                warn!(
                    "Stage '{}' of {} saved but not recorded on chain: {}",
                    call.stage_name, product_id, err
                );
                Err(ServiceError::PartialFailure {
                    record: Box::new(PartialRecord::Product(product)),
                    source: err,
                })
            }
        }
    }

    /// Re-send the product's contract calls that are not confirmed:
    /// `addProduct` first, then stages in local order. Stops at the first
    /// stage that does not confirm so the chain keeps that order.
    pub async fn retry_product(&self, product_id: &str) -> Result<ProductRetryReport> {
        let product_id = validate::required("product_id", product_id)?;

        let _guard = self.locks.lock(product_key(product_id)).await;
        let mut record = self.store.get_product(product_id).await?;

        let call = product_call(&record)?;
        let mut changed = self
            .resend(&mut record.chain, self.gateway.add_product(&call))
            .await;
        let mut blocked = !record.chain.is_confirmed();

        let mut confirmed_stages = Vec::new();
        let mut still_pending = Vec::new();
        for index in 0..record.stages.len() {
            if record.stages[index].chain.is_confirmed() {
                continue;
            }
            if blocked {
                still_pending.push(index);
                continue;
            }
            let call = stage_call(product_id, &record.stages[index]);
            changed |= self
                .resend(&mut record.stages[index].chain, self.gateway.update_stage(&call))
                .await;
            if record.stages[index].chain.is_confirmed() {
                confirmed_stages.push(index);
            } else {
                still_pending.push(index);
                blocked = true;
            }
        }

        let product = if changed {
            self.save_product(record).await?
        } else {
            record
        };
        info!(
            "Retried product {}: registered {}, {} stage(s) confirmed, {} still pending",
            product_id,
            product.chain.is_confirmed(),
            confirmed_stages.len(),
            still_pending.len()
        );
        Ok(ProductRetryReport {
            registered: product.chain.is_confirmed(),
            confirmed_stages,
            still_pending,
            product,
        })
    }

    /// Bring one contract call up to date. An unconfirmed broadcast is looked
    /// up first and only re-sent once it is known not to land. Returns whether
    /// `status` changed.
    async fn resend<F>(&self, status: &mut ChainStatus, send: F) -> bool
    where
        F: Future<Output = agritrace_chain::Result<TxOutcome>>,
    {
        if status.is_confirmed() {
            return false;
        }
        if let Some(tx_hash) = status.unconfirmed_tx.clone() {
            match self.look_up(&tx_hash).await {
                Ok(Lookup::Landed) => {
                    status.confirm(&tx_hash);
                    return true;
                }
                Ok(Lookup::InFlight) => return false,
                Ok(Lookup::Reverted(reason)) | Ok(Lookup::Dropped(reason)) => {
                    status.clear_unconfirmed(&reason);
                }
                Err(err) => {
                    status.fail(&err.to_string());
                    return true;
                }
            }
        }
        match send.await {
            Ok(outcome) => status.confirm(&outcome.tx_hash_hex()),
            Err(err) => note_failure(status, &err),
        }
        true
    }

    /// One receipt lookup for a transaction that was broadcast earlier.
    async fn look_up(&self, tx_hash: &str) -> Result<Lookup> {
        match self.verifier.verify(tx_hash).await {
            Ok(result) if result.is_success() => Ok(Lookup::Landed),
            Ok(_) => Ok(Lookup::Reverted(format!("transaction {} reverted", tx_hash))),
            Err(ChainError::Pending(_)) => Ok(Lookup::InFlight),
            Err(ChainError::TransactionNotFound(_)) => Ok(Lookup::Dropped(format!(
                "transaction {} is unknown to the node",
                tx_hash
            ))),
            Err(err) => Err(ServiceError::Chain(err)),
        }
    }

    pub async fn read_product(&self, product_id: &str) -> Result<ProductRecord> {
        Ok(self.store.get_product(product_id).await?)
    }

    pub async fn list_products(&self) -> Result<Vec<ProductRecord>> {
        Ok(self.store.list_products().await?)
    }

    /// The product as the contract reports it.
    pub async fn chain_product(&self, product_id: &str) -> Result<OnChainProduct> {
        let product_id = validate::required("product_id", product_id)?;
        Ok(self.gateway.get_product(product_id).await?)
    }

    async fn save_product(&self, record: ProductRecord) -> Result<ProductRecord> {
        let product_id = record.product_id.clone();
        let version = record.version;
        self.store.update_product(record, version).await?;
        Ok(self.store.get_product(&product_id).await?)
    }

    // ── Verification ─────────────────────────────────────────────────────────

    pub async fn verify(&self, tx_hash: &str) -> Result<VerificationResult> {
        self.verifier.verify(tx_hash.trim()).await.map_err(|err| match err {
            ChainError::InvalidHash(hash) => {
                ServiceError::Validation(format!("invalid transaction hash: {}", hash))
            }
            other => ServiceError::Chain(other),
        })
    }
}

enum Lookup {
    Landed,
    InFlight,
    Reverted(String),
    Dropped(String),
}

/// Mark a failed contract call, keeping the hash when it was broadcast.
fn note_failure(status: &mut ChainStatus, err: &ChainError) {
    match err.unconfirmed_tx() {
        Some(tx_hash) => status.fail_unconfirmed(&err.to_string(), tx_hash),
        None => status.fail(&err.to_string()),
    };
}

fn product_call(record: &ProductRecord) -> Result<NewProduct> {
    Ok(NewProduct {
        product_id: record.product_id.clone(),
        product_name: record.product_name.clone(),
        farmer_name: record.farmer_name.clone(),
        farmer_location: record.farmer_location.clone(),
        crop_type: record.crop_type.clone(),
        harvest_date: validate::harvest_date("harvest_date", &record.harvest_date)?,
    })
}

fn stage_call(product_id: &str, stage: &StageRecord) -> StageUpdate {
    StageUpdate {
        product_id: product_id.to_string(),
        stage_name: stage.stage_name.clone(),
        location: stage.location.clone(),
        status: stage.status.as_str().to_string(),
        notes: stage.notes.clone().unwrap_or_default(),
    }
}

fn batch_key(batch_id: &str) -> String {
    format!("batch:{}", batch_id)
}

fn product_key(product_id: &str) -> String {
    format!("product:{}", product_id)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
