use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Current UTC time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// The local action a chain proof anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofAction {
    AddBatch,
    AddEvent,
    ConfirmDelivery,
    PayFarmer,
    AddProduct,
    UpdateStage,
}

impl ProofAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofAction::AddBatch => "addBatch",
            ProofAction::AddEvent => "addEvent",
            ProofAction::ConfirmDelivery => "confirmDelivery",
            ProofAction::PayFarmer => "payFarmer",
            ProofAction::AddProduct => "addProduct",
            ProofAction::UpdateStage => "updateStage",
        }
    }

    /// Whether a failed attempt of this action may be re-submitted by a
    /// batch retry. Payments go through their own resolve path.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProofAction::PayFarmer)
    }
}

impl std::fmt::Display for ProofAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record linking a local action to a confirmed on-chain transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainProof {
    pub action: ProofAction,
    pub tx_hash: String,
    /// RFC 3339 timestamp of confirmation.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_eth: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    /// Not yet attempted, or scheduled for retry.
    Pending,
    /// The last attempt errored.
    Failed,
}

/// A chain write attempted after its local write but not (yet) confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProof {
    pub id: String,
    pub action: ProofAction,
    /// Exact payload to anchor; a retry hashes the same bytes.
    pub payload: serde_json::Value,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub status: PendingStatus,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_eth: Option<String>,
    /// Transaction broadcast by the last attempt whose outcome is unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

/// Batch metadata as registered by the farmer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMeta {
    pub farmer_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_eth: Option<String>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_tx: Option<String>,
}

/// A tracked batch of goods with its event log and chain proofs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub batch_id: String,
    pub meta: BatchMeta,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
    #[serde(default)]
    pub chain_proofs: Vec<ChainProof>,
    #[serde(default)]
    pub pending_proofs: Vec<PendingProof>,
    #[serde(default)]
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl BatchRecord {
    pub fn new(batch_id: &str, meta: BatchMeta) -> Self {
        let now = now_rfc3339();
        BatchRecord {
            batch_id: batch_id.to_string(),
            meta,
            events: Vec::new(),
            chain_proofs: Vec::new(),
            pending_proofs: Vec::new(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Queue a chain write for `action` and return its pending id.
    pub fn push_pending(
        &mut self,
        action: ProofAction,
        payload: serde_json::Value,
        amount_eth: Option<String>,
    ) -> String {
        let id = format!("{}-{}", action, self.chain_proofs.len() + self.pending_proofs.len());
        self.pending_proofs.push(PendingProof {
            id: id.clone(),
            action,
            payload,
            attempts: 0,
            last_error: None,
            status: PendingStatus::Pending,
            updated_at: now_rfc3339(),
            amount_eth,
            tx_hash: None,
        });
        id
    }

    /// Move a pending entry to the proof list once its transaction confirmed.
    ///
    /// Returns `false` if no pending entry has this id.
    pub fn confirm_pending(&mut self, pending_id: &str, tx_hash: &str) -> bool {
        let Some(pos) = self.pending_proofs.iter().position(|p| p.id == pending_id) else {
            return false;
        };
        let pending = self.pending_proofs.remove(pos);
        self.chain_proofs.push(ChainProof {
            action: pending.action,
            tx_hash: tx_hash.to_string(),
            timestamp: now_rfc3339(),
            amount_eth: pending.amount_eth,
        });
        true
    }

    /// Record a failed attempt on a pending entry.
    pub fn fail_pending(&mut self, pending_id: &str, error: &str) -> bool {
        match self.pending_proofs.iter_mut().find(|p| p.id == pending_id) {
            Some(p) => {
                p.attempts += 1;
                p.last_error = Some(error.to_string());
                p.status = PendingStatus::Failed;
                p.updated_at = now_rfc3339();
                true
            }
            None => false,
        }
    }

    /// Remember the hash of a broadcast transaction that did not confirm.
    pub fn note_unconfirmed(&mut self, pending_id: &str, tx_hash: &str) -> bool {
        match self.pending_proofs.iter_mut().find(|p| p.id == pending_id) {
            Some(p) => {
                p.tx_hash = Some(tx_hash.to_string());
                true
            }
            None => false,
        }
    }

    /// Forget the broadcast hash once the transaction is known not to land.
    pub fn clear_unconfirmed(&mut self, pending_id: &str, error: &str) -> bool {
        match self.pending_proofs.iter_mut().find(|p| p.id == pending_id) {
            Some(p) => {
                p.tx_hash = None;
                p.last_error = Some(error.to_string());
                p.status = PendingStatus::Failed;
                p.updated_at = now_rfc3339();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self, pending_id: &str) -> Option<&PendingProof> {
        self.pending_proofs.iter().find(|p| p.id == pending_id)
    }

    /// A payment that was broadcast but never confirmed. While one exists the
    /// batch must not be paid again.
    pub fn unresolved_payment(&self) -> Option<&PendingProof> {
        self.pending_proofs
            .iter()
            .find(|p| p.action == ProofAction::PayFarmer && p.tx_hash.is_some())
    }

    /// Drop payment attempts that never reached the chain. Returns how many
    /// were removed.
    pub fn discard_unsent_payments(&mut self) -> usize {
        let before = self.pending_proofs.len();
        self.pending_proofs
            .retain(|p| p.action != ProofAction::PayFarmer || p.tx_hash.is_some());
        before - self.pending_proofs.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainState {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

/// On-chain status of a product registration or stage update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub state: ChainState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Broadcast but not confirmed in time; looked up before any resend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unconfirmed_tx: Option<String>,
}

impl ChainStatus {
    pub fn confirm(&mut self, tx_hash: &str) {
        self.state = ChainState::Confirmed;
        self.tx_hash = Some(tx_hash.to_string());
        self.error = None;
        self.unconfirmed_tx = None;
    }

    /// Record a write that reached the node but did not confirm in time.
    pub fn fail_unconfirmed(&mut self, error: &str, tx_hash: &str) -> bool {
        if !self.fail(error) {
            return false;
        }
        self.unconfirmed_tx = Some(tx_hash.to_string());
        true
    }

    /// Forget an unconfirmed write once it is known not to land.
    pub fn clear_unconfirmed(&mut self, error: &str) -> bool {
        if !self.fail(error) {
            return false;
        }
        self.unconfirmed_tx = None;
        true
    }

    /// Record a failed chain write. A confirmed hash is never overwritten;
    /// returns `false` when the status was already confirmed.
    pub fn fail(&mut self, error: &str) -> bool {
        if self.state == ChainState::Confirmed {
            return false;
        }
        self.state = ChainState::Failed;
        self.error = Some(error.to_string());
        true
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == ChainState::Confirmed
    }
}

/// Stage status. An open set; the well-known values are provided as constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageStatus(pub String);

impl StageStatus {
    pub const PENDING: &'static str = "Pending";
    pub const IN_TRANSIT: &'static str = "In Transit";
    pub const COMPLETED: &'static str = "Completed";

    pub fn new(status: &str) -> Self {
        StageStatus(status.to_string())
    }

    pub fn completed() -> Self {
        StageStatus(Self::COMPLETED.to_string())
    }

    pub fn is_completed(&self) -> bool {
        self.0 == Self::COMPLETED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A supply-chain step attached to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage_name: String,
    pub status: StageStatus,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub chain: ChainStatus,
    pub recorded_at: String,
}

/// A product registered with the supply-chain contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_id: String,
    pub product_name: String,
    pub farmer_name: String,
    pub farmer_location: String,
    pub crop_type: String,
    pub harvest_date: String,
    #[serde(default)]
    pub chain: ChainStatus,
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> BatchRecord {
        BatchRecord::new(
            "B1",
            BatchMeta {
                farmer_addr: "0x00000000000000000000000000000000000000aa".into(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn batch_serializes_camel_case() {
        let json = serde_json::to_value(batch()).unwrap();
        assert_eq!(json["batchId"], "B1");
        assert_eq!(
            json["meta"]["farmerAddr"],
            "0x00000000000000000000000000000000000000aa"
        );
        assert!(json["chainProofs"].as_array().unwrap().is_empty());
        assert!(json["meta"].get("cropType").is_none());
    }

    #[test]
    fn confirm_pending_moves_entry_to_proofs() {
        let mut b = batch();
        let id = b.push_pending(ProofAction::AddBatch, serde_json::json!({"x": 1}), None);
        assert!(b.confirm_pending(&id, "0xabc"));
        assert!(b.pending_proofs.is_empty());
        assert_eq!(b.chain_proofs.len(), 1);
        assert_eq!(b.chain_proofs[0].action, ProofAction::AddBatch);
        assert_eq!(b.chain_proofs[0].tx_hash, "0xabc");
        assert!(!b.confirm_pending(&id, "0xdef"));
    }

    #[test]
    fn fail_pending_keeps_entry_and_counts_attempts() {
        let mut b = batch();
        let id = b.push_pending(ProofAction::AddEvent, serde_json::json!({}), None);
        assert!(b.fail_pending(&id, "node down"));
        assert!(b.fail_pending(&id, "node still down"));
        let p = b.pending(&id).unwrap();
        assert_eq!(p.attempts, 2);
        assert_eq!(p.status, PendingStatus::Failed);
        assert_eq!(p.last_error.as_deref(), Some("node still down"));
        assert!(b.chain_proofs.is_empty());
    }

    #[test]
    fn pending_ids_are_unique_per_batch() {
        let mut b = batch();
        let a = b.push_pending(ProofAction::AddEvent, serde_json::json!({}), None);
        let c = b.push_pending(ProofAction::AddEvent, serde_json::json!({}), None);
        assert_ne!(a, c);
    }

    #[test]
    fn confirmed_chain_status_survives_failure() {
        let mut status = ChainStatus::default();
        status.confirm("0x01");
        assert!(!status.fail("timeout"));
        assert_eq!(status.state, ChainState::Confirmed);
        assert_eq!(status.tx_hash.as_deref(), Some("0x01"));
        assert!(status.error.is_none());
    }

    #[test]
    fn unconfirmed_write_is_kept_until_settled() {
        let mut status = ChainStatus::default();
        assert!(status.fail_unconfirmed("not confirmed", "0xfeed"));
        assert_eq!(status.state, ChainState::Failed);
        assert_eq!(status.unconfirmed_tx.as_deref(), Some("0xfeed"));

        // A later transport error does not lose the hash.
        status.fail("connection refused");
        assert_eq!(status.unconfirmed_tx.as_deref(), Some("0xfeed"));

        status.confirm("0xfeed");
        assert!(status.is_confirmed());
        assert!(status.unconfirmed_tx.is_none());
        assert!(!status.clear_unconfirmed("late"));

        let mut dropped = ChainStatus::default();
        dropped.fail_unconfirmed("not confirmed", "0xbeef");
        assert!(dropped.clear_unconfirmed("unknown to the node"));
        assert!(dropped.unconfirmed_tx.is_none());
        assert_eq!(dropped.error.as_deref(), Some("unknown to the node"));
    }

    #[test]
    fn stage_status_is_open_set() {
        let custom: StageStatus = serde_json::from_str("\"Quality Check\"").unwrap();
        assert_eq!(custom.as_str(), "Quality Check");
        assert!(!custom.is_completed());
        assert!(StageStatus::completed().is_completed());
    }

    #[test]
    fn only_broadcast_payments_block_a_new_attempt() {
        let mut b = batch();
        let unsent = b.push_pending(ProofAction::PayFarmer, serde_json::json!({}), Some("0.5".into()));
        b.fail_pending(&unsent, "insufficient funds");
        assert!(b.unresolved_payment().is_none());
        assert_eq!(b.discard_unsent_payments(), 1);
        assert!(b.pending_proofs.is_empty());

        let sent = b.push_pending(ProofAction::PayFarmer, serde_json::json!({}), Some("0.5".into()));
        b.fail_pending(&sent, "not confirmed");
        assert!(b.note_unconfirmed(&sent, "0xfeed"));
        assert_eq!(b.unresolved_payment().map(|p| p.id.as_str()), Some(sent.as_str()));
        assert_eq!(b.discard_unsent_payments(), 0);

        assert!(b.clear_unconfirmed(&sent, "dropped"));
        assert!(b.unresolved_payment().is_none());
        assert_eq!(b.pending(&sent).unwrap().last_error.as_deref(), Some("dropped"));
    }

    #[test]
    fn payments_are_not_retryable() {
        assert!(!ProofAction::PayFarmer.is_retryable());
        assert!(ProofAction::AddEvent.is_retryable());
        assert_eq!(
            serde_json::to_value(ProofAction::ConfirmDelivery).unwrap(),
            "confirmDelivery"
        );
    }
}
