use async_trait::async_trait;
use sea_orm::prelude::{ DateTimeUtc, Decimal };
use uuid::Uuid;

use crate::enums::{ Currency, InvestmentStatus, PaymentMethod, WalletEntryKind };
use crate::error::Result;

pub mod entity;
pub use entity::*;

mod pg;
pub use pg::PgLedger;

mod memory;
pub use memory::MemoryLedger;

/// Input for a new investment row. Validation happens in the state machine
/// before this ever reaches the store.
#[derive(Debug, Clone)]
pub struct NewInvestment {
    pub user_id: String,
    pub project_id: i64,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub user_address: String,
    pub metadata: investment::InvestmentMetadata,
}

/// Result of a compare-and-set transition. `Stale` means another writer got
/// there first; the carried row is the current state after the race.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    Applied(investment::Model),
    Stale(investment::Model),
}

impl CasOutcome {
    pub fn row(&self) -> &investment::Model {
        match self {
            CasOutcome::Applied(row) => row,
            CasOutcome::Stale(row) => row,
        }
    }

    pub fn into_row(self) -> investment::Model {
        match self {
            CasOutcome::Applied(row) => row,
            CasOutcome::Stale(row) => row,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }
}

/// The Ledger Store: single source of truth for investments, wallet balances
/// and chain settlement records.
///
/// Every mutating operation is atomic on its own; callers never compose
/// multi-step mutations outside the store. Status transitions are guarded by
/// `(id, version)` so at most one of two racing writers applies.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ─── Investments: reads ──────────────────────────────────────────

    async fn create_investment(&self, new: NewInvestment) -> Result<investment::Model>;

    async fn investment(&self, id: Uuid) -> Result<investment::Model>;

    async fn investment_by_gateway_ref(
        &self,
        reference: &str
    ) -> Result<Option<investment::Model>>;

    async fn investments_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64
    ) -> Result<Vec<investment::Model>>;

    /// Investments flagged for manual operator attention.
    async fn review_queue(&self) -> Result<Vec<investment::Model>>;

    /// Sum of pending + confirmed amounts for one user on one project,
    /// used for per-project cap checks.
    async fn committed_total(&self, user_id: &str, project_id: i64) -> Result<Decimal>;

    // ─── Investments: guarded transitions ────────────────────────────

    async fn attach_gateway_session(
        &self,
        id: Uuid,
        version: i32,
        gateway_ref: &str,
        payment_url: Option<&str>
    ) -> Result<CasOutcome>;

    async fn transition_status(
        &self,
        id: Uuid,
        version: i32,
        from: InvestmentStatus,
        to: InvestmentStatus,
        failure_reason: Option<&str>
    ) -> Result<CasOutcome>;

    async fn record_payment_attempt(&self, id: Uuid, version: i32) -> Result<CasOutcome>;

    /// Atomically: lock the wallet account, check the balance, append the
    /// debit entry, and move the investment `pending -> confirmed` with the
    /// wallet transaction linked. A lost version race rolls the debit back.
    /// Insufficient funds surfaces as `PaymentFailed`.
    async fn confirm_with_wallet_debit(&self, id: Uuid, version: i32) -> Result<CasOutcome>;

    /// Finalize on-chain settlement: set tx_hash/block on a confirmed row and
    /// mark the settlement record mined, in one transaction.
    async fn mark_settled(
        &self,
        id: Uuid,
        version: i32,
        tx_hash: &str,
        block_number: i64
    ) -> Result<CasOutcome>;

    /// Terminal partial failure: investment -> failed with a review flag, and
    /// the settlement record -> reverted, in one transaction. The investment's
    /// tx_hash stays NULL.
    async fn mark_chain_reverted(&self, id: Uuid, version: i32, reason: &str) -> Result<CasOutcome>;

    /// Review flags are advisory and monotonic, so they are not version-guarded.
    async fn flag_review(&self, id: Uuid, reason: &str) -> Result<investment::Model>;

    async fn clear_review(&self, id: Uuid) -> Result<investment::Model>;

    // ─── Wallet ──────────────────────────────────────────────────────

    async fn credit_wallet(
        &self,
        user_id: &str,
        currency: Currency,
        amount: Decimal,
        kind: WalletEntryKind,
        reference: Option<Uuid>
    ) -> Result<wallet_transaction::Model>;

    async fn wallet_balance(&self, user_id: &str, currency: Currency) -> Result<Decimal>;

    async fn wallet_transaction(&self, id: Uuid) -> Result<Option<wallet_transaction::Model>>;

    /// Whether a refund credit referencing this investment already exists.
    async fn wallet_refund_exists(&self, investment_id: Uuid) -> Result<bool>;

    // ─── Chain settlement records ────────────────────────────────────

    /// Create or update the settlement record for an investment, bumping the
    /// attempt counter when a submission hash is recorded.
    async fn upsert_chain_submission(
        &self,
        investment_id: Uuid,
        funding_key: &str,
        contract_address: &str,
        submitted_tx_hash: Option<&str>
    ) -> Result<chain_settlement::Model>;

    async fn chain_settlement(
        &self,
        investment_id: Uuid
    ) -> Result<Option<chain_settlement::Model>>;

    // ─── Reconciliation sweeps ───────────────────────────────────────

    /// Pending investments created before the cutoff.
    async fn stale_pending(&self, cutoff: DateTimeUtc) -> Result<Vec<investment::Model>>;

    /// Confirmed investments without a tx_hash updated before the cutoff.
    async fn unsettled_confirmed(&self, cutoff: DateTimeUtc) -> Result<Vec<investment::Model>>;
}
