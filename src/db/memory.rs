use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::prelude::{ DateTimeUtc, Decimal };
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::entity::{ chain_settlement, investment, wallet_account, wallet_transaction };
use crate::db::{ CasOutcome, LedgerStore, NewInvestment };
use crate::enums::{ Currency, InvestmentStatus, SettlementStatus, WalletEntryKind };
use crate::error::{ AppError, Result };

#[derive(Default)]
struct Inner {
    investments: HashMap<Uuid, investment::Model>,
    accounts: HashMap<(String, String), wallet_account::Model>,
    wallet_transactions: Vec<wallet_transaction::Model>,
    settlements: HashMap<Uuid, chain_settlement::Model>,
}

/// In-memory ledger with the same CAS semantics as `PgLedger`. Backs the
/// test suite; never used in a deployed process.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: rewrite a row's timestamps so sweep cutoffs apply.
    pub async fn backdate(&self, id: Uuid, created_at: DateTimeUtc, updated_at: DateTimeUtc) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.investments.get_mut(&id) {
            row.created_at = created_at;
            row.updated_at = updated_at;
        }
    }

    /// Test helper: backdate a settlement submission timestamp.
    pub async fn backdate_submission(&self, id: Uuid, last_submitted_at: DateTimeUtc) {
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.settlements.get_mut(&id) {
            row.last_submitted_at = Some(last_submitted_at);
        }
    }

    pub async fn wallet_history(&self, user_id: &str) -> Vec<wallet_transaction::Model> {
        let inner = self.inner.lock().await;
        inner.wallet_transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

fn get(inner: &Inner, id: Uuid) -> Result<investment::Model> {
    inner.investments.get(&id).cloned().ok_or(AppError::InvestmentNotFound)
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn create_investment(&self, new: NewInvestment) -> Result<investment::Model> {
        let now = chrono::Utc::now();
        let metadata = serde_json::to_value(&new.metadata)
            .map_err(|e| AppError::Internal(format!("Failed to serialize metadata: {}", e)))?;

        let row = investment::Model {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            project_id: new.project_id,
            amount: new.amount,
            currency: new.currency.to_string(),
            payment_method: new.payment_method.to_string(),
            status: InvestmentStatus::Pending.to_string(),
            user_address: new.user_address,
            transaction_id: None,
            gateway_ref: None,
            payment_url: None,
            tx_hash: None,
            investment_date: now,
            metadata,
            failure_reason: None,
            needs_review: false,
            review_reason: None,
            payment_attempts: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock().await;
        inner.investments.insert(row.id, row.clone());
        Ok(row)
    }

    async fn investment(&self, id: Uuid) -> Result<investment::Model> {
        let inner = self.inner.lock().await;
        get(&inner, id)
    }

    async fn investment_by_gateway_ref(
        &self,
        reference: &str
    ) -> Result<Option<investment::Model>> {
        let inner = self.inner.lock().await;
        Ok(
            inner.investments
                .values()
                .find(|r| r.gateway_ref.as_deref() == Some(reference))
                .cloned()
        )
    }

    async fn investments_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64
    ) -> Result<Vec<investment::Model>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner.investments
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows.into_iter().skip(offset as usize).take(limit as usize).collect())
    }

    async fn review_queue(&self) -> Result<Vec<investment::Model>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner.investments
            .values()
            .filter(|r| r.needs_review)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(rows)
    }

    async fn committed_total(&self, user_id: &str, project_id: i64) -> Result<Decimal> {
        let inner = self.inner.lock().await;
        Ok(
            inner.investments
                .values()
                .filter(|r| {
                    r.user_id == user_id &&
                        r.project_id == project_id &&
                        (r.status == InvestmentStatus::Pending.as_str() ||
                            r.status == InvestmentStatus::Confirmed.as_str())
                })
                .map(|r| r.amount)
                .sum()
        )
    }

    async fn attach_gateway_session(
        &self,
        id: Uuid,
        version: i32,
        gateway_ref: &str,
        payment_url: Option<&str>
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let row = get(&inner, id)?;
        if row.version != version || row.status != InvestmentStatus::Pending.as_str() {
            return Ok(CasOutcome::Stale(row));
        }

        let row = inner.investments.get_mut(&id).unwrap();
        row.gateway_ref = Some(gateway_ref.to_string());
        row.payment_url = payment_url.map(|s| s.to_string());
        row.version += 1;
        row.updated_at = chrono::Utc::now();
        Ok(CasOutcome::Applied(row.clone()))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        version: i32,
        from: InvestmentStatus,
        to: InvestmentStatus,
        failure_reason: Option<&str>
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let row = get(&inner, id)?;
        if row.version != version || row.status != from.as_str() {
            return Ok(CasOutcome::Stale(row));
        }

        let row = inner.investments.get_mut(&id).unwrap();
        row.status = to.to_string();
        if let Some(reason) = failure_reason {
            row.failure_reason = Some(reason.to_string());
        }
        row.version += 1;
        row.updated_at = chrono::Utc::now();
        Ok(CasOutcome::Applied(row.clone()))
    }

    async fn record_payment_attempt(&self, id: Uuid, version: i32) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let row = get(&inner, id)?;
        if row.version != version {
            return Ok(CasOutcome::Stale(row));
        }

        let row = inner.investments.get_mut(&id).unwrap();
        row.payment_attempts += 1;
        row.version += 1;
        row.updated_at = chrono::Utc::now();
        Ok(CasOutcome::Applied(row.clone()))
    }

    async fn confirm_with_wallet_debit(&self, id: Uuid, version: i32) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let row = get(&inner, id)?;
        if row.version != version || row.status != InvestmentStatus::Pending.as_str() {
            return Ok(CasOutcome::Stale(row));
        }

        let key = (row.user_id.clone(), row.currency.clone());
        let balance = inner.accounts.get(&key).map(|a| a.balance).unwrap_or(Decimal::ZERO);
        if balance < row.amount {
            return Err(AppError::PaymentFailed("Insufficient wallet balance".to_string()));
        }

        let now = chrono::Utc::now();
        let debit_id = Uuid::new_v4();

        inner.wallet_transactions.push(wallet_transaction::Model {
            id: debit_id,
            user_id: row.user_id.clone(),
            currency: row.currency.clone(),
            amount: row.amount,
            direction: WalletEntryKind::InvestmentDebit.direction().to_string(),
            kind: WalletEntryKind::InvestmentDebit.to_string(),
            reference: Some(row.id.to_string()),
            created_at: now,
        });

        let amount = row.amount;
        let account = inner.accounts.get_mut(&key).unwrap();
        account.balance -= amount;
        account.updated_at = now;

        let row = inner.investments.get_mut(&id).unwrap();
        row.status = InvestmentStatus::Confirmed.to_string();
        row.transaction_id = Some(debit_id);
        row.version += 1;
        row.updated_at = now;
        Ok(CasOutcome::Applied(row.clone()))
    }

    async fn mark_settled(
        &self,
        id: Uuid,
        version: i32,
        tx_hash: &str,
        block_number: i64
    ) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let row = get(&inner, id)?;
        if
            row.version != version ||
            row.status != InvestmentStatus::Confirmed.as_str() ||
            row.tx_hash.is_some()
        {
            return Ok(CasOutcome::Stale(row));
        }

        let now = chrono::Utc::now();
        let row = inner.investments.get_mut(&id).unwrap();
        row.tx_hash = Some(tx_hash.to_string());
        row.version += 1;
        row.updated_at = now;
        let updated = row.clone();

        if let Some(settlement) = inner.settlements.get_mut(&id) {
            settlement.status = SettlementStatus::Mined.to_string();
            settlement.submitted_tx_hash = Some(tx_hash.to_string());
            settlement.block_number = Some(block_number);
            settlement.updated_at = now;
        }

        Ok(CasOutcome::Applied(updated))
    }

    async fn mark_chain_reverted(&self, id: Uuid, version: i32, reason: &str) -> Result<CasOutcome> {
        let mut inner = self.inner.lock().await;
        let row = get(&inner, id)?;
        if row.version != version || row.status != InvestmentStatus::Confirmed.as_str() {
            return Ok(CasOutcome::Stale(row));
        }

        let now = chrono::Utc::now();
        let row = inner.investments.get_mut(&id).unwrap();
        row.status = InvestmentStatus::Failed.to_string();
        row.failure_reason = Some(reason.to_string());
        row.needs_review = true;
        row.review_reason = Some(reason.to_string());
        row.version += 1;
        row.updated_at = now;
        let updated = row.clone();

        if let Some(settlement) = inner.settlements.get_mut(&id) {
            settlement.status = SettlementStatus::Reverted.to_string();
            settlement.updated_at = now;
        }

        Ok(CasOutcome::Applied(updated))
    }

    async fn flag_review(&self, id: Uuid, reason: &str) -> Result<investment::Model> {
        let mut inner = self.inner.lock().await;
        get(&inner, id)?;
        let row = inner.investments.get_mut(&id).unwrap();
        row.needs_review = true;
        row.review_reason = Some(reason.to_string());
        row.updated_at = chrono::Utc::now();
        Ok(row.clone())
    }

    async fn clear_review(&self, id: Uuid) -> Result<investment::Model> {
        let mut inner = self.inner.lock().await;
        get(&inner, id)?;
        let row = inner.investments.get_mut(&id).unwrap();
        row.needs_review = false;
        row.review_reason = None;
        row.updated_at = chrono::Utc::now();
        Ok(row.clone())
    }

    async fn credit_wallet(
        &self,
        user_id: &str,
        currency: Currency,
        amount: Decimal,
        kind: WalletEntryKind,
        reference: Option<Uuid>
    ) -> Result<wallet_transaction::Model> {
        if amount <= Decimal::ZERO {
            return Err(AppError::validation("Credit amount must be positive", "amount"));
        }

        let mut inner = self.inner.lock().await;
        let now = chrono::Utc::now();
        let key = (user_id.to_string(), currency.to_string());

        let account = inner.accounts.entry(key).or_insert_with(|| wallet_account::Model {
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            balance: Decimal::ZERO,
            updated_at: now,
        });
        account.balance += amount;
        account.updated_at = now;

        let entry = wallet_transaction::Model {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            amount,
            direction: kind.direction().to_string(),
            kind: kind.to_string(),
            reference: reference.map(|r| r.to_string()),
            created_at: now,
        };
        inner.wallet_transactions.push(entry.clone());
        Ok(entry)
    }

    async fn wallet_balance(&self, user_id: &str, currency: Currency) -> Result<Decimal> {
        let inner = self.inner.lock().await;
        Ok(
            inner.accounts
                .get(&(user_id.to_string(), currency.to_string()))
                .map(|a| a.balance)
                .unwrap_or(Decimal::ZERO)
        )
    }

    async fn wallet_transaction(&self, id: Uuid) -> Result<Option<wallet_transaction::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner.wallet_transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn wallet_refund_exists(&self, investment_id: Uuid) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(
            inner.wallet_transactions
                .iter()
                .any(|t| {
                    t.kind == WalletEntryKind::RefundCredit.as_str() &&
                        t.reference.as_deref() == Some(investment_id.to_string().as_str())
                })
        )
    }

    async fn upsert_chain_submission(
        &self,
        investment_id: Uuid,
        funding_key: &str,
        contract_address: &str,
        submitted_tx_hash: Option<&str>
    ) -> Result<chain_settlement::Model> {
        let mut inner = self.inner.lock().await;
        let now = chrono::Utc::now();

        let row = inner.settlements
            .entry(investment_id)
            .or_insert_with(|| chain_settlement::Model {
                investment_id,
                funding_key: funding_key.to_string(),
                contract_address: contract_address.to_string(),
                submitted_tx_hash: None,
                status: SettlementStatus::Pending.to_string(),
                block_number: None,
                attempts: 0,
                last_submitted_at: None,
                created_at: now,
                updated_at: now,
            });

        if let Some(hash) = submitted_tx_hash {
            row.submitted_tx_hash = Some(hash.to_string());
            row.status = SettlementStatus::Submitted.to_string();
            row.attempts += 1;
            row.last_submitted_at = Some(now);
        }
        row.updated_at = now;
        Ok(row.clone())
    }

    async fn chain_settlement(
        &self,
        investment_id: Uuid
    ) -> Result<Option<chain_settlement::Model>> {
        let inner = self.inner.lock().await;
        Ok(inner.settlements.get(&investment_id).cloned())
    }

    async fn stale_pending(&self, cutoff: DateTimeUtc) -> Result<Vec<investment::Model>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner.investments
            .values()
            .filter(|r| r.status == InvestmentStatus::Pending.as_str() && r.created_at < cutoff)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    async fn unsettled_confirmed(&self, cutoff: DateTimeUtc) -> Result<Vec<investment::Model>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner.investments
            .values()
            .filter(|r| {
                r.status == InvestmentStatus::Confirmed.as_str() &&
                    r.tx_hash.is_none() &&
                    r.updated_at < cutoff
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(rows)
    }
}
