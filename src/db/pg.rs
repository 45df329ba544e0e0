use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait,
    ColumnTrait,
    ConnectionTrait,
    DatabaseConnection,
    EntityTrait,
    QueryFilter,
    QueryOrder,
    QuerySelect,
    Set,
    TransactionTrait,
};
use sea_orm::sea_query::Expr;
use sea_orm::prelude::{ DateTimeUtc, Decimal };
use uuid::Uuid;

use crate::db::entity::{
    chain_settlement,
    investment,
    wallet_account,
    wallet_transaction,
    ChainSettlement,
    Investment,
    WalletAccount,
    WalletTransaction,
};
use crate::db::{ CasOutcome, LedgerStore, NewInvestment };
use crate::enums::{
    Currency,
    InvestmentStatus,
    SettlementStatus,
    WalletEntryKind,
};
use crate::error::{ AppError, Result };

/// Postgres-backed ledger. All guarded transitions are expressed as
/// single UPDATE statements filtered on `(id, version)` so concurrent
/// writers resolve at the database, not in application memory.
pub struct PgLedger {
    db: DatabaseConnection,
}

impl PgLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn refetch(&self, id: Uuid) -> Result<investment::Model> {
        Investment::find_by_id(id)
            .one(&self.db).await?
            .ok_or(AppError::InvestmentNotFound)
    }

    async fn refetch_on<C: ConnectionTrait>(&self, conn: &C, id: Uuid) -> Result<investment::Model> {
        Investment::find_by_id(id)
            .one(conn).await?
            .ok_or(AppError::InvestmentNotFound)
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn create_investment(&self, new: NewInvestment) -> Result<investment::Model> {
        let now = chrono::Utc::now();
        let metadata = serde_json::to_value(&new.metadata)
            .map_err(|e| AppError::Internal(format!("Failed to serialize metadata: {}", e)))?;

        let row = investment::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            project_id: Set(new.project_id),
            amount: Set(new.amount),
            currency: Set(new.currency.to_string()),
            payment_method: Set(new.payment_method.to_string()),
            status: Set(InvestmentStatus::Pending.to_string()),
            user_address: Set(new.user_address),
            transaction_id: Set(None),
            gateway_ref: Set(None),
            payment_url: Set(None),
            tx_hash: Set(None),
            investment_date: Set(now),
            metadata: Set(metadata),
            failure_reason: Set(None),
            needs_review: Set(false),
            review_reason: Set(None),
            payment_attempts: Set(0),
            version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let row = Investment::insert(row).exec_with_returning(&self.db).await?;
        Ok(row)
    }

    async fn investment(&self, id: Uuid) -> Result<investment::Model> {
        self.refetch(id).await
    }

    async fn investment_by_gateway_ref(
        &self,
        reference: &str
    ) -> Result<Option<investment::Model>> {
        let row = Investment::find()
            .filter(investment::Column::GatewayRef.eq(reference))
            .one(&self.db).await?;
        Ok(row)
    }

    async fn investments_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64
    ) -> Result<Vec<investment::Model>> {
        let rows = Investment::find()
            .filter(investment::Column::UserId.eq(user_id))
            .order_by_desc(investment::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db).await?;
        Ok(rows)
    }

    async fn review_queue(&self) -> Result<Vec<investment::Model>> {
        let rows = Investment::find()
            .filter(investment::Column::NeedsReview.eq(true))
            .order_by_asc(investment::Column::UpdatedAt)
            .all(&self.db).await?;
        Ok(rows)
    }

    async fn committed_total(&self, user_id: &str, project_id: i64) -> Result<Decimal> {
        let rows = Investment::find()
            .filter(investment::Column::UserId.eq(user_id))
            .filter(investment::Column::ProjectId.eq(project_id))
            .filter(
                investment::Column::Status.is_in([
                    InvestmentStatus::Pending.as_str(),
                    InvestmentStatus::Confirmed.as_str(),
                ])
            )
            .all(&self.db).await?;

        Ok(rows.iter().map(|r| r.amount).sum())
    }

    async fn attach_gateway_session(
        &self,
        id: Uuid,
        version: i32,
        gateway_ref: &str,
        payment_url: Option<&str>
    ) -> Result<CasOutcome> {
        let res = Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .filter(investment::Column::Version.eq(version))
            .filter(investment::Column::Status.eq(InvestmentStatus::Pending.as_str()))
            .col_expr(investment::Column::GatewayRef, Expr::value(gateway_ref))
            .col_expr(
                investment::Column::PaymentUrl,
                Expr::value(payment_url.map(|s| s.to_string()))
            )
            .col_expr(
                investment::Column::Version,
                Expr::col(investment::Column::Version).add(1)
            )
            .col_expr(investment::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .exec(&self.db).await?;

        let row = self.refetch(id).await?;
        if res.rows_affected == 1 {
            Ok(CasOutcome::Applied(row))
        } else {
            Ok(CasOutcome::Stale(row))
        }
    }

    async fn transition_status(
        &self,
        id: Uuid,
        version: i32,
        from: InvestmentStatus,
        to: InvestmentStatus,
        failure_reason: Option<&str>
    ) -> Result<CasOutcome> {
        let mut update = Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .filter(investment::Column::Version.eq(version))
            .filter(investment::Column::Status.eq(from.as_str()))
            .col_expr(investment::Column::Status, Expr::value(to.as_str()))
            .col_expr(
                investment::Column::Version,
                Expr::col(investment::Column::Version).add(1)
            )
            .col_expr(investment::Column::UpdatedAt, Expr::value(chrono::Utc::now()));

        if let Some(reason) = failure_reason {
            update = update.col_expr(investment::Column::FailureReason, Expr::value(reason));
        }

        let res = update.exec(&self.db).await?;

        let row = self.refetch(id).await?;
        if res.rows_affected == 1 {
            Ok(CasOutcome::Applied(row))
        } else {
            Ok(CasOutcome::Stale(row))
        }
    }

    async fn record_payment_attempt(&self, id: Uuid, version: i32) -> Result<CasOutcome> {
        let res = Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .filter(investment::Column::Version.eq(version))
            .col_expr(
                investment::Column::PaymentAttempts,
                Expr::col(investment::Column::PaymentAttempts).add(1)
            )
            .col_expr(
                investment::Column::Version,
                Expr::col(investment::Column::Version).add(1)
            )
            .col_expr(investment::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .exec(&self.db).await?;

        let row = self.refetch(id).await?;
        if res.rows_affected == 1 {
            Ok(CasOutcome::Applied(row))
        } else {
            Ok(CasOutcome::Stale(row))
        }
    }

    async fn confirm_with_wallet_debit(&self, id: Uuid, version: i32) -> Result<CasOutcome> {
        let txn = self.db.begin().await?;

        let inv = self.refetch_on(&txn, id).await?;
        if inv.version != version || inv.status != InvestmentStatus::Pending.as_str() {
            txn.rollback().await?;
            return Ok(CasOutcome::Stale(self.refetch(id).await?));
        }

        // Exclusive lock on the balance row serializes concurrent debits for
        // the same account.
        let account = WalletAccount::find_by_id((inv.user_id.clone(), inv.currency.clone()))
            .lock_exclusive()
            .one(&txn).await?;

        let account = match account {
            Some(a) if a.balance >= inv.amount => a,
            _ => {
                txn.rollback().await?;
                return Err(AppError::PaymentFailed("Insufficient wallet balance".to_string()));
            }
        };

        let now = chrono::Utc::now();
        let debit_id = Uuid::new_v4();

        let debit = wallet_transaction::ActiveModel {
            id: Set(debit_id),
            user_id: Set(inv.user_id.clone()),
            currency: Set(inv.currency.clone()),
            amount: Set(inv.amount),
            direction: Set(WalletEntryKind::InvestmentDebit.direction().to_string()),
            kind: Set(WalletEntryKind::InvestmentDebit.to_string()),
            reference: Set(Some(inv.id.to_string())),
            created_at: Set(now),
        };
        WalletTransaction::insert(debit).exec(&txn).await?;

        let mut account_update: wallet_account::ActiveModel = account.clone().into();
        account_update.balance = Set(account.balance - inv.amount);
        account_update.updated_at = Set(now);
        account_update.update(&txn).await?;

        let res = Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .filter(investment::Column::Version.eq(version))
            .filter(investment::Column::Status.eq(InvestmentStatus::Pending.as_str()))
            .col_expr(
                investment::Column::Status,
                Expr::value(InvestmentStatus::Confirmed.as_str())
            )
            .col_expr(investment::Column::TransactionId, Expr::value(debit_id))
            .col_expr(
                investment::Column::Version,
                Expr::col(investment::Column::Version).add(1)
            )
            .col_expr(investment::Column::UpdatedAt, Expr::value(now))
            .exec(&txn).await?;

        if res.rows_affected != 1 {
            // Lost the race; the debit above rolls back with the transaction.
            txn.rollback().await?;
            return Ok(CasOutcome::Stale(self.refetch(id).await?));
        }

        txn.commit().await?;
        Ok(CasOutcome::Applied(self.refetch(id).await?))
    }

    async fn mark_settled(
        &self,
        id: Uuid,
        version: i32,
        tx_hash: &str,
        block_number: i64
    ) -> Result<CasOutcome> {
        let txn = self.db.begin().await?;

        let res = Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .filter(investment::Column::Version.eq(version))
            .filter(investment::Column::Status.eq(InvestmentStatus::Confirmed.as_str()))
            .filter(investment::Column::TxHash.is_null())
            .col_expr(investment::Column::TxHash, Expr::value(tx_hash))
            .col_expr(
                investment::Column::Version,
                Expr::col(investment::Column::Version).add(1)
            )
            .col_expr(investment::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .exec(&txn).await?;

        if res.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(CasOutcome::Stale(self.refetch(id).await?));
        }

        ChainSettlement::update_many()
            .filter(chain_settlement::Column::InvestmentId.eq(id))
            .col_expr(
                chain_settlement::Column::Status,
                Expr::value(SettlementStatus::Mined.as_str())
            )
            .col_expr(chain_settlement::Column::SubmittedTxHash, Expr::value(tx_hash))
            .col_expr(chain_settlement::Column::BlockNumber, Expr::value(block_number))
            .col_expr(chain_settlement::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .exec(&txn).await?;

        txn.commit().await?;
        Ok(CasOutcome::Applied(self.refetch(id).await?))
    }

    async fn mark_chain_reverted(&self, id: Uuid, version: i32, reason: &str) -> Result<CasOutcome> {
        let txn = self.db.begin().await?;
        let now = chrono::Utc::now();

        let res = Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .filter(investment::Column::Version.eq(version))
            .filter(investment::Column::Status.eq(InvestmentStatus::Confirmed.as_str()))
            .col_expr(
                investment::Column::Status,
                Expr::value(InvestmentStatus::Failed.as_str())
            )
            .col_expr(investment::Column::FailureReason, Expr::value(reason))
            .col_expr(investment::Column::NeedsReview, Expr::value(true))
            .col_expr(investment::Column::ReviewReason, Expr::value(reason))
            .col_expr(
                investment::Column::Version,
                Expr::col(investment::Column::Version).add(1)
            )
            .col_expr(investment::Column::UpdatedAt, Expr::value(now))
            .exec(&txn).await?;

        if res.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(CasOutcome::Stale(self.refetch(id).await?));
        }

        ChainSettlement::update_many()
            .filter(chain_settlement::Column::InvestmentId.eq(id))
            .col_expr(
                chain_settlement::Column::Status,
                Expr::value(SettlementStatus::Reverted.as_str())
            )
            .col_expr(chain_settlement::Column::UpdatedAt, Expr::value(now))
            .exec(&txn).await?;

        txn.commit().await?;
        Ok(CasOutcome::Applied(self.refetch(id).await?))
    }

    async fn flag_review(&self, id: Uuid, reason: &str) -> Result<investment::Model> {
        Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .col_expr(investment::Column::NeedsReview, Expr::value(true))
            .col_expr(investment::Column::ReviewReason, Expr::value(reason))
            .col_expr(investment::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .exec(&self.db).await?;

        self.refetch(id).await
    }

    async fn clear_review(&self, id: Uuid) -> Result<investment::Model> {
        Investment::update_many()
            .filter(investment::Column::Id.eq(id))
            .col_expr(investment::Column::NeedsReview, Expr::value(false))
            .col_expr(investment::Column::ReviewReason, Expr::value(Option::<String>::None))
            .col_expr(investment::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .exec(&self.db).await?;

        self.refetch(id).await
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

        let txn = self.db.begin().await?;
        let now = chrono::Utc::now();

        let account = WalletAccount::find_by_id((user_id.to_string(), currency.to_string()))
            .lock_exclusive()
            .one(&txn).await?;

        match account {
            Some(account) => {
                let mut update: wallet_account::ActiveModel = account.clone().into();
                update.balance = Set(account.balance + amount);
                update.updated_at = Set(now);
                update.update(&txn).await?;
            }
            None => {
                let account = wallet_account::ActiveModel {
                    user_id: Set(user_id.to_string()),
                    currency: Set(currency.to_string()),
                    balance: Set(amount),
                    updated_at: Set(now),
                };
                WalletAccount::insert(account).exec(&txn).await?;
            }
        }

        let entry = wallet_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id.to_string()),
            currency: Set(currency.to_string()),
            amount: Set(amount),
            direction: Set(kind.direction().to_string()),
            kind: Set(kind.to_string()),
            reference: Set(reference.map(|r| r.to_string())),
            created_at: Set(now),
        };

        let entry = WalletTransaction::insert(entry).exec_with_returning(&txn).await?;
        txn.commit().await?;

        Ok(entry)
    }

    async fn wallet_balance(&self, user_id: &str, currency: Currency) -> Result<Decimal> {
        let account = WalletAccount::find_by_id((user_id.to_string(), currency.to_string()))
            .one(&self.db).await?;
        Ok(account.map(|a| a.balance).unwrap_or(Decimal::ZERO))
    }

    async fn wallet_transaction(&self, id: Uuid) -> Result<Option<wallet_transaction::Model>> {
        let row = WalletTransaction::find_by_id(id).one(&self.db).await?;
        Ok(row)
    }

    async fn wallet_refund_exists(&self, investment_id: Uuid) -> Result<bool> {
        let row = WalletTransaction::find()
            .filter(wallet_transaction::Column::Reference.eq(investment_id.to_string()))
            .filter(wallet_transaction::Column::Kind.eq(WalletEntryKind::RefundCredit.as_str()))
            .one(&self.db).await?;
        Ok(row.is_some())
    }

    async fn upsert_chain_submission(
        &self,
        investment_id: Uuid,
        funding_key: &str,
        contract_address: &str,
        submitted_tx_hash: Option<&str>
    ) -> Result<chain_settlement::Model> {
        let now = chrono::Utc::now();
        let existing = ChainSettlement::find_by_id(investment_id).one(&self.db).await?;

        let row = match existing {
            Some(existing) => {
                let mut update: chain_settlement::ActiveModel = existing.clone().into();
                if let Some(hash) = submitted_tx_hash {
                    update.submitted_tx_hash = Set(Some(hash.to_string()));
                    update.status = Set(SettlementStatus::Submitted.to_string());
                    update.attempts = Set(existing.attempts + 1);
                    update.last_submitted_at = Set(Some(now));
                }
                update.updated_at = Set(now);
                update.update(&self.db).await?
            }
            None => {
                let status = if submitted_tx_hash.is_some() {
                    SettlementStatus::Submitted
                } else {
                    SettlementStatus::Pending
                };
                let row = chain_settlement::ActiveModel {
                    investment_id: Set(investment_id),
                    funding_key: Set(funding_key.to_string()),
                    contract_address: Set(contract_address.to_string()),
                    submitted_tx_hash: Set(submitted_tx_hash.map(|s| s.to_string())),
                    status: Set(status.to_string()),
                    block_number: Set(None),
                    attempts: Set(if submitted_tx_hash.is_some() { 1 } else { 0 }),
                    last_submitted_at: Set(submitted_tx_hash.map(|_| now)),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                ChainSettlement::insert(row).exec_with_returning(&self.db).await?
            }
        };

        Ok(row)
    }

    async fn chain_settlement(
        &self,
        investment_id: Uuid
    ) -> Result<Option<chain_settlement::Model>> {
        let row = ChainSettlement::find_by_id(investment_id).one(&self.db).await?;
        Ok(row)
    }

    async fn stale_pending(&self, cutoff: DateTimeUtc) -> Result<Vec<investment::Model>> {
        let rows = Investment::find()
            .filter(investment::Column::Status.eq(InvestmentStatus::Pending.as_str()))
            .filter(investment::Column::CreatedAt.lt(cutoff))
            .order_by_asc(investment::Column::CreatedAt)
            .all(&self.db).await?;
        Ok(rows)
    }

    async fn unsettled_confirmed(&self, cutoff: DateTimeUtc) -> Result<Vec<investment::Model>> {
        let rows = Investment::find()
            .filter(investment::Column::Status.eq(InvestmentStatus::Confirmed.as_str()))
            .filter(investment::Column::TxHash.is_null())
            .filter(investment::Column::UpdatedAt.lt(cutoff))
            .order_by_asc(investment::Column::UpdatedAt)
            .all(&self.db).await?;
        Ok(rows)
    }
}
