use std::sync::Arc;

use tokio::time::interval;
use uuid::Uuid;

use crate::chain::{ SettlementChain, SettlementReceipt, SubmissionRef };
use crate::config::SettlementPolicy;
use crate::db::entity::investment;
use crate::db::LedgerStore;
use crate::error::{ AppError, Result };
use crate::rails::RailOutcome;
use crate::services::InvestmentService;

/// Background worker that sweeps in-flight investments past their SLA
/// windows and drives them forward, back, or into the review queue.
///
/// Every mutation goes through the same compare-and-set store operations as
/// the request path, so any number of worker instances can run alongside the
/// webhook handlers; a lost race is skipped, not retried blindly.
pub struct Reconciler {
    ledger: Arc<dyn LedgerStore>,
    service: Arc<InvestmentService>,
    chain: Arc<dyn SettlementChain>,
    policy: SettlementPolicy,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        service: Arc<InvestmentService>,
        chain: Arc<dyn SettlementChain>,
        policy: SettlementPolicy
    ) -> Self {
        Self {
            ledger,
            service,
            chain,
            policy,
        }
    }

    /// Run sweeps on the configured interval until the process exits.
    pub async fn start(self) {
        let mut interval = interval(self.policy.reconcile_interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.run_sweep_once().await {
                tracing::error!("Reconciliation sweep failed: {}", e);
            }
        }
    }

    /// One full pass over stale pending and unsettled confirmed investments.
    /// Per-investment faults are absorbed so one bad row cannot stall the
    /// sweep.
    pub async fn run_sweep_once(&self) -> Result<()> {
        let now = chrono::Utc::now();

        let stale_pending = self.ledger.stale_pending(now - self.policy.payment_sla).await?;
        for row in stale_pending {
            let id = row.id;
            if let Err(e) = self.reconcile_pending(row).await {
                tracing::warn!(investment_id = %id, "Pending reconciliation skipped: {}", e);
            }
        }

        let unsettled = self.ledger.unsettled_confirmed(now - self.policy.chain_sla).await?;
        for row in unsettled {
            let id = row.id;
            if let Err(e) = self.reconcile_confirmed(row).await {
                tracing::warn!(investment_id = %id, "Settlement reconciliation skipped: {}", e);
            }
        }

        Ok(())
    }

    // ─── Pending sweep ───────────────────────────────────────────────

    async fn reconcile_pending(&self, row: investment::Model) -> Result<()> {
        let expired = row.created_at < chrono::Utc::now() - self.policy.payment_expiry;

        match self.service.verify_payment(&row).await {
            Ok(Some(check)) => {
                match check.outcome {
                    RailOutcome::Succeeded => {
                        let proof = check.proof.ok_or_else(|| {
                            AppError::Internal(
                                "Rail reported success without proof".to_string()
                            )
                        })?;
                        self.service.confirm_payment(row.id, proof).await?;
                    }
                    RailOutcome::Failed => {
                        self.service.fail_payment(row.id, "Payment reported failed by rail").await?;
                    }
                    RailOutcome::Pending if expired => {
                        self.service.fail_payment(row.id, "Payment window expired").await?;
                    }
                    RailOutcome::Pending => {}
                }
                Ok(())
            }
            Ok(None) => self.retry_initiation(row, expired).await,
            Err(e) if e.is_transient() => {
                tracing::warn!(investment_id = %row.id, "Rail verification deferred: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// No payment session exists yet (the gateway was unreachable at create
    /// time, or a wallet debit bounced off a version race). Try again,
    /// within the attempt budget.
    async fn retry_initiation(&self, row: investment::Model, expired: bool) -> Result<()> {
        if expired {
            self.service.fail_payment(row.id, "Payment window expired").await?;
            return Ok(());
        }

        if row.payment_attempts >= self.policy.max_payment_attempts {
            self.flag_once(
                &row,
                "Payment initiation attempts exhausted"
            ).await?;
            return Ok(());
        }

        match self.service.initiate_payment(row.clone()).await {
            Ok(_) => Ok(()),
            Err(AppError::PaymentFailed(reason)) => {
                self.service.fail_payment(row.id, &reason).await?;
                Ok(())
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(investment_id = %row.id, "Payment initiation retry deferred: {}", e);
                self.ledger.record_payment_attempt(row.id, row.version).await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ─── Confirmed sweep ─────────────────────────────────────────────

    async fn reconcile_confirmed(&self, row: investment::Model) -> Result<()> {
        let settlement = self.ledger.chain_settlement(row.id).await?;

        let settlement = match settlement {
            Some(s) => s,
            None => {
                // Confirmed but never handed to the chain client.
                return self.submit_absorbing_transient(row.id).await;
            }
        };

        let submitted_hash = match &settlement.submitted_tx_hash {
            Some(hash) => hash.clone(),
            None => {
                if settlement.attempts >= self.policy.max_chain_attempts {
                    self.flag_once(&row, "Chain submission attempts exhausted").await?;
                    return Ok(());
                }
                return self.submit_absorbing_transient(row.id).await;
            }
        };

        match self.chain.receipt(&SubmissionRef(submitted_hash.clone())).await {
            Ok(SettlementReceipt::Mined { tx_hash, block_number }) => {
                self.service.record_chain_confirmation(row.id, &tx_hash, block_number).await?;
                Ok(())
            }
            Ok(SettlementReceipt::Reverted { tx_hash }) => {
                self.service.record_chain_reverted(
                    row.id,
                    &format!("Funding transaction {} reverted", tx_hash)
                ).await?;
                Ok(())
            }
            Ok(SettlementReceipt::Pending) => {
                let overdue = settlement.last_submitted_at
                    .map(|at| at < chrono::Utc::now() - self.policy.chain_resubmit_after)
                    .unwrap_or(true);
                if !overdue {
                    return Ok(());
                }
                if settlement.attempts >= self.policy.max_chain_attempts {
                    self.flag_once(&row, "Chain submission attempts exhausted").await?;
                    return Ok(());
                }
                tracing::info!(
                    investment_id = %row.id,
                    attempts = settlement.attempts,
                    "Resubmitting unmined funding transaction"
                );
                match self.service.resubmit_to_chain(row.id).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.is_transient() => {
                        tracing::warn!(investment_id = %row.id, "Resubmission deferred: {}", e);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(investment_id = %row.id, "Receipt query deferred: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn submit_absorbing_transient(&self, id: Uuid) -> Result<()> {
        match self.service.submit_to_chain(id).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                tracing::warn!(investment_id = %id, "Chain submission deferred: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Flag for operator review without re-flagging on every sweep.
    async fn flag_once(&self, row: &investment::Model, reason: &str) -> Result<()> {
        if row.needs_review {
            return Ok(());
        }
        tracing::error!(investment_id = %row.id, %reason, "Investment flagged for review");
        self.ledger.flag_review(row.id, reason).await?;
        Ok(())
    }
}
