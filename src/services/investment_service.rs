use std::str::FromStr;
use std::sync::Arc;

use sea_orm::prelude::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::chain::{ self, FundingRequest, SettlementChain };
use crate::db::entity::investment::{ self, InvestmentMetadata };
use crate::db::{ CasOutcome, LedgerStore, NewInvestment };
use crate::enums::{ Currency, InvestmentStatus, PaymentMethod };
use crate::error::{ AppError, Result };
use crate::projects::ProjectDirectory;
use crate::rails::{ PaymentProof, PaymentRail, RailCheck };

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvestment {
    pub project_id: i64,
    pub amount: Decimal,
    pub currency: Currency,
    pub payment_method: PaymentMethod,
    pub user_address: String,
    #[serde(default)]
    pub metadata: Option<InvestmentMetadata>,
}

/// The investment state machine. Owns every status transition; the API
/// layer and the reconciliation worker both go through it, so the
/// monotonic path `pending -> confirmed -> settled` is enforced in exactly
/// one place.
///
/// External calls (gateway, chain) never happen while a row lock is held:
/// each transition is its own guarded store operation, and a lost
/// compare-and-set means another writer already applied an equivalent or
/// later transition.
pub struct InvestmentService {
    ledger: Arc<dyn LedgerStore>,
    wallet_rail: Arc<dyn PaymentRail>,
    card_rail: Arc<dyn PaymentRail>,
    bank_rail: Arc<dyn PaymentRail>,
    chain: Arc<dyn SettlementChain>,
    projects: Arc<dyn ProjectDirectory>,
}

impl InvestmentService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        wallet_rail: Arc<dyn PaymentRail>,
        card_rail: Arc<dyn PaymentRail>,
        bank_rail: Arc<dyn PaymentRail>,
        chain: Arc<dyn SettlementChain>,
        projects: Arc<dyn ProjectDirectory>
    ) -> Self {
        Self {
            ledger,
            wallet_rail,
            card_rail,
            bank_rail,
            chain,
            projects,
        }
    }

    fn rail_for(&self, method: PaymentMethod) -> &Arc<dyn PaymentRail> {
        match method {
            PaymentMethod::Wallet => &self.wallet_rail,
            PaymentMethod::Card => &self.card_rail,
            PaymentMethod::BankTransfer => &self.bank_rail,
        }
    }

    // ─── Creation ────────────────────────────────────────────────────

    pub async fn create(
        &self,
        user_id: &str,
        request: CreateInvestment
    ) -> Result<investment::Model> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::validation("Amount must be positive", "amount"));
        }
        // Also rejects amounts with more decimals than the currency carries.
        chain::to_minor_units(request.amount, request.currency)?;

        if request.user_address.parse::<ethers::types::Address>().is_err() {
            return Err(
                AppError::validation("user_address is not a valid chain address", "user_address")
            );
        }
        if request.project_id <= 0 {
            return Err(AppError::validation("Invalid project id", "project_id"));
        }

        let project = self.projects.project(request.project_id).await?;
        if !project.open {
            return Err(
                AppError::ProjectClosed(
                    format!("Project {} is not accepting funding", project.id)
                )
            );
        }
        if project.currency != request.currency {
            return Err(
                AppError::validation(
                    format!("Project {} funds in {}", project.id, project.currency),
                    "currency"
                )
            );
        }

        if let Some(cap) = project.investor_cap {
            let committed = self.ledger.committed_total(user_id, project.id).await?;
            if committed + request.amount > cap {
                return Err(
                    AppError::validation(
                        format!("Investment would exceed the per-investor cap of {} {}", cap, project.currency),
                        "amount"
                    )
                );
            }
        }

        let row = self.ledger.create_investment(NewInvestment {
            user_id: user_id.to_string(),
            project_id: request.project_id,
            amount: request.amount,
            currency: request.currency,
            payment_method: request.payment_method,
            user_address: request.user_address,
            metadata: request.metadata.unwrap_or_default(),
        }).await?;

        tracing::info!(
            investment_id = %row.id,
            method = %row.payment_method,
            amount = %row.amount,
            "Investment created"
        );

        match self.initiate_payment(row.clone()).await {
            Ok(row) => Ok(row),
            Err(AppError::PaymentFailed(reason)) => {
                // Wallet debit refused: terminal, nothing was moved.
                self.ledger.transition_status(
                    row.id,
                    row.version,
                    InvestmentStatus::Pending,
                    InvestmentStatus::Failed,
                    Some(&reason)
                ).await?;
                tracing::info!(investment_id = %row.id, %reason, "Investment failed at initiation");
                Err(AppError::PaymentFailed(reason))
            }
            Err(e) if e.is_transient() => {
                // Gateway unreachable: stay pending, the reconciler retries.
                tracing::warn!(investment_id = %row.id, "Payment initiation deferred: {}", e);
                let outcome = self.ledger.record_payment_attempt(row.id, row.version).await?;
                Ok(outcome.into_row())
            }
            Err(e) => Err(e),
        }
    }

    /// Run the rail-specific payment initiation for a pending investment.
    /// Wallet investments come back `confirmed` (the debit is synchronous);
    /// gateway investments gain a session reference and stay `pending`.
    pub async fn initiate_payment(&self, row: investment::Model) -> Result<investment::Model> {
        let method = PaymentMethod::from_str(&row.payment_method)?;
        let session = self.rail_for(method).initiate(&row).await?;

        match method {
            PaymentMethod::Wallet => {
                tracing::info!(
                    investment_id = %row.id,
                    transaction_id = %session.reference,
                    "Wallet debit applied, investment confirmed"
                );
                let row = self.ledger.investment(row.id).await?;
                self.try_submit_to_chain(row).await
            }
            PaymentMethod::Card | PaymentMethod::BankTransfer => {
                let outcome = self.ledger.attach_gateway_session(
                    row.id,
                    row.version,
                    &session.reference,
                    session.payment_url.as_deref()
                ).await?;
                tracing::info!(
                    investment_id = %row.id,
                    gateway_ref = %session.reference,
                    "Payment session created"
                );
                Ok(outcome.into_row())
            }
        }
    }

    // ─── Payment callbacks ───────────────────────────────────────────

    /// Apply a payment confirmation. Idempotent: replays and duplicate
    /// webhook deliveries return the current row unchanged. Proof values
    /// that contradict the stored row are a consistency fault.
    pub async fn confirm_payment(
        &self,
        id: Uuid,
        proof: PaymentProof
    ) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;
        let status = InvestmentStatus::from_str(&row.status)?;

        self.check_proof(&row, &proof).await?;

        match status {
            InvestmentStatus::Confirmed => {
                // Duplicate delivery; settle on chain if that is still owed.
                self.try_submit_to_chain(row).await
            }
            InvestmentStatus::Failed | InvestmentStatus::Cancelled => {
                let reason = format!(
                    "Payment confirmation arrived for {} investment {}",
                    row.status,
                    row.id
                );
                tracing::error!(investment_id = %row.id, "{}", reason);
                self.ledger.flag_review(id, &reason).await?;
                Err(AppError::Conflict(reason))
            }
            InvestmentStatus::Pending => {
                let method = PaymentMethod::from_str(&row.payment_method)?;
                let outcome = match method {
                    PaymentMethod::Wallet => {
                        self.ledger.confirm_with_wallet_debit(id, row.version).await?
                    }
                    _ => {
                        self.ledger.transition_status(
                            id,
                            row.version,
                            InvestmentStatus::Pending,
                            InvestmentStatus::Confirmed,
                            None
                        ).await?
                    }
                };

                let row = match outcome {
                    CasOutcome::Applied(row) => {
                        tracing::info!(investment_id = %row.id, "Payment confirmed");
                        row
                    }
                    CasOutcome::Stale(row) => {
                        // A racing writer got there first. Only a transition
                        // to confirmed counts as the duplicate case.
                        let now = InvestmentStatus::from_str(&row.status)?;
                        if now != InvestmentStatus::Confirmed {
                            let reason = format!(
                                "Payment confirmation raced investment {} into {}",
                                row.id,
                                row.status
                            );
                            self.ledger.flag_review(id, &reason).await?;
                            return Err(AppError::Conflict(reason));
                        }
                        row
                    }
                };

                self.try_submit_to_chain(row).await
            }
        }
    }

    /// Terminal payment failure reported by the rail or gateway.
    pub async fn fail_payment(&self, id: Uuid, reason: &str) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;
        let status = InvestmentStatus::from_str(&row.status)?;

        match status {
            InvestmentStatus::Failed | InvestmentStatus::Cancelled => Ok(row),
            InvestmentStatus::Confirmed => {
                let msg = format!(
                    "Payment failure reported for confirmed investment {}",
                    row.id
                );
                tracing::error!(investment_id = %row.id, "{}", msg);
                self.ledger.flag_review(id, &msg).await?;
                Err(AppError::Conflict(msg))
            }
            InvestmentStatus::Pending => {
                let outcome = self.ledger.transition_status(
                    id,
                    row.version,
                    InvestmentStatus::Pending,
                    InvestmentStatus::Failed,
                    Some(reason)
                ).await?;
                if outcome.applied() {
                    tracing::info!(investment_id = %id, %reason, "Payment failed");
                }
                Ok(outcome.into_row())
            }
        }
    }

    /// Owner- or operator-initiated cancellation. Only possible while the
    /// investment is pending and before any payment initiation, so it can
    /// never race an in-flight external payment.
    pub async fn cancel(&self, id: Uuid, requesting_user: Option<&str>) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;

        if let Some(user) = requesting_user {
            if row.user_id != user {
                return Err(AppError::Forbidden);
            }
        }

        let status = InvestmentStatus::from_str(&row.status)?;
        if status != InvestmentStatus::Pending {
            return Err(
                AppError::InvalidState(format!("Cannot cancel a {} investment", row.status))
            );
        }
        if row.gateway_ref.is_some() || row.transaction_id.is_some() {
            return Err(
                AppError::InvalidState("Payment initiation has already begun".to_string())
            );
        }

        let outcome = self.ledger.transition_status(
            id,
            row.version,
            InvestmentStatus::Pending,
            InvestmentStatus::Cancelled,
            None
        ).await?;

        match outcome {
            CasOutcome::Applied(row) => {
                tracing::info!(investment_id = %row.id, "Investment cancelled");
                Ok(row)
            }
            CasOutcome::Stale(_) => {
                Err(AppError::InvalidState("Investment changed state during cancel".to_string()))
            }
        }
    }

    // ─── Chain settlement ────────────────────────────────────────────

    /// Submit a confirmed investment to its fund contract. No-op when the
    /// investment has already settled. The settlement row is written before
    /// the submission, so a crash between the two leaves a retriable record
    /// rather than an untracked transaction.
    pub async fn submit_to_chain(&self, id: Uuid) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;
        let status = InvestmentStatus::from_str(&row.status)?;

        if status != InvestmentStatus::Confirmed {
            return Err(
                AppError::InvalidState(
                    format!("Cannot settle a {} investment on chain", row.status)
                )
            );
        }
        if row.tx_hash.is_some() {
            return Ok(row);
        }

        let contract_address = match self.ledger.chain_settlement(id).await? {
            Some(settlement) => {
                if settlement.submitted_tx_hash.is_some() {
                    // A submission is already in flight; whether to resubmit
                    // is the reconciler's call, not a webhook replay's.
                    return Ok(row);
                }
                settlement.contract_address
            }
            None => {
                let project = self.projects.project(row.project_id).await?;
                self.ledger.upsert_chain_submission(
                    id,
                    &chain::funding_key_hex(row.id),
                    &project.fund_contract,
                    None
                ).await?;
                project.fund_contract
            }
        };

        self.dispatch_funding(row, contract_address).await
    }

    /// Resubmit with the identical funding key after a submission stayed
    /// unmined past the resubmission window. Only the reconciler calls this.
    pub async fn resubmit_to_chain(&self, id: Uuid) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;
        let status = InvestmentStatus::from_str(&row.status)?;

        if status != InvestmentStatus::Confirmed || row.tx_hash.is_some() {
            return Ok(row);
        }

        let settlement = self.ledger
            .chain_settlement(id).await?
            .ok_or_else(|| {
                AppError::InvalidState(format!("Investment {} has no settlement record", id))
            })?;

        self.dispatch_funding(row, settlement.contract_address).await
    }

    async fn dispatch_funding(
        &self,
        row: investment::Model,
        contract_address: String
    ) -> Result<investment::Model> {
        let id = row.id;
        let currency = Currency::from_str(&row.currency)?;
        let request = FundingRequest {
            funding_key: chain::funding_key(row.id),
            contract_address: contract_address.clone(),
            project_id: row.project_id,
            investor_address: row.user_address.clone(),
            amount_minor: chain::to_minor_units(row.amount, currency)?,
        };

        let submission = match self.chain.submit_funding(&request).await {
            Ok(submission) => submission,
            Err(AppError::Conflict(msg)) => {
                self.ledger.flag_review(id, &msg).await?;
                return Err(AppError::Conflict(msg));
            }
            Err(e) => {
                return Err(e);
            }
        };

        self.ledger.upsert_chain_submission(
            id,
            &chain::funding_key_hex(id),
            &contract_address,
            Some(&submission.0)
        ).await?;

        tracing::info!(
            investment_id = %id,
            tx_hash = %submission.0,
            "Funding transaction submitted"
        );

        self.ledger.investment(id).await
    }

    /// Chain-submission wrapper that absorbs transient faults; the
    /// reconciler picks those investments up later.
    async fn try_submit_to_chain(&self, row: investment::Model) -> Result<investment::Model> {
        if row.status != InvestmentStatus::Confirmed.as_str() || row.tx_hash.is_some() {
            return Ok(row);
        }

        match self.submit_to_chain(row.id).await {
            Ok(row) => Ok(row),
            Err(e) if e.is_transient() => {
                tracing::warn!(investment_id = %row.id, "Chain submission deferred: {}", e);
                Ok(row)
            }
            Err(e) => Err(e),
        }
    }

    /// Record a mined funding transaction. Idempotent for identical hashes;
    /// a different hash for the same investment is a consistency fault that
    /// never overwrites the stored value.
    pub async fn record_chain_confirmation(
        &self,
        id: Uuid,
        tx_hash: &str,
        block_number: i64
    ) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;

        if let Some(existing) = &row.tx_hash {
            if existing == tx_hash {
                return Ok(row);
            }
            let reason = format!(
                "Conflicting settlement hash for investment {}: stored {}, reported {}",
                row.id,
                existing,
                tx_hash
            );
            tracing::error!(investment_id = %row.id, "{}", reason);
            self.ledger.flag_review(id, &reason).await?;
            return Err(AppError::Conflict(reason));
        }

        let status = InvestmentStatus::from_str(&row.status)?;
        if status != InvestmentStatus::Confirmed {
            let reason = format!(
                "Chain confirmation arrived for {} investment {}",
                row.status,
                row.id
            );
            tracing::error!(investment_id = %row.id, "{}", reason);
            self.ledger.flag_review(id, &reason).await?;
            return Err(AppError::Conflict(reason));
        }

        // A reported hash that is not the one we submitted never settles the
        // row, even when the delivery itself is authenticated.
        if let Some(settlement) = self.ledger.chain_settlement(id).await? {
            if let Some(submitted) = &settlement.submitted_tx_hash {
                if submitted != tx_hash {
                    let reason = format!(
                        "Reported settlement hash {} does not match submission {} for investment {}",
                        tx_hash,
                        submitted,
                        row.id
                    );
                    tracing::error!(investment_id = %row.id, "{}", reason);
                    self.ledger.flag_review(id, &reason).await?;
                    return Err(AppError::Conflict(reason));
                }
            }
        }

        let outcome = self.ledger.mark_settled(id, row.version, tx_hash, block_number).await?;
        match outcome {
            CasOutcome::Applied(row) => {
                tracing::info!(
                    investment_id = %row.id,
                    tx_hash,
                    block_number,
                    "Investment settled on chain"
                );
                Ok(row)
            }
            CasOutcome::Stale(row) => {
                if row.tx_hash.as_deref() == Some(tx_hash) {
                    return Ok(row);
                }
                let reason = format!(
                    "Chain confirmation raced investment {} into {} (tx_hash {:?})",
                    row.id,
                    row.status,
                    row.tx_hash
                );
                self.ledger.flag_review(id, &reason).await?;
                Err(AppError::Conflict(reason))
            }
        }
    }

    /// Record a reverted funding transaction: the payment side succeeded but
    /// the chain side is terminally lost, so the investment fails and goes
    /// to the operator review queue for refund handling.
    pub async fn record_chain_reverted(&self, id: Uuid, detail: &str) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;
        let status = InvestmentStatus::from_str(&row.status)?;

        match status {
            InvestmentStatus::Failed => Ok(row),
            InvestmentStatus::Confirmed if row.tx_hash.is_some() => {
                let reason = format!(
                    "Revert reported for settled investment {} ({})",
                    row.id,
                    detail
                );
                tracing::error!(investment_id = %row.id, "{}", reason);
                self.ledger.flag_review(id, &reason).await?;
                Err(AppError::Conflict(reason))
            }
            InvestmentStatus::Confirmed => {
                let reason = format!("Chain settlement reverted, refund required: {}", detail);
                let outcome = self.ledger.mark_chain_reverted(id, row.version, &reason).await?;
                tracing::error!(investment_id = %id, %detail, "Chain settlement reverted");
                Ok(outcome.into_row())
            }
            _ => {
                let reason = format!(
                    "Revert reported for {} investment {}",
                    row.status,
                    row.id
                );
                self.ledger.flag_review(id, &reason).await?;
                Err(AppError::Conflict(reason))
            }
        }
    }

    // ─── Operator actions ────────────────────────────────────────────

    /// Credit a failed wallet investment's debit back to the wallet. Runs at
    /// most once per investment. Card and bank refunds go through the
    /// gateway back office, not this ledger.
    pub async fn refund_wallet_investment(&self, id: Uuid) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;

        let method = PaymentMethod::from_str(&row.payment_method)?;
        if method != PaymentMethod::Wallet {
            return Err(
                AppError::validation(
                    "Only wallet investments can be refunded here",
                    "payment_method"
                )
            );
        }

        let status = InvestmentStatus::from_str(&row.status)?;
        if status != InvestmentStatus::Failed {
            return Err(
                AppError::InvalidState(format!("Cannot refund a {} investment", row.status))
            );
        }
        if row.transaction_id.is_none() {
            return Err(
                AppError::InvalidState("Investment has no captured wallet debit".to_string())
            );
        }
        if self.ledger.wallet_refund_exists(id).await? {
            return Err(AppError::InvalidState("Investment already refunded".to_string()));
        }

        let currency = Currency::from_str(&row.currency)?;
        self.ledger.credit_wallet(
            &row.user_id,
            currency,
            row.amount,
            crate::enums::WalletEntryKind::RefundCredit,
            Some(id)
        ).await?;
        self.ledger.clear_review(id).await?;

        tracing::info!(investment_id = %id, amount = %row.amount, "Wallet refund credited");
        self.ledger.investment(id).await
    }

    // ─── Reads ───────────────────────────────────────────────────────

    pub async fn get_owned(&self, id: Uuid, user_id: &str) -> Result<investment::Model> {
        let row = self.ledger.investment(id).await?;
        if row.user_id != user_id {
            // Existence of someone else's investment is not disclosed.
            return Err(AppError::InvestmentNotFound);
        }
        Ok(row)
    }

    pub async fn list_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64
    ) -> Result<Vec<investment::Model>> {
        self.ledger.investments_for_user(user_id, limit, offset).await
    }

    pub async fn review_queue(&self) -> Result<Vec<investment::Model>> {
        self.ledger.review_queue().await
    }

    pub async fn find_by_gateway_ref(&self, reference: &str) -> Result<Option<investment::Model>> {
        self.ledger.investment_by_gateway_ref(reference).await
    }

    /// Ask the investment's rail for the authoritative payment state.
    /// Returns None when no session exists yet to verify against.
    pub async fn verify_payment(&self, row: &investment::Model) -> Result<Option<RailCheck>> {
        let method = PaymentMethod::from_str(&row.payment_method)?;
        let session_ref = if method.uses_gateway() {
            row.gateway_ref.clone()
        } else {
            row.transaction_id.map(|t| t.to_string())
        };

        match session_ref {
            Some(reference) => Ok(Some(self.rail_for(method).verify(&reference).await?)),
            None => Ok(None),
        }
    }

    // ─── Internal ────────────────────────────────────────────────────

    /// A proof that contradicts the stored row is always a hard error, even
    /// when the transition itself would be a harmless duplicate.
    async fn check_proof(&self, row: &investment::Model, proof: &PaymentProof) -> Result<()> {
        let currency = Currency::from_str(&row.currency)?;

        let mismatch = if proof.amount != row.amount {
            Some(format!(
                "Proof amount {} does not match investment amount {}",
                proof.amount,
                row.amount
            ))
        } else if proof.currency != currency {
            Some(format!(
                "Proof currency {} does not match investment currency {}",
                proof.currency,
                row.currency
            ))
        } else {
            match (&proof.gateway_ref, &row.gateway_ref) {
                (Some(proof_ref), Some(stored_ref)) if proof_ref != stored_ref => {
                    Some(format!(
                        "Proof reference {} does not match session {}",
                        proof_ref,
                        stored_ref
                    ))
                }
                _ => None,
            }
        };

        if let Some(reason) = mismatch {
            tracing::error!(investment_id = %row.id, "{}", reason);
            self.ledger.flag_review(row.id, &reason).await?;
            return Err(AppError::Conflict(reason));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectInfo;
    use crate::testing::*;

    // ─── Creation and validation ─────────────────────────────────────

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let h = harness();

        let mut req = create_request(PaymentMethod::Card);
        req.amount = tnd("0");
        assert!(matches!(
            h.service.create(USER, req).await,
            Err(AppError::Validation { .. })
        ));

        let mut req = create_request(PaymentMethod::Card);
        req.amount = tnd("10.0001"); // four decimals, TND carries three
        assert!(matches!(
            h.service.create(USER, req).await,
            Err(AppError::Validation { .. })
        ));

        let mut req = create_request(PaymentMethod::Card);
        req.user_address = "not-an-address".to_string();
        assert!(matches!(
            h.service.create(USER, req).await,
            Err(AppError::Validation { .. })
        ));

        let mut req = create_request(PaymentMethod::Card);
        req.project_id = 999;
        assert!(matches!(h.service.create(USER, req).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_closed_project_and_wrong_currency() {
        let h = harness();
        h.projects.set(ProjectInfo {
            id: 8,
            open: false,
            currency: Currency::Tnd,
            investor_cap: None,
            fund_contract: FUND_CONTRACT.to_string(),
        });

        let mut req = create_request(PaymentMethod::Card);
        req.project_id = 8;
        assert!(matches!(
            h.service.create(USER, req).await,
            Err(AppError::ProjectClosed(_))
        ));

        let mut req = create_request(PaymentMethod::Card);
        req.currency = Currency::Eur;
        req.amount = tnd("100.50");
        assert!(matches!(
            h.service.create(USER, req).await,
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_enforces_investor_cap() {
        let h = harness();
        h.projects.set(ProjectInfo {
            id: PROJECT,
            open: true,
            currency: Currency::Tnd,
            investor_cap: Some(tnd("1500")),
            fund_contract: FUND_CONTRACT.to_string(),
        });

        h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        // 1000 already committed, another 1000 would exceed the 1500 cap.
        let err = h.service.create(USER, create_request(PaymentMethod::Card)).await;
        assert!(matches!(err, Err(AppError::Validation { .. })));

        // A different investor is unaffected.
        h.service.create("user-2", create_request(PaymentMethod::Card)).await.unwrap();
    }

    // ─── Wallet rail: synchronous debit and chain settlement ─────────

    #[tokio::test]
    async fn test_wallet_investment_confirms_debits_and_settles() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;

        let row = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();

        assert_eq!(row.status, InvestmentStatus::Confirmed.as_str());
        assert!(row.transaction_id.is_some());
        assert!(row.gateway_ref.is_none());
        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("4000"));

        // Funding was handed to the chain immediately after confirmation.
        let submissions = h.chain.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].funding_key, crate::chain::funding_key(row.id));
        assert_eq!(submissions[0].amount_minor, 1_000_000);
        assert_eq!(submissions[0].contract_address, FUND_CONTRACT);

        // Not settled until the transaction is seen mined.
        assert!(row.tx_hash.is_none());
        let hash = h.chain.last_submitted_hash().unwrap();
        let row = h.service.record_chain_confirmation(row.id, &hash, 42).await.unwrap();
        assert_eq!(row.tx_hash.as_deref(), Some(hash.as_str()));
        assert_eq!(row.status, InvestmentStatus::Confirmed.as_str());

        let settlement = h.ledger.chain_settlement(row.id).await.unwrap().unwrap();
        assert_eq!(settlement.status, crate::enums::SettlementStatus::Mined.as_str());
        assert_eq!(settlement.block_number, Some(42));
    }

    #[tokio::test]
    async fn test_wallet_investment_insufficient_balance_fails_without_debit() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "100").await;

        let err = h.service.create(USER, create_request(PaymentMethod::Wallet)).await;
        assert!(matches!(err, Err(AppError::PaymentFailed(_))));

        let rows = h.service.list_for_user(USER, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, InvestmentStatus::Failed.as_str());
        assert!(rows[0].transaction_id.is_none());
        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("100"));
        assert!(h.chain.submissions().is_empty());
    }

    // ─── Gateway rails ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_card_investment_opens_session_and_stays_pending() {
        let h = harness();

        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        assert_eq!(row.status, InvestmentStatus::Pending.as_str());
        assert_eq!(row.gateway_ref.as_deref(), Some("pm-0"));
        assert!(row.payment_url.is_some());
        assert!(row.transaction_id.is_none());
        assert!(h.chain.submissions().is_empty());
        assert_eq!(row.typed_metadata().unwrap().schema_version, 1);
    }

    #[tokio::test]
    async fn test_gateway_outage_at_create_defers_initiation() {
        let h = harness();
        h.gateway.initiate_transient.store(true, std::sync::atomic::Ordering::SeqCst);

        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        assert_eq!(row.status, InvestmentStatus::Pending.as_str());
        assert!(row.gateway_ref.is_none());
        assert_eq!(row.payment_attempts, 1);
    }

    #[tokio::test]
    async fn test_confirm_card_payment_then_settle() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let reference = row.gateway_ref.clone().unwrap();

        let row = h.service
            .confirm_payment(row.id, proof("1000", Some(&reference))).await
            .unwrap();

        assert_eq!(row.status, InvestmentStatus::Confirmed.as_str());
        assert_eq!(h.chain.submissions().len(), 1);
        // No wallet movement for gateway payments.
        assert!(h.ledger.wallet_history(USER).await.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_is_idempotent_and_submits_once() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let reference = row.gateway_ref.clone().unwrap();

        let first = h.service
            .confirm_payment(row.id, proof("1000", Some(&reference))).await
            .unwrap();
        let second = h.service
            .confirm_payment(row.id, proof("1000", Some(&reference))).await
            .unwrap();

        assert_eq!(first.status, InvestmentStatus::Confirmed.as_str());
        assert_eq!(second.status, InvestmentStatus::Confirmed.as_str());
        assert_eq!(second.version, first.version);
        // The duplicate delivery must not fund the contract twice.
        assert_eq!(h.chain.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_with_mismatched_proof_flags_review() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let reference = row.gateway_ref.clone().unwrap();

        let err = h.service.confirm_payment(row.id, proof("999", Some(&reference))).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));

        let row = h.ledger.investment(row.id).await.unwrap();
        assert_eq!(row.status, InvestmentStatus::Pending.as_str());
        assert!(row.needs_review);

        let err = h.service.confirm_payment(row.id, proof("1000", Some("pm-other"))).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_confirm_after_terminal_state_is_a_conflict() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let reference = row.gateway_ref.clone().unwrap();
        h.service.fail_payment(row.id, "declined").await.unwrap();

        let err = h.service.confirm_payment(row.id, proof("1000", Some(&reference))).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        assert!(h.ledger.investment(row.id).await.unwrap().needs_review);
    }

    #[tokio::test]
    async fn test_fail_payment_semantics() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        let failed = h.service.fail_payment(row.id, "declined").await.unwrap();
        assert_eq!(failed.status, InvestmentStatus::Failed.as_str());
        assert_eq!(failed.failure_reason.as_deref(), Some("declined"));

        // Repeat delivery is a no-op.
        let again = h.service.fail_payment(row.id, "declined").await.unwrap();
        assert_eq!(again.version, failed.version);

        // A failure report against a confirmed investment is a fault.
        seed_wallet(&h.ledger, USER, "5000").await;
        let confirmed = h.service
            .create(USER, create_request(PaymentMethod::Wallet)).await
            .unwrap();
        let err = h.service.fail_payment(confirmed.id, "late failure").await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        assert!(h.ledger.investment(confirmed.id).await.unwrap().needs_review);
    }

    // ─── Cancellation ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cancel_only_before_payment_initiation() {
        let h = harness();

        // A card row with a session already open cannot be cancelled.
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        assert!(matches!(
            h.service.cancel(row.id, Some(USER)).await,
            Err(AppError::InvalidState(_))
        ));

        // One created while the gateway was down has no session yet.
        h.gateway.initiate_transient.store(true, std::sync::atomic::Ordering::SeqCst);
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        assert!(matches!(
            h.service.cancel(row.id, Some("someone-else")).await,
            Err(AppError::Forbidden)
        ));

        let row = h.service.cancel(row.id, Some(USER)).await.unwrap();
        assert_eq!(row.status, InvestmentStatus::Cancelled.as_str());

        assert!(matches!(
            h.service.cancel(row.id, Some(USER)).await,
            Err(AppError::InvalidState(_))
        ));
    }

    // ─── Chain settlement edge cases ─────────────────────────────────

    #[tokio::test]
    async fn test_chain_confirmation_replay_and_conflicting_hash() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;
        let row = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();
        let hash = h.chain.last_submitted_hash().unwrap();

        let settled = h.service.record_chain_confirmation(row.id, &hash, 7).await.unwrap();
        let replay = h.service.record_chain_confirmation(row.id, &hash, 7).await.unwrap();
        assert_eq!(replay.version, settled.version);

        // A different hash for the same investment never overwrites.
        let err = h.service.record_chain_confirmation(row.id, "0xdeadbeef", 8).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        let row = h.ledger.investment(row.id).await.unwrap();
        assert_eq!(row.tx_hash.as_deref(), Some(hash.as_str()));
        assert!(row.needs_review);
    }

    #[tokio::test]
    async fn test_chain_confirmation_for_unconfirmed_investment_is_a_fault() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        let err = h.service.record_chain_confirmation(row.id, "0xfeed0000", 1).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        let row = h.ledger.investment(row.id).await.unwrap();
        assert!(row.tx_hash.is_none());
        assert!(row.needs_review);
    }

    #[tokio::test]
    async fn test_chain_confirmation_must_match_submitted_hash() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;
        let row = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();
        let submitted = h.chain.last_submitted_hash().unwrap();

        // A hash we never submitted does not settle the row, even though
        // the row itself is still unsettled.
        let err = h.service.record_chain_confirmation(row.id, "0xbadc0ffee", 7).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        let loaded = h.ledger.investment(row.id).await.unwrap();
        assert!(loaded.tx_hash.is_none());
        assert!(loaded.needs_review);

        // The genuine submission hash still settles it.
        let settled = h.service.record_chain_confirmation(row.id, &submitted, 7).await.unwrap();
        assert_eq!(settled.tx_hash.as_deref(), Some(submitted.as_str()));
        assert_eq!(settled.status, InvestmentStatus::Confirmed.as_str());
    }

    #[tokio::test]
    async fn test_already_funded_key_flags_review() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        let reference = row.gateway_ref.clone().unwrap();
        h.chain.mark_funded(crate::chain::funding_key(row.id));

        let err = h.service.confirm_payment(row.id, proof("1000", Some(&reference))).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));

        let row = h.ledger.investment(row.id).await.unwrap();
        assert_eq!(row.status, InvestmentStatus::Confirmed.as_str());
        assert!(row.tx_hash.is_none());
        assert!(row.needs_review);
    }

    // ─── Revert and refund ───────────────────────────────────────────

    #[tokio::test]
    async fn test_chain_revert_fails_investment_and_refund_runs_once() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;
        let row = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();
        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("4000"));

        let row = h.service.record_chain_reverted(row.id, "out of shares").await.unwrap();
        assert_eq!(row.status, InvestmentStatus::Failed.as_str());
        assert!(row.tx_hash.is_none());
        assert!(row.needs_review);

        // Revert never auto-refunds; the operator does it explicitly.
        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("4000"));

        let row = h.service.refund_wallet_investment(row.id).await.unwrap();
        assert!(!row.needs_review);
        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("5000"));
        assert!(h.ledger.wallet_refund_exists(row.id).await.unwrap());

        // At most once.
        assert!(matches!(
            h.service.refund_wallet_investment(row.id).await,
            Err(AppError::InvalidState(_))
        ));
        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("5000"));

        // Repeat revert reports are absorbed.
        let replay = h.service.record_chain_reverted(row.id, "out of shares").await.unwrap();
        assert_eq!(replay.status, InvestmentStatus::Failed.as_str());
    }

    #[tokio::test]
    async fn test_revert_reported_for_settled_investment_is_a_fault() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;
        let row = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();
        let hash = h.chain.last_submitted_hash().unwrap();
        h.service.record_chain_confirmation(row.id, &hash, 3).await.unwrap();

        let err = h.service.record_chain_reverted(row.id, "late revert").await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
        let row = h.ledger.investment(row.id).await.unwrap();
        assert_eq!(row.tx_hash.as_deref(), Some(hash.as_str()));
        assert!(row.needs_review);
    }

    #[tokio::test]
    async fn test_refund_guards() {
        let h = harness();

        // Card investments are refunded through the gateway, not this ledger.
        let card = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();
        h.service.fail_payment(card.id, "declined").await.unwrap();
        assert!(matches!(
            h.service.refund_wallet_investment(card.id).await,
            Err(AppError::Validation { .. })
        ));

        // A confirmed wallet investment is not refundable.
        seed_wallet(&h.ledger, USER, "5000").await;
        let wallet = h.service.create(USER, create_request(PaymentMethod::Wallet)).await.unwrap();
        assert!(matches!(
            h.service.refund_wallet_investment(wallet.id).await,
            Err(AppError::InvalidState(_))
        ));
    }

    // ─── Concurrency ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_concurrent_wallet_confirms_debit_exactly_once() {
        let h = harness();
        seed_wallet(&h.ledger, USER, "5000").await;

        // A bare pending wallet row, as if initiation was deferred.
        let row = h.ledger.create_investment(crate::db::NewInvestment {
            user_id: USER.to_string(),
            project_id: PROJECT,
            amount: tnd("1000"),
            currency: Currency::Tnd,
            payment_method: PaymentMethod::Wallet,
            user_address: USER_ADDRESS.to_string(),
            metadata: Default::default(),
        }).await.unwrap();

        let (a, b) = tokio::join!(
            h.service.confirm_payment(row.id, proof("1000", None)),
            h.service.confirm_payment(row.id, proof("1000", None))
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap(), tnd("4000"));
        let debits: Vec<_> = h.ledger
            .wallet_history(USER).await
            .into_iter()
            .filter(|t| t.kind == crate::enums::WalletEntryKind::InvestmentDebit.as_str())
            .collect();
        assert_eq!(debits.len(), 1);

        let row = h.ledger.investment(row.id).await.unwrap();
        assert_eq!(row.status, InvestmentStatus::Confirmed.as_str());
        assert_eq!(row.transaction_id, Some(debits[0].id));
    }

    // ─── Reads ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ownership_is_not_disclosed() {
        let h = harness();
        let row = h.service.create(USER, create_request(PaymentMethod::Card)).await.unwrap();

        assert!(h.service.get_owned(row.id, USER).await.is_ok());
        assert!(matches!(
            h.service.get_owned(row.id, "someone-else").await,
            Err(AppError::InvestmentNotFound)
        ));
    }

    // ─── Invariants under randomized transitions ─────────────────────

    fn rank(status: &str) -> u8 {
        match status {
            "pending" => 0,
            "confirmed" => 1,
            "failed" | "cancelled" => 2,
            other => panic!("unknown status {}", other),
        }
    }

    fn transition_allowed(from: &str, to: &str) -> bool {
        from == to ||
            match (from, to) {
                ("pending", _) => true,
                ("confirmed", "failed") => true,
                _ => false,
            }
    }

    #[tokio::test]
    async fn test_invariants_hold_under_random_transition_sequences() {
        for seed in [3u64, 17, 4242, 987654321] {
            let h = harness();
            let mut rng = XorShift::new(seed);
            seed_wallet(&h.ledger, USER, "1000000").await;

            let mut ids = Vec::new();
            for i in 0..6 {
                let method = if i % 2 == 0 { PaymentMethod::Card } else { PaymentMethod::Wallet };
                let row = h.service.create(USER, create_request(method)).await.unwrap();
                ids.push(row.id);
            }

            let mut last: std::collections::HashMap<Uuid, (String, i32)> = Default::default();
            for id in &ids {
                let row = h.ledger.investment(*id).await.unwrap();
                last.insert(*id, (row.status.clone(), row.version));
            }

            for _ in 0..200 {
                let id = ids[rng.below(ids.len() as u64) as usize];
                let before = h.ledger.investment(id).await.unwrap();
                let reference = before.gateway_ref.clone();

                // Outcomes are allowed to be errors; the stored state must
                // stay coherent regardless.
                let _ = match rng.below(6) {
                    0 => h.service.confirm_payment(id, proof("1000", reference.as_deref())).await.map(|_| ()),
                    1 => h.service.fail_payment(id, "rail failure").await.map(|_| ()),
                    2 => h.service.cancel(id, Some(USER)).await.map(|_| ()),
                    3 => {
                        let hash = h.chain.last_submitted_hash();
                        match hash {
                            Some(hash) => {
                                h.service
                                    .record_chain_confirmation(id, &hash, 5).await
                                    .map(|_| ())
                            }
                            None => Ok(()),
                        }
                    }
                    4 => h.service.record_chain_reverted(id, "reverted").await.map(|_| ()),
                    _ => h.service.refund_wallet_investment(id).await.map(|_| ()),
                };

                for id in &ids {
                    let row = h.ledger.investment(*id).await.unwrap();

                    // tx_hash is only ever present on a confirmed row.
                    if row.tx_hash.is_some() {
                        assert_eq!(row.status, InvestmentStatus::Confirmed.as_str());
                    }

                    let (prev_status, prev_version) = last[id].clone();
                    assert!(
                        transition_allowed(&prev_status, &row.status),
                        "illegal transition {} -> {}",
                        prev_status,
                        row.status
                    );
                    assert!(rank(&row.status) >= rank(&prev_status) || prev_status == row.status);
                    assert!(row.version >= prev_version);
                    last.insert(*id, (row.status.clone(), row.version));
                }
            }

            // Economics: every debited-and-failed wallet investment can still
            // be made whole, and balance was never double-debited.
            let history = h.ledger.wallet_history(USER).await;
            let debits: Decimal = history
                .iter()
                .filter(|t| t.kind == crate::enums::WalletEntryKind::InvestmentDebit.as_str())
                .map(|t| t.amount)
                .sum();
            let credits: Decimal = history
                .iter()
                .filter(|t| t.kind != crate::enums::WalletEntryKind::InvestmentDebit.as_str())
                .map(|t| t.amount)
                .sum();
            let balance = h.ledger.wallet_balance(USER, Currency::Tnd).await.unwrap();
            assert_eq!(balance, credits - debits);
        }
    }
}
