use async_trait::async_trait;
use ethers::utils::keccak256;
use sea_orm::prelude::Decimal;
use uuid::Uuid;

use crate::enums::Currency;
use crate::error::{ AppError, Result };

mod evm;
pub use evm::{ EvmProjectDirectory, EvmSettlementClient };

/// Everything needed to fund one investment on chain. Parameters are fully
/// determined by the investment row, so a retry always submits identical
/// arguments.
#[derive(Debug, Clone)]
pub struct FundingRequest {
    pub funding_key: [u8; 32],
    pub contract_address: String,
    pub project_id: i64,
    pub investor_address: String,
    pub amount_minor: u128,
}

/// Opaque handle for a submitted funding transaction (the transaction hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementReceipt {
    Pending,
    Mined {
        tx_hash: String,
        block_number: i64,
    },
    Reverted {
        tx_hash: String,
    },
}

/// Typed client over the deployed fund contracts. A `Reverted` receipt is
/// terminal; submission with an already-funded key is refused.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    async fn submit_funding(&self, request: &FundingRequest) -> Result<SubmissionRef>;

    async fn receipt(&self, submission: &SubmissionRef) -> Result<SettlementReceipt>;
}

/// Deterministic funding key for an investment. The contract rejects a second
/// funding with the same key, which is what makes resubmission safe.
pub fn funding_key(investment_id: Uuid) -> [u8; 32] {
    keccak256(investment_id.as_bytes())
}

pub fn funding_key_hex(investment_id: Uuid) -> String {
    format!("0x{}", hex::encode(funding_key(investment_id)))
}

/// Convert a major-unit amount to the integer minor units the contracts
/// take (TND has 3 decimal places, EUR/USD have 2).
pub fn to_minor_units(amount: Decimal, currency: Currency) -> Result<u128> {
    if amount.is_sign_negative() {
        return Err(AppError::validation("Amount must not be negative", "amount"));
    }

    let scaled = amount * Decimal::from(10u64.pow(currency.minor_unit_exponent()));
    if scaled.fract() != Decimal::ZERO {
        return Err(
            AppError::validation(
                format!("Amount has more decimal places than {} supports", currency),
                "amount"
            )
        );
    }

    let units = scaled.mantissa() / 10i128.pow(scaled.scale());
    u128::try_from(units).map_err(|_| AppError::validation("Amount out of range", "amount"))
}

/// Inverse of `to_minor_units`, used when reading caps off the registry.
pub fn from_minor_units(units: u128, currency: Currency) -> Result<Decimal> {
    let units = i128::try_from(units).map_err(|_|
        AppError::Internal("On-chain amount out of range".to_string())
    )?;
    Decimal::try_from_i128_with_scale(units, currency.minor_unit_exponent()).map_err(|e|
        AppError::Internal(format!("On-chain amount not representable: {}", e))
    )
}
