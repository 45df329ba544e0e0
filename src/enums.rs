use std::fmt;
use std::str::FromStr;

use serde::{ Deserialize, Serialize };

use crate::error::AppError;

// ─── Currency ────────────────────────────────────────────────────────

/// Currencies the platform accepts for investments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Tnd,
    Eur,
    Usd,
}

impl Currency {
    /// Canonical 3-letter code stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Tnd => "TND",
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
        }
    }

    /// Minor-unit exponent used when converting amounts for on-chain submission.
    /// The Tunisian dinar subdivides into millimes.
    pub fn minor_unit_exponent(&self) -> u32 {
        match self {
            Currency::Tnd => 3,
            Currency::Eur => 2,
            Currency::Usd => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TND" => Ok(Currency::Tnd),
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            other => {
                Err(AppError::validation(format!("Unsupported currency: {}", other), "currency"))
            }
        }
    }
}

// ─── PaymentMethod ───────────────────────────────────────────────────

/// Rail through which the investor's capital moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Card,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }

    /// Whether payment runs through the external gateway rather than the
    /// internal wallet ledger.
    pub fn uses_gateway(&self) -> bool {
        !matches!(self, PaymentMethod::Wallet)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet" => Ok(PaymentMethod::Wallet),
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => {
                Err(
                    AppError::validation(
                        format!("Unknown payment method: {}", other),
                        "payment_method"
                    )
                )
            }
        }
    }
}

// ─── InvestmentStatus ────────────────────────────────────────────────

/// Off-chain lifecycle of an investment. On-chain settlement is tracked
/// separately via the presence of `tx_hash` on a confirmed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentStatus {
    Pending,
    Confirmed,
    Failed,
    Cancelled,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Pending => "pending",
            InvestmentStatus::Confirmed => "confirmed",
            InvestmentStatus::Failed => "failed",
            InvestmentStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvestmentStatus::Failed | InvestmentStatus::Cancelled)
    }
}

impl fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvestmentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvestmentStatus::Pending),
            "confirmed" => Ok(InvestmentStatus::Confirmed),
            "failed" => Ok(InvestmentStatus::Failed),
            "cancelled" => Ok(InvestmentStatus::Cancelled),
            other => {
                Err(AppError::Internal(format!("Unknown investment status in row: {}", other)))
            }
        }
    }
}

// ─── SettlementStatus ────────────────────────────────────────────────

/// Progress of the on-chain funding transaction for one investment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Submitted,
    Mined,
    Reverted,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Submitted => "submitted",
            SettlementStatus::Mined => "mined",
            SettlementStatus::Reverted => "reverted",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SettlementStatus::Pending),
            "submitted" => Ok(SettlementStatus::Submitted),
            "mined" => Ok(SettlementStatus::Mined),
            "reverted" => Ok(SettlementStatus::Reverted),
            other => {
                Err(AppError::Internal(format!("Unknown settlement status in row: {}", other)))
            }
        }
    }
}

// ─── Wallet ledger ───────────────────────────────────────────────────

/// Direction of a wallet ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletDirection {
    Debit,
    Credit,
}

impl WalletDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletDirection::Debit => "debit",
            WalletDirection::Credit => "credit",
        }
    }
}

impl fmt::Display for WalletDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(WalletDirection::Debit),
            "credit" => Ok(WalletDirection::Credit),
            other => {
                Err(AppError::Internal(format!("Unknown wallet direction in row: {}", other)))
            }
        }
    }
}

/// Business meaning of a wallet ledger entry, so the append-only history
/// is self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletEntryKind {
    InvestmentDebit,
    RefundCredit,
    AdjustmentCredit,
}

impl WalletEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletEntryKind::InvestmentDebit => "investment_debit",
            WalletEntryKind::RefundCredit => "refund_credit",
            WalletEntryKind::AdjustmentCredit => "adjustment_credit",
        }
    }

    pub fn direction(&self) -> WalletDirection {
        match self {
            WalletEntryKind::InvestmentDebit => WalletDirection::Debit,
            WalletEntryKind::RefundCredit => WalletDirection::Credit,
            WalletEntryKind::AdjustmentCredit => WalletDirection::Credit,
        }
    }
}

impl fmt::Display for WalletEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletEntryKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "investment_debit" => Ok(WalletEntryKind::InvestmentDebit),
            "refund_credit" => Ok(WalletEntryKind::RefundCredit),
            "adjustment_credit" => Ok(WalletEntryKind::AdjustmentCredit),
            other => {
                Err(AppError::Internal(format!("Unknown wallet entry kind in row: {}", other)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "confirmed", "failed", "cancelled"] {
            let parsed: InvestmentStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(InvestmentStatus::Failed.is_terminal());
        assert!(InvestmentStatus::Cancelled.is_terminal());
        assert!(!InvestmentStatus::Pending.is_terminal());
        assert!(!InvestmentStatus::Confirmed.is_terminal());
    }

    #[test]
    fn test_currency_minor_units() {
        assert_eq!(Currency::Tnd.minor_unit_exponent(), 3);
        assert_eq!(Currency::Eur.minor_unit_exponent(), 2);
        assert_eq!("tnd".parse::<Currency>().unwrap(), Currency::Tnd);
        assert!("XYZ".parse::<Currency>().is_err());
    }

    #[test]
    fn test_payment_method_parse() {
        assert_eq!(
            "bank_transfer".parse::<PaymentMethod>().unwrap(),
            PaymentMethod::BankTransfer
        );
        assert!(PaymentMethod::Card.uses_gateway());
        assert!(!PaymentMethod::Wallet.uses_gateway());
    }
}
