use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

/// Fixed, versioned auxiliary attributes persisted alongside an investment.
/// Deliberately not an open bag of fields: new attributes require a new
/// schema_version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestmentMetadata {
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Default for InvestmentMetadata {
    fn default() -> Self {
        Self {
            schema_version: 1,
            channel: None,
            referral_code: None,
            note: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "investment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    pub project_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    pub user_address: String,
    pub transaction_id: Option<Uuid>,
    pub gateway_ref: Option<String>,
    pub payment_url: Option<String>,
    pub tx_hash: Option<String>,
    pub investment_date: DateTimeUtc,
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Json,
    pub failure_reason: Option<String>,
    pub needs_review: bool,
    pub review_reason: Option<String>,
    pub payment_attempts: i32,
    pub version: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Typed view of the jsonb metadata column. Rows written by this service
    /// always deserialize; a row that does not is reported, not guessed at.
    pub fn typed_metadata(&self) -> crate::error::Result<InvestmentMetadata> {
        serde_json::from_value(self.metadata.clone()).map_err(|e| {
            crate::error::AppError::Internal(
                format!("Malformed metadata on investment {}: {}", self.id, e)
            )
        })
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::wallet_transaction::Entity",
        from = "Column::TransactionId",
        to = "super::wallet_transaction::Column::Id"
    )]
    WalletTransaction,
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTransaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip() {
        let metadata = InvestmentMetadata {
            schema_version: 1,
            channel: Some("mobile".to_string()),
            referral_code: None,
            note: None,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        // Absent optional fields are omitted, not serialized as null.
        assert!(value.get("referral_code").is_none());

        let parsed: InvestmentMetadata = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(InvestmentMetadata::default().schema_version, 1);
    }
}
