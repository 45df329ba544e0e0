use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

/// Append-only wallet ledger entry. Rows are inserted inside the same
/// database transaction as the balance update and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_transaction")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub direction: String,
    pub kind: String,
    pub reference: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
