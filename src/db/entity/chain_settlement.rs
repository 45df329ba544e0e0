use sea_orm::entity::prelude::*;
use serde::{ Deserialize, Serialize };

/// Association between an investment and its on-chain funding transaction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chain_settlement")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub investment_id: Uuid,
    pub funding_key: String,
    pub contract_address: String,
    pub submitted_tx_hash: Option<String>,
    pub status: String,
    pub block_number: Option<i64>,
    pub attempts: i32,
    pub last_submitted_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::investment::Entity",
        from = "Column::InvestmentId",
        to = "super::investment::Column::Id"
    )]
    Investment,
}

impl Related<super::investment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Investment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
