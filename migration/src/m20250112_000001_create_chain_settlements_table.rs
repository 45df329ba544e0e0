use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(ChainSettlement::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(ChainSettlement::InvestmentId)
                        .uuid()
                        .not_null()
                        .primary_key()
                )
                .col(ColumnDef::new(ChainSettlement::FundingKey).string().not_null())
                .col(ColumnDef::new(ChainSettlement::ContractAddress).string().not_null())
                .col(ColumnDef::new(ChainSettlement::SubmittedTxHash).string().null())
                .col(ColumnDef::new(ChainSettlement::Status).string_len(20).not_null())
                .col(ColumnDef::new(ChainSettlement::BlockNumber).big_integer().null())
                .col(
                    ColumnDef::new(ChainSettlement::Attempts)
                        .integer()
                        .not_null()
                        .default(0)
                )
                .col(
                    ColumnDef::new(ChainSettlement::LastSubmittedAt)
                        .timestamp_with_time_zone()
                        .null()
                )
                .col(
                    ColumnDef::new(ChainSettlement::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .extra("DEFAULT NOW()".to_string())
                )
                .col(
                    ColumnDef::new(ChainSettlement::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .extra("DEFAULT NOW()".to_string())
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_chain_settlement_funding_key")
                .table(ChainSettlement::Table)
                .col(ChainSettlement::FundingKey)
                .unique()
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_chain_settlement_status")
                .table(ChainSettlement::Table)
                .col(ChainSettlement::Status)
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(ChainSettlement::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum ChainSettlement {
    Table,
    InvestmentId,
    FundingKey,
    ContractAddress,
    SubmittedTxHash,
    Status,
    BlockNumber,
    Attempts,
    LastSubmittedAt,
    CreatedAt,
    UpdatedAt,
}
