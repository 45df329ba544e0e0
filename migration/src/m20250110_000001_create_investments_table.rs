use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(Investment::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Investment::Id)
                        .uuid()
                        .not_null()
                        .primary_key()
                        .extra("DEFAULT gen_random_uuid()".to_string())
                )
                .col(ColumnDef::new(Investment::UserId).string().not_null())
                .col(ColumnDef::new(Investment::ProjectId).big_integer().not_null())
                .col(ColumnDef::new(Investment::Amount).decimal_len(20, 6).not_null())
                .col(ColumnDef::new(Investment::Currency).string_len(3).not_null())
                .col(ColumnDef::new(Investment::PaymentMethod).string_len(20).not_null())
                .col(ColumnDef::new(Investment::Status).string_len(20).not_null())
                .col(ColumnDef::new(Investment::UserAddress).string().not_null())
                .col(ColumnDef::new(Investment::TransactionId).uuid().null())
                .col(ColumnDef::new(Investment::GatewayRef).string().null())
                .col(ColumnDef::new(Investment::PaymentUrl).string().null())
                .col(ColumnDef::new(Investment::TxHash).string().null())
                .col(
                    ColumnDef::new(Investment::InvestmentDate)
                        .timestamp_with_time_zone()
                        .not_null()
                )
                .col(ColumnDef::new(Investment::Metadata).json_binary().not_null())
                .col(ColumnDef::new(Investment::FailureReason).string().null())
                .col(
                    ColumnDef::new(Investment::NeedsReview)
                        .boolean()
                        .not_null()
                        .default(false)
                )
                .col(ColumnDef::new(Investment::ReviewReason).string().null())
                .col(
                    ColumnDef::new(Investment::PaymentAttempts)
                        .integer()
                        .not_null()
                        .default(0)
                )
                .col(ColumnDef::new(Investment::Version).integer().not_null().default(0))
                .col(
                    ColumnDef::new(Investment::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .extra("DEFAULT NOW()".to_string())
                )
                .col(
                    ColumnDef::new(Investment::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .extra("DEFAULT NOW()".to_string())
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_investment_user_id")
                .table(Investment::Table)
                .col(Investment::UserId)
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_investment_project_id")
                .table(Investment::Table)
                .col(Investment::ProjectId)
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_investment_status")
                .table(Investment::Table)
                .col(Investment::Status)
                .to_owned()
        ).await?;

        // Gateway references identify webhook callbacks, so duplicates are never allowed.
        manager.create_index(
            Index::create()
                .name("idx_investment_gateway_ref")
                .table(Investment::Table)
                .col(Investment::GatewayRef)
                .unique()
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(Investment::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum Investment {
    Table,
    Id,
    UserId,
    ProjectId,
    Amount,
    Currency,
    PaymentMethod,
    Status,
    UserAddress,
    TransactionId,
    GatewayRef,
    PaymentUrl,
    TxHash,
    InvestmentDate,
    Metadata,
    FailureReason,
    NeedsReview,
    ReviewReason,
    PaymentAttempts,
    Version,
    CreatedAt,
    UpdatedAt,
}
