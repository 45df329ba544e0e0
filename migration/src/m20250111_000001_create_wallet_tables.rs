use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.create_table(
            Table::create()
                .table(WalletAccount::Table)
                .if_not_exists()
                .col(ColumnDef::new(WalletAccount::UserId).string().not_null())
                .col(ColumnDef::new(WalletAccount::Currency).string_len(3).not_null())
                .col(ColumnDef::new(WalletAccount::Balance).decimal_len(20, 6).not_null())
                .col(
                    ColumnDef::new(WalletAccount::UpdatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .extra("DEFAULT NOW()".to_string())
                )
                .primary_key(
                    Index::create()
                        .col(WalletAccount::UserId)
                        .col(WalletAccount::Currency)
                )
                .to_owned()
        ).await?;

        manager.create_table(
            Table::create()
                .table(WalletTransaction::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(WalletTransaction::Id)
                        .uuid()
                        .not_null()
                        .primary_key()
                        .extra("DEFAULT gen_random_uuid()".to_string())
                )
                .col(ColumnDef::new(WalletTransaction::UserId).string().not_null())
                .col(ColumnDef::new(WalletTransaction::Currency).string_len(3).not_null())
                .col(
                    ColumnDef::new(WalletTransaction::Amount)
                        .decimal_len(20, 6)
                        .not_null()
                )
                .col(ColumnDef::new(WalletTransaction::Direction).string_len(10).not_null())
                .col(ColumnDef::new(WalletTransaction::Kind).string_len(30).not_null())
                .col(ColumnDef::new(WalletTransaction::Reference).string().null())
                .col(
                    ColumnDef::new(WalletTransaction::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .extra("DEFAULT NOW()".to_string())
                )
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_wallet_transaction_user_id")
                .table(WalletTransaction::Table)
                .col(WalletTransaction::UserId)
                .to_owned()
        ).await?;

        manager.create_index(
            Index::create()
                .name("idx_wallet_transaction_reference")
                .table(WalletTransaction::Table)
                .col(WalletTransaction::Reference)
                .to_owned()
        ).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(WalletTransaction::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(WalletAccount::Table).to_owned()).await
    }
}

#[derive(DeriveIden)]
enum WalletAccount {
    Table,
    UserId,
    Currency,
    Balance,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WalletTransaction {
    Table,
    Id,
    UserId,
    Currency,
    Amount,
    Direction,
    Kind,
    Reference,
    CreatedAt,
}
