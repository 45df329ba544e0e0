pub use sea_orm_migration::prelude::*;

mod m20250110_000001_create_investments_table;
mod m20250111_000001_create_wallet_tables;
mod m20250112_000001_create_chain_settlements_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250110_000001_create_investments_table::Migration),
            Box::new(m20250111_000001_create_wallet_tables::Migration),
            Box::new(m20250112_000001_create_chain_settlements_table::Migration)
        ]
    }
}
