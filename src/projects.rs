use async_trait::async_trait;
use sea_orm::prelude::Decimal;

use crate::enums::Currency;
use crate::error::Result;

/// What the platform knows about one fundable property project.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub id: i64,
    /// Whether the funding window is currently open.
    pub open: bool,
    /// The single currency the project accepts.
    pub currency: Currency,
    /// Per-investor cap in major units. None means uncapped.
    pub investor_cap: Option<Decimal>,
    /// Address of the on-chain fund contract investments settle into.
    pub fund_contract: String,
}

/// Directory of projects. Backed by the on-chain ProjectRegistry in
/// production; tests substitute a fixed in-memory directory.
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn project(&self, project_id: i64) -> Result<ProjectInfo>;
}
