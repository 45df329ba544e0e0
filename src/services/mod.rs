pub mod investment_service;
pub use investment_service::{ CreateInvestment, InvestmentService };

pub mod reconciler;
pub use reconciler::Reconciler;
