use axum::extract::{ Path, State };
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::error::Result;

use super::{ require_operator, AppState, InvestmentView };

/// Investments flagged for manual operator attention, oldest first.
pub async fn review_queue(
    State(state): State<AppState>,
    headers: HeaderMap
) -> Result<Json<Vec<InvestmentView>>> {
    require_operator(&headers, &state.config)?;

    let rows = state.investment_service.review_queue().await?;
    let views = rows
        .iter()
        .map(InvestmentView::from_model)
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

/// Operator-triggered wallet refund for a failed investment whose debit was
/// captured. At most once per investment.
pub async fn refund_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>
) -> Result<Json<InvestmentView>> {
    require_operator(&headers, &state.config)?;

    let row = state.investment_service.refund_wallet_investment(id).await?;
    Ok(Json(InvestmentView::from_model(&row)?))
}
