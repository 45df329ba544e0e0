use axum::extract::{ Path, Query, State };
use axum::http::{ HeaderMap, StatusCode };
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::services::CreateInvestment;

use super::{ require_user, AppState, InvestmentView };

const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub async fn create_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateInvestment>
) -> Result<(StatusCode, Json<InvestmentView>)> {
    let user_id = require_user(&headers)?;

    let row = state.investment_service.create(&user_id, request).await?;
    Ok((StatusCode::CREATED, Json(InvestmentView::from_model(&row)?)))
}

pub async fn get_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>
) -> Result<Json<InvestmentView>> {
    let user_id = require_user(&headers)?;

    let row = state.investment_service.get_owned(id, &user_id).await?;
    Ok(Json(InvestmentView::from_model(&row)?))
}

pub async fn list_investments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<Pagination>
) -> Result<Json<Vec<InvestmentView>>> {
    let user_id = require_user(&headers)?;

    let limit = page.limit.unwrap_or(20).min(MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0);

    let rows = state.investment_service.list_for_user(&user_id, limit, offset).await?;
    let views = rows
        .iter()
        .map(InvestmentView::from_model)
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

pub async fn cancel_investment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>
) -> Result<Json<InvestmentView>> {
    let user_id = require_user(&headers)?;

    let row = state.investment_service.cancel(id, Some(&user_id)).await?;
    Ok(Json(InvestmentView::from_model(&row)?))
}
