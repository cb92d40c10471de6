use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{PackRatio, SizeDistribution};
use crate::services::stock::{CreateStock, DispatchRequest, ReturnRequest, StockView};
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

use super::stages::StageSummary;

#[derive(Debug, Deserialize)]
pub struct CreateStockRequest {
    pub lot_number: Option<String>,
    pub distribution: SizeDistribution,
    #[serde(default)]
    pub pack_ratio: PackRatio,
}

#[derive(Debug, Deserialize)]
pub struct DispatchStockRequest {
    #[serde(default)]
    pub master_packs: u32,
    #[serde(default)]
    pub loose: SizeDistribution,
    pub customer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReturnStockRequest {
    pub quantity: u32,
    pub size_breakdown: Option<SizeDistribution>,
}

pub async fn create_stock(
    State(state): State<AppState>,
    Json(payload): Json<CreateStockRequest>,
) -> ApiResult<StockView> {
    let created = state
        .services
        .stock
        .create_manual(CreateStock {
            lot_number: payload.lot_number,
            distribution: payload.distribution,
            pack_ratio: payload.pack_ratio,
        })
        .await?;
    let view = state.services.stock.get_stock(&created.id).await?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn list_stocks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<StockView>> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);

    let (items, total) = state.services.stock.list_stocks(page, limit).await?;
    let total_pages = (total + limit - 1) / limit;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

pub async fn get_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StockView> {
    let view = state.services.stock.get_stock(&id).await?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn dispatch_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DispatchStockRequest>,
) -> ApiResult<StageSummary> {
    let record = state
        .services
        .stock
        .dispatch(
            &id,
            DispatchRequest {
                master_packs: payload.master_packs,
                loose: payload.loose,
                customer: payload.customer,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(record.into())))
}

pub async fn return_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReturnStockRequest>,
) -> ApiResult<StageSummary> {
    let record = state
        .services
        .stock
        .apply_return(
            &id,
            ReturnRequest {
                quantity: payload.quantity,
                size_breakdown: payload.size_breakdown,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(record.into())))
}

pub async fn delete_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.stock.delete_stock(&id).await?;
    Ok(Json(ApiResponse::success(())))
}
