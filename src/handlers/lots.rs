use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::entities::lot;
use crate::errors::ServiceError;
use crate::models::{PackRatio, SizeDistribution};
use crate::services::journey::LotJourney;
use crate::services::lots::CreateLot;
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLotRequest {
    #[validate(length(min = 1, message = "Lot number cannot be empty"))]
    pub lot_number: String,
    #[validate(length(min = 1, message = "Style cannot be empty"))]
    pub style: String,
    #[validate(length(min = 1, message = "Color cannot be empty"))]
    pub color: String,
    pub pack_ratio: PackRatio,
    pub cutting: SizeDistribution,
    pub rate: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct LotSummary {
    pub id: Uuid,
    pub lot_number: String,
    pub style: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
}

impl From<lot::Model> for LotSummary {
    fn from(model: lot::Model) -> Self {
        Self {
            id: model.id,
            lot_number: model.lot_number,
            style: model.style,
            color: model.color,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedLot {
    pub lot: LotSummary,
    pub cutting_stage_id: Uuid,
    pub total_pieces: i32,
}

pub async fn create_lot(
    State(state): State<AppState>,
    Json(payload): Json<CreateLotRequest>,
) -> ApiResult<CreatedLot> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let (created, cutting) = state
        .services
        .lots
        .create_lot(CreateLot {
            lot_number: payload.lot_number,
            style: payload.style,
            color: payload.color,
            pack_ratio: payload.pack_ratio,
            cutting: payload.cutting,
            rate: payload.rate,
        })
        .await?;

    Ok(Json(ApiResponse::success(CreatedLot {
        lot: created.into(),
        cutting_stage_id: cutting.id,
        total_pieces: cutting.total_pieces,
    })))
}

pub async fn list_lots(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<PaginatedResponse<LotSummary>> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, 100);

    let (lots, total) = state.services.lots.list_lots(page, limit).await?;
    let items: Vec<LotSummary> = lots.into_iter().map(LotSummary::from).collect();
    let total_pages = (total + limit - 1) / limit;

    Ok(Json(ApiResponse::success(PaginatedResponse {
        items,
        total,
        page,
        limit,
        total_pages,
    })))
}

pub async fn get_lot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<LotSummary> {
    match state.services.lots.get_lot(&id).await? {
        Some(model) => Ok(Json(ApiResponse::success(model.into()))),
        None => Err(ServiceError::NotFound(format!("Lot {} not found", id))),
    }
}

pub async fn get_lot_by_number(
    State(state): State<AppState>,
    Path(lot_number): Path<String>,
) -> ApiResult<LotSummary> {
    match state.services.lots.get_lot_by_number(&lot_number).await? {
        Some(model) => Ok(Json(ApiResponse::success(model.into()))),
        None => Err(ServiceError::NotFound(format!(
            "Lot {} not found",
            lot_number
        ))),
    }
}

pub async fn delete_lot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.lots.delete_lot(&id).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn get_journey(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<LotJourney> {
    let journey = state.services.journey.journey(&id).await?;
    Ok(Json(ApiResponse::success(journey)))
}

pub async fn get_journey_by_number(
    State(state): State<AppState>,
    Path(lot_number): Path<String>,
) -> ApiResult<LotJourney> {
    let journey = state
        .services
        .journey
        .journey_by_number(&lot_number)
        .await?;
    Ok(Json(ApiResponse::success(journey)))
}
