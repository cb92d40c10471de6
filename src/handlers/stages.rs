use axum::{
    extract::{Path, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::entities::stage_record;
use crate::errors::ServiceError;
use crate::models::{ReconciliationResult, SizeDistribution, StageKind};
use crate::services::stages::{EditReceipt, RecordReceipt, RecordSent};
use crate::{ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, Validate)]
pub struct RecordSentRequest {
    pub kind: StageKind,
    #[validate(length(min = 1, message = "Unit name cannot be empty"))]
    pub unit_name: String,
    pub distribution: SizeDistribution,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct RecordReceiptRequest {
    pub kind: StageKind,
    pub received: SizeDistribution,
    #[serde(default)]
    pub mistake: SizeDistribution,
}

#[derive(Debug, Deserialize)]
pub struct EditReceiptRequest {
    pub received: SizeDistribution,
    #[serde(default)]
    pub mistake: SizeDistribution,
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentRequest {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct StageSummary {
    pub id: Uuid,
    pub lot_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    pub total_pieces: i32,
    pub unit_name: Option<String>,
    pub rate: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub paid_amount: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl From<stage_record::Model> for StageSummary {
    fn from(model: stage_record::Model) -> Self {
        Self {
            id: model.id,
            lot_id: model.lot_id,
            kind: model.kind,
            status: model.status,
            total_pieces: model.total_pieces,
            unit_name: model.unit_name,
            rate: model.rate,
            amount: model.amount,
            paid_amount: model.paid_amount,
            recorded_at: model.recorded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub stage: StageSummary,
    pub reconciliation: ReconciliationResult,
    pub stock_id: Option<Uuid>,
}

pub async fn record_sent(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
    Json(payload): Json<RecordSentRequest>,
) -> ApiResult<StageSummary> {
    payload
        .validate()
        .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

    let stage = state
        .services
        .stages
        .record_sent(RecordSent {
            lot_id,
            kind: payload.kind,
            unit_name: payload.unit_name,
            distribution: payload.distribution,
            rate: payload.rate,
        })
        .await?;
    Ok(Json(ApiResponse::success(stage.into())))
}

pub async fn record_receipt(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
    Json(payload): Json<RecordReceiptRequest>,
) -> ApiResult<ReceiptResponse> {
    let outcome = state
        .services
        .stages
        .record_receipt(RecordReceipt {
            lot_id,
            kind: payload.kind,
            received: payload.received,
            mistake: payload.mistake,
        })
        .await?;
    Ok(Json(ApiResponse::success(ReceiptResponse {
        stage: outcome.stage.into(),
        reconciliation: outcome.reconciliation,
        stock_id: outcome.stock_id,
    })))
}

pub async fn edit_receipt(
    State(state): State<AppState>,
    Path(stage_id): Path<Uuid>,
    Json(payload): Json<EditReceiptRequest>,
) -> ApiResult<ReceiptResponse> {
    let outcome = state
        .services
        .stages
        .edit_receipt(
            &stage_id,
            EditReceipt {
                received: payload.received,
                mistake: payload.mistake,
                recorded_at: payload.recorded_at,
            },
        )
        .await?;
    Ok(Json(ApiResponse::success(ReceiptResponse {
        stage: outcome.stage.into(),
        reconciliation: outcome.reconciliation,
        stock_id: outcome.stock_id,
    })))
}

pub async fn record_payment(
    State(state): State<AppState>,
    Path(stage_id): Path<Uuid>,
    Json(payload): Json<PaymentRequest>,
) -> ApiResult<StageSummary> {
    let stage = state
        .services
        .stages
        .record_payment(&stage_id, payload.amount)
        .await?;
    Ok(Json(ApiResponse::success(stage.into())))
}

pub async fn list_stages(
    State(state): State<AppState>,
    Path(lot_id): Path<Uuid>,
) -> ApiResult<Vec<StageSummary>> {
    let stages = state.services.stages.list_stages(&lot_id).await?;
    Ok(Json(ApiResponse::success(
        stages.into_iter().map(StageSummary::from).collect(),
    )))
}

pub async fn delete_stage(
    State(state): State<AppState>,
    Path(stage_id): Path<Uuid>,
) -> ApiResult<()> {
    state.services.stages.delete_stage(&stage_id).await?;
    Ok(Json(ApiResponse::success(())))
}
