use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{lot, stage_record, stock};
use crate::errors::ServiceError;
use crate::models::{decompose, PackBreakdown, SizeDistribution, StageKind, StageStatus};
use crate::services::stages::sort_pipeline;

/// One journey entry: a stage record enriched with its pack/loose view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageView {
    pub id: Uuid,
    pub kind: StageKind,
    pub status: StageStatus,
    pub distribution: SizeDistribution,
    pub total_pieces: i32,
    pub unit_name: Option<String>,
    pub rate: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub paid_amount: Decimal,
    pub received: Option<SizeDistribution>,
    pub mistake: Option<SizeDistribution>,
    pub master_packs: Option<i32>,
    pub breakdown: PackBreakdown,
    pub recorded_at: DateTime<Utc>,
}

/// Read-only assembled view of a lot's full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotJourney {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub style: String,
    pub color: String,
    pub current_stage: StageKind,
    pub stages: Vec<StageView>,
    pub total_produced: i32,
    pub total_dispatched: i32,
}

/// Assembles the ordered stage ledger for display. Read-only; tolerates
/// partial histories.
#[derive(Clone)]
pub struct JourneyService {
    db_pool: Arc<DbPool>,
}

impl JourneyService {
    /// Creates a new journey service instance
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Assembles the journey for a lot ID
    #[instrument(skip(self))]
    pub async fn journey(&self, lot_id: &Uuid) -> Result<LotJourney, ServiceError> {
        let db = &*self.db_pool;
        let lot_row = lot::Entity::find_by_id(*lot_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Lot {} not found", lot_id)))?;
        self.assemble(lot_row).await
    }

    /// Assembles the journey for a human-facing lot number
    #[instrument(skip(self))]
    pub async fn journey_by_number(&self, lot_number: &str) -> Result<LotJourney, ServiceError> {
        let db = &*self.db_pool;
        let lot_row = lot::Entity::find()
            .filter(lot::Column::LotNumber.eq(lot_number))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Lot {} not found", lot_number)))?;
        self.assemble(lot_row).await
    }

    async fn assemble(&self, lot_row: lot::Model) -> Result<LotJourney, ServiceError> {
        let db = &*self.db_pool;
        let ratio = lot_row.pack_ratio()?;

        let mut records = stage_record::Entity::find()
            .filter(stage_record::Column::LotId.eq(lot_row.id))
            .all(db)
            .await?;
        sort_pipeline(&mut records);

        let stock_row = stock::Entity::find()
            .filter(stock::Column::LotId.eq(lot_row.id))
            .one(db)
            .await?;

        let mut stages = Vec::with_capacity(records.len());
        let mut current_stage = None;
        let mut furthest = StageKind::Cutting;
        let mut cutting_total = 0;
        let mut total_dispatched = 0;

        for record in &records {
            let kind = record.kind()?;
            let status = record.status()?;
            let distribution = record.distribution()?;
            let received = record.received()?;
            let mistake = record.mistake()?;

            if kind == StageKind::Cutting {
                cutting_total = record.total_pieces;
            }
            if kind == StageKind::Dispatch {
                total_dispatched += record.total_pieces;
            }
            if current_stage.is_none() && !status.is_terminal() {
                current_stage = Some(kind);
            }
            furthest = kind;

            // Receipts display what actually came back; everything else
            // shows what was sent or produced.
            let display = received.clone().unwrap_or_else(|| distribution.clone());
            stages.push(StageView {
                id: record.id,
                kind,
                status,
                distribution,
                total_pieces: record.total_pieces,
                unit_name: record.unit_name.clone(),
                rate: record.rate,
                amount: record.amount,
                paid_amount: record.paid_amount,
                received,
                mistake,
                master_packs: record.master_packs,
                breakdown: decompose(&display, &ratio),
                recorded_at: record.recorded_at,
            });
        }

        let current_stage = current_stage.unwrap_or(if stock_row.is_some() {
            StageKind::Stock
        } else {
            furthest
        });

        let total_produced = stock_row
            .as_ref()
            .map(|s| s.total_quantity)
            .unwrap_or(cutting_total);

        Ok(LotJourney {
            lot_id: lot_row.id,
            lot_number: lot_row.lot_number,
            style: lot_row.style,
            color: lot_row.color,
            current_stage,
            stages,
            total_produced,
            total_dispatched,
        })
    }
}
