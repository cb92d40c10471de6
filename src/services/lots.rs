use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{lot, stage_record};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{PackRatio, SizeDistribution, StageKind, StageStatus};

/// Input for opening a new lot with its cutting record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLot {
    pub lot_number: String,
    pub style: String,
    pub color: String,
    pub pack_ratio: PackRatio,
    pub cutting: SizeDistribution,
    pub rate: Option<Decimal>,
}

/// Service for managing lots and their cutting records
#[derive(Clone)]
pub struct LotService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl LotService {
    /// Creates a new lot service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a lot together with its Cutting stage record in one
    /// transaction. The cutting quantities are the reference every later
    /// stage is reconciled against.
    #[instrument(skip(self, input), fields(lot_number = %input.lot_number))]
    pub async fn create_lot(
        &self,
        input: CreateLot,
    ) -> Result<(lot::Model, stage_record::Model), ServiceError> {
        let lot_number = input.lot_number.trim().to_string();
        if lot_number.is_empty() {
            return Err(ServiceError::ValidationError(
                "lot number cannot be empty".into(),
            ));
        }
        if input.cutting.is_empty() {
            return Err(ServiceError::ValidationError(
                "cutting distribution must contain at least one piece".into(),
            ));
        }
        if let Some(rate) = input.rate {
            if rate < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "rate cannot be negative".into(),
                ));
            }
        }

        let txn = self.db_pool.begin().await?;

        let existing = lot::Entity::find()
            .filter(lot::Column::LotNumber.eq(lot_number.clone()))
            .one(&txn)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "lot number {} already exists",
                lot_number
            )));
        }

        let now = Utc::now();
        let total = input.cutting.total() as i32;
        let amount = input.rate.map(|rate| rate * Decimal::from(total));

        let new_lot = lot::ActiveModel {
            id: Set(Uuid::new_v4()),
            lot_number: Set(lot_number.clone()),
            style: Set(input.style),
            color: Set(input.color),
            pack_ratio: Set(serde_json::to_value(&input.pack_ratio)?),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let cutting = stage_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            lot_id: Set(Some(new_lot.id)),
            kind: Set(StageKind::Cutting.as_str().to_string()),
            status: Set(StageStatus::Completed.as_str().to_string()),
            distribution: Set(serde_json::to_value(&input.cutting)?),
            total_pieces: Set(total),
            unit_name: Set(None),
            rate: Set(input.rate),
            amount: Set(amount),
            paid_amount: Set(Decimal::ZERO),
            received: Set(None),
            mistake: Set(None),
            master_packs: Set(None),
            stock_id: Set(None),
            recorded_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(lot_id = %new_lot.id, total, "lot created with cutting record");
        self.event_sender
            .send(Event::LotCreated {
                lot_id: new_lot.id,
                lot_number,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok((new_lot, cutting))
    }

    /// Gets a lot by ID
    #[instrument(skip(self))]
    pub async fn get_lot(&self, lot_id: &Uuid) -> Result<Option<lot::Model>, ServiceError> {
        let db = &*self.db_pool;
        let found = lot::Entity::find_by_id(*lot_id).one(db).await?;
        Ok(found)
    }

    /// Gets a lot by its human-facing lot number
    #[instrument(skip(self))]
    pub async fn get_lot_by_number(
        &self,
        lot_number: &str,
    ) -> Result<Option<lot::Model>, ServiceError> {
        let db = &*self.db_pool;
        let found = lot::Entity::find()
            .filter(lot::Column::LotNumber.eq(lot_number))
            .one(db)
            .await?;
        Ok(found)
    }

    /// Lists lots with pagination, newest first
    #[instrument(skip(self))]
    pub async fn list_lots(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<lot::Model>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = lot::Entity::find()
            .order_by_desc(lot::Column::CreatedAt)
            .paginate(db, limit);

        let total = paginator.num_items().await?;
        let lots = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((lots, total))
    }

    /// Deletes a lot that has not moved past cutting. Any further stage
    /// record blocks deletion.
    #[instrument(skip(self))]
    pub async fn delete_lot(&self, lot_id: &Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let found = lot::Entity::find_by_id(*lot_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Lot {} not found", lot_id)))?;

        let beyond_cutting = stage_record::Entity::find()
            .filter(stage_record::Column::LotId.eq(*lot_id))
            .filter(stage_record::Column::Kind.ne(StageKind::Cutting.as_str()))
            .count(&txn)
            .await?;
        if beyond_cutting > 0 {
            return Err(ServiceError::Conflict(format!(
                "lot {} has stages beyond cutting and cannot be deleted",
                found.lot_number
            )));
        }

        stage_record::Entity::delete_many()
            .filter(stage_record::Column::LotId.eq(*lot_id))
            .exec(&txn)
            .await?;
        found.delete(&txn).await?;

        txn.commit().await?;
        info!(%lot_id, "lot deleted");
        Ok(())
    }
}
