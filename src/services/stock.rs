use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{lot, stage_record, stock};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{decompose, PackBreakdown, SizeDistribution, StageKind, StageStatus};

/// Attempts before a version-guarded stock update gives up.
const MAX_VERSION_RETRIES: u32 = 3;

/// Input for a historical manual stock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStock {
    pub lot_number: Option<String>,
    pub distribution: SizeDistribution,
    pub pack_ratio: crate::models::PackRatio,
}

/// Input for shipping whole master packs plus loose pieces to a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub master_packs: u32,
    pub loose: SizeDistribution,
    pub customer: Option<String>,
}

/// Input for taking previously dispatched pieces back into stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub quantity: u32,
    pub size_breakdown: Option<SizeDistribution>,
}

/// A stock record with its derived pack/loose view, recomputed on every
/// read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockView {
    pub stock: stock::Model,
    pub available_by_size: SizeDistribution,
    pub breakdown: PackBreakdown,
}

/// Service projecting stock availability as dispatches and returns are
/// applied.
///
/// Same-stock mutations serialize through an optimistic version check so
/// two concurrent dispatches can never both pass the availability check
/// and overdraw.
#[derive(Clone)]
pub struct StockService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl StockService {
    /// Creates a new stock service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a stock record by hand, for stock that predates lot
    /// tracking.
    #[instrument(skip(self, input))]
    pub async fn create_manual(&self, input: CreateStock) -> Result<stock::Model, ServiceError> {
        if input.distribution.is_empty() {
            return Err(ServiceError::ValidationError(
                "stock distribution must contain at least one piece".into(),
            ));
        }

        let db = &*self.db_pool;
        let lot_id = match input.lot_number.as_deref() {
            Some(number) => {
                let lot_row = lot::Entity::find()
                    .filter(lot::Column::LotNumber.eq(number))
                    .one(db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Lot {} not found", number))
                    })?;
                Some(lot_row.id)
            }
            None => None,
        };

        let now = Utc::now();
        let total = input.distribution.total() as i32;
        let created = stock::ActiveModel {
            id: Set(Uuid::new_v4()),
            lot_id: Set(lot_id),
            distribution: Set(serde_json::to_value(&input.distribution)?),
            total_quantity: Set(total),
            available_quantity: Set(total),
            pack_ratio: Set(serde_json::to_value(&input.pack_ratio)?),
            version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(stock_id = %created.id, total, "manual stock entry created");
        self.event_sender
            .send(Event::StockCreated {
                stock_id: created.id,
                total_quantity: total,
            })
            .await
            .map_err(ServiceError::EventError)?;
        Ok(created)
    }

    /// Gets a stock record with its derived pack/loose decomposition
    #[instrument(skip(self))]
    pub async fn get_stock(&self, stock_id: &Uuid) -> Result<StockView, ServiceError> {
        let db = &*self.db_pool;
        let stock_row = stock::Entity::find_by_id(*stock_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;
        self.view_of(db, stock_row).await
    }

    /// Lists stock records with pagination, each with its decomposition
    #[instrument(skip(self))]
    pub async fn list_stocks(
        &self,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<StockView>, u64), ServiceError> {
        let db = &*self.db_pool;
        let paginator = stock::Entity::find()
            .order_by_desc(stock::Column::CreatedAt)
            .paginate(db, limit);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            views.push(self.view_of(db, row).await?);
        }
        Ok((views, total))
    }

    /// Ships `master_packs` whole packs plus loose pieces against a stock
    /// record. All-or-nothing: any validation failure leaves the stock
    /// untouched.
    #[instrument(skip(self, request), fields(packs = request.master_packs))]
    pub async fn dispatch(
        &self,
        stock_id: &Uuid,
        request: DispatchRequest,
    ) -> Result<stage_record::Model, ServiceError> {
        for attempt in 0..MAX_VERSION_RETRIES {
            let txn = self.db_pool.begin().await?;

            let stock_row = stock::Entity::find_by_id(*stock_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;
            let ratio = stock_row.pack_ratio()?;

            // Caller-supplied pack counts can be arbitrary; quantities must
            // never wrap.
            let requested = request
                .master_packs
                .checked_mul(ratio.pieces_per_pack())
                .and_then(|pack_pieces| pack_pieces.checked_add(request.loose.total()))
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "dispatch quantity is out of range".into(),
                    )
                })?;
            if requested == 0 {
                return Err(ServiceError::ValidationError(
                    "dispatch must request at least one piece".into(),
                ));
            }
            if request.master_packs > 0 && ratio.is_empty() {
                return Err(ServiceError::ValidationError(
                    "stock has no pack ratio; only loose pieces can be dispatched".into(),
                ));
            }
            if i64::from(requested) > i64::from(stock_row.available_quantity) {
                return Err(ServiceError::InsufficientStock(format!(
                    "requested {} pieces but only {} are available",
                    requested, stock_row.available_quantity
                )));
            }

            let available_by_size = available_by_size(&txn, &stock_row).await?;
            for (label, loose) in request.loose.iter() {
                let needed = u64::from(request.master_packs) * u64::from(ratio.get(label))
                    + u64::from(loose);
                if needed > u64::from(available_by_size.get(label)) {
                    return Err(ServiceError::InsufficientStock(format!(
                        "size {} has {} pieces available but {} were requested",
                        label,
                        available_by_size.get(label),
                        needed
                    )));
                }
            }
            for (label, per_pack) in ratio.constrained() {
                let needed = u64::from(request.master_packs) * u64::from(per_pack)
                    + u64::from(request.loose.get(label));
                if needed > u64::from(available_by_size.get(label)) {
                    return Err(ServiceError::InsufficientStock(format!(
                        "size {} has {} pieces available but {} were requested",
                        label,
                        available_by_size.get(label),
                        needed
                    )));
                }
            }

            let guarded = stock::Entity::update_many()
                .filter(stock::Column::Id.eq(stock_row.id))
                .filter(stock::Column::Version.eq(stock_row.version))
                .col_expr(
                    stock::Column::AvailableQuantity,
                    Expr::value(stock_row.available_quantity - requested as i32),
                )
                .col_expr(stock::Column::Version, Expr::value(stock_row.version + 1))
                .col_expr(stock::Column::UpdatedAt, Expr::value(Utc::now()))
                .exec(&txn)
                .await?;
            if guarded.rows_affected == 0 {
                txn.rollback().await?;
                warn!(%stock_id, attempt, "stock version conflict on dispatch; retrying");
                continue;
            }

            let now = Utc::now();
            let record = stage_record::ActiveModel {
                id: Set(Uuid::new_v4()),
                lot_id: Set(stock_row.lot_id),
                kind: Set(StageKind::Dispatch.as_str().to_string()),
                status: Set(StageStatus::Completed.as_str().to_string()),
                distribution: Set(serde_json::to_value(&request.loose)?),
                total_pieces: Set(requested as i32),
                unit_name: Set(request.customer.clone()),
                rate: Set(None),
                amount: Set(None),
                paid_amount: Set(Decimal::ZERO),
                received: Set(None),
                mistake: Set(None),
                master_packs: Set(Some(request.master_packs as i32)),
                stock_id: Set(Some(stock_row.id)),
                recorded_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;

            info!(%stock_id, requested, "stock dispatched");
            self.event_sender
                .send(Event::StockDispatched {
                    stock_id: stock_row.id,
                    quantity: requested as i32,
                })
                .await
                .map_err(ServiceError::EventError)?;
            return Ok(record);
        }

        Err(ServiceError::ConcurrentModification(*stock_id))
    }

    /// Takes previously dispatched pieces back into stock. A return must
    /// reference quantity that actually went out.
    #[instrument(skip(self, request), fields(quantity = request.quantity))]
    pub async fn apply_return(
        &self,
        stock_id: &Uuid,
        request: ReturnRequest,
    ) -> Result<stage_record::Model, ServiceError> {
        if request.quantity == 0 {
            return Err(ServiceError::ValidationError(
                "return quantity must be positive".into(),
            ));
        }
        if let Some(breakdown) = &request.size_breakdown {
            if breakdown.total() != request.quantity {
                return Err(ServiceError::ValidationError(format!(
                    "size breakdown totals {} but the return quantity is {}",
                    breakdown.total(),
                    request.quantity
                )));
            }
        }

        for attempt in 0..MAX_VERSION_RETRIES {
            let txn = self.db_pool.begin().await?;

            let stock_row = stock::Entity::find_by_id(*stock_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;

            let outstanding = outstanding_dispatched(&txn, &stock_row).await?;
            if request.quantity as i64 > outstanding {
                return Err(ServiceError::ValidationError(format!(
                    "return of {} pieces exceeds the {} currently out on dispatch",
                    request.quantity, outstanding
                )));
            }

            let guarded = stock::Entity::update_many()
                .filter(stock::Column::Id.eq(stock_row.id))
                .filter(stock::Column::Version.eq(stock_row.version))
                .col_expr(
                    stock::Column::AvailableQuantity,
                    Expr::value(stock_row.available_quantity + request.quantity as i32),
                )
                .col_expr(stock::Column::Version, Expr::value(stock_row.version + 1))
                .col_expr(stock::Column::UpdatedAt, Expr::value(Utc::now()))
                .exec(&txn)
                .await?;
            if guarded.rows_affected == 0 {
                txn.rollback().await?;
                warn!(%stock_id, attempt, "stock version conflict on return; retrying");
                continue;
            }

            let now = Utc::now();
            let distribution = request
                .size_breakdown
                .clone()
                .unwrap_or_else(SizeDistribution::new);
            let record = stage_record::ActiveModel {
                id: Set(Uuid::new_v4()),
                lot_id: Set(stock_row.lot_id),
                kind: Set(StageKind::Return.as_str().to_string()),
                status: Set(StageStatus::Completed.as_str().to_string()),
                distribution: Set(serde_json::to_value(&distribution)?),
                total_pieces: Set(request.quantity as i32),
                unit_name: Set(None),
                rate: Set(None),
                amount: Set(None),
                paid_amount: Set(Decimal::ZERO),
                received: Set(None),
                mistake: Set(None),
                master_packs: Set(None),
                stock_id: Set(Some(stock_row.id)),
                recorded_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;

            info!(%stock_id, quantity = request.quantity, "return applied");
            self.event_sender
                .send(Event::StockReturned {
                    stock_id: stock_row.id,
                    quantity: request.quantity as i32,
                })
                .await
                .map_err(ServiceError::EventError)?;
            return Ok(record);
        }

        Err(ServiceError::ConcurrentModification(*stock_id))
    }

    /// Deletes a stock record that nothing has been dispatched against.
    #[instrument(skip(self))]
    pub async fn delete_stock(&self, stock_id: &Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let stock_row = stock::Entity::find_by_id(*stock_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;

        let movements = stage_record::Entity::find()
            .filter(stage_record::Column::StockId.eq(*stock_id))
            .count(&txn)
            .await?;
        if movements > 0 {
            return Err(ServiceError::Conflict(
                "stock is referenced by dispatches and cannot be deleted".into(),
            ));
        }

        stock_row.delete(&txn).await?;
        txn.commit().await?;
        info!(%stock_id, "stock deleted");
        Ok(())
    }

    async fn view_of<C: ConnectionTrait>(
        &self,
        db: &C,
        stock_row: stock::Model,
    ) -> Result<StockView, ServiceError> {
        let ratio = stock_row.pack_ratio()?;
        let available_by_size = available_by_size(db, &stock_row).await?;
        let breakdown = decompose(&available_by_size, &ratio);
        Ok(StockView {
            stock: stock_row,
            available_by_size,
            breakdown,
        })
    }
}

/// Per-size availability: the produced distribution minus what prior
/// dispatches consumed, plus returns that carried a size breakdown.
/// Returns without a breakdown restore only the aggregate count, so the
/// per-size view stays conservative.
async fn available_by_size<C: ConnectionTrait>(
    db: &C,
    stock_row: &stock::Model,
) -> Result<SizeDistribution, ServiceError> {
    let ratio = stock_row.pack_ratio()?;
    let mut available = stock_row.distribution()?;

    let movements = stage_record::Entity::find()
        .filter(stage_record::Column::StockId.eq(stock_row.id))
        .all(db)
        .await?;

    for movement in &movements {
        let kind = movement.kind()?;
        let loose = movement.distribution()?;
        match kind {
            StageKind::Dispatch => {
                let packs = movement.master_packs.unwrap_or(0) as u32;
                for label in available.labels_with(&loose) {
                    let consumed = packs * ratio.get(label) + loose.get(label);
                    available.set(label, available.get(label).saturating_sub(consumed));
                }
            }
            StageKind::Return => {
                for (label, count) in loose.iter() {
                    available.set(label, available.get(label) + count);
                }
            }
            _ => {}
        }
    }

    Ok(available)
}

/// Total pieces out on dispatch and not yet returned.
async fn outstanding_dispatched<C: ConnectionTrait>(
    db: &C,
    stock_row: &stock::Model,
) -> Result<i64, ServiceError> {
    let movements = stage_record::Entity::find()
        .filter(stage_record::Column::StockId.eq(stock_row.id))
        .all(db)
        .await?;

    let mut outstanding: i64 = 0;
    for movement in &movements {
        match movement.kind()? {
            StageKind::Dispatch => outstanding += movement.total_pieces as i64,
            StageKind::Return => outstanding -= movement.total_pieces as i64,
            _ => {}
        }
    }
    Ok(outstanding)
}
