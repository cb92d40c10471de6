use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{lot, stage_record, stock};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{reconcile, ReconciliationResult, SizeDistribution, StageKind, StageStatus};

/// Input for handing a lot's pieces to an external unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSent {
    pub lot_id: Uuid,
    pub kind: StageKind,
    pub unit_name: String,
    pub distribution: SizeDistribution,
    pub rate: Decimal,
}

/// Input for recording what came back from an external unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordReceipt {
    pub lot_id: Uuid,
    pub kind: StageKind,
    pub received: SizeDistribution,
    pub mistake: SizeDistribution,
}

/// One-time correction of a receipt. Only the received/mistake
/// distributions and the date may change; the sent side is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditReceipt {
    pub received: SizeDistribution,
    pub mistake: SizeDistribution,
    pub recorded_at: Option<DateTime<Utc>>,
}

/// Outcome of posting or editing a receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptOutcome {
    pub stage: stage_record::Model,
    pub reconciliation: ReconciliationResult,
    /// Stock created when an ironing receipt reaches fully received.
    pub stock_id: Option<Uuid>,
}

/// Service maintaining the append-only stage ledger per lot.
///
/// Every mutation validates its ordering preconditions and runs as one
/// transaction; quantities are referenced across stages, never consumed.
#[derive(Clone)]
pub struct StageService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl StageService {
    /// Creates a new stage service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Gets a stage record by ID
    #[instrument(skip(self))]
    pub async fn get_stage(
        &self,
        stage_id: &Uuid,
    ) -> Result<Option<stage_record::Model>, ServiceError> {
        let db = &*self.db_pool;
        let found = stage_record::Entity::find_by_id(*stage_id).one(db).await?;
        Ok(found)
    }

    /// Lists a lot's stage records in pipeline order
    #[instrument(skip(self))]
    pub async fn list_stages(
        &self,
        lot_id: &Uuid,
    ) -> Result<Vec<stage_record::Model>, ServiceError> {
        let db = &*self.db_pool;
        let mut stages = stage_record::Entity::find()
            .filter(stage_record::Column::LotId.eq(*lot_id))
            .order_by_asc(stage_record::Column::RecordedAt)
            .all(db)
            .await?;
        sort_pipeline(&mut stages);
        Ok(stages)
    }

    /// Records an Outsourcing or Ironing handoff as `Sent`.
    ///
    /// Ironing may only begin once the lot's outsourcing round, if one
    /// exists, has been fully received.
    #[instrument(skip(self, input), fields(lot_id = %input.lot_id, kind = %input.kind))]
    pub async fn record_sent(
        &self,
        input: RecordSent,
    ) -> Result<stage_record::Model, ServiceError> {
        if !input.kind.is_external() {
            return Err(ServiceError::ValidationError(format!(
                "stage kind {} cannot be sent to an external unit",
                input.kind
            )));
        }
        if input.distribution.is_empty() {
            return Err(ServiceError::ValidationError(
                "sent distribution must contain at least one piece".into(),
            ));
        }
        if input.unit_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "unit name cannot be empty".into(),
            ));
        }
        if input.rate < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "rate cannot be negative".into(),
            ));
        }

        let txn = self.db_pool.begin().await?;

        lot::Entity::find_by_id(input.lot_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Lot {} not found", input.lot_id)))?;

        let stages = lot_stages(&txn, input.lot_id).await?;

        if !stages
            .iter()
            .any(|s| s.kind == StageKind::Cutting.as_str())
        {
            return Err(ServiceError::PreconditionFailed(
                "lot has no cutting record".into(),
            ));
        }
        if stages.iter().any(|s| s.kind == input.kind.as_str()) {
            return Err(ServiceError::Conflict(format!(
                "a {} stage already exists for this lot",
                input.kind
            )));
        }
        if input.kind == StageKind::Ironing {
            if let Some(outsourcing) = stages
                .iter()
                .find(|s| s.kind == StageKind::Outsourcing.as_str())
            {
                if outsourcing.status()? != StageStatus::Received {
                    return Err(ServiceError::PreconditionFailed(format!(
                        "outsourcing must be fully received before ironing is sent (currently {})",
                        outsourcing.status
                    )));
                }
            }
        }

        let now = Utc::now();
        let total = input.distribution.total() as i32;
        let stage = stage_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            lot_id: Set(Some(input.lot_id)),
            kind: Set(input.kind.as_str().to_string()),
            status: Set(StageStatus::Sent.as_str().to_string()),
            distribution: Set(serde_json::to_value(&input.distribution)?),
            total_pieces: Set(total),
            unit_name: Set(Some(input.unit_name.trim().to_string())),
            rate: Set(Some(input.rate)),
            amount: Set(Some(input.rate * Decimal::from(total))),
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

        info!(stage_id = %stage.id, total, "stage sent to {}", stage.unit_name.as_deref().unwrap_or("-"));
        self.send_stage_event(&stage, input.kind).await?;
        Ok(stage)
    }

    /// Posts a receipt against the matching sent stage: reconciles
    /// quantities, appends the receipt record and moves the sent stage to
    /// the derived status. A fully received ironing receipt also creates
    /// the lot's stock entity, all in one transaction.
    #[instrument(skip(self, input), fields(lot_id = %input.lot_id, kind = %input.kind))]
    pub async fn record_receipt(&self, input: RecordReceipt) -> Result<ReceiptOutcome, ServiceError> {
        let origin_kind = input.kind.receipt_for().ok_or_else(|| {
            ServiceError::ValidationError(format!("stage kind {} is not a receipt", input.kind))
        })?;

        let txn = self.db_pool.begin().await?;

        let stages = lot_stages(&txn, input.lot_id).await?;
        let origin = stages
            .iter()
            .find(|s| s.kind == origin_kind.as_str())
            .ok_or_else(|| {
                ServiceError::PreconditionFailed(format!(
                    "no {} stage to receive against",
                    origin_kind
                ))
            })?;
        if stages.iter().any(|s| s.kind == input.kind.as_str()) {
            return Err(ServiceError::Conflict(format!(
                "a {} already exists; edit it instead of posting another",
                input.kind
            )));
        }

        let sent = origin.distribution()?;
        let rate = origin.rate.unwrap_or(Decimal::ZERO);
        let result = reconcile(&sent, &input.received, &input.mistake, rate)?;

        let now = Utc::now();
        let receipt = stage_record::ActiveModel {
            id: Set(Uuid::new_v4()),
            lot_id: Set(Some(input.lot_id)),
            kind: Set(input.kind.as_str().to_string()),
            status: Set(result.status.as_str().to_string()),
            distribution: Set(origin.distribution.clone()),
            total_pieces: Set(result.received_total as i32),
            unit_name: Set(origin.unit_name.clone()),
            rate: Set(origin.rate),
            amount: Set(Some(result.debit_amount)),
            paid_amount: Set(Decimal::ZERO),
            received: Set(Some(serde_json::to_value(&input.received)?)),
            mistake: Set(Some(serde_json::to_value(&input.mistake)?)),
            master_packs: Set(None),
            stock_id: Set(None),
            recorded_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut origin_active: stage_record::ActiveModel = origin.clone().into();
        origin_active.status = Set(result.status.as_str().to_string());
        origin_active.updated_at = Set(now);
        origin_active.update(&txn).await?;

        let stock_id = if input.kind == StageKind::IroningReceipt
            && result.status == StageStatus::Received
        {
            Some(create_stock_for_receipt(&txn, input.lot_id, &input.received).await?)
        } else {
            None
        };

        txn.commit().await?;

        info!(
            stage_id = %receipt.id,
            shortage = result.shortage_total,
            mistakes = result.mistake_total,
            "receipt reconciled"
        );
        self.send_stage_event(&receipt, input.kind).await?;
        self.event_sender
            .send(Event::ReceiptReconciled {
                lot_id: input.lot_id,
                stage_id: receipt.id,
                shortage_total: result.shortage_total,
                mistake_total: result.mistake_total,
                debit_amount: result.debit_amount,
            })
            .await
            .map_err(ServiceError::EventError)?;
        if let Some(id) = stock_id {
            self.event_sender
                .send(Event::StockCreated {
                    stock_id: id,
                    total_quantity: result.received_total as i32,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(ReceiptOutcome {
            stage: receipt,
            reconciliation: result,
            stock_id,
        })
    }

    /// One-time edit of a receipt's received/mistake distributions.
    ///
    /// Re-runs reconciliation, moves the originating stage with it and
    /// reconciles stock quantities if the receipt had already produced
    /// stock.
    #[instrument(skip(self, edit))]
    pub async fn edit_receipt(
        &self,
        stage_id: &Uuid,
        edit: EditReceipt,
    ) -> Result<ReceiptOutcome, ServiceError> {
        let txn = self.db_pool.begin().await?;

        let receipt = stage_record::Entity::find_by_id(*stage_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stage {} not found", stage_id)))?;
        let kind = receipt.kind()?;
        let origin_kind = kind.receipt_for().ok_or_else(|| {
            ServiceError::ValidationError(format!("stage {} is not a receipt", stage_id))
        })?;
        if receipt.updated_at > receipt.recorded_at {
            return Err(ServiceError::Conflict(
                "receipt has already been edited once".into(),
            ));
        }
        let lot_id = receipt.lot_id.ok_or_else(|| {
            ServiceError::InternalError("receipt record has no lot".into())
        })?;

        let stages = lot_stages(&txn, lot_id).await?;
        let origin = stages
            .iter()
            .find(|s| s.kind == origin_kind.as_str())
            .ok_or_else(|| {
                ServiceError::PreconditionFailed(format!(
                    "originating {} stage is missing",
                    origin_kind
                ))
            })?;

        let sent = origin.distribution()?;
        let rate = origin.rate.unwrap_or(Decimal::ZERO);
        let result = reconcile(&sent, &edit.received, &edit.mistake, rate)?;

        // Ironing was only allowed because this receipt was fully received;
        // the correction cannot retroactively take that away.
        if kind == StageKind::OutsourcingReceipt
            && result.status != StageStatus::Received
            && stages.iter().any(|s| s.kind == StageKind::Ironing.as_str())
        {
            return Err(ServiceError::PreconditionFailed(
                "receipt cannot drop below fully received once ironing has started".into(),
            ));
        }

        let old_received_total = receipt.total_pieces;
        let now = Utc::now();

        let mut receipt_active: stage_record::ActiveModel = receipt.clone().into();
        receipt_active.status = Set(result.status.as_str().to_string());
        receipt_active.total_pieces = Set(result.received_total as i32);
        receipt_active.amount = Set(Some(result.debit_amount));
        receipt_active.received = Set(Some(serde_json::to_value(&edit.received)?));
        receipt_active.mistake = Set(Some(serde_json::to_value(&edit.mistake)?));
        if let Some(recorded_at) = edit.recorded_at {
            receipt_active.recorded_at = Set(recorded_at);
        }
        receipt_active.updated_at = Set(now);
        let updated = receipt_active.update(&txn).await?;

        let mut origin_active: stage_record::ActiveModel = origin.clone().into();
        origin_active.status = Set(result.status.as_str().to_string());
        origin_active.updated_at = Set(now);
        origin_active.update(&txn).await?;

        let mut stock_id = None;
        if kind == StageKind::IroningReceipt {
            let existing = stock::Entity::find()
                .filter(stock::Column::LotId.eq(lot_id))
                .one(&txn)
                .await?;
            match existing {
                Some(stock_row) => {
                    let delta = result.received_total as i32 - old_received_total;
                    let new_available = stock_row.available_quantity + delta;
                    if new_available < 0 {
                        return Err(ServiceError::Conflict(format!(
                            "receipt edit would reduce stock below its dispatched quantity \
                             (available {}, adjustment {})",
                            stock_row.available_quantity, delta
                        )));
                    }
                    let mut active: stock::ActiveModel = stock_row.clone().into();
                    active.distribution = Set(serde_json::to_value(&edit.received)?);
                    active.total_quantity = Set(stock_row.total_quantity + delta);
                    active.available_quantity = Set(new_available);
                    active.version = Set(stock_row.version + 1);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                    stock_id = Some(stock_row.id);
                }
                None => {
                    if result.status == StageStatus::Received {
                        stock_id = Some(
                            create_stock_for_receipt(&txn, lot_id, &edit.received).await?,
                        );
                    }
                }
            }
        }

        txn.commit().await?;

        info!(stage_id = %updated.id, "receipt edited and re-reconciled");
        self.event_sender
            .send(Event::ReceiptReconciled {
                lot_id,
                stage_id: updated.id,
                shortage_total: result.shortage_total,
                mistake_total: result.mistake_total,
                debit_amount: result.debit_amount,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(ReceiptOutcome {
            stage: updated,
            reconciliation: result,
            stock_id,
        })
    }

    /// Accumulates a payment against an external stage's billed amount.
    #[instrument(skip(self))]
    pub async fn record_payment(
        &self,
        stage_id: &Uuid,
        amount: Decimal,
    ) -> Result<stage_record::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".into(),
            ));
        }

        let txn = self.db_pool.begin().await?;
        let stage = stage_record::Entity::find_by_id(*stage_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stage {} not found", stage_id)))?;

        let billed = stage.amount.ok_or_else(|| {
            ServiceError::ValidationError("stage carries no billable amount".into())
        })?;
        let new_paid = stage.paid_amount + amount;
        if new_paid > billed {
            return Err(ServiceError::ValidationError(format!(
                "payment of {} would exceed billed amount {} (already paid {})",
                amount, billed, stage.paid_amount
            )));
        }

        let mut active: stage_record::ActiveModel = stage.into();
        active.paid_amount = Set(new_paid);
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(%stage_id, %new_paid, "payment recorded");
        Ok(updated)
    }

    /// Deletes a stage record after cascade checks, restoring any quantity
    /// effects the record applied downstream.
    #[instrument(skip(self))]
    pub async fn delete_stage(&self, stage_id: &Uuid) -> Result<(), ServiceError> {
        let txn = self.db_pool.begin().await?;

        let stage = stage_record::Entity::find_by_id(*stage_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Stage {} not found", stage_id)))?;
        let kind = stage.kind()?;

        match kind {
            StageKind::Cutting => {
                let lot_id = stage.lot_id.ok_or_else(|| {
                    ServiceError::InternalError("cutting record has no lot".into())
                })?;
                let others = lot_stages(&txn, lot_id).await?;
                if others.iter().any(|s| s.id != stage.id) {
                    return Err(ServiceError::Conflict(
                        "cutting cannot be deleted while later stages exist".into(),
                    ));
                }
            }
            StageKind::Outsourcing | StageKind::Ironing => {
                let receipt_kind = kind.receipt_kind().expect("external stage has a receipt");
                let lot_id = stage.lot_id.ok_or_else(|| {
                    ServiceError::InternalError("stage record has no lot".into())
                })?;
                let stages = lot_stages(&txn, lot_id).await?;
                if stages.iter().any(|s| s.kind == receipt_kind.as_str()) {
                    return Err(ServiceError::Conflict(format!(
                        "{} cannot be deleted once its receipt exists",
                        kind
                    )));
                }
            }
            StageKind::OutsourcingReceipt => {
                let lot_id = stage.lot_id.ok_or_else(|| {
                    ServiceError::InternalError("receipt record has no lot".into())
                })?;
                let stages = lot_stages(&txn, lot_id).await?;
                if stages.iter().any(|s| s.kind == StageKind::Ironing.as_str()) {
                    return Err(ServiceError::Conflict(
                        "outsourcing receipt cannot be deleted once ironing has started".into(),
                    ));
                }
                reset_origin(&txn, &stages, StageKind::Outsourcing).await?;
            }
            StageKind::IroningReceipt => {
                let lot_id = stage.lot_id.ok_or_else(|| {
                    ServiceError::InternalError("receipt record has no lot".into())
                })?;
                let stages = lot_stages(&txn, lot_id).await?;
                if let Some(stock_row) = stock::Entity::find()
                    .filter(stock::Column::LotId.eq(lot_id))
                    .one(&txn)
                    .await?
                {
                    if stock_row.available_quantity != stock_row.total_quantity {
                        return Err(ServiceError::Conflict(
                            "ironing receipt cannot be deleted after its stock was dispatched"
                                .into(),
                        ));
                    }
                    stock_row.delete(&txn).await?;
                }
                reset_origin(&txn, &stages, StageKind::Ironing).await?;
            }
            StageKind::Dispatch => {
                restore_stock(&txn, &stage, stage.total_pieces).await?;
            }
            StageKind::Return => {
                restore_stock(&txn, &stage, -stage.total_pieces).await?;
            }
            StageKind::Stock => {
                return Err(ServiceError::ValidationError(
                    "stock is deleted through the stock endpoint".into(),
                ));
            }
        }

        let lot_id = stage.lot_id;
        stage.delete(&txn).await?;
        txn.commit().await?;

        info!(%stage_id, kind = %kind, "stage deleted");
        if let Some(lot_id) = lot_id {
            self.event_sender
                .send(Event::StageDeleted {
                    lot_id,
                    stage_id: *stage_id,
                    kind,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(())
    }

    async fn send_stage_event(
        &self,
        stage: &stage_record::Model,
        kind: StageKind,
    ) -> Result<(), ServiceError> {
        if let Some(lot_id) = stage.lot_id {
            self.event_sender
                .send(Event::StageRecorded {
                    lot_id,
                    stage_id: stage.id,
                    kind,
                })
                .await
                .map_err(ServiceError::EventError)?;
        }
        Ok(())
    }
}

/// Orders stage records by pipeline position, then by time within a stage.
pub fn sort_pipeline(stages: &mut [stage_record::Model]) {
    stages.sort_by(|a, b| {
        let ka = a.kind().map(StageKind::pipeline_order).unwrap_or(u8::MAX);
        let kb = b.kind().map(StageKind::pipeline_order).unwrap_or(u8::MAX);
        ka.cmp(&kb).then(a.recorded_at.cmp(&b.recorded_at))
    });
}

async fn lot_stages(
    txn: &DatabaseTransaction,
    lot_id: Uuid,
) -> Result<Vec<stage_record::Model>, ServiceError> {
    let stages = stage_record::Entity::find()
        .filter(stage_record::Column::LotId.eq(lot_id))
        .all(txn)
        .await?;
    Ok(stages)
}

async fn reset_origin(
    txn: &DatabaseTransaction,
    stages: &[stage_record::Model],
    origin_kind: StageKind,
) -> Result<(), ServiceError> {
    if let Some(origin) = stages.iter().find(|s| s.kind == origin_kind.as_str()) {
        let mut active: stage_record::ActiveModel = origin.clone().into();
        active.status = Set(StageStatus::Sent.as_str().to_string());
        active.updated_at = Set(Utc::now());
        active.update(txn).await?;
    }
    Ok(())
}

/// Undoes a dispatch (positive delta) or return (negative delta) against
/// the stock the record references.
async fn restore_stock(
    txn: &DatabaseTransaction,
    stage: &stage_record::Model,
    delta: i32,
) -> Result<(), ServiceError> {
    let stock_id = stage
        .stock_id
        .ok_or_else(|| ServiceError::InternalError("movement record has no stock".into()))?;
    let stock_row = stock::Entity::find_by_id(stock_id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock_id)))?;

    let new_available = stock_row.available_quantity + delta;
    if new_available < 0 || new_available > stock_row.total_quantity {
        return Err(ServiceError::Conflict(format!(
            "deleting this record would leave stock availability at {} of {}",
            new_available, stock_row.total_quantity
        )));
    }

    let mut active: stock::ActiveModel = stock_row.clone().into();
    active.available_quantity = Set(new_available);
    active.version = Set(stock_row.version + 1);
    active.updated_at = Set(Utc::now());
    active.update(txn).await?;
    Ok(())
}

async fn create_stock_for_receipt(
    txn: &DatabaseTransaction,
    lot_id: Uuid,
    received: &SizeDistribution,
) -> Result<Uuid, ServiceError> {
    let lot_row = lot::Entity::find_by_id(lot_id)
        .one(txn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Lot {} not found", lot_id)))?;

    let existing = stock::Entity::find()
        .filter(stock::Column::LotId.eq(lot_id))
        .one(txn)
        .await?;
    if let Some(stock_row) = existing {
        return Err(ServiceError::Conflict(format!(
            "stock {} already exists for lot {}",
            stock_row.id, lot_row.lot_number
        )));
    }

    let now = Utc::now();
    let total = received.total() as i32;
    let created = stock::ActiveModel {
        id: Set(Uuid::new_v4()),
        lot_id: Set(Some(lot_id)),
        distribution: Set(serde_json::to_value(received)?),
        total_quantity: Set(total),
        available_quantity: Set(total),
        pack_ratio: Set(lot_row.pack_ratio.clone()),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await?;

    Ok(created.id)
}
