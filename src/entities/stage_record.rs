use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::ServiceError;
use crate::models::{SizeDistribution, StageKind, StageStatus};

/// One step in a lot's life: cutting, a handoff to an external unit, the
/// matching receipt, or a stock movement.
///
/// Immutable once created except for `paid_amount` and, on receipts, a
/// one-time edit of the received/mistake distributions.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stage_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// None only for dispatch/return rows against manually entered stock.
    pub lot_id: Option<Uuid>,
    pub kind: String,
    pub status: String,
    /// Quantities this step operates on: cut pieces, pieces sent out, or
    /// loose pieces dispatched.
    pub distribution: Json,
    pub total_pieces: i32,
    /// External unit or customer name; handoff and dispatch stages only.
    pub unit_name: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub rate: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub amount: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub paid_amount: Decimal,
    /// Receipt stages: what actually came back.
    pub received: Option<Json>,
    /// Receipt stages: pieces returned but reported defective.
    pub mistake: Option<Json>,
    /// Dispatch stages: whole master packs shipped alongside the loose
    /// distribution.
    pub master_packs: Option<i32>,
    /// Dispatch and return stages reference the stock they draw on.
    pub stock_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::lot::Entity",
        from = "Column::LotId",
        to = "super::lot::Column::Id"
    )]
    Lot,
}

impl Related<super::lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn kind(&self) -> Result<StageKind, ServiceError> {
        StageKind::from_str(&self.kind).map_err(|_| {
            ServiceError::InternalError(format!("unknown stage kind '{}'", self.kind))
        })
    }

    pub fn status(&self) -> Result<StageStatus, ServiceError> {
        StageStatus::from_str(&self.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown stage status '{}'", self.status))
        })
    }

    pub fn distribution(&self) -> Result<SizeDistribution, ServiceError> {
        decode_distribution(&self.distribution)
    }

    pub fn received(&self) -> Result<Option<SizeDistribution>, ServiceError> {
        self.received.as_ref().map(decode_distribution).transpose()
    }

    pub fn mistake(&self) -> Result<Option<SizeDistribution>, ServiceError> {
        self.mistake.as_ref().map(decode_distribution).transpose()
    }
}

fn decode_distribution(value: &Json) -> Result<SizeDistribution, ServiceError> {
    serde_json::from_value(value.clone())
        .map_err(|e| ServiceError::InternalError(format!("stored distribution is corrupt: {}", e)))
}
