use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{PackRatio, SizeDistribution};

/// Sellable stock produced for a lot (or entered manually for historical
/// records). Availability shrinks with dispatches and grows with returns;
/// the pack/loose view is re-derived on every read.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stocks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub lot_id: Option<Uuid>,
    /// Total pieces ever produced for this record, per size.
    pub distribution: Json,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub pack_ratio: Json,
    /// Optimistic-lock counter; every quantity change must pass a
    /// `WHERE version = n` guard.
    pub version: i32,
    pub created_at: DateTime<Utc>,
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
    pub fn distribution(&self) -> Result<SizeDistribution, ServiceError> {
        serde_json::from_value(self.distribution.clone()).map_err(|e| {
            ServiceError::InternalError(format!("stored stock distribution is corrupt: {}", e))
        })
    }

    pub fn pack_ratio(&self) -> Result<PackRatio, ServiceError> {
        serde_json::from_value(self.pack_ratio.clone()).map_err(|e| {
            ServiceError::InternalError(format!("stored pack ratio is corrupt: {}", e))
        })
    }
}
