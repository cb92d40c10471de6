use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::PackRatio;

/// A tracked batch of garment pieces of one style and color.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub lot_number: String,
    pub style: String,
    pub color: String,
    /// Pieces-per-pack ratio fixed for the lot at cutting time; every stage
    /// and stock display decomposes against it.
    pub pack_ratio: Json,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stage_record::Entity")]
    StageRecords,
    #[sea_orm(has_many = "super::stock::Entity")]
    Stocks,
}

impl Related<super::stage_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StageRecords.def()
    }
}

impl Related<super::stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stocks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn pack_ratio(&self) -> Result<PackRatio, ServiceError> {
        serde_json::from_value(self.pack_ratio.clone()).map_err(|e| {
            ServiceError::InternalError(format!(
                "stored pack ratio for lot {} is corrupt: {}",
                self.lot_number, e
            ))
        })
    }
}
