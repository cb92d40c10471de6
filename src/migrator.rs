use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Schema};
use tracing::info;

use crate::entities;

/// Creates the engine's tables from the entity definitions if they do not
/// exist yet. Used by the binary on boot (behind the `auto_migrate` config
/// flag) and by integration tests against `sqlite::memory:`.
pub async fn create_tables(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut lots = schema.create_table_from_entity(entities::Lot);
    db.execute(backend.build(lots.if_not_exists())).await?;

    let mut stages = schema.create_table_from_entity(entities::StageRecord);
    db.execute(backend.build(stages.if_not_exists())).await?;

    let mut stocks = schema.create_table_from_entity(entities::Stock);
    db.execute(backend.build(stocks.if_not_exists())).await?;

    info!("Database schema is up to date");
    Ok(())
}
