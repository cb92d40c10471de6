pub mod lot;
pub mod stage_record;
pub mod stock;

pub use lot::Entity as Lot;
pub use stage_record::Entity as StageRecord;
pub use stock::Entity as Stock;
