pub mod journey;
pub mod lots;
pub mod stages;
pub mod stock;

use crate::db::DbPool;
use crate::events::EventSender;
use std::sync::Arc;

/// Services layer that encapsulates the engine's business logic, shared by
/// HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub lots: Arc<lots::LotService>,
    pub stages: Arc<stages::StageService>,
    pub stock: Arc<stock::StockService>,
    pub journey: Arc<journey::JourneyService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            lots: Arc::new(lots::LotService::new(db_pool.clone(), event_sender.clone())),
            stages: Arc::new(stages::StageService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            stock: Arc::new(stock::StockService::new(db_pool.clone(), event_sender)),
            journey: Arc::new(journey::JourneyService::new(db_pool)),
        }
    }
}
