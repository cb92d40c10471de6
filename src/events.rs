use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::StageKind;

/// Domain events emitted after each committed engine operation.
///
/// External collaborators (notification delivery, report generation) hang
/// off this channel; the engine itself only logs them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    LotCreated {
        lot_id: Uuid,
        lot_number: String,
    },
    StageRecorded {
        lot_id: Uuid,
        stage_id: Uuid,
        kind: StageKind,
    },
    ReceiptReconciled {
        lot_id: Uuid,
        stage_id: Uuid,
        shortage_total: u32,
        mistake_total: u32,
        debit_amount: Decimal,
    },
    StageDeleted {
        lot_id: Uuid,
        stage_id: Uuid,
        kind: StageKind,
    },
    StockCreated {
        stock_id: Uuid,
        total_quantity: i32,
    },
    StockDispatched {
        stock_id: Uuid,
        quantity: i32,
    },
    StockReturned {
        stock_id: Uuid,
        quantity: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Consumes and logs domain events until the channel closes.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::ReceiptReconciled {
                lot_id,
                shortage_total,
                mistake_total,
                debit_amount,
                ..
            } => {
                if *shortage_total > 0 || *mistake_total > 0 {
                    warn!(
                        %lot_id,
                        shortage_total,
                        mistake_total,
                        %debit_amount,
                        "receipt reconciled with shortfall"
                    );
                } else {
                    info!(%lot_id, "receipt reconciled clean");
                }
            }
            other => info!(event = ?other, "domain event"),
        }
    }
    info!("Event channel closed; processor exiting");
}
