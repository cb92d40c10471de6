use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// One step in a lot's processing pipeline, in fixed order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageKind {
    Cutting,
    Outsourcing,
    OutsourcingReceipt,
    Ironing,
    IroningReceipt,
    Stock,
    Dispatch,
    Return,
}

impl StageKind {
    /// Position in the fixed pipeline, used to order journey entries.
    pub fn pipeline_order(self) -> u8 {
        match self {
            StageKind::Cutting => 0,
            StageKind::Outsourcing => 1,
            StageKind::OutsourcingReceipt => 2,
            StageKind::Ironing => 3,
            StageKind::IroningReceipt => 4,
            StageKind::Stock => 5,
            StageKind::Dispatch => 6,
            StageKind::Return => 7,
        }
    }

    /// The receipt kind that closes out this dispatch-to-unit stage.
    pub fn receipt_kind(self) -> Option<StageKind> {
        match self {
            StageKind::Outsourcing => Some(StageKind::OutsourcingReceipt),
            StageKind::Ironing => Some(StageKind::IroningReceipt),
            _ => None,
        }
    }

    /// The originating stage this receipt reconciles against.
    pub fn receipt_for(self) -> Option<StageKind> {
        match self {
            StageKind::OutsourcingReceipt => Some(StageKind::Outsourcing),
            StageKind::IroningReceipt => Some(StageKind::Ironing),
            _ => None,
        }
    }

    pub fn is_receipt(self) -> bool {
        self.receipt_for().is_some()
    }

    /// Stages handed to an external unit; these carry a unit name and rate.
    pub fn is_external(self) -> bool {
        matches!(self, StageKind::Outsourcing | StageKind::Ironing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Cutting => "cutting",
            StageKind::Outsourcing => "outsourcing",
            StageKind::OutsourcingReceipt => "outsourcing_receipt",
            StageKind::Ironing => "ironing",
            StageKind::IroningReceipt => "ironing_receipt",
            StageKind::Stock => "stock",
            StageKind::Dispatch => "dispatch",
            StageKind::Return => "return",
        }
    }
}

/// Progress of a single stage record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageStatus {
    Sent,
    Partial,
    Received,
    Completed,
}

impl StageStatus {
    /// A terminal stage no longer blocks the lot from moving forward.
    pub fn is_terminal(self) -> bool {
        matches!(self, StageStatus::Received | StageStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Sent => "sent",
            StageStatus::Partial => "partial",
            StageStatus::Received => "received",
            StageStatus::Completed => "completed",
        }
    }
}
