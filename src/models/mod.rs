// Domain value types for the lot lifecycle engine
pub mod packs;
pub mod reconcile;
pub mod size;
pub mod stage;

pub use packs::{decompose, PackBreakdown};
pub use reconcile::{reconcile, ReconciliationResult};
pub use size::{PackRatio, SizeDistribution, SizeLabel};
pub use stage::{StageKind, StageStatus};
