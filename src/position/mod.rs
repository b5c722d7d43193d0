//! Position sizing, bookkeeping and exit triggers

pub mod manager;
pub mod monitor;
pub mod sizing;

pub use manager::{ExitReason, Position, PositionManager, PositionStatus};
pub use monitor::{ExitSignal, PositionMonitor};
pub use sizing::{PositionSizer, SizingMethod, SizingParams};
