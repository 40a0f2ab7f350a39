//! Scan execution
//!
//! A scan moves one or two axes over a grid and takes a number of exposures at every grid point,
//! logging the axis positions at the start and end of each exposure. See [`ScanPlan`] for the
//! grid and [`ScanCoordinator`] for the execution.
pub mod coordinator;
pub mod log;
pub mod plan;

pub use coordinator::{
    Rig, ScanConfig, ScanCoordinator, ScanError, ScanHandle, ScanOutcome, ScanProgress, ScanState,
};
pub use plan::{AxisSweep, MovementMode, PlanValidationError, ScanPlan};
