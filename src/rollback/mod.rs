//! Rollback point resolution and revert planning.

mod plan;
mod resolver;

pub use plan::{PlanStatus, PlanWindow, RevertPlan, compute_revert_plan, compute_revert_plans};
pub use resolver::{RollbackPoint, resolve_rollback_points};
