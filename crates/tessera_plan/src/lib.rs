//! Planning: turn a parsed statement into pure-data work items plus a merge
//! recipe. Plans carry no connections; the session executor drives them.

mod builder;
mod plan;
mod preview;

pub use builder::{build_plan, PlanContext};
pub use plan::{MergeRecipe, Plan, PlanKind, WorkItem};
pub use preview::{preview, StmtType};
