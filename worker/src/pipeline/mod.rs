//! Staged task execution used by the boot sequencer.
//!
//! ```text
//! Plan → Stages → Tasks
//!
//! - Plan: ordered stages, executed one after another
//! - Stage: tasks run concurrently or in order
//! - Task: one unit of boot work sharing a context
//! ```
//!
//! The first failing task aborts the plan. In a concurrent stage the sibling
//! tasks are dropped, so work that has not reached an await point never runs.

mod executor;
mod metrics;
mod stage;

pub use executor::{ExecutionPlan, PipelineExecutor};
pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use stage::{ExecutionMode, Stage};

use async_trait::async_trait;
use pressbox_shared::PressboxResult;

/// One unit of work in a plan.
///
/// Tasks receive a clone of the shared context and publish their outputs
/// through its interior mutability.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> PressboxResult<()>;

    /// Name used in logs and metrics.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
