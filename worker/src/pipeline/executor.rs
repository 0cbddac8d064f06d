use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::BoxedTask;
use futures::future::try_join_all;
use pressbox_shared::PressboxResult;
use std::time::Instant;

/// Ordered stages to run.
pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }

    /// Task names, stage by stage, in declaration order.
    pub fn task_names(&self) -> Vec<Vec<String>> {
        self.stages
            .iter()
            .map(|stage| stage.tasks.iter().map(|t| t.name().to_string()).collect())
            .collect()
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Run every stage in order. Stops at the first task error.
    pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> PressboxResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stages = Vec::with_capacity(plan.stages.len());

        for stage in plan.stages {
            let Stage {
                label,
                tasks,
                execution,
            } = stage;
            let stage_start = Instant::now();
            tracing::trace!(stage = label, tasks = tasks.len(), ?execution, "Stage starting");

            let task_metrics = match execution {
                ExecutionMode::Parallel => {
                    try_join_all(tasks.into_iter().map(|task| run_task(task, ctx.clone()))).await?
                }
                ExecutionMode::Sequential => {
                    let mut metrics = Vec::with_capacity(tasks.len());
                    for task in tasks {
                        metrics.push(run_task(task, ctx.clone()).await?);
                    }
                    metrics
                }
            };

            stages.push(StageMetrics {
                label,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages,
        })
    }
}

async fn run_task<Ctx>(task: BoxedTask<Ctx>, ctx: Ctx) -> PressboxResult<TaskMetrics> {
    let name = task.name().to_string();
    let start = Instant::now();
    task.run(ctx).await?;
    Ok(TaskMetrics {
        name,
        duration_ms: start.elapsed().as_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineTask;
    use pressbox_shared::PressboxError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Record {
        name: &'static str,
        delay_ms: u64,
        fail: bool,
    }

    #[async_trait]
    impl PipelineTask<Log> for Record {
        async fn run(self: Box<Self>, ctx: Log) -> PressboxResult<()> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            if self.fail {
                return Err(PressboxError::Internal(format!("{} failed", self.name)));
            }
            ctx.lock().push(self.name.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn task(name: &'static str, delay_ms: u64) -> BoxedTask<Log> {
        Box::new(Record {
            name,
            delay_ms,
            fail: false,
        })
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log: Log = Arc::default();
        let plan = ExecutionPlan::new(vec![
            Stage::parallel("first", vec![task("slow", 30), task("fast", 0)]),
            Stage::sequential("second", vec![task("last", 0)]),
        ]);

        let metrics = PipelineExecutor::execute(plan, Arc::clone(&log)).await.unwrap();

        assert_eq!(*log.lock(), vec!["fast", "slow", "last"]);
        assert_eq!(metrics.stages.len(), 2);
        assert!(metrics.task_duration_ms("slow").is_some());
        assert!(metrics.task_duration_ms("missing").is_none());
    }

    #[tokio::test]
    async fn test_failure_stops_later_stages() {
        let log: Log = Arc::default();
        let plan = ExecutionPlan::new(vec![
            Stage::sequential(
                "first",
                vec![Box::new(Record {
                    name: "broken",
                    delay_ms: 0,
                    fail: true,
                }) as BoxedTask<Log>],
            ),
            Stage::sequential("second", vec![task("never", 0)]),
        ]);

        let err = PipelineExecutor::execute(plan, Arc::clone(&log)).await.unwrap_err();
        assert!(matches!(err, PressboxError::Internal(_)));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_plan_lists_task_names() {
        let plan = ExecutionPlan::new(vec![
            Stage::parallel("a", vec![task("x", 0), task("y", 0)]),
            Stage::sequential("b", vec![task("z", 0)]),
        ]);
        assert_eq!(plan.task_names(), vec![vec!["x", "y"], vec!["z"]]);
    }
}
