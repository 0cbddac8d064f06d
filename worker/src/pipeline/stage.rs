/// How the tasks of a stage are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// All tasks polled together; the stage ends when every task finishes.
    Parallel,
    Sequential,
}

/// Group of tasks sharing an execution mode.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    pub label: &'static str,
    pub tasks: Vec<T>,
    pub execution: ExecutionMode,
}

impl<T> Stage<T> {
    pub fn parallel(label: &'static str, tasks: Vec<T>) -> Self {
        Self {
            label,
            tasks,
            execution: ExecutionMode::Parallel,
        }
    }

    pub fn sequential(label: &'static str, tasks: Vec<T>) -> Self {
        Self {
            label,
            tasks,
            execution: ExecutionMode::Sequential,
        }
    }
}
