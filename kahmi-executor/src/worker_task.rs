use kahmi_core::{Action, TaskError};

/// The data sent across the worker process boundary to run a single task:
/// its actions and the public scalar fields an action might read, with the
/// project backreference and dependency/finalizer weak-refs detached
/// (`spec.md §4.7`, "Serialization constraints").
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct WorkerTaskInput {
    pub name: String,
    pub actions: Vec<Action>,
    pub description: Option<String>,
    pub group: Option<String>,
    pub default: bool,
    pub public: bool,
    pub sync_io: bool,
}

/// The mutated fields the worker sends back after running `execute()`
/// (`spec.md §4.7`, "the (mutated) task object as the result").
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct WorkerTaskResult {
    pub executed: bool,
    pub did_work: bool,
    pub exception: Option<TaskError>,
    pub description: Option<String>,
    pub group: Option<String>,
    pub default: bool,
    pub public: bool,
    pub sync_io: bool,
}

impl WorkerTaskResult {
    /// Synthesizes a failure result for infrastructure errors that happen
    /// before a worker could run at all (`FifoTimeout`/`WorkerStartupError`,
    /// `spec.md §7`), so the caller can reconcile uniformly.
    pub fn infrastructure_failure(input: &WorkerTaskInput, error: TaskError) -> WorkerTaskResult {
        WorkerTaskResult {
            executed: true,
            did_work: false,
            exception: Some(error),
            description: input.description.clone(),
            group: input.group.clone(),
            default: input.default,
            public: input.public,
            sync_io: input.sync_io,
        }
    }
}
