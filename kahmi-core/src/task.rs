use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kahmi_provider::{ListProperty, Marker, OwnerId, Property};
use serde::Serialize;

use crate::action::{Action, BuiltinRegistry};
use crate::configurable::Configurable;
use crate::ids::{ProjectId, TaskId};
use crate::properties::ErasedProperty;
use crate::task_inputs::TaskInputs;

/// An error captured from a task action or an executor-level failure, stored
/// on `Task::exception` (`spec.md §4.3`, §7).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TaskErrorKind {
    /// Raised by an action during `execute()`.
    Action,
    /// A direct dependency of this task errored; this task was skipped.
    Dependency,
    /// FIFO setup did not complete within `T_fifo` (`spec.md §4.7`).
    FifoTimeout,
    /// The worker process failed to start or was lost.
    WorkerStartup,
}

impl TaskError {
    pub fn action(message: impl Into<String>) -> Self {
        TaskError {
            kind: TaskErrorKind::Action,
            message: message.into(),
        }
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        TaskError {
            kind: TaskErrorKind::Dependency,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TaskError {}

/// `Task.status` (`spec.md §4.3` state machine table).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Unknown,
    Pending,
    UpToDate,
    Skipped,
    Finished,
    Error,
}

/// A single atomic unit of work in a build, composed of `Action`s and
/// configured through declared properties (`spec.md §3`, "Task"; grounded on
/// the original's `model/task.py`).
pub struct Task {
    id: TaskId,
    project: ProjectId,
    name: String,
    actions: Vec<Action>,
    dependencies: Vec<TaskId>,
    finalizers: Vec<TaskId>,
    properties: BTreeMap<String, Arc<dyn ErasedProperty>>,

    pub description: Option<String>,
    pub group: Option<String>,
    pub executed: bool,
    pub did_work: bool,
    pub dirty: Option<bool>,
    pub exception: Option<TaskError>,
    pub default: bool,
    pub public: bool,
    pub sync_io: bool,
}

impl Task {
    /// Constructs a bare task. Exposed publicly so that a worker process can
    /// rebuild a minimal `Task` to run a detached action list against
    /// (`spec.md §4.7`, "Serialization constraints") — ordinary script-level
    /// tasks are created through `Environment::add_task` instead.
    pub fn new(id: TaskId, project: ProjectId, name: String) -> Task {
        Task {
            id,
            project,
            name,
            actions: Vec::new(),
            dependencies: Vec::new(),
            finalizers: Vec::new(),
            properties: BTreeMap::new(),
            description: None,
            group: None,
            executed: false,
            did_work: false,
            dirty: None,
            exception: None,
            default: true,
            public: true,
            sync_io: false,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn project(&self) -> ProjectId {
        self.project
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn finalizers(&self) -> &[TaskId] {
        &self.finalizers
    }

    pub fn performs(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub fn depends_on(&mut self, tasks: impl IntoIterator<Item = TaskId>) {
        self.dependencies.extend(tasks);
    }

    pub fn finalized_by(&mut self, tasks: impl IntoIterator<Item = TaskId>) {
        self.finalizers.extend(tasks);
    }

    /// Declares a new, owned property and registers it for
    /// `compute_all_dependencies`/`get_task_inputs` traversal
    /// (`spec.md §4.2`, "Construction parameters").
    pub fn declare_property<T>(&mut self, name: &str, markers: Vec<Marker>) -> Arc<Property<T>>
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        let property = Property::with_name_and_owner(
            markers,
            Some(name.to_string()),
            Some(OwnerId::Task(self.id.0)),
        );
        self.properties
            .insert(name.to_string(), property.clone() as Arc<dyn ErasedProperty>);
        property
    }

    /// Like `declare_property`, but for a list-valued property whose
    /// entries can be spliced in with `add`/`extend` (`SPEC_FULL.md §C.1`).
    pub fn declare_list_property<T>(&mut self, name: &str, markers: Vec<Marker>) -> Arc<ListProperty<T>>
    where
        T: Clone + Send + Sync + Serialize + 'static,
    {
        let property = ListProperty::with_name_and_owner(
            markers,
            Some(name.to_string()),
            Some(OwnerId::Task(self.id.0)),
        );
        self.properties
            .insert(name.to_string(), property.clone() as Arc<dyn ErasedProperty>);
        property
    }

    pub fn property(&self, name: &str) -> Option<&Arc<dyn ErasedProperty>> {
        self.properties.get(name)
    }

    /// Declared properties in name-sorted order (`spec.md §4.3`,
    /// `get_task_inputs`, `BTreeMap` iteration order).
    pub fn declared_properties(&self) -> impl Iterator<Item = (&str, &Arc<dyn ErasedProperty>)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Union of explicit `depends_on` edges and tasks discovered through
    /// `Output`-marked properties consumed by this task's own properties
    /// (`spec.md §4.3`, `compute_all_dependencies`).
    pub fn compute_all_dependencies(&self) -> BTreeSet<TaskId> {
        let mut result: BTreeSet<TaskId> = self.dependencies.iter().copied().collect();
        for property in self.properties.values() {
            for consumed in property.dependencies() {
                if consumed.has_marker(Marker::Output) {
                    if let Some(OwnerId::Task(id)) = consumed.owner {
                        result.insert(TaskId(id));
                    }
                }
            }
        }
        result
    }

    /// Builds the `TaskInputs` snapshot used to decide up-to-dateness
    /// (`spec.md §4.3`, `get_task_inputs`).
    pub fn get_task_inputs(&self) -> Result<TaskInputs, String> {
        let mut inputs = TaskInputs::default();
        for (name, property) in self.declared_properties() {
            let markers = property.markers();
            let is_file_like = markers.contains(&Marker::InputFile) || markers.contains(&Marker::InputDir);
            let is_input = markers.contains(&Marker::Input);
            if !is_file_like && !is_input {
                continue;
            }
            let value = match property.read_json() {
                Some(value) => value,
                None => continue,
            };
            if is_file_like {
                let paths = json_as_string_list(&value)
                    .ok_or_else(|| format!("property {name:?} marked InputFile/InputDir must be a string or list of strings"))?;
                inputs.files.insert(name.to_string(), paths);
            } else {
                inputs.values.insert(name.to_string(), value);
            }
        }
        Ok(inputs)
    }

    /// Runs every action in insertion order. Never reraises on its own —
    /// callers use `reraise_error()` to propagate (`spec.md §4.3`).
    ///
    /// # Panics
    /// Panics if called a second time; the original raises
    /// `RepeatedExecutionError` for the same programmer error.
    pub fn execute(&mut self, registry: &BuiltinRegistry) {
        assert!(!self.executed, "task already executed");
        for action in self.actions.clone() {
            if let Err(message) = action.execute(self, registry) {
                self.exception = Some(TaskError::action(message));
                break;
            }
        }
        self.executed = true;
    }

    pub fn reraise_error(&self) -> Result<(), TaskError> {
        match &self.exception {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    /// `Task.status` (`spec.md §4.3` state machine table).
    pub fn status(&self) -> TaskStatus {
        if self.executed {
            if self.exception.is_some() {
                TaskStatus::Error
            } else if self.did_work {
                TaskStatus::Finished
            } else {
                TaskStatus::Skipped
            }
        } else {
            match self.dirty {
                Some(true) => TaskStatus::Pending,
                Some(false) => TaskStatus::UpToDate,
                None => TaskStatus::Unknown,
            }
        }
    }
}

impl Configurable for Task {}

fn json_as_string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::String(s) => Some(vec![s.clone()]),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kahmi_provider::Provider;

    fn new_task(id: u64, project: u64, name: &str) -> Task {
        Task::new(TaskId(id), ProjectId(project), name.to_string())
    }

    #[test]
    fn execute_runs_actions_and_sets_executed() {
        let mut task = new_task(1, 0, "build");
        task.performs(Action::create_dir(
            std::env::temp_dir().join("kahmi-task-test").to_str().unwrap(),
        ));
        task.execute(&BuiltinRegistry::new());
        assert!(task.executed);
        assert!(task.did_work);
        assert!(task.exception.is_none());
        assert_eq!(task.status(), TaskStatus::Finished);
    }

    #[test]
    fn execute_captures_action_errors_without_reraising() {
        let mut task = new_task(1, 0, "run");
        task.performs(Action::command(vec![vec!["false".to_string()]]));
        task.execute(&BuiltinRegistry::new());
        assert!(task.executed);
        assert!(task.exception.is_some());
        assert_eq!(task.status(), TaskStatus::Error);
        assert!(task.reraise_error().is_err());
    }

    #[test]
    fn compute_all_dependencies_includes_explicit_and_output_edges() {
        let mut producer = new_task(1, 0, "producer");
        let output: Arc<Property<String>> =
            producer.declare_property("output_file", vec![Marker::Output]);
        output.set(Provider::of("a.txt".to_string())).unwrap();

        let mut consumer = new_task(2, 0, "consumer");
        consumer.depends_on([TaskId(99)]);
        let input: Arc<Property<String>> = consumer.declare_property("input_file", vec![Marker::InputFile]);
        input.bind(&output).unwrap();

        let deps = consumer.compute_all_dependencies();
        assert!(deps.contains(&TaskId(1)));
        assert!(deps.contains(&TaskId(99)));
    }

    #[test]
    fn get_task_inputs_routes_by_marker() {
        let mut task = new_task(1, 0, "t");
        let input: Arc<Property<i64>> = task.declare_property("count", vec![Marker::Input]);
        input.set(Provider::of(3)).unwrap();
        let file: Arc<Property<String>> = task.declare_property("src", vec![Marker::InputFile]);
        file.set(Provider::of("a.txt".to_string())).unwrap();

        let inputs = task.get_task_inputs().unwrap();
        assert_eq!(inputs.values.get("count"), Some(&serde_json::json!(3)));
        assert_eq!(inputs.files.get("src"), Some(&vec!["a.txt".to_string()]));
    }

    #[test]
    fn get_task_inputs_collects_a_list_property_of_input_files() {
        let mut task = new_task(1, 0, "t");
        let sources: Arc<ListProperty<String>> = task.declare_list_property("sources", vec![Marker::InputFile]);
        sources.add("a.txt".to_string());
        sources.add("b.txt".to_string());

        let inputs = task.get_task_inputs().unwrap();
        assert_eq!(
            inputs.files.get("sources"),
            Some(&vec!["a.txt".to_string(), "b.txt".to_string()])
        );
    }

    #[test]
    fn get_task_inputs_rejects_non_string_input_file() {
        let mut task = new_task(1, 0, "t");
        let file: Arc<Property<i64>> = task.declare_property("src", vec![Marker::InputFile]);
        file.set(Provider::of(42)).unwrap();
        assert!(task.get_task_inputs().is_err());
    }

    #[test]
    fn status_reflects_dirty_before_execution() {
        let mut task = new_task(1, 0, "t");
        assert_eq!(task.status(), TaskStatus::Unknown);
        task.dirty = Some(true);
        assert_eq!(task.status(), TaskStatus::Pending);
        task.dirty = Some(false);
        assert_eq!(task.status(), TaskStatus::UpToDate);
    }
}
