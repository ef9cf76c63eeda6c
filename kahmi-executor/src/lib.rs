// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! The incremental execution engine (`spec.md §4.7`, §5): orchestrates
//! per-task topological dispatch, the up-to-date check against a
//! [`StateTracker`], subprocess-based execution with output capture, and
//! reconciliation of a worker's result back into the parent process's
//! in-memory `Task`. Grounded on the teacher's `process_execution::local`
//! (subprocess spawn plus stdio capture) scheduling loop, adapted to
//! Kahmi's FIFO-based worker protocol (`spec.md §9`, "FIFO portability").

mod fifo;
mod worker;
mod worker_task;

pub use fifo::{DEFAULT_FIFO_TIMEOUT, SELECT_BUDGET};
pub use worker::{maybe_run_worker, run_in_worker, WORKER_ARG};
pub use worker_task::{WorkerTaskInput, WorkerTaskResult};

use std::collections::HashSet;
use std::sync::Arc;

use kahmi_core::{Action, BuiltinRegistry, Environment, Task, TaskError, TaskId};
use kahmi_graph::{BuildGraph, GraphError};
use kahmi_listener::Listener;
use kahmi_state::StateTracker;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A fatal, build-wide error: graph construction stops the build before a
/// single task runs; a task error is captured per-task during execution
/// and the first one is reraised once scheduling drains (`spec.md §7`,
/// "Propagation policy").
#[derive(Debug)]
pub enum ExecutorError {
    Cycle(GraphError),
    Task(TaskError),
}

impl std::fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorError::Cycle(error) => write!(f, "{error}"),
            ExecutorError::Task(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Parameterizes the executor's scheduling model (`spec.md §5`).
pub struct ExecutorConfig {
    /// `P` in `spec.md §5`. `1` runs every task strictly in topological
    /// order, in the main process, without a worker subprocess or output
    /// capture (`spec.md §4.7`, "A sequential mode").
    pub parallelism: usize,
    /// `false` streams each worker's output directly to the parent's
    /// stdout/stderr as it arrives instead of buffering it for delivery at
    /// `task_execute_end` (`spec.md §6`, `-s/--no-capture`).
    pub capture_output: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            parallelism: 1,
            capture_output: true,
        }
    }
}

/// Drives a [`BuildGraph`]'s selection to completion (`spec.md §4.7`).
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Executor {
        Executor { config }
    }

    /// Executes every task in `graph`'s scheduling closure. Returns the
    /// first captured task error, if any; a cycle in the graph is reported
    /// before any task runs (`spec.md §4.5`, §7).
    pub async fn execute(
        &self,
        env: &mut Environment,
        graph: &BuildGraph,
        state: &dyn StateTracker,
        listener: &dyn Listener,
    ) -> Result<(), ExecutorError> {
        let order = graph.tasks_in_order(env).map_err(ExecutorError::Cycle)?;
        if self.config.parallelism <= 1 {
            self.execute_sequential(env, &order, state, listener)
        } else {
            self.execute_parallel(env, graph, &order, state, listener).await
        }
    }

    /// `P = 1`: every task runs in-process, in topological order, without a
    /// worker subprocess — its action output goes straight to the
    /// inherited stdout/stderr rather than through the listener
    /// (`spec.md §4.7`, "A sequential mode").
    fn execute_sequential(
        &self,
        env: &mut Environment,
        order: &[TaskId],
        state: &dyn StateTracker,
        listener: &dyn Listener,
    ) -> Result<(), ExecutorError> {
        let registry = BuiltinRegistry::new();
        let mut errored: HashSet<TaskId> = HashSet::new();
        let mut first_error: Option<TaskError> = None;
        let mut halted = false;

        for &task_id in order {
            let path = env.task_path(task_id);

            if let Some(failed_dep) = first_errored_dependency(env, task_id, &errored) {
                apply_dependency_skip(env, task_id, failed_dep);
                errored.insert(task_id);
                listener.task_execute_begin(env.task(task_id).expect("listed in order"), &path);
                listener.task_execute_end(env.task(task_id).expect("listed in order"), &path, "");
                continue;
            }

            // Once a task has errored for real (not a cascaded dependency
            // skip), stop starting unrelated work — matches the parallel
            // scheduler's halt discipline so `P=1` and `P>1` agree on which
            // tasks actually run (`spec.md §5`).
            if halted {
                continue;
            }

            listener.task_execute_begin(env.task(task_id).expect("listed in order"), &path);

            let task_ref = env.task(task_id).expect("listed in order");
            let inputs = match task_ref.get_task_inputs() {
                Ok(inputs) => inputs,
                Err(message) => {
                    let task = env.task_mut(task_id).expect("listed in order");
                    task.exception = Some(TaskError::action(message));
                    task.executed = true;
                    errored.insert(task_id);
                    halted = true;
                    log::warn!("{path} failed to compute task inputs, halting further dispatch: {message}");
                    if first_error.is_none() {
                        first_error = task.exception.clone();
                    }
                    state.task_finished(
                        env.task(task_id).expect("listed in order"),
                        &path,
                        &kahmi_core::TaskInputs::default(),
                    );
                    listener.task_execute_end(env.task(task_id).expect("listed in order"), &path, "");
                    continue;
                }
            };

            let dirty = inputs.is_empty() || state.task_inputs_changed(&path, &inputs);
            let task = env.task_mut(task_id).expect("listed in order");
            task.dirty = Some(dirty);

            if !dirty {
                task.executed = true;
                task.did_work = false;
                listener.task_execute_end(env.task(task_id).expect("listed in order"), &path, "");
                continue;
            }

            let task = env.task_mut(task_id).expect("listed in order");
            task.execute(&registry);

            if task.exception.is_some() {
                errored.insert(task_id);
                halted = true;
                log::warn!("{path} errored, halting further dispatch");
                if first_error.is_none() {
                    first_error = task.exception.clone();
                }
            }

            state.task_finished(env.task(task_id).expect("listed in order"), &path, &inputs);
            listener.task_execute_end(env.task(task_id).expect("listed in order"), &path, "");
        }

        match first_error {
            Some(error) => Err(ExecutorError::Task(error)),
            None => Ok(()),
        }
    }

    /// `P > 1`: dispatches up to `P` concurrent worker subprocesses, one per
    /// ready task, and reconciles each result back into `env` from the
    /// single-threaded scheduler loop as it completes (`spec.md §5`,
    /// "Parallel execution discipline").
    async fn execute_parallel(
        &self,
        env: &mut Environment,
        graph: &BuildGraph,
        order: &[TaskId],
        state: &dyn StateTracker,
        listener: &dyn Listener,
    ) -> Result<(), ExecutorError> {
        let mut remaining: Vec<TaskId> = order.to_vec();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut errored: HashSet<TaskId> = HashSet::new();
        let mut in_flight: HashSet<TaskId> = HashSet::new();
        let mut halted = false;
        let mut first_error: Option<TaskError> = None;

        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let capture_output = self.config.capture_output;
        type WorkerOutcome = (TaskId, String, Result<WorkerTaskResult, TaskError>);
        let mut join_set: JoinSet<WorkerOutcome> = JoinSet::new();

        loop {
            // Resolve every task whose dependencies are already settled:
            // cascade a `DependencyError` skip synchronously (cheap, and
            // unconditional even while `halted`), or dispatch it for real
            // work if dispatching is still open.
            let mut index = 0;
            while index < remaining.len() {
                let task_id = remaining[index];
                let deps = graph.direct_dependencies(task_id);
                let blocked = deps
                    .iter()
                    .any(|dep| !completed.contains(dep) && !errored.contains(dep));
                if blocked {
                    index += 1;
                    continue;
                }

                if let Some(&failed_dep) = deps.iter().find(|dep| errored.contains(*dep)) {
                    apply_dependency_skip(env, task_id, failed_dep);
                    errored.insert(task_id);
                    let path = env.task_path(task_id);
                    listener.task_execute_begin(env.task(task_id).expect("in graph"), &path);
                    listener.task_execute_end(env.task(task_id).expect("in graph"), &path, "");
                    remaining.remove(index);
                    continue;
                }

                if halted {
                    index += 1;
                    continue;
                }

                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    index += 1;
                    continue;
                };
                remaining.remove(index);

                let path = env.task_path(task_id);
                let task_ref = env.task(task_id).expect("in graph");
                listener.task_execute_begin(task_ref, &path);

                let inputs = match task_ref.get_task_inputs() {
                    Ok(inputs) => inputs,
                    Err(message) => {
                        drop(permit);
                        let task = env.task_mut(task_id).expect("in graph");
                        task.exception = Some(TaskError::action(message));
                        task.executed = true;
                        errored.insert(task_id);
                        halted = true;
                        log::warn!("{path} failed to compute task inputs, halting further dispatch: {message}");
                        if first_error.is_none() {
                            first_error = task.exception.clone();
                        }
                        state.task_finished(
                            env.task(task_id).expect("in graph"),
                            &path,
                            &kahmi_core::TaskInputs::default(),
                        );
                        listener.task_execute_end(env.task(task_id).expect("in graph"), &path, "");
                        continue;
                    }
                };

                let dirty = inputs.is_empty() || state.task_inputs_changed(&path, &inputs);
                if !dirty {
                    drop(permit);
                    let task = env.task_mut(task_id).expect("in graph");
                    task.dirty = Some(false);
                    task.executed = true;
                    task.did_work = false;
                    completed.insert(task_id);
                    listener.task_execute_end(env.task(task_id).expect("in graph"), &path, "");
                    continue;
                }

                env.task_mut(task_id).expect("in graph").dirty = Some(true);
                let snapshot = worker_input(env.task(task_id).expect("in graph"));
                in_flight.insert(task_id);
                let buffer = Arc::new(std::sync::Mutex::new(String::new()));
                let buffer_for_output = Arc::clone(&buffer);
                join_set.spawn(async move {
                    let _permit = permit;
                    let outcome = run_in_worker(&snapshot, move |chunk| {
                        if capture_output {
                            buffer_for_output
                                .lock()
                                .unwrap()
                                .push_str(&String::from_utf8_lossy(chunk));
                        } else {
                            use std::io::Write;
                            let _ = std::io::stdout().write_all(chunk);
                        }
                    })
                    .await;
                    let collected = Arc::try_unwrap(buffer)
                        .map(|m| m.into_inner().unwrap())
                        .unwrap_or_default();
                    (task_id, collected, outcome)
                });
            }

            if join_set.is_empty() {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (task_id, output, outcome) = joined.expect("worker task panicked");
            in_flight.remove(&task_id);
            let path = env.task_path(task_id);
            let inputs_for_state = env
                .task(task_id)
                .expect("in graph")
                .get_task_inputs()
                .unwrap_or_default();

            match outcome {
                Ok(result) => {
                    let task = env.task_mut(task_id).expect("in graph");
                    reconcile(task, result);
                    if task.exception.is_some() {
                        errored.insert(task_id);
                        halted = true;
                        log::warn!("{path} errored, halting further dispatch");
                        if first_error.is_none() {
                            first_error = task.exception.clone();
                        }
                    } else {
                        completed.insert(task_id);
                    }
                }
                Err(error) => {
                    let task = env.task_mut(task_id).expect("in graph");
                    task.executed = true;
                    task.exception = Some(error.clone());
                    errored.insert(task_id);
                    halted = true;
                    log::warn!("{path} lost its worker process, halting further dispatch: {error}");
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }

            state.task_finished(env.task(task_id).expect("in graph"), &path, &inputs_for_state);
            listener.task_execute_end(env.task(task_id).expect("in graph"), &path, &output);
        }

        match first_error {
            Some(error) => Err(ExecutorError::Task(error)),
            None => Ok(()),
        }
    }
}

/// The first dependency of `task_id` found in `errored`, if any — used to
/// cascade a `DependencyError` skip (`spec.md §4.7` step 1).
fn first_errored_dependency(env: &Environment, task_id: TaskId, errored: &HashSet<TaskId>) -> Option<TaskId> {
    env.task(task_id)?
        .compute_all_dependencies()
        .into_iter()
        .find(|dep| errored.contains(dep))
}

fn apply_dependency_skip(env: &mut Environment, task_id: TaskId, failed_dep: TaskId) {
    let dep_path = env.task_path(failed_dep);
    let task = env.task_mut(task_id).expect("task exists");
    task.exception = Some(TaskError::dependency(format!("dependency {dep_path} failed")));
    task.executed = true;
    task.did_work = false;
}

/// Detaches the leaf, serializable fields of `task` into a
/// [`WorkerTaskInput`], leaving its project backreference and
/// dependency/finalizer weak-refs behind (`spec.md §4.7`, "Serialization
/// constraints").
fn worker_input(task: &Task) -> WorkerTaskInput {
    WorkerTaskInput {
        name: task.name().to_string(),
        actions: task.actions().iter().cloned().collect::<Vec<Action>>(),
        description: task.description.clone(),
        group: task.group.clone(),
        default: task.default,
        public: task.public,
        sync_io: task.sync_io,
    }
}

/// Copies every public field a worker may have mutated back onto the
/// parent-side task; dependency/finalizer/project backreferences are never
/// touched (`spec.md §4.7` step 5).
fn reconcile(task: &mut Task, result: WorkerTaskResult) {
    task.executed = result.executed;
    task.did_work = result.did_work;
    task.exception = result.exception;
    task.description = result.description;
    task.group = result.group;
    task.default = result.default;
    task.public = result.public;
    task.sync_io = result.sync_io;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kahmi_core::Action;
    use kahmi_listener::DefaultListener;
    use kahmi_state::NoStateTracker;
    use std::path::PathBuf;

    fn producer_consumer_env() -> (Environment, TaskId, TaskId, std::path::PathBuf) {
        let mut env = Environment::new(PathBuf::from("/tmp/kahmi-executor-test"));
        let root = env.root_project_id();
        let producer = env.add_task(root, "producer").unwrap();
        let consumer = env.add_task(root, "consumer").unwrap();
        env.task_mut(consumer).unwrap().depends_on([producer]);

        let out_path = std::env::temp_dir().join(format!("kahmi-exec-test-{}.txt", std::process::id()));
        env.task_mut(producer)
            .unwrap()
            .performs(Action::command(vec![vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("printf hello > {}", out_path.display()),
            ]]));
        env.task_mut(consumer)
            .unwrap()
            .performs(Action::command(vec![vec!["cat".to_string(), out_path.display().to_string()]]));

        (env, producer, consumer, out_path)
    }

    #[tokio::test]
    async fn sequential_mode_runs_dependencies_before_dependents() {
        let (mut env, producer, consumer, out_path) = producer_consumer_env();
        let mut graph = BuildGraph::new();
        graph.add_task(&env, consumer);
        graph.select(consumer);

        let executor = Executor::new(ExecutorConfig { parallelism: 1, capture_output: true });
        let tracker = NoStateTracker;
        let listener = DefaultListener::new(false);

        executor.execute(&mut env, &graph, &tracker, &listener).await.unwrap();

        assert!(env.task(producer).unwrap().did_work);
        assert!(env.task(consumer).unwrap().did_work);
        assert!(env.task(consumer).unwrap().exception.is_none());
        let _ = std::fs::remove_file(&out_path);
    }

    #[tokio::test]
    async fn dependency_error_skips_the_dependent() {
        let mut env = Environment::new(PathBuf::from("/tmp/kahmi-executor-test-2"));
        let root = env.root_project_id();
        let failing = env.add_task(root, "failing").unwrap();
        let dependent = env.add_task(root, "dependent").unwrap();
        env.task_mut(dependent).unwrap().depends_on([failing]);
        env.task_mut(failing)
            .unwrap()
            .performs(Action::command(vec![vec!["false".to_string()]]));

        let mut graph = BuildGraph::new();
        graph.add_task(&env, dependent);
        graph.select(dependent);

        let executor = Executor::new(ExecutorConfig { parallelism: 1, capture_output: true });
        let tracker = NoStateTracker;
        let listener = DefaultListener::new(false);

        let result = executor.execute(&mut env, &graph, &tracker, &listener).await;
        assert!(result.is_err());
        assert!(env.task(dependent).unwrap().exception.is_some());
        assert_eq!(
            env.task(dependent).unwrap().exception.as_ref().unwrap().kind,
            kahmi_core::TaskErrorKind::Dependency
        );
    }

    #[tokio::test]
    async fn parallel_mode_reconciles_worker_results() {
        let (mut env, producer, consumer, out_path) = producer_consumer_env();
        let mut graph = BuildGraph::new();
        graph.add_task(&env, consumer);
        graph.select(consumer);

        let executor = Executor::new(ExecutorConfig { parallelism: 2, capture_output: true });
        let tracker = NoStateTracker;
        let listener = DefaultListener::new(false);

        executor.execute(&mut env, &graph, &tracker, &listener).await.unwrap();

        assert!(env.task(producer).unwrap().executed);
        assert!(env.task(consumer).unwrap().executed);
        assert!(env.task(consumer).unwrap().exception.is_none());
        let _ = std::fs::remove_file(&out_path);
    }
}
