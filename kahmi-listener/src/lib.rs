// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! Build progress notifications (`spec.md §4.8`, "Listener"). Grounded on
//! the original's `executors/default.py` (`DefaultProgressPrinter`) and,
//! for the crate's console-reporting idiom, the teacher's `workunit_store`.

use kahmi_core::Task;

/// Three notifications an `Executor` sends as it drives tasks through
/// their lifecycle (`spec.md §4.8`). `path` is passed in by the caller
/// (rather than derived from `task`) because a detached, worker-bound
/// `Task` no longer carries a project backreference to compute it from
/// (`spec.md §4.7`, "Serialization constraints").
pub trait Listener: Send + Sync {
    fn task_execute_begin(&self, task: &Task, path: &str);
    fn task_execute_end(&self, task: &Task, path: &str, output: &str);

    fn task_cleanup_begin(&self, _task: &Task, _path: &str) {}
    fn task_cleanup_end(&self, _task: &Task, _path: &str) {}
}

/// The default console printer: prints the task path on begin, and on end
/// prints the captured output indented by `|  ` whenever
/// `always_show_output ∨ task.sync_io ∨ task.group == 'run' ∨ task.exception`
/// (`spec.md §4.8`).
pub struct DefaultListener {
    always_show_output: bool,
}

impl DefaultListener {
    pub fn new(always_show_output: bool) -> DefaultListener {
        DefaultListener { always_show_output }
    }

    fn should_show_output(&self, task: &Task) -> bool {
        self.always_show_output
            || task.sync_io
            || task.group.as_deref() == Some("run")
            || task.exception.is_some()
    }
}

impl Default for DefaultListener {
    fn default() -> Self {
        DefaultListener::new(false)
    }
}

impl Listener for DefaultListener {
    fn task_execute_begin(&self, _task: &Task, path: &str) {
        log::debug!("{path} starting");
        print!("{path} ...");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    fn task_execute_end(&self, task: &Task, path: &str, output: &str) {
        log::debug!("{path} finished: {:?}", task.status());
        println!();
        if self.should_show_output(task) && !output.is_empty() {
            for line in output.trim_end().lines() {
                println!("|  {line}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kahmi_core::{Environment, TaskError};
    use std::path::PathBuf;

    #[test]
    fn shows_output_when_task_errored() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let task_id = env.add_task(root, "build").unwrap();
        let task = env.task_mut(task_id).unwrap();
        task.exception = Some(TaskError::action("boom"));

        let listener = DefaultListener::new(false);
        assert!(listener.should_show_output(task));
    }

    #[test]
    fn hides_output_for_a_quiet_successful_task() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let task_id = env.add_task(root, "build").unwrap();
        let task = env.task(task_id).unwrap();

        let listener = DefaultListener::new(false);
        assert!(!listener.should_show_output(task));
    }

    #[test]
    fn always_show_output_overrides_quiet_tasks() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let task_id = env.add_task(root, "build").unwrap();
        let task = env.task(task_id).unwrap();

        let listener = DefaultListener::new(true);
        assert!(listener.should_show_output(task));
    }
}
