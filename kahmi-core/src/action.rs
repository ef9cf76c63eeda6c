use std::collections::HashMap;

use serde_json::Value;

use crate::task::Task;

/// A unit of work a `Task` performs during `execute()`.
///
/// The original implementation represents actions as arbitrary closures
/// (`LambdaAction`), relying on `dill` to pickle them across the worker
/// process boundary. Rust has no transparent closure serialization, so
/// `Action` is a tagged enum of statically known kinds plus a `Builtin`
/// escape hatch resolved through a `BuiltinRegistry` (`spec.md §9`,
/// "Cross-process serialization").
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Action {
    /// Runs one or more commands on the shell, grounded on the original's
    /// `CommandAction`.
    Command {
        commands: Vec<Vec<String>>,
        working_dir: Option<String>,
        environ: HashMap<String, String>,
    },
    /// Creates a directory (and its parents), grounded on the original's
    /// `CreateDirAction`.
    CreateDir { directory: String },
    /// A named builtin looked up in a `BuiltinRegistry` at execution time;
    /// the worker process looks the name up the same way.
    Builtin { id: String, params: Value },
}

impl Action {
    pub fn command(commands: Vec<Vec<String>>) -> Self {
        Action::Command {
            commands,
            working_dir: None,
            environ: HashMap::new(),
        }
    }

    pub fn create_dir(directory: impl Into<String>) -> Self {
        Action::CreateDir {
            directory: directory.into(),
        }
    }

    pub fn builtin(id: impl Into<String>, params: Value) -> Self {
        Action::Builtin {
            id: id.into(),
            params,
        }
    }

    /// Executes this action against `task`, dispatching `Builtin` actions
    /// through `registry`.
    pub fn execute(&self, task: &mut Task, registry: &BuiltinRegistry) -> Result<(), String> {
        match self {
            Action::Command {
                commands,
                working_dir,
                environ,
            } => {
                for command in commands {
                    run_command(command, working_dir.as_deref(), environ)?;
                }
                task.did_work = true;
                Ok(())
            }
            Action::CreateDir { directory } => {
                std::fs::create_dir_all(directory)
                    .map_err(|err| format!("create_dir_all({directory:?}): {err}"))?;
                task.did_work = true;
                Ok(())
            }
            Action::Builtin { id, params } => {
                let builtin = registry
                    .get(id)
                    .ok_or_else(|| format!("no builtin action registered for {id:?}"))?;
                builtin(task, params)
            }
        }
    }
}

fn run_command(
    command: &[String],
    working_dir: Option<&str>,
    environ: &HashMap<String, String>,
) -> Result<(), String> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| "command action with an empty argv".to_string())?;
    let mut cmd = std::process::Command::new(program);
    cmd.args(args);
    cmd.envs(environ);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    let status = cmd
        .status()
        .map_err(|err| format!("spawning {program:?}: {err}"))?;
    if !status.success() {
        return Err(format!("{program:?} exited with {status}"));
    }
    Ok(())
}

/// A builtin action implementation: `fn(task, params) -> Result<(), String>`.
pub type BuiltinFn = Box<dyn Fn(&mut Task, &Value) -> Result<(), String> + Send + Sync>;

/// Lookup table resolving `Action::Builtin { id, .. }` to an implementation,
/// the Rust counterpart of the original's `LambdaAction` registry
/// (`spec.md §9`).
#[derive(Default)]
pub struct BuiltinRegistry {
    builtins: HashMap<String, BuiltinFn>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, f: BuiltinFn) {
        self.builtins.insert(id.into(), f);
    }

    pub fn get(&self, id: &str) -> Option<&BuiltinFn> {
        self.builtins.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ProjectId, TaskId};
    use tempfile::tempdir;

    fn new_task() -> Task {
        Task::new(TaskId(1), ProjectId(0), "t".to_string())
    }

    #[test]
    fn create_dir_action_creates_the_directory() {
        let dir = tempdir().unwrap();
        let mut task = new_task();

        let target = dir.path().join("nested/child");
        let action = Action::create_dir(target.to_str().unwrap());
        action.execute(&mut task, &BuiltinRegistry::new()).unwrap();

        assert!(target.is_dir());
        assert!(task.did_work);
    }

    #[test]
    fn builtin_action_dispatches_through_the_registry() {
        let mut task = new_task();

        let mut registry = BuiltinRegistry::new();
        registry.register(
            "mark_done",
            Box::new(|task, _params| {
                task.did_work = true;
                Ok(())
            }),
        );

        let action = Action::builtin("mark_done", Value::Null);
        action.execute(&mut task, &registry).unwrap();
        assert!(task.did_work);
    }
}
