use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::ids::{ProjectId, TaskId};
use crate::plugin::PluginRegistry;
use crate::project::Project;
use crate::task::Task;

/// Process-wide container for every `Project` and `Task` in a build
/// (`spec.md §3`, "Environment"). Created once per build invocation; no
/// singletons (`spec.md §9`, "Global state").
///
/// Projects and tasks are held in flat arenas indexed by `ProjectId`/
/// `TaskId` rather than linked by `Rc`/`Weak`, so that cross-references
/// (task → project, task → dependency) never keep their target alive
/// through ownership (`spec.md §9`, "Weak backreferences").
pub struct Environment {
    projects: Vec<Project>,
    tasks: Vec<Task>,
    root_project: ProjectId,
}

impl Environment {
    /// Creates a fresh `Environment` with a single root project rooted at
    /// `directory`.
    pub fn new(directory: PathBuf) -> Environment {
        let name = directory
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("root")
            .to_string();
        let root = Project::new(ProjectId(0), None, name, directory);
        Environment {
            projects: vec![root],
            tasks: Vec::new(),
            root_project: ProjectId(0),
        }
    }

    pub fn root_project_id(&self) -> ProjectId {
        self.root_project
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(id.0 as usize)
    }

    pub fn project_mut(&mut self, id: ProjectId) -> Option<&mut Project> {
        self.projects.get_mut(id.0 as usize)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0 as usize)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id.0 as usize)
    }

    /// Registers a child project of `parent` named `name`, directly under
    /// `parent`'s directory.
    pub fn add_project(&mut self, parent: ProjectId, name: &str) -> Result<ProjectId, String> {
        let parent_directory = self
            .project(parent)
            .ok_or_else(|| format!("no such project: {parent:?}"))?
            .directory()
            .to_path_buf();
        let id = ProjectId(self.projects.len() as u64);
        self.projects.push(Project::new(
            id,
            Some(parent),
            name.to_string(),
            parent_directory.join(name),
        ));
        self.project_mut(parent)
            .expect("parent just looked up")
            .insert_child(name.to_string(), id)?;
        Ok(id)
    }

    /// Registers a new task named `name` under `project`
    /// (`spec.md §4.4`, `Project.task`).
    pub fn add_task(&mut self, project: ProjectId, name: &str) -> Result<TaskId, String> {
        if self.project(project).is_none() {
            return Err(format!("no such project: {project:?}"));
        }
        let id = TaskId(self.tasks.len() as u64);
        self.tasks.push(Task::new(id, project, name.to_string()));
        self.project_mut(project)
            .expect("checked above")
            .insert_task(name.to_string(), id)?;
        Ok(id)
    }

    /// `path = project.path + ':' + name`, globally unique within an
    /// `Environment` (`spec.md §3`, "Task" invariants).
    pub fn task_path(&self, id: TaskId) -> String {
        let task = self.task(id).expect("dangling TaskId");
        format!("{}:{}", self.project_path(task.project()), task.name())
    }

    /// The `:`-joined chain from the root project (`spec.md §3`, "Project").
    pub fn project_path(&self, id: ProjectId) -> String {
        let project = self.project(id).expect("dangling ProjectId");
        match project.parent() {
            Some(parent) => format!("{}:{}", self.project_path(parent), project.name()),
            None => project.name().to_string(),
        }
    }

    pub fn root_project_path(&self) -> String {
        self.project_path(self.root_project)
    }

    /// Every task declared in `project` and, recursively, its sub-projects
    /// (the original's `iter_all_tasks`).
    pub fn iter_all_tasks(&self, project: ProjectId) -> Vec<TaskId> {
        let mut result = Vec::new();
        self.collect_tasks(project, &mut result);
        result
    }

    fn collect_tasks(&self, project: ProjectId, out: &mut Vec<TaskId>) {
        let Some(node) = self.project(project) else {
            return;
        };
        out.extend(node.tasks().map(|(_, id)| id));
        for (_, child) in node.children() {
            self.collect_tasks(child, out);
        }
    }

    /// Loads a named plugin from `registry` and invokes its `apply`
    /// (`spec.md §4.4`, "`apply(plugin_name)`"; §6, "Plugin interface").
    /// Resolution attempts the namespaced name first, falling back to the
    /// bare name.
    pub fn apply(
        &mut self,
        project: ProjectId,
        registry: &PluginRegistry,
        name: &str,
    ) -> Result<(), String> {
        let apply_fn = registry
            .resolve(name)
            .ok_or_else(|| format!("no plugin registered for {name:?}"))?;
        apply_fn(self, project)
    }

    /// Resolves CLI/plugin task selectors against every task reachable from
    /// `root`'s tree (`spec.md §4.4`, `resolve_tasks`).
    ///
    /// Unlike the original (which `break`s after the first matching
    /// selector per task, silently dropping a task that matches more than
    /// one selector from some selectors' "matched" accounting), this
    /// collects the full match set for every selector before validating
    /// coverage, per `spec.md §4.4`: "return the unique matched tasks".
    pub fn resolve_tasks(&self, root: ProjectId, selectors: &[String]) -> Result<Vec<TaskId>, String> {
        let root_name = self.project(root).map(|p| p.name().to_string()).unwrap_or_default();
        let mut matched: BTreeSet<TaskId> = BTreeSet::new();
        let mut unmatched: BTreeSet<&str> = selectors.iter().map(String::as_str).collect();

        for task_id in self.iter_all_tasks(root) {
            let task = self.task(task_id).expect("just listed");
            let path = self.task_path(task_id);
            for selector in selectors {
                if selector_matches(selector, &path, task.group.as_deref(), &root_name) {
                    matched.insert(task_id);
                    unmatched.remove(selector.as_str());
                }
            }
        }

        if !unmatched.is_empty() {
            let mut names: Vec<&str> = unmatched.into_iter().collect();
            names.sort_unstable();
            return Err(format!("unmatched selectors: {}", names.join(", ")));
        }

        Ok(matched.into_iter().collect())
    }
}

/// A selector matches a task under any of the three forms in
/// `spec.md §4.4`:
/// - `:group` — `task.group == group`.
/// - `:project:…:name` — exact `task.path`, anchored at the resolution
///   root (`root_name + selector`).
/// - `name` — the trailing segment of `task.path`, or an exact `task.path`.
fn selector_matches(selector: &str, task_path: &str, task_group: Option<&str>, root_name: &str) -> bool {
    if task_path == selector {
        return true;
    }
    if let Some(rest) = selector.strip_prefix(':') {
        if task_group == Some(rest) {
            return true;
        }
        if task_path == format!("{root_name}{selector}") {
            return true;
        }
        return false;
    }
    task_path
        .rsplit(':')
        .next()
        .map(|trailing| trailing == selector)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_path_joins_project_chain() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let app = env.add_project(root, "app").unwrap();
        let task = env.add_task(app, "build").unwrap();
        assert_eq!(env.task_path(task), "root:app:build");
    }

    #[test]
    fn add_task_rejects_duplicate_names() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        env.add_task(root, "build").unwrap();
        assert!(env.add_task(root, "build").is_err());
    }

    #[test]
    fn resolve_tasks_matches_group_and_trailing_name() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let app = env.add_project(root, "app").unwrap();
        let lib = env.add_project(root, "lib").unwrap();

        let app_build = env.add_task(app, "build").unwrap();
        let app_run = env.add_task(app, "run").unwrap();
        let lib_build = env.add_task(lib, "build").unwrap();
        env.task_mut(app_run).unwrap().group = Some("run".to_string());

        let matched = env
            .resolve_tasks(root, &["build".to_string()])
            .unwrap();
        assert_eq!(matched.len(), 2);
        assert!(matched.contains(&app_build));
        assert!(matched.contains(&lib_build));

        let matched = env.resolve_tasks(root, &[":run".to_string()]).unwrap();
        assert_eq!(matched, vec![app_run]);
    }

    #[test]
    fn resolve_tasks_reports_unmatched_selectors() {
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        env.add_task(root, "build").unwrap();
        let err = env.resolve_tasks(root, &["xyz".to_string()]).unwrap_err();
        assert!(err.contains("xyz"));
    }
}
