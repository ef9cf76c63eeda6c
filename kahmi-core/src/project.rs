use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::configurable::Configurable;
use crate::ids::{ProjectId, TaskId};

/// A node in the project tree: a directory plus the tasks and sub-projects
/// declared within it (`spec.md §3`, "Project"; grounded on the original's
/// `model/project.py`).
pub struct Project {
    id: ProjectId,
    name: String,
    directory: PathBuf,
    parent: Option<ProjectId>,
    children: BTreeMap<String, ProjectId>,
    tasks: BTreeMap<String, TaskId>,
    extensions: BTreeMap<String, Box<dyn Any + Send + Sync>>,
}

/// Default build output directory name, relative to a project's directory
/// (`spec.md §6`, "Persisted state layout"; the original's
/// `DEFAULT_BUILD_DIRECTORY_NAME`).
pub const DEFAULT_BUILD_DIRECTORY_NAME: &str = ".build";

impl Project {
    pub(crate) fn new(
        id: ProjectId,
        parent: Option<ProjectId>,
        name: String,
        directory: PathBuf,
    ) -> Project {
        Project {
            id,
            name,
            directory,
            parent,
            children: BTreeMap::new(),
            tasks: BTreeMap::new(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn build_directory(&self) -> PathBuf {
        self.directory.join(DEFAULT_BUILD_DIRECTORY_NAME)
    }

    pub fn parent(&self) -> Option<ProjectId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, ProjectId)> {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn tasks(&self) -> impl Iterator<Item = (&str, TaskId)> {
        self.tasks.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        self.tasks.get(name).copied()
    }

    pub(crate) fn insert_child(&mut self, name: String, id: ProjectId) -> Result<(), String> {
        if self.children.contains_key(&name) {
            return Err(format!("project name {name:?} is already in use"));
        }
        self.children.insert(name, id);
        Ok(())
    }

    pub(crate) fn insert_task(&mut self, name: String, id: TaskId) -> Result<(), String> {
        if self.tasks.contains_key(&name) {
            return Err(format!("task name {name:?} already in use"));
        }
        self.tasks.insert(name, id);
        Ok(())
    }

    /// Registers a plugin extension. Write-once: re-registering an existing
    /// name is an error (`spec.md §3`, "Project" invariants).
    pub fn register_extension<T>(&mut self, name: &str, value: T) -> Result<(), String>
    where
        T: Any + Send + Sync,
    {
        if self.extensions.contains_key(name) {
            return Err(format!(
                "extension {name:?} already registered to project {:?}",
                self.name
            ));
        }
        self.extensions.insert(name.to_string(), Box::new(value));
        Ok(())
    }

    pub fn extension<T: Any>(&self, name: &str) -> Option<&T> {
        self.extensions.get(name)?.downcast_ref::<T>()
    }
}

impl Configurable for Project {}
