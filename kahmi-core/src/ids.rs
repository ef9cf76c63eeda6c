use kahmi_provider::OwnerId;

/// Opaque arena index for a `Task`, substituting for the original's
/// `weakref.ref(task)` (`spec.md §9`, "Weak backreferences").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

/// Opaque arena index for a `Project`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(pub(crate) u64);

impl From<TaskId> for OwnerId {
    fn from(id: TaskId) -> Self {
        OwnerId::Task(id.0)
    }
}

impl From<ProjectId> for OwnerId {
    fn from(id: ProjectId) -> Self {
        OwnerId::Project(id.0)
    }
}

impl TaskId {
    /// Recovers the `TaskId` that produced `owner`, if `owner` names a task.
    pub fn from_owner(owner: OwnerId) -> Option<TaskId> {
        match owner {
            OwnerId::Task(id) => Some(TaskId(id)),
            OwnerId::Project(_) => None,
        }
    }

    /// An id for a `Task` that was never registered in an `Environment`'s
    /// arena — used by a worker process to rebuild the minimal `Task` it
    /// runs an action list against (`spec.md §4.7`, "Serialization
    /// constraints"). Never collides with an arena-assigned id, since those
    /// are allocated sequentially from zero.
    pub fn detached() -> TaskId {
        TaskId(u64::MAX)
    }
}

impl ProjectId {
    /// The `ProjectId` counterpart of [`TaskId::detached`].
    pub fn detached() -> ProjectId {
        ProjectId(u64::MAX)
    }
}
