// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! Persists whether a task's inputs changed since its last successful run
//! (`spec.md §4.6`, "State tracker"). Grounded on the original's
//! `model/state_tracker.py` (`SqliteStateTracker`/`NoStateTracker`) and, for
//! the embedded-store choice, the teacher's `sharded_lmdb` crate (same
//! role, different engine — see `DESIGN.md`).

use kahmi_core::{Task, TaskInputs};
use kahmi_hashing::FORCE_RERUN_SENTINEL;
use parking_lot::Mutex;
use rusqlite::Connection;

/// Decides whether a task needs to rerun and records the outcome of a run
/// (`spec.md §4.6`).
pub trait StateTracker: Send + Sync {
    /// True iff the stored fingerprint for `task.path` differs from
    /// `inputs.fingerprint()`, or no record exists.
    fn task_inputs_changed(&self, task_path: &str, inputs: &TaskInputs) -> bool;

    /// On success, stores `task.path → fingerprint`; on failure, stores the
    /// force-rerun sentinel so the task reruns unconditionally next time.
    fn task_finished(&self, task: &Task, task_path: &str, inputs: &TaskInputs);
}

/// Always reports changed and stores nothing — used when incremental
/// builds are disabled (`spec.md §4.6`, "A null tracker").
pub struct NoStateTracker;

impl StateTracker for NoStateTracker {
    fn task_inputs_changed(&self, _task_path: &str, _inputs: &TaskInputs) -> bool {
        true
    }

    fn task_finished(&self, _task: &Task, _task_path: &str, _inputs: &TaskInputs) {}
}

/// Backs the tracker with a SQLite-embedded key/value table under
/// `<root_project.directory>/.build/.kahmi/build_state.db`, namespace
/// `tasks` (`spec.md §6`, "Persisted state layout").
pub struct SqliteStateTracker {
    connection: Mutex<Connection>,
}

impl SqliteStateTracker {
    pub fn open(path: &std::path::Path) -> Result<SqliteStateTracker, String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| format!("creating {}: {err}", parent.display()))?;
        }
        let connection =
            Connection::open(path).map_err(|err| format!("opening {}: {err}", path.display()))?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS tasks (path TEXT PRIMARY KEY, fingerprint TEXT NOT NULL)",
                [],
            )
            .map_err(|err| format!("creating tasks table: {err}"))?;
        Ok(SqliteStateTracker {
            connection: Mutex::new(connection),
        })
    }

    fn load(&self, task_path: &str) -> Option<String> {
        let connection = self.connection.lock();
        connection
            .query_row(
                "SELECT fingerprint FROM tasks WHERE path = ?1",
                [task_path],
                |row| row.get(0),
            )
            .ok()
    }

    fn store(&self, task_path: &str, fingerprint: &str) {
        let connection = self.connection.lock();
        if let Err(err) = connection.execute(
            "INSERT INTO tasks (path, fingerprint) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET fingerprint = excluded.fingerprint",
            rusqlite::params![task_path, fingerprint],
        ) {
            log::warn!("failed to persist build state for {task_path:?}: {err}");
        }
    }
}

impl StateTracker for SqliteStateTracker {
    fn task_inputs_changed(&self, task_path: &str, inputs: &TaskInputs) -> bool {
        match self.load(task_path) {
            Some(stored) => stored != inputs.fingerprint(),
            None => true,
        }
    }

    fn task_finished(&self, task: &Task, task_path: &str, inputs: &TaskInputs) {
        if task.exception.is_some() {
            self.store(task_path, FORCE_RERUN_SENTINEL);
        } else {
            self.store(task_path, &inputs.fingerprint());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kahmi_core::{Environment, TaskError};
    use std::path::PathBuf;

    fn open_tracker() -> (tempfile::TempDir, SqliteStateTracker) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join(".build/.kahmi/build_state.db");
        let tracker = SqliteStateTracker::open(&db_path).unwrap();
        (dir, tracker)
    }

    #[test]
    fn unrecorded_task_is_always_changed() {
        let (_dir, tracker) = open_tracker();
        assert!(tracker.task_inputs_changed(":root:build", &TaskInputs::default()));
    }

    #[test]
    fn matching_fingerprint_reports_unchanged() {
        let (_dir, tracker) = open_tracker();
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let task_id = env.add_task(root, "build").unwrap();
        let task = env.task(task_id).unwrap();
        let inputs = task.get_task_inputs().unwrap();

        tracker.task_finished(task, "root:build", &inputs);
        assert!(!tracker.task_inputs_changed("root:build", &inputs));
    }

    #[test]
    fn failed_task_forces_a_rerun_next_time() {
        let (_dir, tracker) = open_tracker();
        let mut env = Environment::new(PathBuf::from("/tmp/root"));
        let root = env.root_project_id();
        let task_id = env.add_task(root, "build").unwrap();
        let task = env.task_mut(task_id).unwrap();
        task.exception = Some(TaskError::action("boom"));
        let inputs = task.get_task_inputs().unwrap();

        tracker.task_finished(task, "root:build", &inputs);
        assert!(tracker.task_inputs_changed("root:build", &inputs));
    }

    #[test]
    fn no_state_tracker_always_reports_changed() {
        let tracker = NoStateTracker;
        assert!(tracker.task_inputs_changed("x", &TaskInputs::default()));
    }
}
