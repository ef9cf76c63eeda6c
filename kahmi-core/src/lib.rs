// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

//! The Task/Project/Environment data model (`spec.md §3`, §4.3-4.4): the
//! build-script-facing object graph that sits on top of the provider/
//! property value layer in `kahmi-provider`.

mod action;
mod configurable;
mod environment;
mod ids;
mod plugin;
mod project;
mod properties;
mod task;
mod task_inputs;

pub use action::{Action, BuiltinFn, BuiltinRegistry};
pub use configurable::Configurable;
pub use environment::Environment;
pub use ids::{ProjectId, TaskId};
pub use plugin::{PluginFn, PluginRegistry};
pub use project::{Project, DEFAULT_BUILD_DIRECTORY_NAME};
pub use properties::ErasedProperty;
pub use task::{Task, TaskError, TaskErrorKind, TaskStatus};
pub use task_inputs::TaskInputs;

// Re-exported so downstream crates (e.g. a script host) can declare
// properties on a `Task` without a direct `kahmi-provider` dependency.
pub use kahmi_provider::{ListProperty, Marker, OwnerId, Property, Provider};
