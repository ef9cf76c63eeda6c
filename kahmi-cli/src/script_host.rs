use std::path::Path;
use std::sync::Arc;

use kahmi_core::{Action, Configurable, Environment, Marker, ProjectId, Property, Provider};

/// Consumed by the CLI to turn a build script into tasks (`spec.md §6`,
/// "Script Host interface"). A real script language is out of scope
/// (`spec.md §9`, Non-goals) — `globals` is dropped from the original's
/// `run_file(project, globals, filename)` signature since there is no
/// expression evaluator to seed with builtins.
pub trait ScriptHost {
    fn run_file(&self, env: &mut Environment, project: ProjectId, filename: &Path) -> Result<(), String>;
}

/// Stands in for a real script host by always wiring the producer/consumer
/// example from `spec.md §8` Scenario S1, regardless of what `filename`
/// names. This is the one piece of the CLI surface the spec explicitly
/// excludes from scope; a real implementation would parse `filename` and
/// evaluate it against `env`.
pub struct DemoScriptHost;

impl ScriptHost for DemoScriptHost {
    fn run_file(&self, env: &mut Environment, project: ProjectId, filename: &Path) -> Result<(), String> {
        log::info!(
            "demo script host: {} is not parsed (script parsing is out of scope); \
             wiring the producer/consumer example from spec.md \u{a7}8 S1 instead",
            filename.display()
        );

        let build_dir = env
            .project(project)
            .ok_or_else(|| format!("no such project: {project:?}"))?
            .build_directory();
        std::fs::create_dir_all(&build_dir).map_err(|err| format!("creating {}: {err}", build_dir.display()))?;
        let output_path = build_dir.join("a.txt");
        let output_path_str = output_path.display().to_string();

        let producer = env.add_task(project, "producer")?;
        let content_property: Arc<Property<String>> = env
            .task_mut(producer)
            .expect("just created")
            .declare_property("content", vec![Marker::Input]);
        content_property
            .set(Provider::of("hello".to_string()))
            .map_err(|err| err.to_string())?;
        let output_property: Arc<Property<String>> = env
            .task_mut(producer)
            .expect("just created")
            .declare_property("output_file", vec![Marker::Output]);
        output_property
            .set(Provider::of(output_path_str.clone()))
            .map_err(|err| err.to_string())?;

        env.task_mut(producer).expect("just created").configure(|task| {
            task.description = Some("writes content to output_file".to_string());
            task.group = Some("build".to_string());
            task.performs(Action::command(vec![vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("printf '%s' {} > {}", shell_quote("hello"), shell_quote(&output_path_str)),
            ]]));
        });

        let consumer = env.add_task(project, "consumer")?;
        let input_property: Arc<Property<String>> = env
            .task_mut(consumer)
            .expect("just created")
            .declare_property("input_file", vec![Marker::InputFile]);
        input_property.bind(&output_property).map_err(|err| err.to_string())?;

        env.task_mut(consumer).expect("just created").configure(|task| {
            task.description = Some("reads input_file".to_string());
            task.group = Some("run".to_string());
            task.depends_on([producer]);
            task.performs(Action::command(vec![vec!["cat".to_string(), output_path_str.clone()]]));
        });

        Ok(())
    }
}

/// Wraps `s` in single quotes for use in a `sh -c` argument, escaping any
/// embedded single quote the POSIX-shell way (`'...'"'"'...'`).
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_file_wires_a_producer_and_a_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = Environment::new(dir.path().to_path_buf());
        let root = env.root_project_id();

        DemoScriptHost.run_file(&mut env, root, Path::new("build.kmi")).unwrap();

        let producer = env.project(root).unwrap().task_id("producer").unwrap();
        let consumer = env.project(root).unwrap().task_id("consumer").unwrap();
        assert!(env.task(consumer).unwrap().dependencies().contains(&producer));
        assert_eq!(env.task(producer).unwrap().actions().len(), 1);
    }

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("a'b"), "'a'\"'\"'b'");
    }
}
