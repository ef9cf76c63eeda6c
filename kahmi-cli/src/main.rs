// Licensed under the Apache License, Version 2.0.
#![deny(warnings)]

mod script_host;

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use kahmi_core::Environment;
use kahmi_executor::{maybe_run_worker, Executor, ExecutorConfig, WORKER_ARG};
use kahmi_graph::BuildGraph;
use kahmi_listener::DefaultListener;
use kahmi_state::{SqliteStateTracker, StateTracker};
use script_host::{DemoScriptHost, ScriptHost};

/// The minimal CLI surface of `spec.md §6` — everything beyond this (a real
/// script language, plugin-library discovery, remote execution flags) is a
/// Non-goal of the core this binary wraps.
#[derive(Parser)]
#[command(name = "kahmi", about = "A task-graph build engine")]
struct Opt {
    /// Script path, relative to the current directory.
    #[arg(short = 'f', long = "file", default_value = "build.kmi")]
    file: PathBuf,

    /// Increase log level (repeatable): warn, info, debug, trace.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Parallelism level `P` (`spec.md §5`).
    #[arg(short = 'j', long = "jobs", default_value_t = 1)]
    jobs: usize,

    /// Stream task output rather than buffering it for delivery at
    /// `task_execute_end`.
    #[arg(short = 's', long = "no-capture")]
    no_capture: bool,

    /// Task selectors (`spec.md §4.4`); defaults to every `default == true`
    /// task when empty.
    targets: Vec<String>,
}

#[tokio::main]
async fn main() {
    // A worker re-exec of this very binary (`spec.md §4.7`, "Worker
    // protocol") never reaches `Opt::parse` — its argv doesn't match the
    // CLI surface at all.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some(WORKER_ARG) {
        maybe_run_worker(&args);
    }

    let opt = Opt::parse();
    init_logging(opt.verbose);

    if let Err(message) = run(opt).await {
        log::error!("{message}");
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

async fn run(opt: Opt) -> Result<(), String> {
    let root_dir = std::env::current_dir().map_err(|err| format!("reading current directory: {err}"))?;
    let mut env = Environment::new(root_dir);
    let root = env.root_project_id();

    DemoScriptHost.run_file(&mut env, root, &opt.file)?;

    let mut graph = BuildGraph::new();
    if opt.targets.is_empty() {
        for task in env.iter_all_tasks(root) {
            graph.add_task(&env, task);
        }
        graph.select_defaults(&env, root);
    } else {
        let selected = env.resolve_tasks(root, &opt.targets)?;
        for task in &selected {
            graph.add_task(&env, *task);
            graph.select(*task);
        }
    }

    let state_db = env.project(root).expect("root exists").build_directory().join(".kahmi/build_state.db");
    let tracker = SqliteStateTracker::open(&state_db)?;
    let tracker: &dyn StateTracker = &tracker;
    let listener = DefaultListener::new(false);

    let executor = Executor::new(ExecutorConfig {
        parallelism: opt.jobs.max(1),
        capture_output: !opt.no_capture,
    });

    executor
        .execute(&mut env, &graph, tracker, &listener)
        .await
        .map_err(|err| err.to_string())
}
