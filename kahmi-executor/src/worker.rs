use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use kahmi_core::{BuiltinRegistry, ProjectId, Task, TaskError, TaskErrorKind, TaskId};
use tokio::process::Command;

use crate::fifo::{create_fifo_with_timeout, stream_fifo_output, unique_fifo_path, DEFAULT_FIFO_TIMEOUT};
use crate::worker_task::{WorkerTaskInput, WorkerTaskResult};

/// argv[1] marker that re-invokes the current binary in worker mode
/// (`spec.md §4.7`, "Worker protocol"). `kahmi-cli`'s `main()` checks for
/// this before doing anything else.
pub const WORKER_ARG: &str = "__kahmi_worker__";

/// Runs `input` in a worker subprocess (a re-exec of the current binary in
/// worker mode), streaming its merged stdout/stderr through a FIFO to
/// `on_output` as it arrives, and returns the worker's reported result.
///
/// Grounded on the original's `executors/utils/mp.py` (`run_in_process`),
/// redesigned per `spec.md §4.7` to use a FIFO instead of an anonymous pipe
/// and a real OS process instead of `multiprocessing.Process`.
pub async fn run_in_worker(
    input: &WorkerTaskInput,
    mut on_output: impl FnMut(&[u8]) + Send + 'static,
) -> Result<WorkerTaskResult, TaskError> {
    let fifo_path = unique_fifo_path();
    create_fifo_with_timeout(&fifo_path, DEFAULT_FIFO_TIMEOUT)?;

    let input_file = write_temp_json(input).map_err(startup_error)?;
    let output_file = tempfile::NamedTempFile::new().map_err(startup_error)?;

    let exe = std::env::current_exe().map_err(startup_error)?;
    let mut child = Command::new(exe)
        .arg(WORKER_ARG)
        .arg(input_file.path())
        .arg(output_file.path())
        .arg(&fifo_path)
        .stdin(std::process::Stdio::null())
        .spawn()
        .map_err(startup_error)?;

    let reader_path = fifo_path.clone();
    let reader = tokio::task::spawn_blocking(move || {
        let mut collected = Vec::new();
        let result = stream_fifo_output(&reader_path, |chunk| {
            collected.extend_from_slice(chunk);
            on_output(chunk);
        });
        result.map(|_| collected)
    });

    let status = child.wait().await.map_err(startup_error)?;
    let _ = std::fs::remove_file(&fifo_path);
    let captured = reader
        .await
        .map_err(startup_error)?
        .map_err(startup_error)?;
    let _ = captured;

    if !status.success() {
        return Ok(WorkerTaskResult::infrastructure_failure(
            input,
            TaskError {
                kind: TaskErrorKind::WorkerStartup,
                message: format!("worker process exited with {status}"),
            },
        ));
    }

    let result_json = std::fs::read_to_string(output_file.path()).map_err(startup_error)?;
    serde_json::from_str(&result_json).map_err(startup_error)
}

fn startup_error<E: std::fmt::Display>(err: E) -> TaskError {
    TaskError {
        kind: TaskErrorKind::WorkerStartup,
        message: err.to_string(),
    }
}

fn write_temp_json(value: &WorkerTaskInput) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(serde_json::to_string(value)?.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// The worker-side entrypoint. If the process was invoked with
/// [`WORKER_ARG`] as `argv[1]`, runs the task described by `argv[2]`,
/// streams its output through the FIFO at `argv[4]`, writes the result to
/// `argv[3]`, and exits — never returning to the caller. Otherwise returns
/// so the caller proceeds as the normal CLI.
pub fn maybe_run_worker(args: &[String]) -> ! {
    let input_path = PathBuf::from(&args[2]);
    let output_path = PathBuf::from(&args[3]);
    let fifo_path = PathBuf::from(&args[4]);

    let exit_code = match run_worker_body(&input_path, &output_path, &fifo_path) {
        Ok(()) => 0,
        Err(message) => {
            eprintln!("kahmi worker: {message}");
            1
        }
    };
    std::process::exit(exit_code);
}

fn run_worker_body(
    input_path: &std::path::Path,
    output_path: &std::path::Path,
    fifo_path: &std::path::Path,
) -> Result<(), String> {
    let input_json = std::fs::read_to_string(input_path).map_err(|e| e.to_string())?;
    let input: WorkerTaskInput = serde_json::from_str(&input_json).map_err(|e| e.to_string())?;

    // Opens for writing; blocks until the parent opens its read end.
    let fifo = std::fs::OpenOptions::new()
        .write(true)
        .open(fifo_path)
        .map_err(|e| e.to_string())?;
    redirect_stdio_to(&fifo)?;
    close_stdin();

    let mut task = Task::new(TaskId::detached(), ProjectId::detached(), input.name.clone());
    task.description = input.description.clone();
    task.group = input.group.clone();
    task.default = input.default;
    task.public = input.public;
    task.sync_io = input.sync_io;
    for action in input.actions.clone() {
        task.performs(action);
    }

    let registry = BuiltinRegistry::new();
    task.execute(&registry);

    let result = WorkerTaskResult {
        executed: task.executed,
        did_work: task.did_work,
        exception: task.exception,
        description: task.description,
        group: task.group,
        default: task.default,
        public: task.public,
        sync_io: task.sync_io,
    };
    let result_json = serde_json::to_string(&result).map_err(|e| e.to_string())?;
    std::fs::write(output_path, result_json).map_err(|e| e.to_string())?;
    Ok(())
}

fn redirect_stdio_to(fifo: &std::fs::File) -> Result<(), String> {
    let fd = fifo.as_raw_fd();
    nix::unistd::dup2(fd, 1).map_err(|e| e.to_string())?;
    nix::unistd::dup2(fd, 2).map_err(|e| e.to_string())?;
    Ok(())
}

fn close_stdin() {
    let _ = nix::unistd::close(0);
}
