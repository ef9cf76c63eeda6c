use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::select::{select, FdSet};
use nix::sys::stat::Mode;
use nix::sys::time::TimeVal;
use nix::unistd::mkfifo;

use kahmi_core::{TaskError, TaskErrorKind};

/// Default `T_fifo`: how long the parent waits for `mkfifo` to complete
/// before giving up (`spec.md §4.7`).
pub const DEFAULT_FIFO_TIMEOUT: Duration = Duration::from_secs(5);

/// How long each `select()` call blocks while streaming worker output
/// (`spec.md §4.7`, §5).
pub const SELECT_BUDGET: Duration = Duration::from_millis(10);

/// Creates the named pipe node at `path`, guarded by a timeout
/// (`spec.md §4.7`: "a helper thread calls mkfifo; the main thread waits up
/// to T_fifo seconds"). On timeout, removes the path and reports
/// `FifoTimeout`. `mkfifo` itself essentially never blocks; the timeout
/// exists to bound pathological filesystems (e.g. certain network mounts).
pub fn create_fifo_with_timeout(path: &Path, timeout: Duration) -> Result<(), TaskError> {
    let (tx, rx) = mpsc::channel();
    let worker_path = path.to_path_buf();
    std::thread::spawn(move || {
        let result = mkfifo(&worker_path, Mode::S_IRUSR | Mode::S_IWUSR);
        let _ = tx.send(result.map_err(|errno| errno.to_string()));
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(TaskError {
            kind: TaskErrorKind::WorkerStartup,
            message: format!("mkfifo({}) failed: {message}", path.display()),
        }),
        Err(_timeout) => {
            // Unblock a reader that might already be waiting on the (still
            // nonexistent) node, then give up on this task's worker run.
            let _ = std::fs::File::create(path);
            let _ = std::fs::remove_file(path);
            Err(TaskError {
                kind: TaskErrorKind::FifoTimeout,
                message: format!(
                    "fifo {} was not created within {:?}",
                    path.display(),
                    timeout
                ),
            })
        }
    }
}

/// Opens `path` for reading, sets it non-blocking, and loops reading
/// captured worker output until EOF: `select()` on the fd with a 10 ms
/// budget, then a non-blocking `read(4096)`, handing bytes to `on_output`
/// (`spec.md §4.7`, §5). Intended to run on a blocking-friendly thread —
/// it busy-waits on `select()`'s timeout rather than anything async.
pub fn stream_fifo_output(path: &Path, mut on_output: impl FnMut(&[u8])) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().read(true).open(path)?;
    set_nonblocking(file.as_raw_fd())?;

    let mut buf = [0u8; 4096];
    loop {
        let mut read_set = FdSet::new();
        read_set.insert(file.as_raw_fd());
        let mut timeout = TimeVal::new(0, SELECT_BUDGET.as_micros() as i64);
        let ready = select(None, &mut read_set, None, None, &mut timeout)
            .map_err(|errno| std::io::Error::from_raw_os_error(errno as i32))?;
        if ready == 0 {
            continue;
        }
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => on_output(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(to_io_error)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(to_io_error)?;
    Ok(())
}

fn to_io_error(errno: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}

/// A fresh, unique FIFO path under the system temp directory.
pub fn unique_fifo_path() -> PathBuf {
    std::env::temp_dir().join(format!("kahmi-fifo-{}", uuid::Uuid::new_v4()))
}
