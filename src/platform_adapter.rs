//! The only module allowed to branch on OS family.
//!
//! Every other module talks to interpreters, installers and subprocesses
//! through the vocabulary defined here: [`interpreter_path`],
//! [`installer_path`], [`activation_command`], [`resolve_python`] and
//! [`run`]. None of them ever builds a raw shell string or calls
//! [`std::process::Command`] directly.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::PermissionError;

/// Directory under which configuration, the registry and the cache live,
/// per the platform's own convention (resolved via `etcetera`).
#[must_use]
pub fn app_data_dir() -> PathBuf {
    use etcetera::BaseStrategy;

    etcetera::base_strategy::choose_base_strategy()
        .map(|strategy| strategy.data_dir().join("gestvenv"))
        .unwrap_or_else(|_| PathBuf::from(".gestvenv"))
}

/// The absolute path to the interpreter executable inside an environment.
pub fn interpreter_path(env_path: &Path) -> Result<PathBuf, PlatformError> {
    let candidate = if cfg!(windows) {
        env_path.join("Scripts").join("python.exe")
    } else {
        env_path.join("bin").join("python")
    };

    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(PlatformError::NotFound(candidate.display().to_string()))
    }
}

/// The absolute path to an auxiliary executable (e.g. `pip`, `uv`) inside
/// an environment, using the same directory convention as
/// [`interpreter_path`].
pub fn installer_path(env_path: &Path, installer_name: &str) -> Result<PathBuf, PlatformError> {
    let candidate = if cfg!(windows) {
        env_path
            .join("Scripts")
            .join(format!("{installer_name}.exe"))
    } else {
        env_path.join("bin").join(installer_name)
    };

    if candidate.exists() {
        Ok(candidate)
    } else {
        Err(PlatformError::NotFound(candidate.display().to_string()))
    }
}

/// The shell snippet a user must run to activate an environment.
#[must_use]
pub fn activation_command(env_path: &Path) -> String {
    if cfg!(windows) {
        format!("{}", env_path.join("Scripts").join("activate.bat").display())
    } else {
        format!("source {}", env_path.join("bin").join("activate").display())
    }
}

/// Resolve a Python version spec (`"3.11"`, `"python3.11"`, `"python"`, or
/// an absolute path) to a working interpreter by probing a candidate list
/// tailored to the OS family.
pub fn resolve_python(spec: &str) -> Result<PathBuf, PlatformError> {
    let as_path = Path::new(spec);
    if as_path.is_absolute() && as_path.exists() {
        return Ok(as_path.to_path_buf());
    }

    for candidate in candidate_names(spec) {
        if let Some(found) = which(&candidate) {
            return Ok(found);
        }
    }

    if cfg!(windows) {
        if let Some(found) = resolve_via_py_launcher(spec) {
            return Ok(found);
        }
    }

    Err(PlatformError::NotFound(spec.to_string()))
}

fn candidate_names(spec: &str) -> Vec<String> {
    let trimmed = spec.trim_start_matches("python");
    let mut names = vec![spec.to_string()];

    if cfg!(windows) {
        names.push("python.exe".to_string());
    } else {
        names.push(format!("python{trimmed}"));
        names.push("python3".to_string());
        names.push("python".to_string());
    }

    names
}

fn which(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(program);
        candidate.is_file().then_some(candidate)
    })
}

fn resolve_via_py_launcher(spec: &str) -> Option<PathBuf> {
    let version = spec.trim_start_matches("python");
    let output = Command::new("py")
        .arg(format!("-{version}"))
        .arg("-c")
        .arg("import sys; print(sys.executable)")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// The outcome of a [`run`] invocation. Non-zero exit and timeout are
/// ordinary variants, never an `Err`; only a spawn failure is.
#[derive(Clone, Debug)]
pub enum CommandOutcome {
    Completed(CommandResult),
    Failed(CommandResult),
    Timeout { partial_output: CommandResult },
}

/// Captured output and timing of a finished (or killed) child process.
#[derive(Clone, Debug, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// Execute `program` with `args`, optionally in `cwd` and with extra
/// environment variables, killing it if it runs past `timeout`.
///
/// The child always inherits the parent process's environment first; `env`
/// entries are added (or overridden) on top of it, and `env_remove` names
/// are then unset, so a caller can both extend and strip the inherited set.
///
/// Captures stdout/stderr as UTF-8, replacing invalid byte sequences. Never
/// returns `Err` for a non-zero exit or a timeout — both are ordinary
/// [`CommandOutcome`] variants; `Err` is reserved for the process failing
/// to spawn at all.
pub fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &[(&str, &str)],
    timeout: Duration,
) -> Result<CommandOutcome, PlatformError> {
    run_with_env_removed(program, args, cwd, env, &[], timeout)
}

/// Like [`run`], but also unsets every name in `env_remove` from the
/// child's inherited environment (e.g. clearing `PYTHONHOME` before a pip
/// invocation).
pub fn run_with_env_removed(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &[(&str, &str)],
    env_remove: &[&str],
    timeout: Duration,
) -> Result<CommandOutcome, PlatformError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    for (key, value) in env {
        command.env(key, value);
    }
    for key in env_remove {
        command.env_remove(key);
    }

    let start = Instant::now();
    let mut child = command
        .spawn()
        .map_err(|io_error| PlatformError::Io(path_io_error(cwd.unwrap_or(Path::new(program)), io_error)))?;

    let status = wait_with_timeout(&mut child, timeout)
        .map_err(|io_error| PlatformError::Io(path_io_error(Path::new(program), io_error)))?;
    let duration = start.elapsed();

    let output = child.wait_with_output();
    let (stdout, stderr) = match output {
        Ok(output) => (
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ),
        Err(_) => (String::new(), String::new()),
    };

    let Some(status) = status else {
        return Ok(CommandOutcome::Timeout {
            partial_output: CommandResult {
                stdout,
                stderr,
                exit_code: None,
                duration,
            },
        });
    };

    let result = CommandResult {
        stdout,
        stderr,
        exit_code: status.code(),
        duration,
    };

    Ok(if status.success() {
        CommandOutcome::Completed(result)
    } else {
        CommandOutcome::Failed(result)
    })
}

/// Wait for `child` to exit, killing it (SIGTERM then SIGKILL on Unix,
/// `TerminateProcess` on Windows) if `timeout` elapses first.
///
/// Returns `Ok(None)` if the process had to be killed after timing out.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(25);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if start.elapsed() >= timeout {
            kill_process(child);
            let _ = child.wait();
            return Ok(None);
        }

        std::thread::sleep(poll_interval);
    }
}

#[cfg(unix)]
fn kill_process(child: &mut Child) {
    let pid = child.id() as libc::pid_t;
    // SAFETY: `pid` names a process this code just spawned and still holds;
    // sending a signal to it cannot affect unrelated processes.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    std::thread::sleep(Duration::from_millis(500));
    if child.try_wait().ok().flatten().is_none() {
        let _ = child.kill();
    }
}

#[cfg(windows)]
fn kill_process(child: &mut Child) {
    let _ = child.kill();
}

fn path_io_error(path: &Path, io_error: io::Error) -> crate::error::PathIoError {
    crate::error::PathIoError {
        path: path.to_path_buf(),
        io_error,
    }
}

/// Free space remaining on the filesystem containing `path`, in bytes.
///
/// Returns `0` if the probe fails (e.g. the path does not exist yet); the
/// Diagnostic Engine treats that as "unknown" rather than failing outright.
#[must_use]
pub fn free_disk_bytes(path: &Path) -> u64 {
    #[cfg(unix)]
    {
        free_disk_bytes_unix(path).unwrap_or(0)
    }
    #[cfg(windows)]
    {
        free_disk_bytes_windows(path).unwrap_or(0)
    }
}

#[cfg(unix)]
fn free_disk_bytes_unix(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_os_str().to_str()?).ok()?;
    let mut statvfs = MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is a valid NUL-terminated C string and `statvfs` points
    // at a correctly-sized, properly-aligned buffer for `libc::statvfs` to fill.
    let result = unsafe { libc::statvfs(c_path.as_ptr(), statvfs.as_mut_ptr()) };
    if result != 0 {
        return None;
    }
    // SAFETY: `libc::statvfs` returned success, so the buffer is initialized.
    let statvfs = unsafe { statvfs.assume_init() };
    Some(u64::from(statvfs.f_bavail) * u64::try_from(statvfs.f_frsize).ok()?)
}

#[cfg(windows)]
fn free_disk_bytes_windows(_path: &Path) -> Option<u64> {
    None
}

/// Total size, in bytes, of all files under `path`.
#[must_use]
pub fn directory_size_bytes(path: &Path) -> u64 {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

/// The read/write/execute/existence bits observed for `path`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PermissionSnapshot {
    pub exists: bool,
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

/// Probe `path` for read/write/execute access, without mutating anything.
pub fn check_permissions(path: &Path) -> Result<PermissionSnapshot, PermissionCheckError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(io_error) if io_error.kind() == io::ErrorKind::NotFound => {
            return Ok(PermissionSnapshot::default());
        }
        Err(io_error) => {
            return Err(PermissionCheckError {
                path: path.to_path_buf(),
                io_error,
            });
        }
    };

    let read = std::fs::File::open(path).is_ok() || metadata.is_dir();
    let write = !metadata.permissions().readonly();

    #[cfg(unix)]
    let execute = {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    };
    #[cfg(windows)]
    let execute = metadata.is_dir()
        || path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));

    Ok(PermissionSnapshot {
        exists: true,
        read,
        write,
        execute,
    })
}

/// Platform-adapter-level failures: a requested interpreter/installer was
/// not found, a permission probe failed outright, or an underlying I/O
/// error occurred spawning or waiting on a child process.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{0} could not be found")]
    NotFound(String),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Io(#[from] crate::error::PathIoError),
}

/// An I/O error encountered while probing filesystem permissions.
#[derive(Debug)]
pub struct PermissionCheckError {
    pub path: PathBuf,
    pub io_error: io::Error,
}

impl std::fmt::Display for PermissionCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to check permissions on {:?}: {}", self.path, self.io_error)
    }
}

impl std::error::Error for PermissionCheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.io_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn interpreter_path_reports_not_found_for_empty_env() {
        let dir = tempfile::tempdir().unwrap();
        let result = interpreter_path(dir.path());
        assert!(matches!(result, Err(PlatformError::NotFound(_))));
    }

    #[test]
    fn activation_command_matches_os_family() {
        let dir = Path::new("/tmp/envs/demo");
        let command = activation_command(dir);
        if cfg!(windows) {
            assert!(command.contains("activate.bat"));
        } else {
            assert!(command.starts_with("source "));
        }
    }

    #[test]
    fn run_captures_successful_output() {
        let program = if cfg!(windows) { "cmd" } else { "echo" };
        let args: &[&str] = if cfg!(windows) {
            &["/C", "echo hello"]
        } else {
            &["hello"]
        };

        let outcome = run(program, args, None, &[], Duration::from_secs(5)).unwrap();
        match outcome {
            CommandOutcome::Completed(result) => assert!(result.stdout.contains("hello")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn run_reports_non_zero_exit_without_erroring() {
        let program = if cfg!(windows) { "cmd" } else { "false" };
        let args: &[&str] = if cfg!(windows) { &["/C", "exit 1"] } else { &[] };

        let outcome = run(program, args, None, &[], Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(_)));
    }

    #[test]
    fn run_kills_process_that_exceeds_timeout() {
        let program = if cfg!(windows) { "cmd" } else { "sleep" };
        let args: &[&str] = if cfg!(windows) { &["/C", "ping -n 5 127.0.0.1"] } else { &["5"] };

        let outcome = run(program, args, None, &[], Duration::from_millis(100)).unwrap();
        assert!(matches!(outcome, CommandOutcome::Timeout { .. }));
    }

    #[test]
    fn directory_size_bytes_sums_file_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"1234567890").unwrap();
        assert_eq!(directory_size_bytes(dir.path()), 15);
    }

    #[test]
    fn check_permissions_on_missing_path_is_all_false() {
        let snapshot = check_permissions(Path::new("/does/not/exist/at/all")).unwrap();
        assert_eq!(snapshot, PermissionSnapshot::default());
    }
}
