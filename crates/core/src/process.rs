//! External process launching and tracking.
//!
//! Every process started through a [`ProcessLauncher`] is kept in a tracked set
//! until a reaper thread observes its exit, so a host can tear all of them down
//! at shutdown with [`ProcessLauncher::destroy_all`].

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// How often reaper threads poll for process exit.
const REAP_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start reaper thread for pid {pid}: {source}")]
    Reaper {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitState {
    Running,
    /// `None` when the process was terminated by a signal.
    Exited(Option<i32>),
}

#[derive(Debug)]
struct TrackedProcess {
    pid: u32,
    program: String,
    child: Mutex<Child>,
    exit: Mutex<ExitState>,
    exited: Condvar,
    destroyed: AtomicBool,
}

impl TrackedProcess {
    fn record_exit(&self, code: Option<i32>) {
        let mut exit = self.exit.lock().unwrap_or_else(|e| e.into_inner());
        *exit = ExitState::Exited(code);
        self.exited.notify_all();
    }

    fn wait(&self) -> Option<i32> {
        let mut exit = self.exit.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let ExitState::Exited(code) = *exit {
                return code;
            }
            exit = self.exited.wait(exit).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn has_exited(&self) -> bool {
        !matches!(*self.exit.lock().unwrap_or_else(|e| e.into_inner()), ExitState::Running)
    }

    fn destroy(&self) {
        if self.has_exited() {
            return;
        }
        self.destroyed.store(true, Ordering::SeqCst);
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match child.kill() {
            Ok(()) => tracing::debug!(pid = self.pid, program = %self.program, "destroyed process"),
            // Already reaped between the check and the kill.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => tracing::warn!(pid = self.pid, error = %e, "failed to destroy process"),
        }
    }
}

type TrackedSet = Arc<Mutex<HashMap<u32, Arc<TrackedProcess>>>>;

/// Starts external processes and keeps track of the ones still alive.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    tracked: TrackedSet,
}

/// A launched process together with its not-yet-drained output pipes.
#[derive(Debug)]
pub struct ProcessHandle {
    process: Arc<TrackedProcess>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

/// Cloneable kill switch for a launched process; used by cancellation closures.
#[derive(Debug, Clone)]
pub struct ProcessKiller {
    process: Arc<TrackedProcess>,
}

impl ProcessKiller {
    pub fn destroy(&self) {
        self.process.destroy();
    }
}

/// Everything a process produced, including any trouble reading it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub destroyed: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.destroyed
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `program` with `args` and begin tracking it.
    ///
    /// Returns as soon as the process is spawned; a background reaper thread
    /// removes it from the tracked set once it exits.
    pub fn launch<I, S>(
        &self,
        program: impl AsRef<OsStr>,
        args: I,
        working_dir: Option<&Path>,
    ) -> Result<ProcessHandle, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program_name = program.as_ref().to_string_lossy().to_string();
        let mut command = Command::new(program.as_ref());
        command.args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|source| ProcessError::Spawn { program: program_name.clone(), source })?;
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let process = Arc::new(TrackedProcess {
            pid,
            program: program_name.clone(),
            child: Mutex::new(child),
            exit: Mutex::new(ExitState::Running),
            exited: Condvar::new(),
            destroyed: AtomicBool::new(false),
        });
        self.lock_tracked().insert(pid, Arc::clone(&process));
        tracing::debug!(pid, program = %program_name, "launched process");

        let reaped = Arc::clone(&process);
        let tracked = Arc::clone(&self.tracked);
        let spawned = thread::Builder::new()
            .name(format!("helios-reaper-{pid}"))
            .spawn(move || reap(reaped, tracked));
        if let Err(source) = spawned {
            process.destroy();
            untrack(&self.tracked, &process);
            return Err(ProcessError::Reaper { pid, source });
        }

        Ok(ProcessHandle { process, stdout, stderr })
    }

    /// Drain stdout and stderr completely, then wait for exit.
    ///
    /// Blocks the calling thread. Read failures are appended to the captured
    /// stderr instead of being returned, so callers always get a transcript.
    pub fn read_all(&self, mut handle: ProcessHandle) -> ProcessOutput {
        let mut notes = Vec::new();

        // stderr drains on its own thread so a full pipe cannot stall stdout.
        let stderr_reader = handle.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let err = pipe.read_to_end(&mut buf).err();
                (buf, err)
            })
        });

        let mut stdout = Vec::new();
        if let Some(mut pipe) = handle.stdout.take() {
            if let Err(e) = pipe.read_to_end(&mut stdout) {
                notes.push(format!("failed to read stdout: {e}"));
            }
        }

        let mut stderr = match stderr_reader.map(|reader| reader.join()) {
            Some(Ok((buf, err))) => {
                if let Some(e) = err {
                    notes.push(format!("failed to read stderr: {e}"));
                }
                buf
            }
            Some(Err(_)) => {
                notes.push("stderr reader panicked".to_string());
                Vec::new()
            }
            None => Vec::new(),
        };

        let exit_code = handle.process.wait();
        for note in notes {
            tracing::warn!(pid = handle.process.pid, "{note}");
            stderr.extend_from_slice(format!("\n[helios] {note}\n").as_bytes());
        }

        ProcessOutput {
            stdout,
            stderr,
            exit_code,
            destroyed: handle.process.destroyed.load(Ordering::SeqCst),
        }
    }

    /// Forcibly terminate every tracked process.
    pub fn destroy_all(&self) {
        let snapshot: Vec<Arc<TrackedProcess>> = self.lock_tracked().values().cloned().collect();
        if !snapshot.is_empty() {
            tracing::info!(count = snapshot.len(), "destroying tracked processes");
        }
        for process in snapshot {
            process.destroy();
        }
    }

    /// Number of processes that have not been reaped yet.
    pub fn tracked_count(&self) -> usize {
        self.lock_tracked().len()
    }

    fn lock_tracked(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<TrackedProcess>>> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.process.pid
    }

    pub fn killer(&self) -> ProcessKiller {
        ProcessKiller { process: Arc::clone(&self.process) }
    }
}

fn reap(process: Arc<TrackedProcess>, tracked: TrackedSet) {
    loop {
        let polled = {
            let mut child = process.child.lock().unwrap_or_else(|e| e.into_inner());
            child.try_wait()
        };
        match polled {
            Ok(Some(status)) => {
                tracing::debug!(pid = process.pid, code = ?status.code(), "process exited");
                process.record_exit(status.code());
                break;
            }
            Ok(None) => thread::sleep(REAP_INTERVAL),
            Err(e) => {
                tracing::warn!(pid = process.pid, error = %e, "failed to poll process");
                process.record_exit(None);
                break;
            }
        }
    }
    untrack(&tracked, &process);
}

/// Drop `process` from the tracked set unless its pid already belongs to a newer process.
fn untrack(tracked: &Mutex<HashMap<u32, Arc<TrackedProcess>>>, process: &Arc<TrackedProcess>) {
    let mut tracked = tracked.lock().unwrap_or_else(|e| e.into_inner());
    if tracked.get(&process.pid).is_some_and(|current| Arc::ptr_eq(current, process)) {
        tracked.remove(&process.pid);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_until_untracked(launcher: &ProcessLauncher) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.tracked_count() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn read_all_captures_both_streams_and_exit_code() {
        let launcher = ProcessLauncher::new();
        let handle = launcher
            .launch("/bin/sh", ["-c", "echo out; echo err 1>&2; exit 3"], None)
            .expect("launch sh");
        let output = launcher.read_all(handle);
        assert_eq!(output.stdout_lossy().trim(), "out");
        assert_eq!(output.stderr_lossy().trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        wait_until_untracked(&launcher);
        assert_eq!(launcher.tracked_count(), 0);
    }

    #[test]
    fn large_output_on_both_pipes_does_not_deadlock() {
        let launcher = ProcessLauncher::new();
        let script = "i=0; while [ $i -lt 4000 ]; do echo 0123456789abcdef; echo 0123456789abcdef 1>&2; i=$((i+1)); done";
        let handle = launcher.launch("/bin/sh", ["-c", script], None).expect("launch sh");
        let output = launcher.read_all(handle);
        assert!(output.success());
        assert_eq!(output.stdout.len(), 17 * 4000);
        assert_eq!(output.stderr.len(), 17 * 4000);
    }

    #[test]
    fn destroy_all_terminates_running_processes() {
        let launcher = ProcessLauncher::new();
        let handle = launcher.launch("/bin/sh", ["-c", "exec sleep 30"], None).expect("launch sleep");
        assert_eq!(launcher.tracked_count(), 1);
        launcher.destroy_all();
        let output = launcher.read_all(handle);
        assert!(output.destroyed);
        assert!(!output.success());
        wait_until_untracked(&launcher);
        assert_eq!(launcher.tracked_count(), 0);
    }

    #[test]
    fn exited_process_does_not_untrack_a_reused_pid() {
        let launcher = ProcessLauncher::new();
        let first = launcher.launch("/bin/sh", ["-c", "exec sleep 30"], None).expect("launch first");
        let second = launcher.launch("/bin/sh", ["-c", "exec sleep 30"], None).expect("launch second");
        // Pretend the kernel handed the first pid to the second process.
        launcher.lock_tracked().insert(first.pid(), Arc::clone(&second.process));

        untrack(&launcher.tracked, &first.process);
        let current = launcher.lock_tracked().get(&first.pid()).cloned().expect("still tracked");
        assert!(Arc::ptr_eq(&current, &second.process));

        untrack(&launcher.tracked, &second.process);
        assert!(launcher.lock_tracked().get(&second.pid()).is_none());

        first.killer().destroy();
        second.killer().destroy();
        assert!(launcher.read_all(first).destroyed);
        assert!(launcher.read_all(second).destroyed);
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let launcher = ProcessLauncher::new();
        let err = launcher
            .launch("/definitely/not/a/program", Vec::<String>::new(), None)
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
