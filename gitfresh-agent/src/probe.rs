//! Liveness, detached launch and termination of a process by PID.
//!
//! Unix uses signal delivery (`kill(pid, 0)` to probe, `SIGTERM` to stop).
//! Other platforms look the PID up in the OS process table via `sysinfo`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no such process: {pid}")]
    NoSuchProcess { pid: u32 },

    #[error("permission denied signalling process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Process-level operations the supervisor depends on.
///
/// `is_alive` returns `Ok(())` only for a live process; every negative answer
/// carries its reason, and callers treat all of them as "not running".
pub trait ProcessProbe {
    fn is_alive(&self, pid: u32) -> Result<(), ProbeError>;

    /// Launch `program` detached from the caller and return its PID without
    /// waiting for it to become ready.
    fn start(&self, program: &Path, args: &[String]) -> Result<u32, ProbeError>;

    /// Ask the process to terminate. Does not wait for it to exit.
    fn stop(&self, pid: u32) -> Result<(), ProbeError>;
}

/// [`ProcessProbe`] for real OS processes.
#[derive(Debug, Clone, Default)]
pub struct SystemProbe {
    stdout_log: Option<PathBuf>,
    stderr_log: Option<PathBuf>,
}

impl SystemProbe {
    /// Append the launched process's stdout/stderr to these files instead of
    /// discarding them.
    pub fn with_logs(stdout_log: PathBuf, stderr_log: PathBuf) -> Self {
        Self {
            stdout_log: Some(stdout_log),
            stderr_log: Some(stderr_log),
        }
    }

    fn output(&self, log: Option<&Path>, program: &Path) -> Result<Stdio, ProbeError> {
        let Some(path) = log else {
            return Ok(Stdio::null());
        };
        let spawn_err = |source| ProbeError::Spawn {
            program: program.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(spawn_err)?;
        }
        let file: File = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(spawn_err)?;
        Ok(Stdio::from(file))
    }
}

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> Result<(), ProbeError> {
        platform::is_alive(pid)
    }

    fn start(&self, program: &Path, args: &[String]) -> Result<u32, ProbeError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(self.output(self.stdout_log.as_deref(), program)?)
            .stderr(self.output(self.stderr_log.as_deref(), program)?);
        platform::detach(&mut command);

        let child = command.spawn().map_err(|source| ProbeError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;
        tracing::info!(pid = child.id(), program = %program.display(), "launched process");
        Ok(child.id())
    }

    fn stop(&self, pid: u32) -> Result<(), ProbeError> {
        platform::terminate(pid)
    }
}

#[cfg(unix)]
mod platform {
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    use super::ProbeError;

    pub(super) fn is_alive(pid: u32) -> Result<(), ProbeError> {
        send(pid, 0)
    }

    pub(super) fn terminate(pid: u32) -> Result<(), ProbeError> {
        send(pid, libc::SIGTERM)
    }

    /// New process group, so terminal signals aimed at the CLI skip the agent.
    pub(super) fn detach(command: &mut Command) {
        command.process_group(0);
    }

    fn send(pid: u32, signal: libc::c_int) -> Result<(), ProbeError> {
        // 0 and negative values address process groups, never a single process.
        let raw = match libc::pid_t::try_from(pid) {
            Ok(raw) if raw > 0 => raw,
            _ => return Err(ProbeError::NoSuchProcess { pid }),
        };
        // SAFETY: kill has no memory-safety preconditions.
        if unsafe { libc::kill(raw, signal) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(ProbeError::NoSuchProcess { pid }),
            Some(libc::EPERM) => Err(ProbeError::PermissionDenied { pid }),
            _ => Err(ProbeError::Signal { pid, source: err }),
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use std::process::Command;

    use sysinfo::{Pid, ProcessesToUpdate, System};

    use super::ProbeError;

    fn lookup(pid: u32) -> (System, Pid) {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        (system, pid)
    }

    pub(super) fn is_alive(pid: u32) -> Result<(), ProbeError> {
        let (system, sys_pid) = lookup(pid);
        match system.process(sys_pid) {
            Some(_) => Ok(()),
            None => Err(ProbeError::NoSuchProcess { pid }),
        }
    }

    pub(super) fn terminate(pid: u32) -> Result<(), ProbeError> {
        let (system, sys_pid) = lookup(pid);
        match system.process(sys_pid) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(ProbeError::PermissionDenied { pid }),
            None => Err(ProbeError::NoSuchProcess { pid }),
        }
    }

    pub(super) fn detach(_command: &mut Command) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_alive() {
        SystemProbe::default()
            .is_alive(std::process::id())
            .expect("current process must probe alive");
    }

    #[test]
    fn never_started_pid_is_not_alive() {
        // Far above any pid_max.
        let err = SystemProbe::default().is_alive(i32::MAX as u32).unwrap_err();
        assert!(matches!(err, ProbeError::NoSuchProcess { .. }), "got: {err}");
    }

    #[test]
    fn pid_zero_never_addresses_a_process_group() {
        let err = SystemProbe::default().is_alive(0).unwrap_err();
        assert!(matches!(err, ProbeError::NoSuchProcess { pid: 0 }));
    }

    #[cfg(unix)]
    #[test]
    fn exited_process_is_not_alive() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("reap");
        assert!(SystemProbe::default().is_alive(pid).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn start_then_stop_detached_process() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let probe = SystemProbe::with_logs(dir.path().join("out.log"), dir.path().join("err.log"));
        let pid = probe
            .start(Path::new("sleep"), &["30".to_string()])
            .expect("start sleep");
        probe.is_alive(pid).expect("freshly started process is alive");
        probe.stop(pid).expect("stop");
        assert!(dir.path().join("out.log").exists());
    }

    #[test]
    fn missing_program_reports_spawn_error() {
        let err = SystemProbe::default()
            .start(Path::new("/definitely/not/a/binary"), &[])
            .unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }), "got: {err}");
    }
}
