//! CLI-side control of the detached agent process.
//!
//! The supervisor owns the PID file and talks to the agent only through the
//! status endpoint. It is synchronous: polling blocks the calling thread.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use gitfresh_core::config::write_atomic;
use gitfresh_core::{paths, AgentConfig, AgentStatus};

use crate::error::{io_err, AgentError};
use crate::log_rotation::rotate_agent_logs;
use crate::probe::{ProcessProbe, SystemProbe};

/// Per-request timeout while polling the status endpoint.
const STATUS_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How often and how long to poll the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    /// The agent was already running: it should answer at once.
    pub const IMMEDIATE: PollPolicy = PollPolicy {
        max_attempts: 3,
        interval: Duration::from_micros(1),
    };

    /// The agent was just launched: give it time to open the tunnel.
    pub const AFTER_LAUNCH: PollPolicy = PollPolicy {
        max_attempts: 5,
        interval: Duration::from_secs(3),
    };
}

/// Binary and arguments that run the agent in the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl AgentCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `<binary> agent run`, for a `gitfresh` executable at `program`.
    pub fn gitfresh(program: impl Into<PathBuf>) -> Self {
        Self::new(program, vec!["agent".to_string(), "run".to_string()])
    }

    /// `gitfresh agent run` through the currently running executable.
    pub fn current_exe() -> Result<Self, AgentError> {
        let exe = std::env::current_exe().map_err(|e| io_err("current executable", e))?;
        Ok(Self::gitfresh(exe))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning(u32),
    Launched(u32),
}

impl StartOutcome {
    pub fn pid(self) -> u32 {
        match self {
            StartOutcome::AlreadyRunning(pid) | StartOutcome::Launched(pid) => pid,
        }
    }

    /// Readiness polling appropriate for this outcome.
    pub fn poll_policy(self) -> PollPolicy {
        match self {
            StartOutcome::AlreadyRunning(_) => PollPolicy::IMMEDIATE,
            StartOutcome::Launched(_) => PollPolicy::AFTER_LAUNCH,
        }
    }
}

#[derive(Debug)]
pub struct AgentSupervisor<P = SystemProbe> {
    probe: P,
    pid_file: PathBuf,
    command: AgentCommand,
    status_url: String,
    log_home: Option<PathBuf>,
}

impl AgentSupervisor<SystemProbe> {
    /// Supervisor for the agent of the profile at `home`, with agent output
    /// redirected to `~/.gitfresh/logs` and rotated before every launch.
    pub fn for_home(home: &Path, config: &AgentConfig, command: AgentCommand) -> Self {
        let probe = SystemProbe::with_logs(
            paths::stdout_log_path(home),
            paths::stderr_log_path(home),
        );
        let mut supervisor =
            Self::new(probe, paths::pid_path(home), command, config.status_url());
        supervisor.log_home = Some(home.to_path_buf());
        supervisor
    }
}

impl<P: ProcessProbe> AgentSupervisor<P> {
    pub fn new(
        probe: P,
        pid_file: PathBuf,
        command: AgentCommand,
        status_url: impl Into<String>,
    ) -> Self {
        Self {
            probe,
            pid_file,
            command,
            status_url: status_url.into(),
            log_home: None,
        }
    }

    pub fn status_url(&self) -> &str {
        &self.status_url
    }

    /// PID recorded by the last start, if any. Does not probe it.
    pub fn read_pid(&self) -> Result<Option<u32>, AgentError> {
        let contents = match fs::read_to_string(&self.pid_file) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&self.pid_file, err)),
        };
        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<u32>()
            .map(Some)
            .map_err(|_| AgentError::InvalidPidFile {
                path: self.pid_file.clone(),
                contents: trimmed.to_string(),
            })
    }

    /// PID of the agent if the recorded process is alive.
    pub fn is_running(&self) -> Result<Option<u32>, AgentError> {
        let Some(pid) = self.read_pid()? else {
            return Ok(None);
        };
        match self.probe.is_alive(pid) {
            Ok(()) => Ok(Some(pid)),
            Err(reason) => {
                tracing::debug!(pid, reason = %reason, "recorded agent is not running");
                Ok(None)
            }
        }
    }

    /// Launch the agent unless the recorded PID is alive.
    pub fn start_if_not_running(&self) -> Result<StartOutcome, AgentError> {
        if let Some(pid) = self.is_running()? {
            tracing::info!(pid, "agent already running");
            return Ok(StartOutcome::AlreadyRunning(pid));
        }

        if let Some(home) = &self.log_home {
            rotate_agent_logs(home);
        }
        let pid = self.probe.start(&self.command.program, &self.command.args)?;
        self.write_pid(pid)?;
        tracing::info!(pid, program = %self.command.program.display(), "agent launched");
        Ok(StartOutcome::Launched(pid))
    }

    /// Ask a running agent to terminate and forget its PID.
    ///
    /// Returns the signalled PID, or `None` when nothing was running. A stale
    /// PID file is removed either way.
    pub fn stop(&self) -> Result<Option<u32>, AgentError> {
        let running = self.is_running()?;
        if let Some(pid) = running {
            self.probe.stop(pid)?;
            tracing::info!(pid, "sent termination signal to agent");
        }
        match fs::remove_file(&self.pid_file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&self.pid_file, err)),
        }
        Ok(running)
    }

    /// Poll the status endpoint until it answers `200`.
    ///
    /// Each attempt waits `interval` first. Connection failures and non-200
    /// answers consume an attempt; the first `200` ends polling.
    pub fn wait_until_ready(
        &self,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<AgentStatus, AgentError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(STATUS_REQUEST_TIMEOUT)
            .build();

        for attempt in 1..=max_attempts {
            sleep(interval);
            match poll_once(&agent, &self.status_url) {
                PollAttempt::Ready(status) => return status,
                PollAttempt::NotReady(status) => {
                    tracing::debug!(attempt, status, "agent not ready yet")
                }
                PollAttempt::Unreachable(error) => {
                    tracing::debug!(attempt, error = %error, "agent not reachable yet")
                }
            }
        }

        Err(AgentError::NotReachable {
            url: self.status_url.clone(),
            attempts: max_attempts,
        })
    }

    /// Start the agent if needed and wait for its status endpoint.
    pub fn ensure_ready(&self) -> Result<(StartOutcome, AgentStatus), AgentError> {
        let outcome = self.start_if_not_running()?;
        let policy = outcome.poll_policy();
        let status = self.wait_until_ready(policy.max_attempts, policy.interval)?;
        Ok((outcome, status))
    }

    fn write_pid(&self, pid: u32) -> Result<(), AgentError> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        write_atomic(&self.pid_file, pid.to_string().as_bytes())
            .map_err(|e| io_err(&self.pid_file, e))
    }
}

#[derive(Debug)]
enum PollAttempt {
    Ready(Result<AgentStatus, AgentError>),
    /// The endpoint answered with a status other than 200.
    NotReady(u16),
    Unreachable(String),
}

// ureq reports 4xx/5xx answers as `Error::Status`, not as responses.
fn poll_once(agent: &ureq::Agent, url: &str) -> PollAttempt {
    match agent.get(url).call() {
        Ok(response) if response.status() == 200 => PollAttempt::Ready(
            response
                .into_json::<AgentStatus>()
                .map_err(|err| AgentError::Status(format!("unreadable status body: {err}"))),
        ),
        Ok(response) => PollAttempt::NotReady(response.status()),
        Err(ureq::Error::Status(status, _)) => PollAttempt::NotReady(status),
        Err(err) => PollAttempt::Unreachable(err.to_string()),
    }
}
