//! Launches the real binary as a detached agent using the direct tunnel
//! provider, so no tunnel service is contacted.
#![cfg(unix)]

use std::net::TcpListener;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn gitfresh_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gitfresh"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("GITFRESH_AGENT_BIN");
    cmd
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port()
}

/// Stops the agent even when an assertion fails midway.
struct StopOnDrop<'a>(&'a Path);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        let _ = gitfresh_cmd(self.0).args(["agent", "stop"]).output();
    }
}

#[test]
fn start_status_stop_round_trip() {
    let home = TempDir::new().expect("home");
    let workdir = TempDir::new().expect("workdir");
    let status_addr = format!("127.0.0.1:{}", free_port());

    gitfresh_cmd(home.path())
        .args([
            "config",
            "--tunnel-provider",
            "direct",
            "--tunnel-domain",
            "hooks.example.test",
            "--git-server-token",
            "ghp_x",
            "--listen-addr",
            "127.0.0.1:0",
            "--status-addr",
            &status_addr,
        ])
        .arg("--git-work-dir")
        .arg(workdir.path())
        .assert()
        .success();

    let _guard = StopOnDrop(home.path());
    gitfresh_cmd(home.path())
        .args(["agent", "start"])
        .assert()
        .success()
        .stdout(contains("agent started"))
        .stdout(contains("https://hooks.example.test"));
    assert!(home.path().join(".gitfresh/agent.pid").exists());

    gitfresh_cmd(home.path())
        .args(["agent", "start"])
        .assert()
        .success()
        .stdout(contains("already running"));

    gitfresh_cmd(home.path())
        .args(["agent", "status"])
        .assert()
        .success()
        .stdout(contains("\"running\": true"))
        .stdout(contains("\"tunnel_domain\": \"https://hooks.example.test\""));

    gitfresh_cmd(home.path())
        .args(["agent", "stop"])
        .assert()
        .success()
        .stdout(contains("agent stopped"));
    assert!(!home.path().join(".gitfresh/agent.pid").exists());
    assert!(home.path().join(".gitfresh/logs/agent.log").exists());
}
