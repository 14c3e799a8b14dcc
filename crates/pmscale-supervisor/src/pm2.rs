//! PM2 adapter driven through the `pm2` command-line client.
//!
//! `pm2 jlist` prints the daemon's process table as JSON; `pm2 scale`
//! accepts either an absolute count or a `+N` delta.

use std::path::PathBuf;
use std::process::Output;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use pmscale_core::{ExecMode, Monit, ProcessRecord, ProcessStatus, ScaleTarget};

use crate::{BoxFuture, Supervisor, SupervisorError, SupervisorResult};

/// One entry of `pm2 jlist`. Only the fields the tracker reads.
#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: Option<String>,
    pid: Option<u32>,
    pm_id: Option<u32>,
    #[serde(default)]
    monit: Pm2Monit,
    pm2_env: Pm2Env,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Monit {
    #[serde(default)]
    memory: f64,
    #[serde(default)]
    cpu: f64,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    exec_mode: String,
    status: String,
    #[serde(default)]
    instances: serde_json::Value,
    #[serde(default)]
    axm_options: AxmOptions,
}

#[derive(Debug, Default, Deserialize)]
struct AxmOptions {
    #[serde(default, rename = "isModule")]
    is_module: bool,
}

impl From<Pm2Process> for ProcessRecord {
    fn from(p: Pm2Process) -> Self {
        let exec_mode = match p.pm2_env.exec_mode.as_str() {
            "cluster_mode" | "cluster" => ExecMode::Cluster,
            _ => ExecMode::Fork,
        };
        let status = match p.pm2_env.status.as_str() {
            "online" => ProcessStatus::Online,
            "stopping" => ProcessStatus::Stopping,
            "stopped" => ProcessStatus::Stopped,
            "launching" => ProcessStatus::Launching,
            "one-launch-status" => ProcessStatus::OneLaunchStatus,
            _ => ProcessStatus::Errored,
        };

        ProcessRecord {
            name: p.name.filter(|n| !n.is_empty()),
            // PM2 reports pid 0 for processes that are not running.
            pid: p.pid.filter(|pid| *pid != 0),
            pm_id: p.pm_id,
            exec_mode,
            status,
            is_module: p.pm2_env.axm_options.is_module,
            instances: instances_from(&p.pm2_env.instances),
            monit: Monit {
                cpu: p.monit.cpu,
                memory_bytes: p.monit.memory.max(0.0) as u64,
            },
        }
    }
}

/// `instances` is numeric once PM2 resolves it, but may still hold the
/// raw launch value (e.g. `"max"`).
fn instances_from(value: &serde_json::Value) -> u32 {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1),
        serde_json::Value::String(s) => s.parse().unwrap_or(1),
        _ => 1,
    }
}

/// Skip banner lines (e.g. `[PM2] Spawning PM2 daemon`) the CLI may print
/// before the JSON array.
fn json_array(stdout: &str) -> &str {
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed == "[" || trimmed.starts_with("[{") || trimmed.starts_with("[]") {
            return &stdout[offset..];
        }
        offset += line.len();
    }
    stdout
}

/// Parse the output of `pm2 jlist`.
pub fn parse_jlist(stdout: &str) -> SupervisorResult<Vec<ProcessRecord>> {
    let processes: Vec<Pm2Process> = serde_json::from_str(json_array(stdout).trim())?;
    Ok(processes.into_iter().map(ProcessRecord::from).collect())
}

/// Talks to the local PM2 daemon through its CLI.
#[derive(Debug, Clone)]
pub struct Pm2Cli {
    bin: PathBuf,
}

impl Default for Pm2Cli {
    fn default() -> Self {
        Self::new("pm2")
    }
}

impl Pm2Cli {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str]) -> SupervisorResult<Output> {
        let command = format!("{} {}", self.bin.display(), args.join(" "));
        debug!(%command, "running pm2");

        let output = Command::new(&self.bin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SupervisorError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SupervisorError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Supervisor for Pm2Cli {
    fn list(&self) -> BoxFuture<'_, SupervisorResult<Vec<ProcessRecord>>> {
        Box::pin(async move {
            let output = self.run(&["jlist"]).await?;
            parse_jlist(&String::from_utf8_lossy(&output.stdout))
        })
    }

    fn scale<'a>(
        &'a self,
        name: &'a str,
        target: ScaleTarget,
    ) -> BoxFuture<'a, SupervisorResult<()>> {
        Box::pin(async move {
            let amount = target.to_string();
            self.run(&["scale", name, amount.as_str()]).await?;
            Ok(())
        })
    }
}
