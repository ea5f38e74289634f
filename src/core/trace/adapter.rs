//! Instrumentation adapter around one child invocation.
//!
//! Non-invasive: the target binary runs unmodified. The adapter records
//! precise timestamps, cooperates with the whitelist sampler through a
//! PID sentinel, optionally launches inside a transient resource scope
//! to apply CPU quota/weight, pins CPUs when a cpuset is provided, and
//! appends exactly one span record when the child exits.
//!
//! The worker runtime owns one adapter per invocation in-process; the
//! `wrap` subcommand builds the same object from its environment for
//! foreign callers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use uuid::Uuid;

use super::paths::RunPaths;
use super::span::{SpanRecord, append_span};
use crate::Result;
use crate::core::now_ms;
use crate::core::sampler::procfs;
use crate::core::worker::parse_cpuset;

/// Everything needed to launch and trace one child process.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    /// Target program (resolved against PATH).
    pub program: String,
    /// Arguments passed through to the target.
    pub args: Vec<String>,
    pub run: RunPaths,
    pub node: String,
    pub stage: String,
    /// Enqueue timestamp recorded by the dispatcher; defaults to the
    /// observed start time when absent.
    pub ts_enqueue: Option<i64>,
    pub cpuset: Option<String>,
    /// CPU quota percent applied through the resource scope.
    pub cpu_quota: Option<u32>,
    /// CPU weight applied through the resource scope.
    pub cpu_weight: Option<u32>,
    /// Scope unit name, so quotas can be adjusted while running.
    pub unit_name: Option<String>,
}

/// Outcome of one instrumented invocation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub status: i32,
    pub span: SpanRecord,
}

/// Best-effort PATH lookup.
fn which(cmd: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(cmd);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Best-effort input/output extraction from the child's arguments:
/// the value after `-i` is the input, the last non-option argument is
/// the output.
pub fn parse_io_from_args(args: &[String]) -> (Option<String>, Option<String>) {
    let mut input = None;
    let mut output = None;
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        if arg == "-i" && i + 1 < args.len() {
            input = Some(args[i + 1].clone());
            i += 1;
        } else if !arg.starts_with('-') {
            output = Some(arg.clone());
        }
        i += 1;
    }
    (input, output)
}

fn file_size(path: Option<&str>) -> u64 {
    path.and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0)
}

fn basename(path: Option<&str>) -> Option<String> {
    path.map(|p| {
        Path::new(p)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| p.to_string())
    })
}

#[cfg(target_os = "linux")]
fn apply_affinity(pid: i32, cores: &[usize]) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        for &core in cores {
            libc::CPU_SET(core, &mut set);
        }
        libc::sched_setaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

/// Probe whether a transient scope with the given properties can be
/// opened at all; skip resource controls silently when it cannot.
async fn scope_available(systemd_run: &Path, props: &[String]) -> bool {
    let mut cmd = tokio::process::Command::new(systemd_run);
    cmd.arg("--scope");
    for prop in props {
        cmd.arg("-p").arg(prop);
    }
    cmd.arg("--").arg("true").stdout(Stdio::null()).stderr(Stdio::null());
    matches!(cmd.status().await, Ok(status) if status.success())
}

/// Per-invocation adapter; owned by the caller for the lifetime of one
/// child process.
pub struct InstrumentationAdapter {
    spec: AdapterSpec,
}

impl InstrumentationAdapter {
    pub fn new(spec: AdapterSpec) -> Self {
        Self { spec }
    }

    /// Launch the child, supervise it to exit, and append its span.
    pub async fn run(&self) -> Result<InvocationResult> {
        let spec = &self.spec;
        spec.run.ensure_dirs()?;

        let (input, output) = parse_io_from_args(&spec.args);
        let bytes_in = file_size(input.as_deref());

        // Launch prefix: transient resource scope, then cpuset pinning.
        let mut prefix: Vec<String> = Vec::new();
        let wants_scope =
            spec.unit_name.is_some() || spec.cpu_quota.is_some() || spec.cpu_weight.is_some();
        if wants_scope {
            if let Some(systemd_run) = which("systemd-run") {
                let mut props = vec!["CPUAccounting=1".to_string()];
                if let Some(quota) = spec.cpu_quota {
                    props.push(format!("CPUQuota={quota}%"));
                }
                if let Some(weight) = spec.cpu_weight {
                    props.push(format!("CPUWeight={weight}"));
                }
                if scope_available(&systemd_run, &props).await {
                    prefix.push(systemd_run.to_string_lossy().to_string());
                    prefix.push("--scope".to_string());
                    if let Some(unit) = &spec.unit_name {
                        prefix.push("--unit".to_string());
                        prefix.push(unit.clone());
                    }
                    for prop in &props {
                        prefix.push("-p".to_string());
                        prefix.push(prop.clone());
                    }
                    prefix.push("--".to_string());
                } else {
                    debug!("resource scope unavailable; continuing without CPU controls");
                }
            }
        }
        let cores = spec
            .cpuset
            .as_deref()
            .map(parse_cpuset)
            .unwrap_or_default();
        if !cores.is_empty() {
            if let Some(taskset) = which("taskset") {
                prefix.push(taskset.to_string_lossy().to_string());
                prefix.push("-c".to_string());
                prefix.push(spec.cpuset.clone().unwrap_or_default());
            }
        }

        let program = which(&spec.program)
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| spec.program.clone());
        let mut argv = prefix;
        argv.push(program);
        argv.extend(spec.args.iter().cloned());

        let mut command = tokio::process::Command::new(&argv[0]);
        command.args(&argv[1..]);
        // Hard affinity guard in the child before exec, in case the
        // taskset binary is missing.
        #[cfg(target_os = "linux")]
        if !cores.is_empty() {
            let cores = cores.clone();
            unsafe {
                command.pre_exec(move || {
                    apply_affinity(0, &cores);
                    Ok(())
                });
            }
        }

        let mut child = command.spawn()?;
        let pid = child.id().unwrap_or(0) as i32;

        let sentinel = spec.run.pids_dir().join(pid.to_string());
        if let Err(e) = std::fs::write(&sentinel, "") {
            warn!("failed to create pid sentinel {}: {e}", sentinel.display());
        }

        // Threads spawned early can widen their mask before the scope
        // settles; re-pin every task of the child for a short window.
        #[cfg(target_os = "linux")]
        if !cores.is_empty() {
            let cores = cores.clone();
            tokio::spawn(async move {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
                while tokio::time::Instant::now() < deadline && procfs::pid_alive(pid) {
                    if let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/task")) {
                        for entry in entries.flatten() {
                            if let Some(tid) = entry
                                .file_name()
                                .to_str()
                                .and_then(|s| s.parse::<i32>().ok())
                            {
                                apply_affinity(tid, &cores);
                            }
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            });
        }

        // ts_start from /proc starttime, not the wall clock, so
        // scheduler delays between spawn and exec do not skew it.
        let ts_start = procfs::process_start_epoch_ms(pid).unwrap_or_else(now_ms);
        let status = self.supervise(&mut child, pid).await?;
        let ts_end = now_ms();

        if let Err(e) = std::fs::remove_file(&sentinel) {
            debug!("pid sentinel already gone: {e}");
        }

        let bytes_out = file_size(output.as_deref());
        let ts_enqueue = spec.ts_enqueue.unwrap_or(ts_start);
        let module_id = Path::new(&spec.program)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| spec.program.clone());

        let span = SpanRecord {
            trace_id: Some(Uuid::new_v4().to_string()),
            span_id: None,
            parent_id: None,
            module_id: Some(module_id.clone()),
            instance_id: None,
            ts_enqueue: Some(ts_enqueue),
            ts_start: Some(ts_start),
            ts_end: Some(ts_end),
            node: Some(spec.node.clone()),
            stage: Some(spec.stage.clone()),
            method: Some("CLI".to_string()),
            path: Some(spec.program.clone()),
            input: basename(input.as_deref()),
            output: basename(output.as_deref()),
            pid: Some(pid as i64),
            cpuset: spec.cpuset.clone().filter(|s| !s.is_empty()),
            bytes_in: Some(bytes_in),
            bytes_out: Some(bytes_out),
            status: Some(status as i64),
            extras: serde_json::Map::new(),
        };
        append_span(&spec.run.events_path(&module_id), &span)?;

        Ok(InvocationResult { status, span })
    }

    /// Wait for the child, forwarding termination signals to it.
    #[cfg(unix)]
    async fn supervise(&self, child: &mut tokio::process::Child, pid: i32) -> Result<i32> {
        use std::os::unix::process::ExitStatusExt;
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = sigint.recv() => unsafe { libc::kill(pid, libc::SIGINT); },
                _ = sigterm.recv() => unsafe { libc::kill(pid, libc::SIGTERM); },
            }
        };
        Ok(status
            .code()
            .unwrap_or_else(|| status.signal().map(|s| 128 + s).unwrap_or(1)))
    }

    #[cfg(not(unix))]
    async fn supervise(&self, child: &mut tokio::process::Child, _pid: i32) -> Result<i32> {
        let status = child.wait().await?;
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_io_picks_input_and_last_positional() {
        let args = strings(&[
            "-i", "in.mp4", "-vf", "scale=1280:720", "-c:v", "libx264", "out.mp4",
        ]);
        let (input, output) = parse_io_from_args(&args);
        assert_eq!(input.as_deref(), Some("in.mp4"));
        assert_eq!(output.as_deref(), Some("out.mp4"));
    }

    #[test]
    fn test_parse_io_without_output() {
        let args = strings(&["-i", "in.mp4", "-f", "null"]);
        let (input, output) = parse_io_from_args(&args);
        assert_eq!(input.as_deref(), Some("in.mp4"));
        assert_eq!(output, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wrapped_invocation_emits_one_span() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunPaths::resolve(dir.path(), Some("t1".to_string()));
        let adapter = InstrumentationAdapter::new(AdapterSpec {
            program: "true".to_string(),
            args: Vec::new(),
            run: run.clone(),
            node: "n1".to_string(),
            stage: "cloud".to_string(),
            ts_enqueue: Some(1),
            cpuset: None,
            cpu_quota: None,
            cpu_weight: None,
            unit_name: None,
        });
        let result = adapter.run().await.unwrap();
        assert_eq!(result.status, 0);
        assert!(result.span.temporally_consistent());

        let spans = super::super::span::read_spans(&run.events_path("true")).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].node.as_deref(), Some("n1"));
        assert_eq!(spans[0].status, Some(0));
        // Sentinel removed on exit.
        let leftovers: Vec<_> = std::fs::read_dir(run.pids_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_child_status_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunPaths::resolve(dir.path(), Some("t2".to_string()));
        let adapter = InstrumentationAdapter::new(AdapterSpec {
            program: "false".to_string(),
            args: Vec::new(),
            run,
            node: "n1".to_string(),
            stage: "cloud".to_string(),
            ts_enqueue: None,
            cpuset: None,
            cpu_quota: None,
            cpu_weight: None,
            unit_name: None,
        });
        let result = adapter.run().await.unwrap();
        assert_eq!(result.status, 1);
        assert_eq!(result.span.status, Some(1));
    }
}
