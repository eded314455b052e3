use crate::error::{HubError, Result};
use crate::ops::Scope;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// How long to keep draining pipes once the child is gone or killed.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Verbs understood by the external cron controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCommand {
    Status { server: Option<String> },
    List { server: Option<String> },
    Logs { server: Option<String>, lines: Option<u32> },
    Crontab { server: Option<String> },
    Sync,
    Coordinate,
}

impl ControllerCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            ControllerCommand::Status { .. } => "status",
            ControllerCommand::List { .. } => "list",
            ControllerCommand::Logs { .. } => "logs",
            ControllerCommand::Crontab { .. } => "crontab",
            ControllerCommand::Sync => "sync",
            ControllerCommand::Coordinate => "coordinate",
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.verb().to_string()];
        let server = match self {
            ControllerCommand::Status { server }
            | ControllerCommand::List { server }
            | ControllerCommand::Logs { server, .. }
            | ControllerCommand::Crontab { server } => server.as_deref(),
            ControllerCommand::Sync | ControllerCommand::Coordinate => None,
        };
        if let Some(id) = server {
            args.push(format!("--server={}", id));
        }
        if let ControllerCommand::Logs {
            lines: Some(n), ..
        } = self
        {
            args.push(format!("--lines={}", n));
        }
        args
    }
}

/// Anything that can run controller verbs and hand back their text.
pub trait Controller: Send + Sync {
    fn run(&self, command: &ControllerCommand) -> Result<String>;
}

/// The one thing the status cache needs from the outside world.
pub trait StatusSource: Send + Sync {
    fn fetch_status(&self, scope: &Scope) -> Result<String>;
}

impl<C: Controller + ?Sized> StatusSource for C {
    fn fetch_status(&self, scope: &Scope) -> Result<String> {
        self.run(&ControllerCommand::Status {
            server: scope.server().map(str::to_string),
        })
    }
}

/// Runs the controller as a subprocess with a bounded wait.
#[derive(Debug, Clone)]
pub struct ProcessController {
    argv: Vec<String>,
    timeout: Duration,
}

impl ProcessController {
    /// `argv` is the program plus any fixed leading arguments,
    /// e.g. `["php", "/srv/hub/universal_cron_controller.php"]`.
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

}

/// Kill the child and everything it started. On unix the child leads its own
/// process group, so `sleep`s and workers spawned by the controller go too.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        match Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("kill {} exited with {}", group, status),
            Err(e) => debug!("kill {} failed: {}", group, e),
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl Controller for ProcessController {
    fn run(&self, command: &ControllerCommand) -> Result<String> {
        let (program, base_args) = self
            .argv
            .split_first()
            .ok_or_else(|| HubError::FetchFailure("no controller command configured".into()))?;

        let args = command.args();
        info!("Running controller: {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(base_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| HubError::FetchFailure(format!("failed to spawn {}: {}", program, e)))?;

        let stdout = PipeCapture::start(child.stdout.take());
        let stderr = PipeCapture::start(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let exit = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() >= deadline => {
                    kill_tree(&mut child);
                    break None;
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    kill_tree(&mut child);
                    return Err(HubError::FetchFailure(format!(
                        "failed to wait for {}: {}",
                        program, e
                    )));
                }
            }
        };

        let drain_until = Instant::now() + DRAIN_GRACE;
        while !(stdout.finished() && stderr.finished()) && Instant::now() < drain_until {
            thread::sleep(POLL_INTERVAL);
        }

        let mut output = stdout.text();
        output.push_str(&stderr.text());

        match exit {
            Some(status) => {
                if !status.success() {
                    warn!("Controller '{}' exited with {}", command.verb(), status);
                }
                debug!("Controller returned {} bytes", output.len());
                Ok(output)
            }
            None => {
                warn!(
                    "Controller '{}' killed after {:?}",
                    command.verb(),
                    self.timeout
                );
                Err(HubError::FetchTimeout {
                    after: self.timeout,
                    partial: output,
                })
            }
        }
    }
}

/// Reads a child pipe on a thread into a shared buffer, so whatever arrived
/// is available even if the pipe never closes.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PipeCapture {
    fn start<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut reader| {
            let sink = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; 4096];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buf, handle }
    }

    fn finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    fn text(&self) -> String {
        let bytes = self
            .buf
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> ProcessController {
        ProcessController::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "controller".to_string(),
            ],
            timeout,
        )
    }

    #[test]
    fn test_command_args() {
        assert_eq!(
            ControllerCommand::Status { server: None }.args(),
            vec!["status"]
        );
        assert_eq!(
            ControllerCommand::Logs {
                server: Some("cis".into()),
                lines: Some(100)
            }
            .args(),
            vec!["logs", "--server=cis", "--lines=100"]
        );
        assert_eq!(ControllerCommand::Coordinate.args(), vec!["coordinate"]);
    }

    #[test]
    fn test_fetch_status_passes_server_flag() {
        let controller = sh("echo \"$@\"", Duration::from_secs(5));
        let out = controller
            .fetch_status(&Scope::App("hdgwrzntwa".into()))
            .unwrap();
        assert_eq!(out.trim(), "status --server=hdgwrzntwa");
    }

    #[test]
    fn test_run_merges_stderr() {
        let controller = sh("echo out; echo err 1>&2; exit 3", Duration::from_secs(5));
        let out = controller.run(&ControllerCommand::Sync).unwrap();
        assert!(out.contains("out"));
        assert!(out.contains("err"));
    }

    #[test]
    fn test_run_timeout_keeps_partial_output() {
        let controller = sh("echo partial; sleep 5", Duration::from_millis(300));
        match controller.run(&ControllerCommand::Sync) {
            Err(HubError::FetchTimeout { partial, after }) => {
                assert!(partial.contains("partial"));
                assert_eq!(after, Duration::from_millis(300));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_run_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let script = format!(
            "sleep 30 & echo $! > {}; echo partial; wait",
            pid_file.display()
        );
        let controller = sh(&script, Duration::from_millis(300));

        let started = Instant::now();
        let result = controller.run(&ControllerCommand::Sync);
        assert!(started.elapsed() < Duration::from_secs(5));
        match result {
            Err(HubError::FetchTimeout { partial, .. }) => assert!(partial.contains("partial")),
            other => panic!("expected timeout, got {:?}", other),
        }

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let stat = format!("/proc/{}/stat", pid.trim());
        let gone = Instant::now() + Duration::from_secs(2);
        loop {
            // Reaped, or a zombie waiting on init.
            match std::fs::read_to_string(&stat) {
                Err(_) => break,
                Ok(s) if s.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')) => break,
                Ok(_) if Instant::now() < gone => thread::sleep(POLL_INTERVAL),
                Ok(s) => panic!("sleep {} survived the timeout: {}", pid.trim(), s),
            }
        }
    }

    #[test]
    fn test_missing_program_is_fetch_failure() {
        let controller = ProcessController::new(
            vec!["/nonexistent/cron-controller".into()],
            Duration::from_secs(1),
        );
        assert!(matches!(
            controller.run(&ControllerCommand::Sync),
            Err(HubError::FetchFailure(_))
        ));
    }

    #[test]
    fn test_empty_argv_is_fetch_failure() {
        let controller = ProcessController::new(Vec::new(), Duration::from_secs(1));
        assert!(matches!(
            controller.fetch_status(&Scope::All),
            Err(HubError::FetchFailure(_))
        ));
    }
}
