//! Running the external tools that do the actual transfers.
//!
//! Both channels hand the real work to another program (`curl` for OTA, `esptool` for serial), so
//! all we need is: start it, optionally collect what it prints, optionally give up after a
//! deadline, and report how it exited.

use std::ffi::OsString;
use std::fmt;
use std::io::{self, Read};
use std::process::{self, Child, Command, ExitStatus};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serde::Deserialize;
use thiserror::Error;

/// An external program, plus any arguments that must always come first (e.g. `python3 -m esptool`)
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(try_from = "ToolSpec")]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

/// A tool as written in a config file: either one string to be split on whitespace, or a list
#[derive(Deserialize)]
#[serde(untagged)]
enum ToolSpec {
    Line(String),
    Words(Vec<String>),
}

#[derive(Debug, Error)]
#[error("tool command must not be empty")]
pub struct EmptyToolCommand;

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// The executable that will be looked up in PATH
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl TryFrom<Vec<String>> for ToolCommand {
    type Error = EmptyToolCommand;

    fn try_from(mut words: Vec<String>) -> Result<Self, Self::Error> {
        if words.is_empty() {
            return Err(EmptyToolCommand);
        }
        let program = words.remove(0);
        Ok(Self {
            program,
            args: words,
        })
    }
}

impl TryFrom<ToolSpec> for ToolCommand {
    type Error = EmptyToolCommand;

    fn try_from(spec: ToolSpec) -> Result<Self, Self::Error> {
        match spec {
            ToolSpec::Line(line) => line.parse(),
            ToolSpec::Words(words) => words.try_into(),
        }
    }
}

/// Parse strings like "python3 -m esptool"
impl FromStr for ToolCommand {
    type Err = EmptyToolCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_whitespace()
            .map(String::from)
            .collect::<Vec<_>>()
            .try_into()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What to do with the child's stdout and stderr
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OutputMode {
    /// Collect both streams so they can be inspected afterwards
    Capture,

    /// Let the child write straight to our console
    Inherit,
}

/// A tool that ran to completion (successfully or not)
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,

    /// Empty unless run with `OutputMode::Capture`
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{0}` not found")]
    NotFound(String),

    #[error("could not start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("lost track of `{program}`")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` did not finish within {}s", .timeout.as_secs_f32())]
    TimedOut { program: String, timeout: Duration },
}

/// Run `tool` with `args` appended, waiting at most `timeout` (or forever, if `None`).
///
/// When the timeout expires, the child is terminated and anything it printed is thrown away.
pub fn run(
    tool: &ToolCommand,
    args: &[OsString],
    output: OutputMode,
    timeout: Option<Duration>,
) -> Result<Finished, ToolError> {
    let mut command = tool.command();
    command.args(args).stdin(process::Stdio::null());
    match output {
        OutputMode::Capture => command
            .stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped()),
        OutputMode::Inherit => command
            .stdout(process::Stdio::inherit())
            .stderr(process::Stdio::inherit()),
    };

    debug!("running: {tool} {args:?} (timeout: {timeout:?})");
    let started = Instant::now();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ToolError::NotFound(tool.program().to_owned()))
        }
        Err(source) => {
            return Err(ToolError::Spawn {
                program: tool.program().to_owned(),
                source,
            })
        }
    };

    // The pipes are drained on their own threads, so a child that prints a lot can't stall
    // waiting for us while we wait for it.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    // A timeout too large to represent as an instant is as good as none at all
    let deadline = timeout.and_then(|timeout| started.checked_add(timeout));
    let timed_out = || ToolError::TimedOut {
        program: tool.program().to_owned(),
        timeout: timeout.unwrap_or_default(),
    };

    let waited = match deadline {
        None => child.wait().map(Some),
        Some(deadline) => wait_until(&mut child, deadline),
    };
    let status = match waited {
        Ok(Some(status)) => status,
        Ok(None) => {
            terminate(&mut child);
            debug!("`{}` terminated after {:?}", tool.program(), started.elapsed());
            // Drop the readers without waiting: a grandchild may still hold the pipes open.
            return Err(timed_out());
        }
        Err(source) => {
            terminate(&mut child);
            return Err(ToolError::Wait {
                program: tool.program().to_owned(),
                source,
            });
        }
    };

    // The child is gone, but anything it left running may still hold the pipes; the transfer
    // isn't finished until they close, and that has to happen within the same deadline.
    let (Some(stdout), Some(stderr)) = (collect(stdout, deadline), collect(stderr, deadline))
    else {
        debug!(
            "`{}` exited ({status}) but its output was still open after {:?}",
            tool.program(),
            started.elapsed()
        );
        return Err(timed_out());
    };
    debug!("`{}` finished after {:?}: {status}", tool.program(), started.elapsed());

    Ok(Finished {
        status,
        stdout,
        stderr,
    })
}

/// Read a pipe to the end on its own thread; the text arrives on the returned channel
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Wait for a drained pipe's text, giving up at `deadline`.
///
/// Returns `None` only if the deadline passed; a stream that wasn't captured is empty.
fn collect(reader: Option<Receiver<String>>, deadline: Option<Instant>) -> Option<String> {
    let Some(reader) = reader else {
        return Some(String::new());
    };

    match deadline {
        None => Some(reader.recv().unwrap_or_default()),
        Some(deadline) => {
            match reader.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(text) => Some(text),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(String::new()),
            }
        }
    }
}

/// Poll the child until it exits or `deadline` passes; `None` means the deadline won.
fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Ask the child to stop (SIGTERM), and kill it if it hasn't after a short grace period.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        const GRACE_PERIOD: Duration = Duration::from_millis(500);

        if let Ok(pid) = i32::try_from(child.id()) {
            if kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
                && matches!(wait_until(child, Instant::now() + GRACE_PERIOD), Ok(Some(_)))
            {
                return;
            }
        }
    }

    // Errors here mean the child is already gone, which is what we wanted anyway
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_tool_command_parse() -> anyhow::Result<()> {
    let tool: ToolCommand = "python3 -m  esptool".parse()?;
    assert_eq!(tool.program(), "python3");
    assert_eq!(tool.args, ["-m", "esptool"]);
    assert_eq!(tool.to_string(), "python3 -m esptool");

    assert!("   ".parse::<ToolCommand>().is_err());
    assert!(ToolCommand::try_from(Vec::new()).is_err());
    Ok(())
}

#[cfg(all(test, unix))]
mod test {
    use super::*;

    fn shell(script: &str) -> ToolCommand {
        vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()]
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_run_captures_output() -> anyhow::Result<()> {
        let tool = shell("echo out; echo err >&2; exit 3");
        let finished = run(&tool, &[], OutputMode::Capture, Some(Duration::from_secs(10)))?;

        assert_eq!(finished.status.code(), Some(3));
        assert_eq!(finished.stdout, "out\n");
        assert_eq!(finished.stderr, "err\n");
        Ok(())
    }

    #[test]
    fn test_run_passes_args() -> anyhow::Result<()> {
        // With `sh -c`, the first extra argument becomes $0
        let tool = shell("echo \"$0 $1\"");
        let args = [OsString::from("first"), OsString::from("second")];
        let finished = run(&tool, &args, OutputMode::Capture, None)?;

        assert!(finished.status.success());
        assert_eq!(finished.stdout, "first second\n");
        Ok(())
    }

    #[test]
    fn test_run_timeout_terminates() {
        let tool = shell("exec sleep 30");
        let started = Instant::now();
        let result = run(
            &tool,
            &[],
            OutputMode::Capture,
            Some(Duration::from_millis(200)),
        );

        assert!(matches!(result, Err(ToolError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_huge_timeout() -> anyhow::Result<()> {
        let finished = run(
            &shell("exit 0"),
            &[],
            OutputMode::Capture,
            Some(Duration::from_secs(u64::MAX)),
        )?;

        assert!(finished.status.success());
        Ok(())
    }

    #[test]
    fn test_run_timeout_covers_leftover_children() {
        // The shell exits straight away, but `sleep` keeps stdout and stderr open
        let tool = shell("sleep 5 & exit 0");
        let started = Instant::now();
        let result = run(
            &tool,
            &[],
            OutputMode::Capture,
            Some(Duration::from_millis(500)),
        );

        assert!(matches!(result, Err(ToolError::TimedOut { .. })), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_run_missing_tool() {
        let tool = ToolCommand::new("fw-deploy-test-no-such-tool");
        let result = run(&tool, &[], OutputMode::Capture, None);

        assert!(matches!(result, Err(ToolError::NotFound(name)) if name == "fw-deploy-test-no-such-tool"));
    }
}
