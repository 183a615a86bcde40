// src/process/mod.rs

//! External process control
//!
//! Jobs start emerge through a [`ProcessController`], which owns the one
//! child that may be alive at a time and forwards job control signals to its
//! whole process group. Launching and terminal handling sit behind traits so
//! the queue can be driven by fakes in tests.

mod console;
mod pty;

pub use console::{NullConsole, PtyConsole, TitleParser};
pub use pty::PtyLauncher;

use crate::error::{Error, Result};
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Program, arguments and extra environment of a process to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// Split a full argument vector into program and arguments
    pub fn from_argv(argv: &[String], env: &BTreeMap<String, String>) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::CommandNotFound(String::new()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: env.clone(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Job control signals delivered to a process group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    /// SIGTERM
    Terminate,
    /// SIGTSTP
    Stop,
    /// SIGCONT
    Continue,
}

impl GroupSignal {
    pub fn as_signal(self) -> Signal {
        match self {
            GroupSignal::Terminate => Signal::SIGTERM,
            GroupSignal::Stop => Signal::SIGTSTP,
            GroupSignal::Continue => Signal::SIGCONT,
        }
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    /// Terminating signal number
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// A started process
pub struct Launched {
    pub process: Box<dyn ChildProcess>,
    /// Controlling side of the process terminal, if it has one
    pub terminal: Option<OwnedFd>,
}

/// Starts processes
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &CommandSpec) -> Result<Launched>;
}

/// Handle to a running process that leads its own process group
pub trait ChildProcess: Send {
    fn id(&self) -> u32;

    fn signal_group(&mut self, signal: GroupSignal) -> Result<()>;

    /// Non-blocking exit check; reaps the process once it has exited
    fn try_exit(&mut self) -> Result<Option<ProcessExit>>;
}

/// Terminal output sink that tracks the window title
pub trait Console: Send + Sync {
    /// Start consuming output of a new process terminal
    fn attach_terminal(&self, terminal: OwnedFd) -> Result<()>;

    /// Last window title set by the attached process
    fn window_title(&self) -> Option<String>;
}

/// Owner of the currently running external process
pub struct ProcessController {
    launcher: Box<dyn ProcessLauncher>,
    console: Arc<dyn Console>,
    current: Mutex<Option<Box<dyn ChildProcess>>>,
}

impl ProcessController {
    pub fn new(launcher: Box<dyn ProcessLauncher>, console: Arc<dyn Console>) -> Self {
        Self {
            launcher,
            console,
            current: Mutex::new(None),
        }
    }

    /// Controller running processes on a pseudo terminal
    pub fn with_pty(console: Arc<dyn Console>) -> Self {
        Self::new(Box::new(PtyLauncher), console)
    }

    /// Start a process and attach its terminal to the console
    pub fn start(&self, spec: &CommandSpec) -> Result<u32> {
        let mut current = self.current.lock();
        if let Some(old) = current.as_ref() {
            warn!("Replacing process {} that was never reaped", old.id());
        }

        let launched = self.launcher.launch(spec)?;
        let pid = launched.process.id();
        info!("Started '{}' (pid {})", spec, pid);

        if let Some(terminal) = launched.terminal {
            if let Err(e) = self.console.attach_terminal(terminal) {
                warn!("Failed to attach terminal of pid {}: {}", pid, e);
            }
        }

        *current = Some(launched.process);
        Ok(pid)
    }

    /// Send a signal to the running process group
    ///
    /// Missing or already exited processes are not an error.
    pub fn signal(&self, signal: GroupSignal) {
        let mut current = self.current.lock();
        match current.as_mut() {
            Some(process) => {
                debug!("Sending {:?} to process group {}", signal, process.id());
                if let Err(e) = process.signal_group(signal) {
                    debug!("Ignoring signal failure: {}", e);
                }
            }
            None => debug!("No process to send {:?} to", signal),
        }
    }

    /// Terminate the running process group
    ///
    /// A stopped group only acts on SIGTERM once it runs again, so it is
    /// continued right after.
    pub fn terminate(&self) {
        self.signal(GroupSignal::Terminate);
        self.signal(GroupSignal::Continue);
    }

    /// Check whether the process exited
    ///
    /// The process is forgotten once it exited or can no longer be waited on.
    pub fn poll_exit(&self) -> Result<Option<ProcessExit>> {
        let mut current = self.current.lock();
        let process = current.as_mut().ok_or(Error::NoProcess)?;

        let exit = match process.try_exit() {
            Ok(exit) => exit,
            Err(e) => {
                *current = None;
                return Err(e);
            }
        };
        if let Some(status) = exit {
            debug!("Process {} finished with {}", process.id(), status);
            *current = None;
        }
        Ok(exit)
    }

    pub fn is_running(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn window_title(&self) -> Option<String> {
        self.console.window_title()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedChild {
        polls_left: usize,
        signals: Arc<Mutex<Vec<GroupSignal>>>,
    }

    impl ChildProcess for ScriptedChild {
        fn id(&self) -> u32 {
            4242
        }

        fn signal_group(&mut self, signal: GroupSignal) -> Result<()> {
            self.signals.lock().push(signal);
            if signal == GroupSignal::Terminate {
                self.polls_left = 0;
            }
            Ok(())
        }

        fn try_exit(&mut self) -> Result<Option<ProcessExit>> {
            if self.polls_left == 0 {
                return Ok(Some(ProcessExit::signaled(15)));
            }
            self.polls_left -= 1;
            Ok(None)
        }
    }

    struct ScriptedLauncher {
        launches: AtomicUsize,
        signals: Arc<Mutex<Vec<GroupSignal>>>,
    }

    impl ProcessLauncher for ScriptedLauncher {
        fn launch(&self, _spec: &CommandSpec) -> Result<Launched> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Launched {
                process: Box::new(ScriptedChild {
                    polls_left: 100,
                    signals: self.signals.clone(),
                }),
                terminal: None,
            })
        }
    }

    fn controller() -> (ProcessController, Arc<Mutex<Vec<GroupSignal>>>) {
        let signals = Arc::new(Mutex::new(Vec::new()));
        let launcher = ScriptedLauncher {
            launches: AtomicUsize::new(0),
            signals: signals.clone(),
        };
        (
            ProcessController::new(Box::new(launcher), Arc::new(NullConsole)),
            signals,
        )
    }

    fn spec(argv: &[&str]) -> CommandSpec {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        CommandSpec::from_argv(&argv, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_command_spec_from_argv() {
        let spec = spec(&["/usr/bin/emerge", "--pretend", "=cat/a-1"]);
        assert_eq!(spec.program, "/usr/bin/emerge");
        assert_eq!(spec.args, vec!["--pretend", "=cat/a-1"]);
        assert_eq!(spec.to_string(), "/usr/bin/emerge --pretend =cat/a-1");
        assert!(CommandSpec::from_argv(&[], &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_signal_without_process_is_ignored() {
        let (controller, signals) = controller();
        controller.signal(GroupSignal::Terminate);
        assert!(signals.lock().is_empty());
        assert!(matches!(controller.poll_exit(), Err(Error::NoProcess)));
    }

    #[test]
    fn test_stop_continue_terminate() {
        let (controller, signals) = controller();
        assert_eq!(controller.start(&spec(&["emerge"])).unwrap(), 4242);
        assert!(controller.is_running());

        controller.signal(GroupSignal::Stop);
        controller.signal(GroupSignal::Continue);
        assert_eq!(controller.poll_exit().unwrap(), None);

        controller.signal(GroupSignal::Terminate);
        let exit = controller.poll_exit().unwrap().unwrap();
        assert!(!exit.success());
        assert_eq!(exit.signal, Some(15));
        assert!(!controller.is_running());

        assert_eq!(
            *signals.lock(),
            vec![GroupSignal::Stop, GroupSignal::Continue, GroupSignal::Terminate]
        );
    }

    #[test]
    fn test_terminate_continues_the_group() {
        let (controller, signals) = controller();
        controller.start(&spec(&["emerge"])).unwrap();

        controller.signal(GroupSignal::Stop);
        controller.terminate();
        assert_eq!(
            *signals.lock(),
            vec![GroupSignal::Stop, GroupSignal::Terminate, GroupSignal::Continue]
        );
    }

    #[test]
    fn test_group_signal_mapping() {
        assert_eq!(GroupSignal::Terminate.as_signal(), Signal::SIGTERM);
        assert_eq!(GroupSignal::Stop.as_signal(), Signal::SIGTSTP);
        assert_eq!(GroupSignal::Continue.as_signal(), Signal::SIGCONT);
    }
}
