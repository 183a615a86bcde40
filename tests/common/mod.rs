// tests/common/mod.rs

//! Shared fakes and helpers for integration tests.

#![allow(dead_code)]

use emerge_queue::process::Launched;
use emerge_queue::{
    ChildProcess, CommandSpec, Console, Cpv, EmergeCommands, EmergeQueue, Error, FlagSession,
    GroupSignal, MemoryOracle, MemoryPackage, MonitorConfig, PackageDatabase, ProcessController,
    ProcessExit, ProcessLauncher, QueueEvent, Result,
};
use parking_lot::Mutex;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

/// How fake processes behave
#[derive(Debug, Clone, Copy)]
pub enum FakeBehavior {
    /// Exit with the code after the delay
    ExitAfter(Duration, i32),
    /// Run until terminated
    Hang,
    /// Fail to start
    FailSpawn,
}

/// Launcher recording every command it was asked to start
pub struct FakeLauncher {
    pub launched: Arc<Mutex<Vec<CommandSpec>>>,
    pub signals: Arc<Mutex<Vec<GroupSignal>>>,
    behavior: FakeBehavior,
}

impl FakeLauncher {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            launched: Arc::new(Mutex::new(Vec::new())),
            signals: Arc::new(Mutex::new(Vec::new())),
            behavior,
        }
    }

    pub fn quick() -> Self {
        Self::new(FakeBehavior::ExitAfter(Duration::from_millis(20), 0))
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &CommandSpec) -> Result<Launched> {
        if let FakeBehavior::FailSpawn = self.behavior {
            return Err(Error::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "not executable"),
            });
        }
        let mut launched = self.launched.lock();
        launched.push(spec.clone());
        Ok(Launched {
            process: Box::new(FakeChild {
                pid: 1000 + launched.len() as u32,
                started: Instant::now(),
                behavior: self.behavior,
                stopped: false,
                terminated: false,
                signals: self.signals.clone(),
            }),
            terminal: None,
        })
    }
}

struct FakeChild {
    pid: u32,
    started: Instant,
    behavior: FakeBehavior,
    stopped: bool,
    terminated: bool,
    signals: Arc<Mutex<Vec<GroupSignal>>>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> u32 {
        self.pid
    }

    fn signal_group(&mut self, signal: GroupSignal) -> Result<()> {
        self.signals.lock().push(signal);
        match signal {
            GroupSignal::Terminate => self.terminated = true,
            GroupSignal::Stop => self.stopped = true,
            GroupSignal::Continue => self.stopped = false,
        }
        Ok(())
    }

    fn try_exit(&mut self) -> Result<Option<ProcessExit>> {
        // A stopped child acts on nothing until it is continued
        if self.stopped {
            return Ok(None);
        }
        if self.terminated {
            return Ok(Some(ProcessExit::signaled(15)));
        }
        match self.behavior {
            FakeBehavior::ExitAfter(delay, code) if self.started.elapsed() >= delay => {
                Ok(Some(ProcessExit::exited(code)))
            }
            _ => Ok(None),
        }
    }
}

/// Console whose title is set by the test
#[derive(Default)]
pub struct ScriptedConsole {
    pub title: Mutex<Option<String>>,
}

impl Console for ScriptedConsole {
    fn attach_terminal(&self, _terminal: OwnedFd) -> Result<()> {
        Ok(())
    }

    fn window_title(&self) -> Option<String> {
        self.title.lock().clone()
    }
}

/// Database remembering which categories were reloaded
#[derive(Default)]
pub struct RecordingDatabase {
    pub reloads: Mutex<Vec<String>>,
}

impl PackageDatabase for RecordingDatabase {
    fn reload(&self, category: &str) {
        self.reloads.lock().push(category.to_string());
    }
}

/// Everything a queue test needs to look at
pub struct Harness {
    pub queue: EmergeQueue,
    pub oracle: Arc<MemoryOracle>,
    pub flags: Arc<FlagSession>,
    pub db: Arc<RecordingDatabase>,
    pub console: Arc<ScriptedConsole>,
    pub launched: Arc<Mutex<Vec<CommandSpec>>>,
    pub signals: Arc<Mutex<Vec<GroupSignal>>>,
}

/// Commands resolvable on any test machine
pub fn test_commands() -> EmergeCommands {
    EmergeCommands {
        command: vec!["sh".to_string(), "/usr/bin/emerge".to_string()],
        sync_command: "true --sync".to_string(),
        ..EmergeCommands::default()
    }
}

pub fn harness(launcher: FakeLauncher) -> Harness {
    harness_with(launcher, test_commands())
}

pub fn harness_with(launcher: FakeLauncher, commands: EmergeCommands) -> Harness {
    let oracle = Arc::new(MemoryOracle::with_commands(commands));
    let flags = Arc::new(FlagSession::new());
    let db = Arc::new(RecordingDatabase::default());
    let console = Arc::new(ScriptedConsole::default());
    let launched = launcher.launched.clone();
    let signals = launcher.signals.clone();

    let process = Arc::new(ProcessController::new(Box::new(launcher), console.clone()));
    let queue = EmergeQueue::new(
        oracle.clone(),
        flags.clone(),
        db.clone(),
        process,
        MonitorConfig { title_poll_ms: 5 },
    )
    .unwrap();

    Harness {
        queue,
        oracle,
        flags,
        db,
        console,
        launched,
        signals,
    }
}

impl Harness {
    /// Add a package to the oracle: `add("cat/foo-1.0", &["cat/bar-2.0"])`
    pub fn add(&self, cpv: &str, deps: &[&str]) {
        self.oracle
            .insert(MemoryPackage::parse(cpv).unwrap().depends_on(deps).unwrap());
    }

    pub fn insert(&self, package: MemoryPackage) {
        self.oracle.insert(package);
    }

    /// Collect events until `done` holds for the collected list
    pub fn events_until(&mut self, done: impl Fn(&[QueueEvent]) -> bool) -> Vec<QueueEvent> {
        let deadline = Instant::now() + WAIT;
        let mut events = Vec::new();
        loop {
            events.extend(self.queue.process_events());
            if done(&events) || Instant::now() >= deadline {
                return events;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Collect events until `count` jobs reported their end
    pub fn finished_jobs(&mut self, count: usize) -> Vec<QueueEvent> {
        self.events_until(|events| events.iter().filter(|e| e.is_terminal()).count() >= count)
    }

    pub fn argv(&self, index: usize) -> Vec<String> {
        let launched = self.launched.lock();
        let spec = &launched[index];
        std::iter::once(spec.program.clone())
            .chain(spec.args.iter().cloned())
            .collect()
    }
}

pub fn cpv(s: &str) -> Cpv {
    Cpv::parse(s).unwrap()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
