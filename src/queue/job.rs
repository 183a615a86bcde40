// src/queue/job.rs

//! Jobs handed to the job queue and their execution
//!
//! A job is built and dispatched on the orchestrator thread. Everything that
//! happens afterwards (starting emerge, watching the terminal title, waiting
//! for the exit, refreshing the package database) runs on the job worker and
//! is reported back through [`QueueEvent`]s.

use crate::cpv::{Cpv, is_pseudo_package};
use crate::db::PackageDatabase;
use crate::error::Result;
use crate::jobs::JobSlot;
use crate::process::{CommandSpec, ProcessController, ProcessExit};
use crate::tree::{NodeId, Section};
use flume::Sender;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Identifier of a dispatched job
pub type JobId = u64;

/// Type of operation a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Merge packages and record them in the world file
    Merge,
    /// Merge packages without touching the world file
    Oneshot,
    /// Remove packages
    Unmerge,
    /// Update the world set
    UpdateWorld,
    /// One segment of a tree sync
    Sync,
}

impl JobKind {
    /// Queue section shown as in progress while the job runs
    pub fn section(&self) -> Option<Section> {
        match self {
            JobKind::Merge | JobKind::Oneshot => Some(Section::Install),
            JobKind::Unmerge => Some(Section::Uninstall),
            JobKind::UpdateWorld => Some(Section::Update),
            JobKind::Sync => None,
        }
    }
}

/// An emerge invocation waiting for dispatch
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    /// Full argument vector, program first
    pub argv: Vec<String>,
    /// Package arguments as queued (`category/name-version`, `world`, ...)
    pub packages: Vec<String>,
    /// Tree nodes cleared when the job is dispatched
    pub clear: Vec<NodeId>,
}

/// Progress reported by running jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    JobStarted {
        id: JobId,
        kind: JobKind,
        pid: u32,
    },
    /// Terminal title changed; `None` once the job is over
    TitleChanged { id: JobId, title: Option<String> },
    /// The process exited; `exit` tells whether it succeeded
    JobFinished {
        id: JobId,
        kind: JobKind,
        exit: ProcessExit,
    },
    /// The process could not be started or was lost
    JobFailed {
        id: JobId,
        kind: JobKind,
        error: String,
    },
    /// Dropped by a kill or an earlier failure in its sync chain
    JobSkipped { id: JobId, kind: JobKind },
}

impl QueueEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            QueueEvent::JobStarted { id, .. }
            | QueueEvent::TitleChanged { id, .. }
            | QueueEvent::JobFinished { id, .. }
            | QueueEvent::JobFailed { id, .. }
            | QueueEvent::JobSkipped { id, .. } => *id,
        }
    }

    /// True for the last event a job produces
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueEvent::JobFinished { .. }
                | QueueEvent::JobFailed { .. }
                | QueueEvent::JobSkipped { .. }
        )
    }
}

/// Category of a package argument; `None` for sets like `world`
pub(crate) fn package_category(package: &str) -> Option<String> {
    let package = package.trim_start_matches('=');
    if is_pseudo_package(package) {
        return None;
    }
    Cpv::parse(package).ok().map(|cpv| cpv.category().to_string())
}

/// A job on its way through the job queue
///
/// Reports [`QueueEvent::JobSkipped`] if it is dropped without running.
pub(crate) struct JobRun {
    pub id: JobId,
    pub kind: JobKind,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Categories reloaded after the process exited
    pub categories: Vec<String>,
    pub process: Arc<ProcessController>,
    pub db: Arc<dyn PackageDatabase>,
    pub events: Sender<QueueEvent>,
    pub poll: Duration,
    /// Shared by the segments of one sync command; set once a segment failed
    pub chain_failed: Option<Arc<AtomicBool>>,
    pub reported: bool,
}

impl JobRun {
    pub fn execute(mut self, slot: JobSlot) {
        if self.chain_aborted() {
            info!("Skipping job {}: an earlier sync step failed", self.id);
            self.report(QueueEvent::JobSkipped {
                id: self.id,
                kind: self.kind,
            });
            slot.next();
            return;
        }

        let started = CommandSpec::from_argv(&self.argv, &self.env)
            .and_then(|spec| self.process.start(&spec));
        match started {
            Ok(pid) => {
                let _ = self.events.send(QueueEvent::JobStarted {
                    id: self.id,
                    kind: self.kind,
                    pid,
                });
            }
            Err(e) => {
                error!("Job {} failed to start: {}", self.id, e);
                self.abort_chain();
                self.report(QueueEvent::JobFailed {
                    id: self.id,
                    kind: self.kind,
                    error: e.to_string(),
                });
                slot.next();
                return;
            }
        }

        let exit = self.monitor();
        self.reload_categories();

        match exit {
            Ok(exit) => {
                if exit.success() {
                    info!("Job {} ({:?}) finished", self.id, self.kind);
                } else {
                    warn!("Job {} ({:?}) ended with {}", self.id, self.kind, exit);
                    self.abort_chain();
                }
                self.report(QueueEvent::JobFinished {
                    id: self.id,
                    kind: self.kind,
                    exit,
                });
            }
            Err(e) => {
                error!("Lost track of job {}: {}", self.id, e);
                self.abort_chain();
                self.report(QueueEvent::JobFailed {
                    id: self.id,
                    kind: self.kind,
                    error: e.to_string(),
                });
            }
        }

        slot.next();
    }

    /// Poll the process until it exits, forwarding title changes
    fn monitor(&self) -> Result<ProcessExit> {
        let mut last_title: Option<String> = None;

        let result = loop {
            match self.process.poll_exit() {
                Ok(Some(exit)) => break Ok(exit),
                Ok(None) => {}
                Err(e) => break Err(e),
            }

            let title = self.process.window_title();
            if title != last_title {
                debug!("Job {} title: {:?}", self.id, title);
                let _ = self.events.send(QueueEvent::TitleChanged {
                    id: self.id,
                    title: title.clone(),
                });
                last_title = title;
            }

            thread::sleep(self.poll);
        };

        if last_title.is_some() {
            let _ = self.events.send(QueueEvent::TitleChanged {
                id: self.id,
                title: None,
            });
        }
        result
    }

    fn reload_categories(&self) {
        for category in &self.categories {
            self.db.reload(category);
            debug!("Category {} refreshed", category);
        }
    }

    fn chain_aborted(&self) -> bool {
        self.chain_failed
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn abort_chain(&self) {
        if let Some(flag) = &self.chain_failed {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn report(&mut self, event: QueueEvent) {
        self.reported = true;
        let _ = self.events.send(event);
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.reported {
            debug!("Job {} dropped before it ran", self.id);
            let _ = self.events.send(QueueEvent::JobSkipped {
                id: self.id,
                kind: self.kind,
            });
        }
    }
}
