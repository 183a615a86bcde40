// src/lib.rs

//! Emerge queue for Portage frontends
//!
//! Keeps the packages a user picked for installation, removal or world
//! update in a dependency tree and runs the resulting emerge invocations one
//! at a time in the background.
//!
//! # Architecture
//!
//! - Single owner: the tree and the queues are mutated only by the thread
//!   holding the [`EmergeQueue`]
//! - Package knowledge comes from a [`PackageOracle`]; the queue never
//!   resolves dependencies itself
//! - Jobs run serialized on a [`JobQueue`] worker; emerge runs on a pty in
//!   its own process group
//! - Completion is reported as [`QueueEvent`]s drained with
//!   [`EmergeQueue::process_events`]

pub mod config;
pub mod cpv;
pub mod db;
mod error;
pub mod flags;
pub mod jobs;
pub mod logging;
pub mod oracle;
pub mod process;
pub mod queue;
pub mod tree;
pub mod version;

pub use config::{EmergeCommands, LoggingConfig, MonitorConfig, QueueConfig};
pub use cpv::Cpv;
pub use db::{CategoryCache, PackageDatabase};
pub use error::{Error, Result};
pub use flags::{FlagEdits, FlagSession};
pub use jobs::{JobQueue, JobSlot};
pub use oracle::{MemoryOracle, MemoryPackage, Package, PackageOracle};
pub use process::{
    ChildProcess, CommandSpec, Console, GroupSignal, NullConsole, ProcessController, ProcessExit,
    ProcessLauncher, PtyConsole, PtyLauncher,
};
pub use queue::{AppendOptions, EmergeQueue, JobKind, QueueEvent};
pub use tree::{DependencyTree, NodeId, QueueEntry, Section};
pub use version::PortageVersion;
