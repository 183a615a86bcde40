// src/queue/mod.rs

//! The emerge queue
//!
//! [`EmergeQueue`] tracks which packages the user wants merged, merged
//! without a world entry, or removed. Appending a package pulls its
//! dependencies into the install section of the tree through the package
//! oracle. The `emerge`, `unmerge`, `update_world` and `sync` operations turn
//! the queued work into jobs that run one at a time on the job queue.
//!
//! All state lives on the thread that owns the queue. Running jobs report
//! back through a channel drained by [`EmergeQueue::process_events`].

mod job;

pub use job::{Job, JobId, JobKind, QueueEvent};

use crate::config::{EmergeCommands, MonitorConfig};
use crate::cpv::Cpv;
use crate::db::PackageDatabase;
use crate::error::{Error, Result};
use crate::flags::FlagEdits;
use crate::jobs::JobQueue;
use crate::oracle::{Package, PackageOracle};
use crate::process::{GroupSignal, ProcessController};
use crate::tree::{DependencyTree, NodeId, QueueEntry, Section};
use crate::version::PortageVersion;
use flume::{Receiver, Sender};
use job::{JobRun, package_category};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How a package is added to the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOptions {
    /// Queue for removal instead of installation
    pub unmerge: bool,
    /// Rebuild an already queued package (e.g. after USE changes)
    pub update: bool,
    /// Rebuild even if the dependencies did not change
    pub force_update: bool,
    /// Accept masked and testing candidates
    pub allow_masked: bool,
    /// Do not record the package in the world file
    pub oneshot: bool,
}

impl AppendOptions {
    pub fn unmerge() -> Self {
        Self {
            unmerge: true,
            ..Self::default()
        }
    }

    pub fn update(force: bool) -> Self {
        Self {
            update: true,
            force_update: force,
            ..Self::default()
        }
    }

    pub fn oneshot(mut self) -> Self {
        self.oneshot = true;
        self
    }

    pub fn allow_masked(mut self) -> Self {
        self.allow_masked = true;
        self
    }
}

/// Queue of pending package operations
pub struct EmergeQueue {
    tree: DependencyTree,
    merge_queue: Vec<Cpv>,
    oneshot_queue: Vec<Cpv>,
    unmerge_queue: Vec<Cpv>,
    /// Dependencies recorded when a package entered the install section
    deps_of: HashMap<Cpv, Vec<Cpv>>,
    node_of: HashMap<Cpv, NodeId>,
    unmerge_node_of: HashMap<Cpv, NodeId>,
    update_node_of: HashMap<Cpv, NodeId>,

    oracle: Arc<dyn PackageOracle>,
    flags: Arc<dyn FlagEdits>,
    db: Arc<dyn PackageDatabase>,
    process: Arc<ProcessController>,
    monitor: MonitorConfig,

    jobs: JobQueue,
    next_job_id: JobId,
    /// Dispatched jobs that have not reported their end yet
    in_flight: HashMap<JobId, Option<Section>>,
    events_tx: Sender<QueueEvent>,
    events_rx: Receiver<QueueEvent>,
}

impl EmergeQueue {
    /// Create a queue and start its job worker
    pub fn new(
        oracle: Arc<dyn PackageOracle>,
        flags: Arc<dyn FlagEdits>,
        db: Arc<dyn PackageDatabase>,
        process: Arc<ProcessController>,
        monitor: MonitorConfig,
    ) -> Result<Self> {
        let (events_tx, events_rx) = flume::unbounded();
        Ok(Self {
            tree: DependencyTree::new(),
            merge_queue: Vec::new(),
            oneshot_queue: Vec::new(),
            unmerge_queue: Vec::new(),
            deps_of: HashMap::new(),
            node_of: HashMap::new(),
            unmerge_node_of: HashMap::new(),
            update_node_of: HashMap::new(),
            oracle,
            flags,
            db,
            process,
            monitor,
            jobs: JobQueue::new()?,
            next_job_id: 1,
            in_flight: HashMap::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn tree(&self) -> &DependencyTree {
        &self.tree
    }

    pub fn merge_queue(&self) -> &[Cpv] {
        &self.merge_queue
    }

    pub fn oneshot_queue(&self) -> &[Cpv] {
        &self.oneshot_queue
    }

    pub fn unmerge_queue(&self) -> &[Cpv] {
        &self.unmerge_queue
    }

    /// Dependencies recorded for a package in the install section
    pub fn deps_of(&self, cpv: &Cpv) -> Option<&[Cpv]> {
        self.deps_of.get(cpv).map(Vec::as_slice)
    }

    /// Install section node of a package
    pub fn node_of(&self, cpv: &Cpv) -> Option<NodeId> {
        self.node_of.get(cpv).copied()
    }

    /// Uninstall section node of a package
    pub fn unmerge_node_of(&self, cpv: &Cpv) -> Option<NodeId> {
        self.unmerge_node_of.get(cpv).copied()
    }

    pub fn process(&self) -> &Arc<ProcessController> {
        &self.process
    }

    /// Jobs waiting behind the running one
    pub fn pending_jobs(&self) -> usize {
        self.jobs.pending()
    }

    /// Add a package to the queue
    ///
    /// Installs resolve the package and its dependencies through the oracle.
    /// On failure nothing added by this call stays in the tree or the queues.
    pub fn append(&mut self, cpv: &Cpv, opts: AppendOptions) -> Result<()> {
        if opts.unmerge {
            return self.append_unmerge(cpv);
        }

        if self.unmerge_queue.contains(cpv) {
            return Err(Error::QueueConflict(cpv.clone()));
        }

        if opts.update && self.deps_of.contains_key(cpv) {
            return self.rebuild(cpv, opts);
        }

        let root = self.tree.root(Section::Install);
        self.update_tree(root, cpv, opts.allow_masked, opts.oneshot, true)?;
        self.queue_append(cpv, opts.oneshot);
        info!("Queued {} for merge", cpv);
        Ok(())
    }

    fn append_unmerge(&mut self, cpv: &Cpv) -> Result<()> {
        if self.merge_queue.contains(cpv) || self.oneshot_queue.contains(cpv) {
            return Err(Error::QueueConflict(cpv.clone()));
        }
        if self.unmerge_queue.contains(cpv) {
            debug!("{} already queued for unmerge", cpv);
            return Ok(());
        }

        let root = self.tree.root(Section::Uninstall);
        if let Some(node) = self.tree.append(root, QueueEntry::new(cpv.clone())) {
            self.unmerge_node_of.insert(cpv.clone(), node);
        }
        self.unmerge_queue.push(cpv.clone());
        info!("Queued {} for unmerge", cpv);
        Ok(())
    }

    /// Rebuild the subtree of a tracked package if its dependencies changed
    ///
    /// The package keeps its place in the merge or oneshot set; `opts.oneshot`
    /// is not consulted. If the new dependency walk fails, the previous
    /// subtree and bookkeeping are restored before the error is returned.
    fn rebuild(&mut self, cpv: &Cpv, opts: AppendOptions) -> Result<()> {
        let pkg = self.oracle.resolve(cpv, opts.allow_masked)?;
        let deps = pkg.dependencies()?;

        if !opts.force_update && self.deps_of.get(cpv) == Some(&deps) {
            debug!("Dependencies of {} unchanged", cpv);
            return Ok(());
        }

        let oneshot = self.oneshot_queue.contains(cpv);
        let saved_merge = self.merge_queue.clone();
        let saved_oneshot = self.oneshot_queue.clone();

        // Take the old subtree out of the tree and the maps, keeping its nodes
        let old_node = self.node_of.get(cpv).copied();
        let mut parent = None;
        let mut detached = None;
        let mut saved = Vec::new();
        if let Some(node) = old_node {
            parent = self.tree.parent(node);
            for id in std::iter::once(node).chain(self.tree.descendants(node)) {
                let Some(dep) = self.tree.entry(id).map(|e| e.cpv.clone()) else {
                    continue;
                };
                if self.node_of.get(&dep) == Some(&id) {
                    saved.push((dep.clone(), id, self.deps_of.get(&dep).cloned()));
                }
                self.forget(id, false);
            }
            detached = self.tree.detach(node).map(|pos| (node, pos));
        }
        // update_tree stops at packages with recorded dependencies
        self.deps_of.remove(cpv);

        let parent = match parent.filter(|p| self.tree.contains(*p)) {
            Some(parent) => parent,
            None => self.tree.root(Section::Install),
        };

        match self.update_tree(parent, cpv, opts.allow_masked, oneshot, false) {
            Ok(()) => {
                if let Some((node, _)) = detached {
                    self.tree.remove(node);
                }
                self.restore_queues(saved_merge, saved_oneshot);
                info!("Rebuilt {} in queue", cpv);
                Ok(())
            }
            Err(e) => {
                if let Some((node, pos)) = detached {
                    self.tree.reattach(node, pos);
                }
                for (dep, id, deps) in saved {
                    self.node_of.insert(dep.clone(), id);
                    if let Some(deps) = deps {
                        self.deps_of.insert(dep, deps);
                    }
                }
                self.restore_queues(saved_merge, saved_oneshot);
                warn!("Rebuild of {} failed, keeping previous tree: {}", cpv, e);
                Err(e)
            }
        }
    }

    /// Put back the merge sets as they were, minus packages no longer tracked
    fn restore_queues(&mut self, merge: Vec<Cpv>, oneshot: Vec<Cpv>) {
        self.merge_queue = merge
            .into_iter()
            .filter(|c| self.node_of.contains_key(c))
            .collect();
        self.oneshot_queue = oneshot
            .into_iter()
            .filter(|c| self.node_of.contains_key(c))
            .collect();
    }

    /// Insert a package below `parent` and recurse into its dependencies
    ///
    /// On failure the subtree built by this call is removed again;
    /// `discard_flags` decides whether pending flag edits go with it.
    fn update_tree(
        &mut self,
        parent: NodeId,
        cpv: &Cpv,
        allow_masked: bool,
        oneshot: bool,
        discard_flags: bool,
    ) -> Result<()> {
        if self.deps_of.contains_key(cpv) {
            return Ok(());
        }

        let pkg = self.oracle.resolve(cpv, allow_masked)?;
        let deps = pkg.dependencies()?;

        let mut entry = QueueEntry::new(cpv.clone());
        entry.oneshot = oneshot;
        if !pkg.is_installed() {
            self.detect_update(&*pkg, &mut entry)?;
        }

        if allow_masked {
            if pkg.is_masked() {
                self.flags.set_masked(cpv, false);
            }
            if pkg.is_testing() {
                self.flags.set_testing(cpv, true);
            }
        }
        entry.use_changes = self.flags.new_use_flags(cpv);

        let Some(node) = self.tree.append(parent, entry) else {
            warn!("Parent of {} is no longer in the tree", cpv);
            return Ok(());
        };
        self.node_of.insert(cpv.clone(), node);
        self.deps_of.insert(cpv.clone(), deps.clone());
        debug!("Added {} with {} dependencies", cpv, deps.len());

        for dep in &deps {
            if let Err(e) = self.update_tree(node, dep, allow_masked, false, discard_flags) {
                debug!("Rolling back {}: {}", cpv, e);
                self.remove_with_children(node, discard_flags);
                return Err(e);
            }
        }
        Ok(())
    }

    fn detect_update(&self, pkg: &dyn Package, entry: &mut QueueEntry) -> Result<()> {
        let installed = self.oracle.find_installed(&pkg.slot_key())?;
        let Some(old) = installed.first() else {
            return Ok(());
        };

        entry.prior_version = Some(old.version().to_string());
        match (
            PortageVersion::parse(pkg.version()),
            PortageVersion::parse(old.version()),
        ) {
            (Ok(new), Ok(old)) if new < old => entry.downgrade = true,
            _ => entry.update = true,
        }
        Ok(())
    }

    fn queue_append(&mut self, cpv: &Cpv, oneshot: bool) {
        let (target, other) = if oneshot {
            (&mut self.oneshot_queue, &mut self.merge_queue)
        } else {
            (&mut self.merge_queue, &mut self.oneshot_queue)
        };
        other.retain(|c| c != cpv);
        if !target.contains(cpv) {
            target.push(cpv.clone());
        }
    }

    /// List a package in the update section
    pub fn add_update_candidate(&mut self, cpv: &Cpv) {
        if self.update_node_of.contains_key(cpv) {
            return;
        }
        let root = self.tree.root(Section::Update);
        if let Some(node) = self.tree.append(root, QueueEntry::new(cpv.clone())) {
            self.update_node_of.insert(cpv.clone(), node);
        }
    }

    /// Remove a node; children go first
    ///
    /// Roots and stale handles are left alone. Returns the number of nodes
    /// removed.
    pub fn remove(&mut self, node: NodeId, remove_new_flags: bool) -> usize {
        if !self.tree.contains(node) || self.tree.is_root(node) {
            return 0;
        }

        let mut removed = self.remove_children(node, remove_new_flags);
        self.forget(node, remove_new_flags);
        removed += self.tree.remove(node);
        removed
    }

    /// Remove everything below a node, deepest first
    pub fn remove_children(&mut self, node: NodeId, remove_new_flags: bool) -> usize {
        let children = self.tree.children(node).to_vec();
        let mut removed = 0;
        for child in children {
            removed += self.remove(child, remove_new_flags);
        }
        removed
    }

    pub fn remove_with_children(&mut self, node: NodeId, remove_new_flags: bool) -> usize {
        let removed = self.remove_children(node, remove_new_flags);
        removed + self.remove(node, remove_new_flags)
    }

    /// Drop the bookkeeping of a node about to leave the tree
    fn forget(&mut self, node: NodeId, remove_new_flags: bool) {
        let (Some(section), Some(entry)) = (self.tree.section(node), self.tree.entry(node)) else {
            return;
        };
        let cpv = entry.cpv.clone();

        match section {
            Section::Install => {
                if self.node_of.get(&cpv) != Some(&node) {
                    return;
                }
                self.node_of.remove(&cpv);
                if self.deps_of.remove(&cpv).is_none() {
                    debug!("{} had no recorded dependencies", cpv);
                }
                self.merge_queue.retain(|c| *c != cpv);
                self.oneshot_queue.retain(|c| *c != cpv);

                if remove_new_flags {
                    self.flags.remove_new_use_flags(&cpv);
                    self.flags.remove_new_masked(&cpv);
                    self.flags.remove_new_testing(&cpv);
                }
            }
            Section::Uninstall => {
                self.unmerge_queue.retain(|c| *c != cpv);
                if self.unmerge_node_of.get(&cpv) == Some(&node) {
                    self.unmerge_node_of.remove(&cpv);
                }
            }
            Section::Update => {
                if self.update_node_of.get(&cpv) == Some(&node) {
                    self.update_node_of.remove(&cpv);
                }
            }
        }
    }

    fn commands(&self) -> &EmergeCommands {
        self.oracle.commands()
    }

    /// Assemble an emerge command line, checking that the program exists
    fn command_line(&self, flags: &[String], force: bool, extra: &[String], packages: &[String]) -> Result<Vec<String>> {
        let commands = self.commands();
        let mut argv = commands.command.clone();
        argv.extend(flags.iter().cloned());
        if !force {
            argv.extend(commands.pretend_flags.iter().cloned());
        }
        argv.extend(extra.iter().cloned());
        argv.extend(packages.iter().cloned());

        check_program(&argv)?;
        Ok(argv)
    }

    fn new_job(&mut self, kind: JobKind, argv: Vec<String>, packages: Vec<String>, clear: Vec<NodeId>) -> Job {
        let id = self.next_job_id;
        self.next_job_id += 1;
        Job {
            id,
            kind,
            argv,
            packages,
            clear,
        }
    }

    /// Merge everything queued; oneshot packages go first as their own job
    ///
    /// Without `force` emerge only pretends. Returns the number of jobs
    /// submitted.
    ///
    /// A command that cannot be found on `PATH` fails here with
    /// `Error::CommandNotFound` and leaves the queue untouched. Jobs run later
    /// on the job worker, so a spawn failure past that check is reported as
    /// [`QueueEvent::JobFailed`] from [`process_events`](Self::process_events).
    pub fn emerge(&mut self, force: bool, extra: &[String]) -> Result<usize> {
        let mut jobs = Vec::new();

        for (kind, queue) in [
            (JobKind::Oneshot, self.oneshot_queue.clone()),
            (JobKind::Merge, self.merge_queue.clone()),
        ] {
            if queue.is_empty() {
                continue;
            }
            let flags = match kind {
                JobKind::Oneshot => vec![self.commands().oneshot_flag.clone()],
                _ => Vec::new(),
            };
            let atoms: Vec<String> = queue.iter().map(Cpv::to_atom).collect();
            let argv = self.command_line(&flags, force, extra, &atoms)?;
            let clear: Vec<NodeId> = queue.iter().filter_map(|cpv| self.node_of(cpv)).collect();
            let packages: Vec<String> = queue.iter().map(|cpv| cpv.to_string()).collect();
            jobs.push((kind, argv, packages, clear));
        }

        let count = jobs.len();
        for (kind, argv, packages, clear) in jobs {
            let job = self.new_job(kind, argv, packages, clear);
            self.dispatch(job, None);
        }
        Ok(count)
    }

    /// Remove everything queued for unmerge
    ///
    /// Errors are reported the same way as for [`emerge`](Self::emerge).
    pub fn unmerge(&mut self, force: bool, extra: &[String]) -> Result<usize> {
        if self.unmerge_queue.is_empty() {
            return Ok(0);
        }

        let flags = vec![self.commands().unmerge_flag.clone()];
        let atoms: Vec<String> = self.unmerge_queue.iter().map(Cpv::to_atom).collect();
        let argv = self.command_line(&flags, force, extra, &atoms)?;
        let packages: Vec<String> = self.unmerge_queue.iter().map(|cpv| cpv.to_string()).collect();
        let clear: Vec<NodeId> = self.tree.existing_root(Section::Uninstall).into_iter().collect();

        let job = self.new_job(JobKind::Unmerge, argv, packages, clear);
        self.dispatch(job, None);
        Ok(1)
    }

    /// Update the world set
    pub fn update_world(&mut self, force: bool, newuse: bool, deep: bool, extra: &[String]) -> Result<usize> {
        let commands = self.commands();
        let mut flags = vec![commands.update_flag.clone()];
        if newuse {
            flags.push(commands.newuse_flag.clone());
        }
        if deep {
            flags.push(commands.deep_flag.clone());
        }

        let packages = vec!["world".to_string()];
        let argv = self.command_line(&flags, force, extra, &packages)?;
        let clear: Vec<NodeId> = self.tree.existing_root(Section::Update).into_iter().collect();

        let job = self.new_job(JobKind::UpdateWorld, argv, packages, clear);
        self.dispatch(job, None);
        Ok(1)
    }

    /// Sync the package tree
    ///
    /// `command` defaults to the configured sync command. Commands joined by
    /// `&&` run as separate jobs; a failing one cancels the rest. Every
    /// segment's program is looked up before any job is submitted; spawn
    /// failures afterwards arrive as [`QueueEvent::JobFailed`].
    pub fn sync(&mut self, command: Option<&str>) -> Result<usize> {
        let command = command
            .map(str::to_string)
            .unwrap_or_else(|| self.commands().sync_command.clone());

        let segments: Vec<Vec<String>> = command
            .split("&&")
            .map(|segment| segment.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty())
            .collect();
        if segments.is_empty() {
            return Err(Error::CommandNotFound(command));
        }
        for argv in &segments {
            check_program(argv)?;
        }

        let chain = Arc::new(AtomicBool::new(false));
        let count = segments.len();
        for argv in segments {
            let job = self.new_job(JobKind::Sync, argv, Vec::new(), Vec::new());
            self.dispatch(job, Some(chain.clone()));
        }
        Ok(count)
    }

    /// Clear the job's nodes from the tree and hand it to the job queue
    fn dispatch(&mut self, job: Job, chain_failed: Option<Arc<AtomicBool>>) {
        let mut categories: BTreeSet<String> =
            job.packages.iter().filter_map(|p| package_category(p)).collect();
        for &node in &job.clear {
            for id in std::iter::once(node).chain(self.tree.descendants(node)) {
                if let Some(entry) = self.tree.entry(id) {
                    categories.insert(entry.cpv.category().to_string());
                }
            }
        }

        for &node in &job.clear {
            if self.tree.is_root(node) {
                self.remove_children(node, false);
            } else {
                self.remove_with_children(node, false);
            }
        }

        let section = job.kind.section();
        if let Some(section) = section {
            self.tree.mark_in_progress(section, true);
        }
        self.in_flight.insert(job.id, section);

        info!("Dispatching job {} ({:?}): {}", job.id, job.kind, job.argv.join(" "));

        let run = JobRun {
            id: job.id,
            kind: job.kind,
            argv: job.argv,
            env: self.commands().env.clone(),
            categories: categories.into_iter().collect(),
            process: self.process.clone(),
            db: self.db.clone(),
            events: self.events_tx.clone(),
            poll: self.monitor.title_poll(),
            chain_failed,
            reported: false,
        };
        self.jobs.put(Box::new(move |slot| run.execute(slot)));
    }

    /// Apply what running jobs reported since the last call
    pub fn process_events(&mut self) -> Vec<QueueEvent> {
        let events: Vec<QueueEvent> = self.events_rx.try_iter().collect();

        for event in events.iter().filter(|e| e.is_terminal()) {
            let Some(Some(section)) = self.in_flight.remove(&event.job_id()) else {
                continue;
            };
            if !self.in_flight.values().any(|s| *s == Some(section)) {
                self.tree.mark_in_progress(section, false);
            }
        }
        events
    }

    /// Drop pending jobs and terminate the running emerge
    ///
    /// Works on a stopped emerge too; the group is continued after SIGTERM.
    pub fn kill_emerge(&self) {
        let dropped = self.jobs.clear();
        info!("Killing emerge ({} pending jobs dropped)", dropped);
        self.process.terminate();
    }

    /// Pause the running emerge
    pub fn stop_emerge(&self) {
        self.process.signal(GroupSignal::Stop);
    }

    pub fn continue_emerge(&self) {
        self.process.signal(GroupSignal::Continue);
    }

    /// True when nothing is queued, pending or running
    pub fn is_empty(&self) -> bool {
        self.merge_queue.is_empty()
            && self.oneshot_queue.is_empty()
            && self.unmerge_queue.is_empty()
            && self.jobs.is_idle()
            && !self.process.is_running()
    }

    /// Block until all dispatched jobs are done; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.jobs.wait_idle(timeout)
    }
}

fn check_program(argv: &[String]) -> Result<()> {
    let program = argv.first().ok_or_else(|| Error::CommandNotFound(String::new()))?;
    which::which(program).map_err(|_| Error::CommandNotFound(program.clone()))?;
    Ok(())
}
