// src/jobs.rs

//! Serialized execution of queue jobs
//!
//! A [`JobQueue`] runs job functions one after another on a dedicated worker
//! thread. A job owns a [`JobSlot`] and keeps the queue blocked until the slot
//! is released, which lets a job hand its slot to a monitor thread and return
//! while its external process is still running.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// A unit of work submitted to the queue
pub type JobFn = Box<dyn FnOnce(JobSlot) + Send + 'static>;

#[derive(Default)]
struct State {
    pending: VecDeque<JobFn>,
    /// A job holds the slot
    busy: bool,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

/// FIFO of job functions with a single running slot
pub struct JobQueue {
    shared: Arc<Shared>,
}

impl JobQueue {
    /// Create the queue and start its worker thread
    pub fn new() -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = shared.clone();

        thread::Builder::new()
            .name("emerge-jobs".to_string())
            .spawn(move || run_worker(worker))
            .map_err(Error::Io)?;

        Ok(Self { shared })
    }

    /// Enqueue a job; it starts once every earlier job released its slot
    pub fn put(&self, job: JobFn) {
        let mut state = self.shared.state.lock();
        state.pending.push_back(job);
        debug!("Job queued ({} pending)", state.pending.len());
        self.shared.cond.notify_all();
    }

    /// Drop all jobs that have not started yet; returns how many were dropped
    pub fn clear(&self) -> usize {
        let dropped: Vec<JobFn> = {
            let mut state = self.shared.state.lock();
            state.pending.drain(..).collect()
        };
        self.shared.cond.notify_all();

        if !dropped.is_empty() {
            debug!("Dropped {} pending jobs", dropped.len());
        }
        dropped.len()
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// True while a job holds the slot
    pub fn is_busy(&self) -> bool {
        self.shared.state.lock().busy
    }

    /// No job running and none pending
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock();
        !state.busy && state.pending.is_empty()
    }

    /// Block until the queue is idle; returns false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.busy || !state.pending.is_empty() {
            if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                return !state.busy && state.pending.is_empty();
            }
        }
        true
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        state.pending.clear();
        self.shared.cond.notify_all();
    }
}

fn run_worker(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if state.closed {
                    debug!("Job worker exiting");
                    return;
                }
                if !state.busy {
                    if let Some(job) = state.pending.pop_front() {
                        state.busy = true;
                        break job;
                    }
                }
                shared.cond.wait(&mut state);
            }
        };

        let slot = JobSlot {
            shared: shared.clone(),
            released: false,
        };
        if catch_unwind(AssertUnwindSafe(move || job(slot))).is_err() {
            error!("Job panicked; continuing with the next one");
        }
    }
}

/// Permission to run, held by exactly one job at a time
pub struct JobSlot {
    shared: Arc<Shared>,
    released: bool,
}

impl JobSlot {
    /// Release the slot and let the next job start
    pub fn next(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.shared.state.lock();
        state.busy = false;
        self.shared.cond.notify_all();
    }
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        if !self.released {
            warn!("Job slot dropped without being released");
            self.release();
        }
    }
}
