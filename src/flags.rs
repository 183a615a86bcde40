// src/flags.rs

//! Pending USE flag, mask and keyword edits
//!
//! Edits made in the frontend are kept per package until they are written to
//! the portage configuration files (not part of this crate) or discarded
//! together with the queue entry that needed them. The state lives in a
//! session object shared by reference, so two sessions never see each
//! other's edits.

use crate::cpv::Cpv;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Collaborator holding pending edits tied to package references
pub trait FlagEdits: Send + Sync {
    /// Pending USE changes as `+flag` / `-flag`
    fn new_use_flags(&self, cpv: &Cpv) -> Vec<String>;

    fn remove_new_use_flags(&self, cpv: &Cpv);

    fn remove_new_masked(&self, cpv: &Cpv);

    fn remove_new_testing(&self, cpv: &Cpv);

    /// Record a pending mask (`true`) or unmask (`false`)
    fn set_masked(&self, cpv: &Cpv, masked: bool);

    /// Record a pending testing keyword acceptance or revocation
    fn set_testing(&self, cpv: &Cpv, enable: bool);
}

/// Pending mask change of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskChange {
    Masked,
    Unmasked,
}

#[derive(Debug, Default)]
struct SessionState {
    use_flags: HashMap<Cpv, Vec<String>>,
    masked: HashMap<Cpv, MaskChange>,
    testing: HashMap<Cpv, bool>,
}

/// Session-scoped store of pending edits
#[derive(Debug, Default)]
pub struct FlagSession {
    state: Mutex<SessionState>,
}

impl FlagSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a USE flag for a package
    ///
    /// `flag` is `foo`, `+foo` or `-foo`. Setting the inverse of a pending
    /// change cancels it instead of recording both.
    pub fn set_use_flag(&self, cpv: &Cpv, flag: &str) {
        let flag = normalize_flag(flag);
        let inverse = invert_flag(&flag);

        let mut state = self.state.lock();
        let flags = state.use_flags.entry(cpv.clone()).or_default();
        if let Some(pos) = flags.iter().position(|f| *f == inverse) {
            flags.remove(pos);
        } else if !flags.contains(&flag) {
            flags.push(flag);
        }

        if flags.is_empty() {
            state.use_flags.remove(cpv);
        }
    }

    pub fn masking_status(&self, cpv: &Cpv) -> Option<MaskChange> {
        self.state.lock().masked.get(cpv).copied()
    }

    pub fn testing_status(&self, cpv: &Cpv) -> Option<bool> {
        self.state.lock().testing.get(cpv).copied()
    }

    /// Packages with any pending edit
    pub fn pending_packages(&self) -> Vec<Cpv> {
        let state = self.state.lock();
        let mut all: Vec<Cpv> = state
            .use_flags
            .keys()
            .chain(state.masked.keys())
            .chain(state.testing.keys())
            .cloned()
            .collect();
        all.sort();
        all.dedup();
        all
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.use_flags.is_empty() && state.masked.is_empty() && state.testing.is_empty()
    }
}

impl FlagEdits for FlagSession {
    fn new_use_flags(&self, cpv: &Cpv) -> Vec<String> {
        self.state
            .lock()
            .use_flags
            .get(cpv)
            .cloned()
            .unwrap_or_default()
    }

    fn remove_new_use_flags(&self, cpv: &Cpv) {
        self.state.lock().use_flags.remove(cpv);
    }

    fn remove_new_masked(&self, cpv: &Cpv) {
        self.state.lock().masked.remove(cpv);
    }

    fn remove_new_testing(&self, cpv: &Cpv) {
        self.state.lock().testing.remove(cpv);
    }

    fn set_masked(&self, cpv: &Cpv, masked: bool) {
        let change = if masked {
            MaskChange::Masked
        } else {
            MaskChange::Unmasked
        };
        self.state.lock().masked.insert(cpv.clone(), change);
    }

    fn set_testing(&self, cpv: &Cpv, enable: bool) {
        self.state.lock().testing.insert(cpv.clone(), enable);
    }
}

fn normalize_flag(flag: &str) -> String {
    if flag.starts_with('+') || flag.starts_with('-') {
        flag.to_string()
    } else {
        format!("+{}", flag)
    }
}

fn invert_flag(flag: &str) -> String {
    match flag.strip_prefix('-') {
        Some(name) => format!("+{}", name),
        None => format!("-{}", flag.trim_start_matches('+')),
    }
}
