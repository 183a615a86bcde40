// src/oracle/mod.rs

//! Package system contract consumed by the queue
//!
//! The queue never computes dependencies itself. Everything it needs to know
//! about packages (visibility, installed state, slots, dependency sets and
//! the configured emerge command line) comes from a [`PackageOracle`].

pub mod memory;

use crate::config::EmergeCommands;
use crate::cpv::Cpv;
use crate::error::Result;

pub use memory::{MemoryOracle, MemoryPackage};

/// A concrete package version known to the package system
pub trait Package: Send + Sync {
    fn cpv(&self) -> &Cpv;

    fn is_installed(&self) -> bool;

    /// Direct dependencies that still need to be merged
    ///
    /// Fails with `Error::Blocked` (requested package first, this one as the
    /// blocker) when it conflicts with a requested package, or
    /// `Error::DependencyCalc` when the set cannot be computed.
    fn dependencies(&self) -> Result<Vec<Cpv>>;

    /// `category/name:slot`
    fn slot_key(&self) -> String;

    fn version(&self) -> &str {
        self.cpv().version()
    }

    /// Masked by profile or package.mask
    fn is_masked(&self) -> bool;

    /// Only keyworded for testing (~arch)
    fn is_testing(&self) -> bool;
}

/// One row of a category listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEntry {
    pub cpv: Cpv,
    pub installed: bool,
}

/// Lookup and metadata source for packages
pub trait PackageOracle: Send + Sync {
    /// Find the package for a reference
    ///
    /// Masked and testing candidates are only returned with `allow_masked`;
    /// otherwise the lookup fails with `Error::PackageNotFound`.
    fn resolve(&self, cpv: &Cpv, allow_masked: bool) -> Result<Box<dyn Package>>;

    /// Installed packages occupying a slot
    fn find_installed(&self, slot_key: &str) -> Result<Vec<Box<dyn Package>>>;

    /// All packages of a category, used to repopulate database caches
    fn list_category(&self, category: &str) -> Result<Vec<CategoryEntry>>;

    /// Configured emerge command line
    fn commands(&self) -> &EmergeCommands;
}
