// src/db.rs

//! Cached per-category package listings
//!
//! The frontend shows packages by category. Listings are fetched from the
//! package oracle on first use and refreshed when a finished job touched the
//! category.

use crate::cpv::Cpv;
use crate::error::Result;
use crate::oracle::PackageOracle;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collaborator refreshed after package operations
pub trait PackageDatabase: Send + Sync {
    /// Drop and refetch everything known about a category
    fn reload(&self, category: &str);
}

/// One listed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgData {
    pub cpv: Cpv,
    pub installed: bool,
    pub disabled: bool,
}

/// Sort order of [`CategoryCache::get_cat`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatOrder {
    /// Case-insensitive by package name
    ByName,
    /// Installed packages first, then by name
    Installed,
}

/// [`PackageDatabase`] backed by the oracle's category listings
pub struct CategoryCache {
    oracle: Arc<dyn PackageOracle>,
    categories: RwLock<BTreeMap<String, Vec<PkgData>>>,
    disabled: RwLock<HashSet<Cpv>>,
}

impl CategoryCache {
    pub fn new(oracle: Arc<dyn PackageOracle>) -> Self {
        Self {
            oracle,
            categories: RwLock::new(BTreeMap::new()),
            disabled: RwLock::new(HashSet::new()),
        }
    }

    /// Load a category unless it is already cached
    pub fn populate(&self, category: &str) -> Result<()> {
        if self.categories.read().contains_key(category) {
            return Ok(());
        }
        self.fetch(category)
    }

    fn fetch(&self, category: &str) -> Result<()> {
        let entries = self.oracle.list_category(category)?;
        let disabled = self.disabled.read();
        let packages = entries
            .into_iter()
            .map(|entry| PkgData {
                disabled: disabled.contains(&entry.cpv),
                cpv: entry.cpv,
                installed: entry.installed,
            })
            .collect::<Vec<_>>();

        debug!("Loaded {} packages for category {}", packages.len(), category);
        self.categories.write().insert(category.to_string(), packages);
        Ok(())
    }

    /// Packages of a category
    pub fn get_cat(&self, category: &str, order: CatOrder, show_disabled: bool) -> Result<Vec<PkgData>> {
        self.populate(category)?;

        let mut packages: Vec<PkgData> = self
            .categories
            .read()
            .get(category)
            .map(|pkgs| {
                pkgs.iter()
                    .filter(|p| show_disabled || !p.disabled)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        packages.sort_by_cached_key(|p| p.cpv.name().to_lowercase());
        if order == CatOrder::Installed {
            packages.sort_by_key(|p| !p.installed);
        }
        Ok(packages)
    }

    /// Cached category names, optionally only those with an installed package
    pub fn categories(&self, installed_only: bool) -> Vec<String> {
        self.categories
            .read()
            .iter()
            .filter(|(_, pkgs)| !installed_only || pkgs.iter().any(|p| p.installed))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Hide a package from listings
    pub fn disable(&self, cpv: &Cpv) {
        self.disabled.write().insert(cpv.clone());

        if let Some(pkgs) = self.categories.write().get_mut(cpv.category()) {
            for pkg in pkgs.iter_mut().filter(|p| p.cpv == *cpv) {
                pkg.disabled = true;
            }
        }
    }

    pub fn is_cached(&self, category: &str) -> bool {
        self.categories.read().contains_key(category)
    }
}

impl PackageDatabase for CategoryCache {
    fn reload(&self, category: &str) {
        self.categories.write().remove(category);
        if let Err(e) = self.fetch(category) {
            warn!("Failed to reload category {}: {}", category, e);
        }
    }
}
