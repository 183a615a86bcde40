// src/oracle/memory.rs

//! In-memory package oracle
//!
//! Holds a fixed catalogue of packages. Used by frontends that precompute
//! their package set and by the test suites.

use super::{CategoryEntry, Package, PackageOracle};
use crate::config::EmergeCommands;
use crate::cpv::Cpv;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A catalogue entry
#[derive(Debug, Clone)]
pub struct MemoryPackage {
    pub cpv: Cpv,
    pub slot: String,
    pub installed: bool,
    pub masked: bool,
    pub testing: bool,
    pub depends: Vec<Cpv>,
    /// Requested package this one conflicts with; reported when
    /// dependencies are queried
    pub blocked_by: Option<Cpv>,
    /// Dependency calculation failure message
    pub broken: Option<String>,
}

impl MemoryPackage {
    pub fn new(cpv: Cpv) -> Self {
        Self {
            cpv,
            slot: "0".to_string(),
            installed: false,
            masked: false,
            testing: false,
            depends: Vec::new(),
            blocked_by: None,
            broken: None,
        }
    }

    /// Parse the reference and create an entry
    pub fn parse(cpv: &str) -> Result<Self> {
        Ok(Self::new(Cpv::parse(cpv)?))
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Result<Self> {
        for dep in deps {
            self.depends.push(Cpv::parse(dep)?);
        }
        Ok(self)
    }

    pub fn slot(mut self, slot: &str) -> Self {
        self.slot = slot.to_string();
        self
    }

    pub fn installed(mut self) -> Self {
        self.installed = true;
        self
    }

    pub fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    pub fn testing(mut self) -> Self {
        self.testing = true;
        self
    }

    pub fn blocked_by(mut self, blocker: &str) -> Result<Self> {
        self.blocked_by = Some(Cpv::parse(blocker)?);
        Ok(self)
    }

    pub fn broken(mut self, reason: &str) -> Self {
        self.broken = Some(reason.to_string());
        self
    }
}

impl Package for MemoryPackage {
    fn cpv(&self) -> &Cpv {
        &self.cpv
    }

    fn is_installed(&self) -> bool {
        self.installed
    }

    fn dependencies(&self) -> Result<Vec<Cpv>> {
        if let Some(reason) = &self.broken {
            return Err(Error::DependencyCalc {
                package: self.cpv.clone(),
                reason: reason.clone(),
            });
        }
        if let Some(requested) = &self.blocked_by {
            return Err(Error::Blocked {
                package: requested.clone(),
                blocker: self.cpv.clone(),
            });
        }
        Ok(self.depends.clone())
    }

    fn slot_key(&self) -> String {
        format!("{}:{}", self.cpv.cp(), self.slot)
    }

    fn is_masked(&self) -> bool {
        self.masked
    }

    fn is_testing(&self) -> bool {
        self.testing
    }
}

/// Oracle backed by a map of [`MemoryPackage`]s
#[derive(Debug, Default)]
pub struct MemoryOracle {
    packages: RwLock<BTreeMap<Cpv, MemoryPackage>>,
    commands: EmergeCommands,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands(commands: EmergeCommands) -> Self {
        Self {
            packages: RwLock::new(BTreeMap::new()),
            commands,
        }
    }

    /// Add or replace a package
    pub fn insert(&self, package: MemoryPackage) {
        self.packages.write().insert(package.cpv.clone(), package);
    }

    pub fn remove(&self, cpv: &Cpv) -> Option<MemoryPackage> {
        self.packages.write().remove(cpv)
    }

    pub fn len(&self) -> usize {
        self.packages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.read().is_empty()
    }
}

impl PackageOracle for MemoryOracle {
    fn resolve(&self, cpv: &Cpv, allow_masked: bool) -> Result<Box<dyn Package>> {
        let packages = self.packages.read();
        match packages.get(cpv) {
            Some(pkg) if allow_masked || !(pkg.masked || pkg.testing) => Ok(Box::new(pkg.clone())),
            _ => Err(Error::PackageNotFound(cpv.clone())),
        }
    }

    fn find_installed(&self, slot_key: &str) -> Result<Vec<Box<dyn Package>>> {
        Ok(self
            .packages
            .read()
            .values()
            .filter(|pkg| pkg.installed && pkg.slot_key() == slot_key)
            .map(|pkg| Box::new(pkg.clone()) as Box<dyn Package>)
            .collect())
    }

    fn list_category(&self, category: &str) -> Result<Vec<CategoryEntry>> {
        Ok(self
            .packages
            .read()
            .values()
            .filter(|pkg| pkg.cpv.category() == category)
            .map(|pkg| CategoryEntry {
                cpv: pkg.cpv.clone(),
                installed: pkg.installed,
            })
            .collect())
    }

    fn commands(&self) -> &EmergeCommands {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> MemoryOracle {
        let oracle = MemoryOracle::new();
        oracle.insert(MemoryPackage::parse("app-misc/foo-2.0").unwrap());
        oracle.insert(MemoryPackage::parse("app-misc/foo-1.0").unwrap().installed());
        oracle.insert(MemoryPackage::parse("app-misc/bar-1.0").unwrap().masked());
        oracle.insert(MemoryPackage::parse("dev-libs/baz-3").unwrap().testing().slot("3"));
        oracle
    }

    #[test]
    fn test_resolve_visibility() {
        let oracle = oracle();
        let bar = Cpv::parse("app-misc/bar-1.0").unwrap();
        let baz = Cpv::parse("dev-libs/baz-3").unwrap();

        assert!(oracle.resolve(&bar, false).err().unwrap().is_not_found());
        assert!(oracle.resolve(&bar, true).unwrap().is_masked());
        assert!(oracle.resolve(&baz, false).is_err());
        assert!(oracle.resolve(&baz, true).unwrap().is_testing());
    }

    #[test]
    fn test_find_installed_by_slot() {
        let oracle = oracle();
        let installed = oracle.find_installed("app-misc/foo:0").unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].version(), "1.0");
        assert!(oracle.find_installed("dev-libs/baz:3").unwrap().is_empty());
    }

    #[test]
    fn test_dependency_errors() {
        let blocked = MemoryPackage::parse("cat/b-1.0")
            .unwrap()
            .blocked_by("cat/a-1.0")
            .unwrap();
        match blocked.dependencies() {
            Err(Error::Blocked { package, blocker }) => {
                assert_eq!(package.as_str(), "cat/a-1.0");
                assert_eq!(blocker.as_str(), "cat/b-1.0");
            }
            other => panic!("expected blocked, got {:?}", other.map(|d| d.len())),
        }

        let broken = MemoryPackage::parse("cat/c-1.0").unwrap().broken("bad DEPEND");
        assert!(matches!(broken.dependencies(), Err(Error::DependencyCalc { .. })));
    }

    #[test]
    fn test_list_category() {
        let oracle = oracle();
        let entries = oracle.list_category("app-misc").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().any(|e| e.installed));
    }
}
