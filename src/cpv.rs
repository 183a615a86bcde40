// src/cpv.rs

//! Package references (`category/name-version`)
//!
//! A [`Cpv`] is the key every queue structure is indexed by. It is compared
//! and hashed by its text; parsing only validates the shape and records where
//! the category, name and version start.

use crate::error::{Error, Result};
use crate::version::PortageVersion;
use std::fmt;
use std::str::FromStr;

/// Package sets that show up as emerge arguments but are not packages
pub const PSEUDO_PACKAGES: &[&str] = &["world", "system"];

/// Returns true for `world` / `system` style arguments
pub fn is_pseudo_package(arg: &str) -> bool {
    PSEUDO_PACKAGES.contains(&arg)
}

/// An immutable `category/name-version` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cpv {
    text: String,
    slash: usize,
    version_start: usize,
}

impl Cpv {
    /// Parse a reference such as `dev-lang/python-3.12.1-r1`
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidCpv(s.to_string());

        let slash = s.find('/').ok_or_else(invalid)?;
        let (category, rest) = (&s[..slash], &s[slash + 1..]);
        if category.is_empty() || rest.contains('/') || s.contains(char::is_whitespace) {
            return Err(invalid());
        }

        // The version is the last dash component, plus a trailing -rN if present
        let mut dashes = rest.rmatch_indices('-').map(|(i, _)| i);
        let last = dashes.next().ok_or_else(invalid)?;
        let tail = &rest[last + 1..];
        let split = if is_revision(tail) {
            dashes.next().ok_or_else(invalid)?
        } else {
            last
        };

        let name = &rest[..split];
        let version = &rest[split + 1..];
        if name.is_empty() {
            return Err(invalid());
        }
        PortageVersion::parse(version).map_err(|_| invalid())?;

        Ok(Self {
            text: s.to_string(),
            slash,
            version_start: slash + 1 + split + 1,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn category(&self) -> &str {
        &self.text[..self.slash]
    }

    pub fn name(&self) -> &str {
        &self.text[self.slash + 1..self.version_start - 1]
    }

    pub fn version(&self) -> &str {
        &self.text[self.version_start..]
    }

    /// `category/name` without the version
    pub fn cp(&self) -> &str {
        &self.text[..self.version_start - 1]
    }

    /// Split into `(category, name, version)`
    pub fn split(&self) -> (&str, &str, &str) {
        (self.category(), self.name(), self.version())
    }

    pub fn parsed_version(&self) -> Result<PortageVersion> {
        PortageVersion::parse(self.version())
    }

    /// The emerge argument selecting exactly this version
    pub fn to_atom(&self) -> String {
        format!("={}", self.text)
    }
}

fn is_revision(s: &str) -> bool {
    s.len() > 1 && s.starts_with('r') && s[1..].bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for Cpv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Cpv {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Cpv {
    fn as_ref(&self) -> &str {
        &self.text
    }
}
