// src/error.rs

//! Error types shared by every queue component

use crate::cpv::Cpv;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the queue, its collaborators and the process layer
#[derive(Error, Debug)]
pub enum Error {
    /// No visible candidate for the reference (usually masked)
    #[error("package not found: {0}")]
    PackageNotFound(Cpv),

    /// Two packages exclude each other
    ///
    /// `package` is the requested package, `blocker` the one that cannot be
    /// installed alongside it.
    #[error("{package} is blocked by {blocker}")]
    Blocked { package: Cpv, blocker: Cpv },

    /// The oracle could not compute a dependency set
    #[error("dependency calculation failed for {package}: {reason}")]
    DependencyCalc { package: Cpv, reason: String },

    #[error("invalid package reference '{0}'")]
    InvalidCpv(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    /// The reference is queued for installation and removal at once
    #[error("{0} is queued for both installation and removal")]
    QueueConflict(Cpv),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("no emerge process is running")]
    NoProcess,

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Reference carried by resolution errors, if any
    pub fn package(&self) -> Option<&Cpv> {
        match self {
            Error::PackageNotFound(cpv) | Error::QueueConflict(cpv) => Some(cpv),
            Error::Blocked { package, .. } | Error::DependencyCalc { package, .. } => {
                Some(package)
            }
            _ => None,
        }
    }

    /// True for failures the caller may retry with masked packages allowed
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PackageNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_display_names_both_packages() {
        let err = Error::Blocked {
            package: Cpv::parse("cat/a-1.0").unwrap(),
            blocker: Cpv::parse("cat/b-1.0").unwrap(),
        };
        assert_eq!(err.to_string(), "cat/a-1.0 is blocked by cat/b-1.0");
    }

    #[test]
    fn test_package_accessor() {
        let cpv = Cpv::parse("dev-libs/foo-1.0").unwrap();
        let err = Error::PackageNotFound(cpv.clone());
        assert_eq!(err.package(), Some(&cpv));
        assert!(err.is_not_found());
        assert!(Error::NoProcess.package().is_none());
    }
}
