// src/version/mod.rs

//! Portage version parsing and ordering
//!
//! Versions follow the Gentoo package manager specification:
//! `1.2.3[letter][_suffix[N]...][-rN]`, for example `2.4.1b_rc2-r1`.
//! Ordering is used to tell updates from downgrades when a queued package
//! replaces an installed one in the same slot.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Version suffixes, in ascending order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Suffix {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

impl Suffix {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "alpha" => Some(Self::Alpha),
            "beta" => Some(Self::Beta),
            "pre" => Some(Self::Pre),
            "rc" => Some(Self::Rc),
            "p" => Some(Self::P),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Pre => "pre",
            Self::Rc => "rc",
            Self::P => "p",
        }
    }
}

/// A parsed Portage version
///
/// Equality follows the ordering, so `1.010` equals `1.01`.
#[derive(Debug, Clone)]
pub struct PortageVersion {
    /// Dot separated numeric components, kept as text for leading-zero rules
    pub numbers: Vec<String>,
    pub letter: Option<char>,
    pub suffixes: Vec<(Suffix, u64)>,
    pub revision: u64,
}

impl PortageVersion {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → numbers=[1,2,3]
    /// - "1.0b" → numbers=[1,0], letter='b'
    /// - "2.1_rc3-r2" → numbers=[2,1], suffixes=[rc 3], revision=2
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidVersion(s.to_string());

        let (body, revision) = match s.rsplit_once("-r") {
            Some((body, rev)) if !rev.is_empty() && rev.bytes().all(|b| b.is_ascii_digit()) => {
                (body, rev.parse::<u64>().map_err(|_| invalid())?)
            }
            _ => (s, 0),
        };

        let mut parts = body.split('_');
        let head = parts.next().ok_or_else(invalid)?;

        let (head, letter) = match head.chars().last() {
            Some(c) if c.is_ascii_lowercase() => (&head[..head.len() - 1], Some(c)),
            _ => (head, None),
        };

        let numbers: Vec<String> = head.split('.').map(str::to_string).collect();
        if numbers
            .iter()
            .any(|n| n.is_empty() || !n.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(invalid());
        }

        let mut suffixes = Vec::new();
        for part in parts {
            let split = part
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(part.len());
            let (name, num) = part.split_at(split);
            let suffix = Suffix::parse(name).ok_or_else(invalid)?;
            let num = if num.is_empty() {
                0
            } else {
                num.parse::<u64>().map_err(|_| invalid())?
            };
            suffixes.push((suffix, num));
        }

        Ok(Self {
            numbers,
            letter,
            suffixes,
            revision,
        })
    }

    /// Compare two versions per the package manager specification
    pub fn compare(&self, other: &PortageVersion) -> Ordering {
        match compare_numbers(&self.numbers, &other.numbers) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match self.letter.cmp(&other.letter) {
            Ordering::Equal => {}
            ord => return ord,
        }

        match compare_suffixes(&self.suffixes, &other.suffixes) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.revision.cmp(&other.revision)
    }
}

fn compare_numbers(a: &[String], b: &[String]) -> Ordering {
    // First component is always numeric
    let first = |v: &[String]| v.first().and_then(|n| n.parse::<u128>().ok()).unwrap_or(0);
    match first(a).cmp(&first(b)) {
        Ordering::Equal => {}
        ord => return ord,
    }

    for (x, y) in a.iter().zip(b.iter()).skip(1) {
        let ord = if x.starts_with('0') || y.starts_with('0') {
            x.trim_end_matches('0').cmp(y.trim_end_matches('0'))
        } else {
            let xn = x.parse::<u128>().unwrap_or(0);
            let yn = y.parse::<u128>().unwrap_or(0);
            xn.cmp(&yn)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    a.len().cmp(&b.len())
}

fn compare_suffixes(a: &[(Suffix, u64)], b: &[(Suffix, u64)]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    // A remaining _p suffix makes a version newer, anything else older
    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => {
            if a[b.len()].0 == Suffix::P {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        Ordering::Less => {
            if b[a.len()].0 == Suffix::P {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

impl fmt::Display for PortageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.numbers.join("."))?;
        if let Some(letter) = self.letter {
            write!(f, "{}", letter)?;
        }
        for (suffix, num) in &self.suffixes {
            write!(f, "_{}", suffix.as_str())?;
            if *num > 0 {
                write!(f, "{}", num)?;
            }
        }
        if self.revision > 0 {
            write!(f, "-r{}", self.revision)?;
        }
        Ok(())
    }
}

impl PartialEq for PortageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for PortageVersion {}

impl Ord for PortageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for PortageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
