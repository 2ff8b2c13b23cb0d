// src/version/mod.rs

//! Version handling and constraint matching for recipe dependencies
//!
//! Recipe versions are free-form upstream strings ("1.9", "2.0.0b3",
//! "1.3_p1"), so they are compared segment-wise rather than as semver.
//! Constraints follow the match-spec subset used by recipe requirement lines:
//!
//! - `*` or empty: any version
//! - `1.2` / `1.2.*` / `=1.2`: prefix match
//! - `==1.2`: exact match
//! - `>=`, `>`, `<=`, `<`, `!=`: ordered comparison
//! - `a,b`: both must hold; `a|b`: either may hold (`,` binds tighter)

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// One comparable piece of a version string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Num(u64),
    Text(String),
}

impl Segment {
    fn cmp_segment(&self, other: &Segment) -> Ordering {
        match (self, other) {
            (Segment::Num(a), Segment::Num(b)) => a.cmp(b),
            // Pre-release tags sort before any release number
            (Segment::Text(_), Segment::Num(_)) => Ordering::Less,
            (Segment::Num(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
        }
    }
}

/// A parsed package version
#[derive(Debug, Clone, Eq)]
pub struct PackageVersion {
    raw: String,
    segments: Vec<Segment>,
}

impl PackageVersion {
    /// Parse a version string
    ///
    /// Splits on `.`, `-`, `_` and on digit/letter boundaries:
    /// - "1.9" → [1, 9]
    /// - "2.0.0b3" → [2, 0, 0, "b", 3]
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::ParseError("Empty version string".to_string()));
        }
        if raw.chars().any(|c| c.is_whitespace() || "<>=!,|*".contains(c)) {
            return Err(Error::ParseError(format!("Invalid version '{}'", raw)));
        }

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut current_is_digit = false;

        let flush = |current: &mut String, is_digit: bool, segments: &mut Vec<Segment>| {
            if current.is_empty() {
                return;
            }
            let segment = if is_digit {
                // Digits only, so parse cannot fail short of overflow
                current
                    .parse::<u64>()
                    .map(Segment::Num)
                    .unwrap_or_else(|_| Segment::Text(current.clone()))
            } else {
                Segment::Text(current.to_ascii_lowercase())
            };
            segments.push(segment);
            current.clear();
        };

        for c in raw.chars() {
            if matches!(c, '.' | '-' | '_' | '+') {
                flush(&mut current, current_is_digit, &mut segments);
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if !current.is_empty() && is_digit != current_is_digit {
                flush(&mut current, current_is_digit, &mut segments);
            }
            current_is_digit = is_digit;
            current.push(c);
        }
        flush(&mut current, current_is_digit, &mut segments);

        if segments.is_empty() {
            return Err(Error::ParseError(format!("Invalid version '{}'", raw)));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The version as written in the recipe
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `prefix`'s segments are a leading run of this version's
    ///
    /// Missing trailing segments count as zero, as in ordering.
    fn starts_with(&self, prefix: &PackageVersion) -> bool {
        let zero = Segment::Num(0);
        prefix.segments.iter().enumerate().all(|(i, a)| {
            let b = self.segments.get(i).unwrap_or(&zero);
            a.cmp_segment(b) == Ordering::Equal
        })
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        let zero = Segment::Num(0);
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match a.cmp_segment(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for PackageVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Version constraint on a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Any version is acceptable
    Any,
    /// Prefix match (`1.2`, `1.2.*`, `=1.2`)
    Prefix(PackageVersion),
    /// Exact match (`==1.2`)
    Exact(PackageVersion),
    GreaterThan(PackageVersion),
    GreaterOrEqual(PackageVersion),
    LessThan(PackageVersion),
    LessOrEqual(PackageVersion),
    NotEqual(PackageVersion),
    /// All constraints must hold
    All(Vec<VersionConstraint>),
    /// At least one constraint must hold
    Either(Vec<VersionConstraint>),
}

impl VersionConstraint {
    /// Parse a constraint string
    ///
    /// Examples:
    /// - ">=1.9" → GreaterOrEqual(1.9)
    /// - ">=1.0,<2" → All([GreaterOrEqual(1.0), LessThan(2)])
    /// - "1.2|1.4" → Either([Prefix(1.2), Prefix(1.4)])
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        if s.contains('|') {
            let alternatives = s
                .split('|')
                .map(Self::parse)
                .collect::<Result<Vec<_>>>()?;
            return Ok(VersionConstraint::Either(alternatives));
        }

        if s.contains(',') {
            let parts = s
                .split(',')
                .map(Self::parse_single)
                .collect::<Result<Vec<_>>>()?;
            return Ok(VersionConstraint::All(parts));
        }

        Self::parse_single(s)
    }

    fn parse_single(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        let (op, rest) = [">=", "<=", "!=", "==", ">", "<", "="]
            .iter()
            .find_map(|op| s.strip_prefix(op).map(|rest| (*op, rest.trim())))
            .unwrap_or(("", s));

        // A trailing ".*" only makes sense as a prefix match
        let (rest, wildcard) = match rest.strip_suffix(".*") {
            Some(stripped) => (stripped, true),
            None => (rest.strip_suffix('*').unwrap_or(rest), rest.ends_with('*')),
        };

        let version = PackageVersion::parse(rest)
            .map_err(|_| Error::ParseError(format!("Invalid version constraint '{}'", s)))?;

        let constraint = match op {
            ">=" => VersionConstraint::GreaterOrEqual(version),
            "<=" => VersionConstraint::LessOrEqual(version),
            "!=" => VersionConstraint::NotEqual(version),
            ">" => VersionConstraint::GreaterThan(version),
            "<" => VersionConstraint::LessThan(version),
            "==" if !wildcard => VersionConstraint::Exact(version),
            _ => VersionConstraint::Prefix(version),
        };
        Ok(constraint)
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &PackageVersion) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Prefix(v) => version.starts_with(v),
            VersionConstraint::Exact(v) => version == v,
            VersionConstraint::GreaterThan(v) => version > v,
            VersionConstraint::GreaterOrEqual(v) => version >= v,
            VersionConstraint::LessThan(v) => version < v,
            VersionConstraint::LessOrEqual(v) => version <= v,
            VersionConstraint::NotEqual(v) => version != v,
            VersionConstraint::All(parts) => parts.iter().all(|c| c.satisfies(version)),
            VersionConstraint::Either(parts) => parts.iter().any(|c| c.satisfies(version)),
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Prefix(v) => write!(f, "{}.*", v),
            VersionConstraint::Exact(v) => write!(f, "=={}", v),
            VersionConstraint::GreaterThan(v) => write!(f, ">{}", v),
            VersionConstraint::GreaterOrEqual(v) => write!(f, ">={}", v),
            VersionConstraint::LessThan(v) => write!(f, "<{}", v),
            VersionConstraint::LessOrEqual(v) => write!(f, "<={}", v),
            VersionConstraint::NotEqual(v) => write!(f, "!={}", v),
            VersionConstraint::All(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join(","))
            }
            VersionConstraint::Either(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", rendered.join("|"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn test_version_compare_numeric() {
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.0") > v("1.99.99"));
        assert_eq!(v("1.0"), v("1.0.0"));
    }

    #[test]
    fn test_version_compare_prerelease() {
        assert!(v("1.0a1") < v("1.0"));
        assert!(v("2.0.0b3") < v("2.0.0"));
        assert!(v("1.0rc1") > v("1.0b2"));
    }

    #[test]
    fn test_version_parse_separators() {
        assert_eq!(v("1.3_p1"), v("1.3-p1"));
        assert!(PackageVersion::parse("").is_err());
        assert!(PackageVersion::parse(">=1").is_err());
    }

    #[test]
    fn test_constraint_prefix() {
        let c = VersionConstraint::parse("1.2").unwrap();
        assert!(c.satisfies(&v("1.2")));
        assert!(c.satisfies(&v("1.2.5")));
        assert!(!c.satisfies(&v("1.20")));
        assert!(!c.satisfies(&v("1.3")));

        let c = VersionConstraint::parse("1.2.*").unwrap();
        assert!(c.satisfies(&v("1.2.9")));
    }

    #[test]
    fn test_constraint_prefix_trailing_zero() {
        let c = VersionConstraint::parse("1.2.0").unwrap();
        assert!(c.satisfies(&v("1.2")));
        assert!(c.satisfies(&v("1.2.0.1")));
        assert!(!c.satisfies(&v("1.2.1")));
        assert!(VersionConstraint::parse("==1.2.0").unwrap().satisfies(&v("1.2")));

        let c = VersionConstraint::parse("1.2.1").unwrap();
        assert!(!c.satisfies(&v("1.2")));
    }

    #[test]
    fn test_constraint_exact() {
        let c = VersionConstraint::parse("==1.2").unwrap();
        assert!(c.satisfies(&v("1.2")));
        assert!(!c.satisfies(&v("1.2.1")));
    }

    #[test]
    fn test_constraint_range() {
        let c = VersionConstraint::parse(">=1.0,<2").unwrap();
        assert!(c.satisfies(&v("1.0")));
        assert!(c.satisfies(&v("1.9.3")));
        assert!(!c.satisfies(&v("2.0")));
        assert!(!c.satisfies(&v("0.9")));
    }

    #[test]
    fn test_constraint_either() {
        let c = VersionConstraint::parse("<1.0|>=3").unwrap();
        assert!(c.satisfies(&v("0.5")));
        assert!(c.satisfies(&v("3.1")));
        assert!(!c.satisfies(&v("2.0")));
    }

    #[test]
    fn test_constraint_any() {
        assert!(VersionConstraint::parse("").unwrap().is_any());
        assert!(VersionConstraint::parse("*").unwrap().satisfies(&v("9.9")));
    }

    #[test]
    fn test_constraint_invalid() {
        assert!(VersionConstraint::parse(">=").is_err());
        assert!(VersionConstraint::parse(">= 1.0 2.0").is_err());
    }
}
