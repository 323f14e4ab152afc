// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Version parsing and comparison module
//!
//! Versions are ordered segment by segment on their dot-separated parts.
//! Missing trailing segments count as zero, so `1.1` and `1.1.0.0` are equal.
//! Each segment is compared on its leading digits first; anything after the
//! digits (`-beta1`) is only compared byte-wise as a tie breaker, so
//! pre-release tags are tolerated but not ordered semantically.
//!
//! One consequence: a suffixed version sorts above its plain release, so
//! `5.0.0-beta1 > 5.0.0`. A client running `5.0.0-beta1` is never offered
//! `5.0.0`, and a pre-release tag published after the final release becomes
//! the latest version for its platform.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version {input:?}: {reason}")]
    Invalid { input: String, reason: String },
}

/// Result of [`compare`], read as "the candidate is ... than the current version".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOrdering {
    Higher,
    Equal,
    Lower,
}

impl From<Ordering> for VersionOrdering {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => Self::Higher,
            Ordering::Equal => Self::Equal,
            Ordering::Greater => Self::Lower,
        }
    }
}

/// Compare `current` against `candidate`.
///
/// Returns [`VersionOrdering::Higher`] when `candidate` is the newer one.
pub fn compare(current: &str, candidate: &str) -> VersionOrdering {
    cmp_dotted(current, candidate).into()
}

/// Strip a leading `v`/`V` as used in release tags
pub fn version_from_tag(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

fn cmp_dotted(a: &str, b: &str) -> Ordering {
    let mut left = version_from_tag(a).split('.');
    let mut right = version_from_tag(b).split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => {
                let ordering = cmp_segment(l.unwrap_or(""), r.unwrap_or(""));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn cmp_segment(a: &str, b: &str) -> Ordering {
    let (a_digits, a_rest) = split_digits(a);
    let (b_digits, b_rest) = split_digits(b);

    // Digit runs without leading zeros compare by length first, then lexically,
    // which orders arbitrarily long numbers without overflow.
    a_digits
        .len()
        .cmp(&b_digits.len())
        .then_with(|| a_digits.cmp(b_digits))
        .then_with(|| a_rest.cmp(b_rest))
}

fn split_digits(segment: &str) -> (&str, &str) {
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    let (digits, rest) = segment.split_at(end);
    (digits.trim_start_matches('0'), rest)
}

/// A validated semantic version.
///
/// Parsing is strict (`MAJOR.MINOR.PATCH` with optional pre-release and build
/// parts, an optional leading `v`); ordering uses the dotted comparison above.
#[derive(Debug, Clone)]
pub struct Version {
    text: String,
    major: u64,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let parsed = semver::Version::parse(version_from_tag(input.trim())).map_err(|e| {
            VersionError::Invalid {
                input: input.to_owned(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            text: parsed.to_string(),
            major: parsed.major,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_dotted(&self.text, &other.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare("v1.0.0", "v2.0.0"), VersionOrdering::Higher);
        assert_eq!(compare("v1.0.0", "v1.0.0"), VersionOrdering::Equal);
        assert_eq!(compare("v1.0.0", "v0.1.0"), VersionOrdering::Lower);
        assert_eq!(compare("v1.1.99", "v1.1.999"), VersionOrdering::Higher);
        assert_eq!(compare("v1.1.99.1", "v1.1.999"), VersionOrdering::Higher);
        assert_eq!(compare("v2.0.0.1.1", "v2.1.0.99"), VersionOrdering::Higher);
    }

    #[test]
    fn test_missing_segments_are_zero() {
        assert_eq!(compare("1.1", "1.1.0.0"), VersionOrdering::Equal);
        assert_eq!(compare("v1.1.0.0.0", "v1.1"), VersionOrdering::Equal);
        assert_eq!(compare("v1.1.", "v1.1.0."), VersionOrdering::Equal);
        assert_eq!(compare("v1.1.", "v1.1.0..."), VersionOrdering::Equal);
        assert_eq!(compare("1.0.0.1", "1.0.0"), VersionOrdering::Lower);
    }

    #[test]
    fn test_suffixed_version_sorts_above_plain_release() {
        let beta = Version::parse("5.0.0-beta1").unwrap();
        let release = Version::parse("5.0.0").unwrap();
        assert!(beta > release);
        assert_eq!(compare("5.0.0-beta1", "5.0.0"), VersionOrdering::Lower);
    }

    #[test]
    fn test_suffixes_are_tolerated() {
        // Suffixes only break ties byte-wise, they are not ordered semantically.
        assert_eq!(
            compare("v2.0.0.1-beta1", "v2.0.0.1-beta2"),
            VersionOrdering::Higher
        );
        assert_eq!(compare("1.0.0-beta10", "1.0.0-beta2"), VersionOrdering::Higher);
        assert_eq!(compare("1.0.0", "1.0.1-rc1"), VersionOrdering::Higher);
    }

    #[test]
    fn test_leading_zeros_and_long_numbers() {
        assert_eq!(compare("1.007", "1.7"), VersionOrdering::Equal);
        assert_eq!(
            compare("1.99999999999999999999999", "1.100000000000000000000000"),
            VersionOrdering::Higher
        );
    }

    #[test]
    fn test_order_is_antisymmetric_and_transitive() {
        let samples = [
            "0.1", "1", "1.0.0.1", "1.1", "1.1.99", "1.1.999", "2.0.0.1-beta1", "2.0.0.1-beta2",
            "2.1.0.99", "10.0",
        ];
        for a in samples {
            for b in samples {
                let ab = cmp_dotted(a, b);
                assert_eq!(ab, cmp_dotted(b, a).reverse(), "{a} vs {b}");
                for c in samples {
                    if ab != Ordering::Greater && cmp_dotted(b, c) != Ordering::Greater {
                        assert_ne!(cmp_dotted(a, c), Ordering::Greater, "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_parse_version() {
        let version = Version::parse("v5.4.1").unwrap();
        assert_eq!(version.as_str(), "5.4.1");
        assert_eq!(version.major(), 5);
        assert_eq!(Version::parse("5.4.1").unwrap(), version);
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(Version::parse("invalid").is_err());
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1.2.3.4").is_err());
    }

    #[test]
    fn test_version_ordering() {
        let older = Version::parse("4.9.12").unwrap();
        let newer = Version::parse("4.10.0").unwrap();
        assert!(older < newer);
        assert!(Version::parse("5.0.0-beta1").unwrap() > Version::parse("5.0.0").unwrap());
    }

    #[test]
    fn test_version_from_tag_strips_v() {
        assert_eq!(version_from_tag("v0.2.38"), "0.2.38");
        assert_eq!(version_from_tag("V0.2.38"), "0.2.38");
        assert_eq!(version_from_tag("0.2.38"), "0.2.38");
    }
}
