//! Maven version ordering.
//!
//! A version is split into dot-separated numeric segments (padded to four)
//! followed by a qualifier. Qualifiers go through a small alias table and
//! order as `pre-release < release < service pack`.

use std::cmp::Ordering;
use std::collections::HashMap;

const NUMERIC_WIDTH: usize = 4;

/// Qualifier after alias mapping. Variant order is the comparison order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Qualifier {
    /// Any named qualifier other than release/sp, compared lexically.
    PreRelease(String),
    Release,
    ServicePack,
}

impl Qualifier {
    fn from_token(token: &str) -> Self {
        let lowered = token.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "" | "release" | "ga" => Qualifier::Release,
            "sp" => Qualifier::ServicePack,
            "cr" => Qualifier::PreRelease("rc".to_string()),
            "alpha" => Qualifier::PreRelease("a".to_string()),
            "beta" => Qualifier::PreRelease("b".to_string()),
            "milestone" => Qualifier::PreRelease("m".to_string()),
            _ => Qualifier::PreRelease(lowered),
        }
    }
}

/// A parsed Maven version. Field order matters for the derived ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MavenVersion {
    segments: Vec<u64>,
    qualifier: Qualifier,
}

impl MavenVersion {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (numeric, dash_qualifier) = match raw.split_once('-') {
            Some((numeric, qualifier)) => (numeric, Some(qualifier)),
            None => (raw, None),
        };

        let mut segments = Vec::with_capacity(NUMERIC_WIDTH);
        let mut inline_qualifier: Option<String> = None;
        let parts: Vec<&str> = numeric.split('.').collect();
        for (index, part) in parts.iter().enumerate() {
            let digits_end = part
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(part.len());
            let (digits, rest) = part.split_at(digits_end);
            if !digits.is_empty() {
                segments.push(digits.parse::<u64>().unwrap_or(u64::MAX));
            } else if rest.is_empty() {
                segments.push(0);
            }
            if !rest.is_empty() {
                let mut tail = vec![rest];
                tail.extend_from_slice(&parts[index + 1..]);
                inline_qualifier = Some(tail.join("."));
                break;
            }
        }

        segments.resize(NUMERIC_WIDTH, 0);

        let token = match (inline_qualifier, dash_qualifier) {
            (Some(inline), Some(dash)) => format!("{inline}-{dash}"),
            (Some(inline), None) => inline,
            (None, Some(dash)) => dash.to_string(),
            (None, None) => String::new(),
        };

        Self {
            segments,
            qualifier: Qualifier::from_token(&token),
        }
    }

    pub fn segments(&self) -> &[u64] {
        &self.segments
    }

    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }
}

/// Compares two version strings using Maven ordering.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    MavenVersion::parse(left).cmp(&MavenVersion::parse(right))
}

/// Sorts version strings ascending.
pub fn sort_versions(versions: &mut [String]) {
    let mut cache = VersionCache::default();
    versions.sort_by(|left, right| cache.compare(left, right));
}

/// Parsed-version memo owned by a single resolution run.
#[derive(Debug, Default)]
pub struct VersionCache {
    parsed: HashMap<String, MavenVersion>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compare(&mut self, left: &str, right: &str) -> Ordering {
        self.ensure(left);
        self.ensure(right);
        match (self.parsed.get(left), self.parsed.get(right)) {
            (Some(left), Some(right)) => left.cmp(right),
            _ => compare_versions(left, right),
        }
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    fn ensure(&mut self, version: &str) {
        if !self.parsed.contains_key(version) {
            self.parsed
                .insert(version.to_string(), MavenVersion::parse(version));
        }
    }
}

/// A dependency version token as written in a POM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRequirement<'a> {
    /// Bare version, a soft requirement.
    Soft(&'a str),
    /// Single bracketed version such as `[1.2.3]`.
    Exact(&'a str),
    /// Anything else in bracket or parenthesis syntax.
    Range(&'a str),
}

impl<'a> VersionRequirement<'a> {
    pub fn parse(token: &'a str) -> Self {
        let token = token.trim();
        if !token.starts_with('[') && !token.starts_with('(') {
            return VersionRequirement::Soft(token);
        }
        match token.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            Some(inner)
                if !inner.trim().is_empty()
                    && !inner.contains([',', '[', ']', '(', ')']) =>
            {
                VersionRequirement::Exact(inner.trim())
            }
            _ => VersionRequirement::Range(token),
        }
    }

    /// The concrete version to request, `None` for ranges.
    pub fn version(&self) -> Option<&'a str> {
        match *self {
            VersionRequirement::Soft(version) | VersionRequirement::Exact(version) => Some(version),
            VersionRequirement::Range(_) => None,
        }
    }
}
