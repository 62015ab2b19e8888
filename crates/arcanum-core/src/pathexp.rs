//! Path expressions over the org hierarchy.
//!
//! A path expression addresses positions in
//! `/org/project/environments/services/identities/instances`. Every segment
//! after the org is a [`Glob`]:
//!
//! - `prod` matches exactly `prod`
//! - `*` matches anything
//! - `prod-*` matches anything starting with `prod-`
//! - `[staging|prod]` matches either alternative
//!
//! Policy resources reuse the same segment grammar with a trailing
//! credential-name segment, see [`ResourcePattern`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Number of segments in a path expression.
pub const PATHEXP_SEGMENTS: usize = 6;

/// A single segment matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Glob {
    Literal(String),
    Any,
    Prefix(String),
    OneOf(Vec<String>),
}

fn valid_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Glob {
    pub fn matches(&self, segment: &str) -> bool {
        match self {
            Glob::Literal(lit) => lit == segment,
            Glob::Any => true,
            Glob::Prefix(prefix) => segment.starts_with(prefix.as_str()),
            Glob::OneOf(options) => options.iter().any(|o| o == segment),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Glob::Literal(_))
    }
}

impl FromStr for Glob {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(Glob::Any);
        }
        if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            let options: Vec<String> = inner.split('|').map(str::to_string).collect();
            if options.len() < 2 || !options.iter().all(|o| valid_name(o)) {
                return Err(CoreError::InvalidPathExp(format!("bad alternation: {}", s)));
            }
            return Ok(Glob::OneOf(options));
        }
        if let Some(prefix) = s.strip_suffix('*') {
            if !valid_name(prefix) {
                return Err(CoreError::InvalidPathExp(format!("bad prefix glob: {}", s)));
            }
            return Ok(Glob::Prefix(prefix.to_string()));
        }
        if !valid_name(s) {
            return Err(CoreError::InvalidPathExp(format!("bad segment: {:?}", s)));
        }
        Ok(Glob::Literal(s.to_string()))
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Glob::Literal(lit) => f.write_str(lit),
            Glob::Any => f.write_str("*"),
            Glob::Prefix(prefix) => write!(f, "{}*", prefix),
            Glob::OneOf(options) => write!(f, "[{}]", options.join("|")),
        }
    }
}

/// Split a leading-slash path into glob segments.
fn parse_globs(s: &str) -> Result<Vec<Glob>> {
    let rest = s
        .strip_prefix('/')
        .ok_or_else(|| CoreError::InvalidPathExp(format!("must start with '/': {}", s)))?;
    rest.split('/').map(Glob::from_str).collect()
}

fn split_concrete(path: &str) -> Option<Vec<&str>> {
    path.strip_prefix('/').map(|rest| rest.split('/').collect())
}

/// A six-segment path expression. The org segment is always literal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExp {
    segments: Vec<Glob>,
}

impl PathExp {
    pub fn new(
        org: &str,
        project: &str,
        environments: &str,
        services: &str,
        identities: &str,
        instances: &str,
    ) -> Result<Self> {
        format!(
            "/{}/{}/{}/{}/{}/{}",
            org, project, environments, services, identities, instances
        )
        .parse()
    }

    pub fn org(&self) -> &Glob {
        &self.segments[0]
    }

    pub fn project(&self) -> &Glob {
        &self.segments[1]
    }

    pub fn segments(&self) -> &[Glob] {
        &self.segments
    }

    /// Whether a concrete six-segment path falls under this expression.
    pub fn matches(&self, path: &str) -> bool {
        match split_concrete(path) {
            Some(parts) => segments_match(&self.segments, &parts),
            None => false,
        }
    }
}

fn segments_match(globs: &[Glob], parts: &[&str]) -> bool {
    globs.len() == parts.len() && globs.iter().zip(parts).all(|(g, p)| g.matches(p))
}

impl FromStr for PathExp {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let segments = parse_globs(s)?;
        if segments.len() != PATHEXP_SEGMENTS {
            return Err(CoreError::InvalidPathExp(format!(
                "expected {} segments, got {}: {}",
                PATHEXP_SEGMENTS,
                segments.len(),
                s
            )));
        }
        if !segments[0].is_literal() {
            return Err(CoreError::InvalidPathExp(format!("org must be literal: {}", s)));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for PathExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}

impl Serialize for PathExp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PathExp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A policy resource pattern: any number of glob segments.
///
/// Matching requires the requested resource to have exactly as many
/// segments as the pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePattern {
    segments: Vec<Glob>,
}

impl ResourcePattern {
    pub fn matches(&self, resource: &str) -> bool {
        match split_concrete(resource) {
            Some(parts) => segments_match(&self.segments, &parts),
            None => false,
        }
    }
}

impl FromStr for ResourcePattern {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self {
            segments: parse_globs(s)?,
        })
    }
}
