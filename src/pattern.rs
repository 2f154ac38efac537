//! Module dedicated to folder name filtering.
//!
//! Stores carry an ordered list of patterns of the form `/re/` or
//! `!/re/`. A `/re/` pattern requires a match for the folder to be
//! kept; a `!/re/` pattern excludes the folder when it matches. The
//! first pattern deciding an exclusion wins.

use regex::Regex;

use crate::error::{Error, Result};

/// A single compiled folder pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
    negate: bool,
    re: Regex,
}

impl Pattern {
    /// Parses a `/re/` or `!/re/` pattern.
    pub fn parse(pattern: &str) -> Result<Self> {
        if !pattern.starts_with('/') && !pattern.starts_with("!/") {
            return Err(Error::ConfigInvalid(format!(
                "pattern {pattern:?} doesn't start with \"/\" or \"!/\""
            )));
        }
        if !pattern.ends_with('/') {
            return Err(Error::ConfigInvalid(format!(
                "pattern {pattern:?} doesn't end with \"/\""
            )));
        }

        let negate = pattern.starts_with('!');
        let source = pattern
            .trim_start_matches('!')
            .trim_start_matches('/')
            .trim_end_matches('/');

        let re = Regex::new(source).map_err(|err| {
            Error::ConfigInvalid(format!("pattern {pattern:?} holds a wrong regexp: {err}"))
        })?;

        Ok(Self { negate, re })
    }
}

/// An ordered set of folder patterns.
#[derive(Clone, Debug, Default)]
pub struct Patterns(Vec<Pattern>);

impl Patterns {
    pub fn parse(patterns: &[String]) -> Result<Self> {
        Ok(Self(
            patterns
                .iter()
                .map(|p| Pattern::parse(p))
                .collect::<Result<_>>()?,
        ))
    }

    /// Whether the given folder name is excluded by the patterns.
    pub fn excludes(&self, name: &str) -> bool {
        for pattern in &self.0 {
            let matches = pattern.re.is_match(name);
            if pattern.negate && matches {
                return true;
            }
            if !pattern.negate && !matches {
                return true;
            }
        }
        false
    }
}
