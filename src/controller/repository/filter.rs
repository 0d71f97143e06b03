//! # Repository Filters
//!
//! Compiled keep/ignore rules of a Repository.
//!
//! A package with no rule keeps every version. An `ignore` rule drops the whole
//! package. A `keep` rule constrains versions: every non-empty predicate (allow-list,
//! regexp, constraint) must pass, and deprecated versions are rejected unless the
//! rule keeps them.

use super::version::{constraint_matches, parse_constraint, versions_equal};
use crate::crd::{FilterCond, FilterOp};
use regex::Regex;
use semver::VersionReq;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter for {name}: invalid regexp {pattern:?}: {source}")]
    InvalidRegexp {
        name: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("filter for {name}: invalid version constraint {constraint:?}: {source}")]
    InvalidConstraint {
        name: String,
        constraint: String,
        source: semver::Error,
    },
}

#[derive(Debug)]
struct CompiledFilter {
    operation: FilterOp,
    keep_deprecated: bool,
    versions: Vec<String>,
    regexp: Option<Regex>,
    constraint: Option<Vec<VersionReq>>,
}

/// Filters of one Repository, indexed by package name
#[derive(Debug, Default)]
pub struct CompiledFilters {
    by_name: HashMap<String, CompiledFilter>,
}

impl CompiledFilters {
    /// Compile every rule; the last rule for a name wins
    pub fn compile(conds: &[FilterCond]) -> Result<Self, FilterError> {
        let mut by_name = HashMap::with_capacity(conds.len());
        for cond in conds {
            let versioned = cond.versioned_filter_cond.as_ref();
            let regexp = versioned
                .and_then(|v| v.regexp.as_deref())
                .filter(|p| !p.is_empty())
                .map(|pattern| {
                    Regex::new(pattern).map_err(|source| FilterError::InvalidRegexp {
                        name: cond.name.clone(),
                        pattern: pattern.to_string(),
                        source,
                    })
                })
                .transpose()?;
            let constraint = versioned
                .and_then(|v| v.version_constraint.as_deref())
                .filter(|c| !c.trim().is_empty())
                .map(|constraint| {
                    parse_constraint(constraint).map_err(|source| FilterError::InvalidConstraint {
                        name: cond.name.clone(),
                        constraint: constraint.to_string(),
                        source,
                    })
                })
                .transpose()?;
            by_name.insert(
                cond.name.clone(),
                CompiledFilter {
                    operation: cond.operation,
                    keep_deprecated: cond.keep_deprecated,
                    versions: versioned.map(|v| v.versions.clone()).unwrap_or_default(),
                    regexp,
                    constraint,
                },
            );
        }
        Ok(Self { by_name })
    }

    /// The package is dropped entirely
    pub fn ignores_package(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .is_some_and(|f| f.operation == FilterOp::Ignore)
    }

    /// Keep `version` of package `name`
    pub fn keeps_version(&self, name: &str, version: &str, deprecated: bool) -> bool {
        let Some(filter) = self.by_name.get(name) else {
            return true;
        };
        if filter.operation == FilterOp::Ignore {
            return false;
        }
        if deprecated && !filter.keep_deprecated {
            return false;
        }
        if !filter.versions.is_empty() && !filter.versions.iter().any(|v| versions_equal(v, version)) {
            return false;
        }
        if filter.regexp.as_ref().is_some_and(|re| !re.is_match(version)) {
            return false;
        }
        if filter
            .constraint
            .as_ref()
            .is_some_and(|reqs| !constraint_matches(reqs, version))
        {
            return false;
        }
        true
    }
}
