//! Interest filters: the flat scope a session subscribes to.
//!
//! A filter is fixed when the session connects. Scoped broadcasts reach a
//! session only when its filter holds exactly the requested key/value;
//! a session lacking the key never receives them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{DomainError, DomainResult};

/// Scope key for project-level interest.
pub const PROJECT_ID: &str = "project_id";

/// Scope key for board-level interest.
pub const BOARD_ID: &str = "board_id";

// ============================================================================
// Scope
// ============================================================================

/// A single `key == value` requirement attached to a filtered broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    key: String,
    value: String,
}

impl Scope {
    /// Creates a scope, rejecting empty keys or values.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        let value = value.into();
        if key.is_empty() {
            return Err(DomainError::EmptyScope { field: "key" });
        }
        if value.is_empty() {
            return Err(DomainError::EmptyScope { field: "value" });
        }
        Ok(Self { key, value })
    }

    /// Scope on `project_id`.
    pub fn project(project_id: impl Into<String>) -> DomainResult<Self> {
        Self::new(PROJECT_ID, project_id)
    }

    /// Scope on `board_id`.
    pub fn board(board_id: impl Into<String>) -> DomainResult<Self> {
        Self::new(BOARD_ID, board_id)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

// ============================================================================
// Interest Filter
// ============================================================================

/// Key → value mapping describing which scoped broadcasts a session wants.
///
/// An empty filter marks an unscoped session: it receives every unfiltered
/// broadcast and no filtered ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterestFilter(BTreeMap<String, String>);

impl InterestFilter {
    /// Creates an empty (unscoped) filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filter from key/value pairs.
    ///
    /// Pairs with an empty key or value are skipped, so absent and blank
    /// request parameters behave the same.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut filter = Self::new();
        for (key, value) in pairs {
            filter.insert(key, value);
        }
        filter
    }

    /// Adds (or replaces) a scope entry. Empty keys or values are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.0.insert(key, value);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns true if `filter[key] == value`.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.0.get(key).is_some_and(|v| v == value)
    }

    /// Returns true if the filter satisfies `scope`.
    #[must_use]
    pub fn matches_scope(&self, scope: &Scope) -> bool {
        self.matches(scope.key(), scope.value())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for InterestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}
