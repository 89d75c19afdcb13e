//! Provider scope tokens and the data categories they unlock.
//!
//! The provider grants scopes as a space-delimited string. That string is parsed
//! once, at the boundary, into a [`GrantedScopes`] set; everything downstream works
//! with [`Category`] values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Data category the provider can push notifications for and sync.
///
/// Ordering follows declaration order, which is also the order subscriptions
/// are registered in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Body,
    Activities,
    Sleep,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Body, Category::Activities, Category::Sleep];

    /// Scope token granting access to this category (case-sensitive).
    pub fn scope_token(self) -> &'static str {
        match self {
            Category::Body => "weight-scope",
            Category::Activities => "activity-scope",
            Category::Sleep => "sleep-scope",
        }
    }

    /// Category name as used on the provider API and in bus subjects.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Body => "body",
            Category::Activities => "activities",
            Category::Sleep => "sleep",
        }
    }

    /// Upper-case label sent along with subscription requests.
    pub fn label(self) -> &'static str {
        match self {
            Category::Body => "BODY",
            Category::Activities => "ACTIVITIES",
            Category::Sleep => "SLEEP",
        }
    }

    fn from_scope_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.scope_token() == token)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a category name is not one of the known categories.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown data category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Recognized categories present in a granted-scope string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GrantedScopes(BTreeSet<Category>);

impl GrantedScopes {
    /// Splits on whitespace and keeps the tokens that map to a category.
    /// Unrecognized tokens are ignored.
    pub fn parse(scope: &str) -> Self {
        Self(
            scope
                .split_whitespace()
                .filter_map(Category::from_scope_token)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }
}
