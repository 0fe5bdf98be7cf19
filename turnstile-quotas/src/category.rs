use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Coarse classification of an endpoint for quota purposes.
///
/// [`Total`](Self::Total) is a synthetic aggregate. Callers never check it directly; it is
/// incremented together with every concrete category.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointCategory {
    /// Analytics and reporting endpoints.
    Analytics,
    /// General API endpoints.
    Api,
    /// Administrative endpoints.
    Admin,
    /// Unauthenticated public endpoints.
    Public,
    /// Aggregate of all concrete categories.
    Total,
}

impl EndpointCategory {
    /// All categories that requests can be classified into.
    pub const CONCRETE: [Self; 4] = [Self::Analytics, Self::Api, Self::Admin, Self::Public];

    /// All categories including the aggregate.
    pub const ALL: [Self; 5] = [
        Self::Analytics,
        Self::Api,
        Self::Admin,
        Self::Public,
        Self::Total,
    ];

    /// Returns the canonical name of this category.
    pub fn name(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Api => "api",
            Self::Admin => "admin",
            Self::Public => "public",
            Self::Total => "total",
        }
    }

    /// Returns `true` for the synthetic [`Total`](Self::Total) category.
    pub fn is_aggregate(self) -> bool {
        matches!(self, Self::Total)
    }
}

impl fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown [`EndpointCategory`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown endpoint category `{0}`")]
pub struct ParseCategoryError(String);

impl FromStr for EndpointCategory {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseCategoryError(s.to_owned()))
    }
}

/// Maps a request path to its [`EndpointCategory`].
///
/// Matching is by plain string prefix. Paths that match none of the known prefixes are general
/// API traffic. This never returns [`EndpointCategory::Total`].
pub fn classify_endpoint(path: &str) -> EndpointCategory {
    if path.starts_with("/analytics") {
        EndpointCategory::Analytics
    } else if path.starts_with("/admin") {
        EndpointCategory::Admin
    } else if path.starts_with("/public") {
        EndpointCategory::Public
    } else {
        EndpointCategory::Api
    }
}
