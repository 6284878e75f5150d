//! The closed set of pipeline categories and their execution properties.
//!
//! Categories are process-wide constants: the property table and the total
//! execution order never change after program start. [`Category::ordered`]
//! returns the order by value so callers cannot corrupt it.

use serde::{Deserialize, Serialize};

/// A pipeline stage. Every plugin is registered under exactly one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Metrics, logging and tracing plugins. Never block traffic.
    Observability,
    /// Authentication checks (e.g. token validation).
    Authentication,
    /// Authorization checks (e.g. per-tool access control).
    Authorization,
    /// Rate limiting and quota enforcement.
    RateLimiting,
    /// Request/response schema and content validation.
    Validation,
    /// Content transformation. The only stage allowed to mutate.
    Content,
    /// Audit logging. Runs last, observes the final shape of traffic.
    Audit,
}

/// Execution properties of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryProperties {
    /// Plugins in this category run concurrently.
    pub parallel: bool,
    /// A rejection from an optional plugin does not short-circuit.
    pub ignore_optional_rejection: bool,
    /// Plugins in this category may mutate the request/response.
    pub can_modify: bool,
}

/// The fixed total execution order of the pipeline.
const ORDERED: [Category; 7] = [
    Category::Observability,
    Category::Authentication,
    Category::Authorization,
    Category::RateLimiting,
    Category::Validation,
    Category::Content,
    Category::Audit,
];

impl Category {
    /// All categories in pipeline execution order.
    ///
    /// Returned by value; mutating the result cannot affect the pipeline.
    #[must_use]
    pub fn ordered() -> [Category; 7] {
        ORDERED
    }

    /// Execution properties for this category.
    ///
    /// Only `Observability` runs its plugins in parallel and ignores
    /// rejections from optional plugins; only `Content` may mutate. A
    /// category is never both parallel and mutating: concurrent execution
    /// would admit write races on the shared request/response.
    #[must_use]
    pub fn properties(self) -> CategoryProperties {
        match self {
            Self::Observability => CategoryProperties {
                parallel: true,
                ignore_optional_rejection: true,
                can_modify: false,
            },
            Self::Content => CategoryProperties {
                parallel: false,
                ignore_optional_rejection: false,
                can_modify: true,
            },
            Self::Authentication
            | Self::Authorization
            | Self::RateLimiting
            | Self::Validation
            | Self::Audit => CategoryProperties {
                parallel: false,
                ignore_optional_rejection: false,
                can_modify: false,
            },
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Observability => "observability",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimiting => "rate_limiting",
            Self::Validation => "validation",
            Self::Content => "content",
            Self::Audit => "audit",
        };
        write!(f, "{name}")
    }
}
