use std::fmt;

/// A query feature the hypergraph optimizer deliberately rejects. The
/// caller is expected to fall back to another planner for these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnsupportedFeature {
    Rollup,
    FulltextSearch,
    Distinct,
    RecursiveCte,
    SecondaryEngine,
    WindowFunctions,
    BufferResult,
    OrderByAndGroupBy,
    Lateral,
    TableFunctions,
    TooManyPredicates,
}

impl fmt::Display for UnsupportedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnsupportedFeature::Rollup => "ROLLUP",
            UnsupportedFeature::FulltextSearch => "fulltext search",
            UnsupportedFeature::Distinct => "DISTINCT",
            UnsupportedFeature::RecursiveCte => "recursive CTEs",
            UnsupportedFeature::SecondaryEngine => "secondary engine",
            UnsupportedFeature::WindowFunctions => "windowing functions",
            UnsupportedFeature::BufferResult => "SQL_BUFFER_RESULT",
            UnsupportedFeature::OrderByAndGroupBy => {
                "ORDER BY and GROUP BY at the same time"
            }
            UnsupportedFeature::Lateral => "LATERAL",
            UnsupportedFeature::TableFunctions => "table functions",
            UnsupportedFeature::TooManyPredicates => {
                "more than 64 WHERE/ON predicates"
            }
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the optimizer core. Feature rejections are fatal for
/// the query but not for the session; resource exhaustion means the plan
/// search was aborted.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OptimizerError {
    /// The query uses a feature this planner does not handle yet.
    #[error("the hypergraph optimizer does not support {0} yet")]
    Unsupported(UnsupportedFeature),

    /// The plan search exceeded its resource budget and could not be
    /// reduced any further.
    #[error("query is too complex to plan ({num_access_paths} partial plans)")]
    TooComplex { num_access_paths: usize },
}
