//! The hypergraph join planner: turns one query block's join tree,
//! predicates and functional dependencies into a cheapest execution plan.
//!
//! The pipeline, in dependency order:
//!
//! 1. [`make_graph`] converts the relational-expression tree into a join
//!    hypergraph, pushing WHERE predicates as far down as possible and
//!    detecting equi-join conditions along the way.
//! 2. [`interesting`] collects the orderings and functional dependencies
//!    the query cares about and builds the interesting-orders state
//!    machine.
//! 3. If the hypergraph has too many connected subgraph pairs to
//!    enumerate, [`graph_simplification`] forces join-order decisions
//!    (widening hyperedges) until the count is below the configured
//!    limit.
//! 4. DPhyp enumerates csg-cmp pairs into the [`costing`] receiver, which
//!    keeps the cheapest access path per table subset.
//! 5. [`optimizer`] orchestrates all of the above and attaches the
//!    post-join operators (sort, aggregate, having, limit).

pub mod access_path;
pub mod condition;
pub mod cost;
pub mod costing;
pub mod graph_simplification;
pub mod interesting;
pub mod make_graph;
pub mod optimizer;
pub mod query;
pub mod relational_expression;
pub mod selectivity;
pub mod trace;
pub mod trivial_receiver;

pub use access_path::{AccessPath, AccessPathKind, PathArena, PathId};
pub use condition::{Condition, ConditionArena, ConditionId, ConditionKind};
pub use graph_simplification::{GraphSimplifier, SimplificationResult};
pub use make_graph::{JoinHypergraph, JoinPredicate, Predicate};
pub use optimizer::{find_best_query_plan, OptimizerOptions, PlannedQuery};
pub use query::{QueryBlock, QueryBlockFlags, TableInfo, TableKind, TableStatsRefresher};
pub use relational_expression::{
    ConflictRule, ExprArena, ExprId, RelExprType, RelationalExpression,
};
pub use trace::OptimizerTrace;
