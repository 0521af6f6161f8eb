//! Umbrella crate for the hyperjoin join optimizer: re-exports the public
//! API of the member crates so embedders depend on a single crate.
//!
//! The short version: build a [`QueryBlock`] describing one query block's
//! join tree, conditions and clauses, then call [`find_best_query_plan`]
//! to get the cheapest access-path tree for it.

pub use hyperjoin_common::{bitset, fmt, NodeMap, OptResult, OptimizerError, UnsupportedFeature};
pub use hyperjoin_hypergraph::{
    enumerate_all_connected_partitions, Hyperedge, Hypergraph, Node, OnlineCycleFinder, Receiver,
};
pub use hyperjoin_orders::{
    Direction, FdKind, FunctionalDependency, FunctionalDependencySet, LogicalOrderings, Ordering,
    OrderingElement, OrderingKind, OrderingSet, StateIndex, Term, TermHandle,
};
pub use hyperjoin_planner::{
    find_best_query_plan, AccessPath, AccessPathKind, Condition, ConditionArena, ConditionId,
    ConditionKind, ConflictRule, ExprArena, ExprId, GraphSimplifier, JoinHypergraph,
    JoinPredicate, OptimizerOptions, OptimizerTrace, PathArena, PathId, PlannedQuery, Predicate,
    QueryBlock, QueryBlockFlags, RelExprType, RelationalExpression, SimplificationResult,
    TableInfo, TableKind, TableStatsRefresher,
};
