//! Tracks which tuple streams follow which orders, and in particular
//! whether they follow interesting orders.
//!
//! An interesting order (and/or grouping) is one we might need to sort by
//! at some point during query execution, e.g. to satisfy an ORDER BY; if
//! the rows are already produced in that order, the sort can be skipped.
//!
//! We generally follow Neumann and Moerkotte: "An efficient framework for
//! order optimization" and "A Combined Framework for Grouping and Order
//! Optimization"; order homogenization comes from Simmen et al:
//! "Fundamental Techniques for Order Optimization".
//!
//! All of these deal with _logical_ orderings, where a row stream may
//! follow more than one order simultaneously, as inferred through
//! functional dependencies (FDs). If we have an ordering (a, b) and an
//! active FD {a} → c, we also implicitly follow (a, c, b) and (a, b, c),
//! but not (c, a, b). Equivalences such as join conditions are a stronger
//! form: with (a, b) and b = c, we also follow (a, c), which would not be
//! inferable from {b} → c and {c} → b alone.
//!
//! Which orderings a stream follows is modeled as a state in a
//! non-deterministic finite state machine whose edges are FD applications,
//! built up from base orderings (an explicit sort, or the empty ordering).
//! Since NFSMs are nondeterministic, the NFSM is converted to a DFSM with
//! the standard powerset construction, so that the ordering state of an
//! access path is a single integer. Applying more FDs (e.g. by performing
//! a join) moves the state through the DFSM into more attractive states;
//! precomputed bitmaps answer "does this state follow ordering i" in a
//! single test.
//!
//! A known weakness is that transitive FDs are not always followed: with
//! (a), {a} → b and {b} → c, the states (a, b) and (a, b, c) are created
//! but not (a, c). This does not affect equivalences, which make up most
//! collected FDs.
//!
//! The actual collection of orderings and FDs from a query block happens
//! in the planner crate; this crate only knows term handles.

mod build;
mod fd;
mod logical_orderings;
mod ordering;

pub use fd::{FdKind, FunctionalDependency};
pub use logical_orderings::{LogicalOrderings, StateIndex};
pub use ordering::{Direction, Ordering, OrderingElement, OrderingKind};

use hyperjoin_common::NodeMap;

/// Opaque handle for a sort/grouping expression. Handles are deduplicated:
/// `handle(x) == handle(y)` iff the terms compare equal.
pub type TermHandle = usize;

/// A sort or grouping expression as seen by this framework: an opaque
/// label for display and deduplication, the set of tables it reads, and
/// whether it is nondeterministic (`RAND()`-like). Nondeterministic terms
/// may not be shed from the tail of an ordering to claim a deterministic
/// prefix, and they restrict group covers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Term {
    pub label: String,
    pub tables: NodeMap,
    pub nondeterministic: bool,
}

impl Term {
    pub fn new(label: impl Into<String>, tables: NodeMap) -> Self {
        Self { label: label.into(), tables, nondeterministic: false }
    }

    pub fn nondeterministic(label: impl Into<String>, tables: NodeMap) -> Self {
        Self { label: label.into(), tables, nondeterministic: true }
    }
}

/// Sets of functional dependencies are bitmaps with a fixed capacity; FDs
/// beyond the capacity do not get a bit and are silently impossible to
/// follow in the state machine. Always-active FDs and FDs that are pruned
/// away do not consume bits.
pub const MAX_SUPPORTED_FDS: usize = 64;
pub type FunctionalDependencySet = u64;

/// Interesting orderings beyond this count still influence construction
/// but cannot be tracked at runtime.
pub const MAX_SUPPORTED_ORDERINGS: usize = 64;
pub type OrderingSet = u64;
