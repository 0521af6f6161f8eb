use hyperjoin_common::bitset::{find_lowest_bit_set, is_bit_set, NodeMap};

use crate::fd::{FdKind, FunctionalDependency};
use crate::ordering::{Direction, Ordering, OrderingKind};
use crate::{
    FunctionalDependencySet, OrderingSet, Term, TermHandle, MAX_SUPPORTED_FDS,
    MAX_SUPPORTED_ORDERINGS,
};

/// Index of a DFSM state, as carried on access paths.
pub type StateIndex = usize;

#[derive(Clone, Debug)]
pub(crate) struct ItemInfo {
    pub(crate) term: Term,

    /// Head of this term's equivalence class: the lowest-indexed member,
    /// as defined by the transitive closure of EQUIVALENCE FDs. A term not
    /// equivalent to anything points to itself. Two elements with the same
    /// canonical item could become equal after applying FDs, which drives
    /// pruning and homogenization.
    pub(crate) canonical_item: TermHandle,

    /// Whether the term (canonicalized) appears as the tail of any FD.
    pub(crate) can_be_added_by_fd: bool,

    /// Whether the term ever shows up in orderings as ASC/DESC or in a
    /// grouping. Propagated through equivalence classes onto the class
    /// head, so that adding the item in that direction can be judged
    /// worthwhile or not.
    pub(crate) used_asc: bool,
    pub(crate) used_desc: bool,
    pub(crate) used_in_grouping: bool,
}

/// Status of a registered ordering. Higher dominates lower: two equal
/// orderings collapse into the one with the higher status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum OrderingType {
    /// Added only because it is easy to produce (e.g. by an index scan);
    /// can be shortened or pruned away entirely unless it may lead to an
    /// interesting order.
    Uninteresting = 0,

    /// Derived from an interesting order but restricted to a single table
    /// (or synthesized as a group cover). Guaranteed to reach some
    /// interesting order eventually, but not tracked as interesting
    /// itself; this lets more access paths compare equal.
    Homogenized = 1,

    /// Interesting in its own right, e.g. given to ORDER BY.
    Interesting = 2,
}

#[derive(Clone, Debug)]
pub(crate) struct OrderingWithInfo {
    pub(crate) ordering: Ordering,
    pub(crate) type_: OrderingType,

    /// Whether the ordering is used only after all joins, so that every FD
    /// can be assumed active when reducing it.
    pub(crate) used_at_end: bool,

    /// Tables to attempt homogenization onto when `used_at_end` is false.
    pub(crate) homogenize_tables: NodeMap,

    /// The DFSM state entered when explicitly producing this ordering.
    pub(crate) state_idx: StateIndex,
}

/// Edges from the initial NFSM state that construct an ordering (rather
/// than following an FD) use `CONSTRUCTOR_FD_BASE + ordering_idx` as their
/// (negative) FD index.
pub(crate) const CONSTRUCTOR_FD_BASE: i32 = i32::MIN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct NfsmEdge {
    /// FD required to follow this edge; negative for constructor edges.
    pub(crate) required_fd_idx: i32,
    pub(crate) state_idx: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NfsmStateType {
    Interesting,
    Artificial,
    Deleted,
}

#[derive(Clone, Debug)]
pub(crate) struct NfsmState {
    pub(crate) type_: NfsmStateType,
    pub(crate) outgoing_edges: Vec<usize>,
    pub(crate) satisfied_ordering: Ordering,
    /// Index into the orderings array; `None` for artificial states.
    pub(crate) satisfied_ordering_idx: Option<usize>,
    pub(crate) can_reach_interesting_order: OrderingSet,
    /// Generation counter for traversal dedup (cleared by bumping the
    /// generation, not by rewriting every state).
    pub(crate) seen: u32,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DfsmEdge {
    pub(crate) required_fd_idx: i32,
    pub(crate) state_idx: usize,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct DfsmState {
    pub(crate) outgoing_edges: Vec<usize>,
    pub(crate) nfsm_states: Vec<usize>,

    /// Indexed by FD; the state reached by applying that FD (self if no
    /// transition).
    pub(crate) next_state: Vec<usize>,

    /// Indexed by ordering.
    pub(crate) follows_interesting_order: OrderingSet,

    /// Interesting orders this state can eventually reach given that all
    /// FDs are applied; a superset of `follows_interesting_order`.
    pub(crate) can_reach_interesting_order: OrderingSet,

    /// Whether applying the given FD moves to a different state; used to
    /// intersect with the available FD set at runtime.
    pub(crate) can_use_fd: FunctionalDependencySet,
}

/// The interesting-orders state machine for one query block.
///
/// Orderings and FDs are registered first; [`LogicalOrderings::build`]
/// then freezes them and constructs the NFSM and DFSM. After that only the
/// stateless runtime interface may be used.
pub struct LogicalOrderings {
    pub(crate) built: bool,

    /// All terms seen in orderings or FDs, deduplicated, indexed by
    /// [`TermHandle`].
    pub(crate) items: Vec<ItemInfo>,

    pub(crate) orderings: Vec<OrderingWithInfo>,

    /// Length of the longest registered ordering; bounds how long the
    /// orderings built during FD application may grow.
    pub(crate) longest_ordering: usize,

    pub(crate) fds: Vec<FunctionalDependency>,

    /// NFSM. State 0 is the initial state.
    pub(crate) states: Vec<NfsmState>,
    pub(crate) edges: Vec<NfsmEdge>,

    /// DFSM. State 0 is the initial state.
    pub(crate) dfsm_states: Vec<DfsmState>,
    pub(crate) dfsm_edges: Vec<DfsmEdge>,

    /// After pruning, maps pre-build ordering indexes to post-build ones.
    pub(crate) optimized_ordering_mapping: Vec<usize>,

    /// After pruning, maps pre-build FD indexes to post-build ones; `None`
    /// for FDs that were pruned or are always active (no bitmap bit).
    pub(crate) optimized_fd_mapping: Vec<Option<usize>>,
}

impl Default for LogicalOrderings {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalOrderings {
    pub fn new() -> Self {
        let mut orderings = Vec::new();
        // The empty ordering/grouping is always index 0.
        orderings.push(OrderingWithInfo {
            ordering: Ordering::empty(),
            type_: OrderingType::Uninteresting,
            used_at_end: true,
            homogenize_tables: 0,
            state_idx: 0,
        });

        Self {
            built: false,
            items: Vec::new(),
            orderings,
            longest_ordering: 0,
            // The decay FD is always index 0.
            fds: vec![FunctionalDependency::decay()],
            states: Vec::new(),
            edges: Vec::new(),
            dfsm_states: Vec::new(),
            dfsm_edges: Vec::new(),
            optimized_ordering_mapping: Vec::new(),
            optimized_fd_mapping: Vec::new(),
        }
    }

    /// Maps a term to its opaque handle, deduplicating as we go.
    pub fn get_handle(&mut self, term: Term) -> TermHandle {
        for (i, info) in self.items.iter().enumerate() {
            if info.term == term {
                return i;
            }
        }
        self.items.push(ItemInfo {
            term,
            canonical_item: self.items.len(),
            can_be_added_by_fd: false,
            used_asc: false,
            used_desc: false,
            used_in_grouping: false,
        });
        self.items.len() - 1
    }

    pub fn term(&self, handle: TermHandle) -> &Term {
        &self.items[handle].term
    }

    /// Registers an ordering (or grouping) for tracking, returning an
    /// index that can later be given to [`LogicalOrderings::set_order`]
    /// (after remapping). Deduplicates against previous entries.
    ///
    /// Uninteresting orderings are ones that can be produced by some
    /// operator (e.g. an index scan) but are not interesting to test for;
    /// they may be shortened or pruned away during build.
    ///
    /// If `used_at_end` is true, the ordering is assumed to be used only
    /// after all joins, so all FDs are assumed active when reducing it.
    /// Otherwise homogenization is restricted to `homogenize_tables`.
    ///
    /// The empty ordering is always index 0.
    pub fn add_ordering(
        &mut self,
        ordering: Ordering,
        interesting: bool,
        used_at_end: bool,
        homogenize_tables: NodeMap,
    ) -> usize {
        self.add_ordering_internal(
            ordering,
            if interesting { OrderingType::Interesting } else { OrderingType::Uninteresting },
            used_at_end,
            homogenize_tables,
        )
    }

    pub(crate) fn add_ordering_internal(
        &mut self,
        mut ordering: Ordering,
        type_: OrderingType,
        used_at_end: bool,
        homogenize_tables: NodeMap,
    ) -> usize {
        debug_assert!(!self.built);

        if ordering.is_grouping() {
            // Groupings are kept sorted; before equivalence classes exist,
            // plain handle order is canonical.
            ordering.elements_mut().sort_by_key(|e| e.term);
            ordering.deduplicate();
        }

        if type_ != OrderingType::Uninteresting {
            for element in ordering.elements() {
                match element.direction {
                    Direction::Asc => self.items[element.term].used_asc = true,
                    Direction::Desc => self.items[element.term].used_desc = true,
                    Direction::Irrelevant => {
                        self.items[element.term].used_in_grouping = true;
                    }
                }
            }
        }

        // Deduplicate against all existing orderings, promoting the type
        // if needed.
        for i in 0..self.orderings.len() {
            if self.orderings[i].ordering == ordering {
                self.orderings[i].type_ = self.orderings[i].type_.max(type_);
                return i;
            }
        }

        self.longest_ordering = self.longest_ordering.max(ordering.len());
        self.orderings.push(OrderingWithInfo {
            ordering,
            type_,
            used_at_end,
            homogenize_tables,
            state_idx: 0,
        });
        self.orderings.len() - 1
    }

    /// Number of registered orderings, the empty ordering included.
    pub fn num_orderings(&self) -> usize {
        self.orderings.len()
    }

    pub fn ordering(&self, ordering_idx: usize) -> &Ordering {
        &self.orderings[ordering_idx].ordering
    }

    pub fn ordering_is_relevant_for_sortahead(&self, ordering_idx: usize) -> bool {
        !self.orderings[ordering_idx].ordering.is_empty()
            && self.orderings[ordering_idx].type_ != OrderingType::Uninteresting
    }

    /// Registers a functional dependency that may be applied at some point
    /// during planning. Deduplicates like `add_ordering` (equivalences are
    /// symmetric). The decay FD is always index 0.
    pub fn add_functional_dependency(&mut self, fd: FunctionalDependency) -> usize {
        debug_assert!(!self.built);
        debug_assert!(fd.kind != FdKind::Decay);
        debug_assert!(fd.kind != FdKind::Equivalence || fd.head.len() == 1);

        for i in 0..self.fds.len() {
            let existing = &self.fds[i];
            if existing.kind != fd.kind {
                continue;
            }
            if fd.kind == FdKind::Equivalence {
                if existing.head[0] == fd.head[0] && existing.tail == fd.tail {
                    return i;
                }
                if existing.tail == fd.head[0] && existing.head[0] == fd.tail {
                    return i;
                }
            } else if existing.tail == fd.tail && existing.head == fd.head {
                return i;
            }
        }
        self.fds.push(fd);
        self.fds.len() - 1
    }

    /// Number of registered FDs, the decay FD included.
    pub fn num_fds(&self) -> usize {
        self.fds.len()
    }

    // -- Runtime interface; only valid after build() has been called. --

    /// Converts an index returned by `add_ordering` to one usable with
    /// `set_order`/`does_follow_order`. A pruned-away ordering maps to
    /// zero (the empty ordering), which is a valid `set_order` input.
    pub fn remap_ordering_index(&self, ordering_idx: usize) -> usize {
        debug_assert!(self.built);
        self.optimized_ordering_mapping[ordering_idx]
    }

    /// The DFSM state for a stream explicitly produced in the given
    /// ordering (e.g. by a sort).
    pub fn set_order(&self, ordering_idx: usize) -> StateIndex {
        debug_assert!(self.built);
        self.orderings[ordering_idx].state_idx
    }

    /// The bitmap for a given FD, to be ORed into the active set handed to
    /// [`LogicalOrderings::apply_fds`]. All-zero if the FD was optimized
    /// away, is always active, or fell outside the representable range.
    pub fn get_fd_set(&self, fd_idx: usize) -> FunctionalDependencySet {
        match self.optimized_fd_mapping[fd_idx] {
            Some(new_idx) if new_idx >= 1 && new_idx <= MAX_SUPPORTED_FDS => {
                1u64 << (new_idx - 1)
            }
            _ => 0,
        }
    }

    /// Moves to the best state reachable from `state_idx` given the set of
    /// active FDs. `fds` must be the entire active set, not just
    /// newly-applied FDs: old FDs can become relevant when new logical
    /// orderings appear, and the DFSM cannot always bake that in.
    pub fn apply_fds(
        &self,
        mut state_idx: StateIndex,
        fds: FunctionalDependencySet,
    ) -> StateIndex {
        debug_assert!(self.built);
        loop {
            let relevant_fds = self.dfsm_states[state_idx].can_use_fd & fds;
            if relevant_fds == 0 {
                return state_idx;
            }

            // Pick an arbitrary one and follow it; repeating until nothing
            // is left to follow converges on the right answer. Typically
            // there are one or two edges to follow.
            let fd_idx = find_lowest_bit_set(relevant_fds) + 1;
            state_idx = self.dfsm_states[state_idx].next_state[fd_idx];
        }
    }

    pub fn does_follow_order(&self, state_idx: StateIndex, ordering_idx: usize) -> bool {
        debug_assert!(self.built);
        if ordering_idx == 0 {
            return true;
        }
        if ordering_idx >= MAX_SUPPORTED_ORDERINGS {
            return false;
        }
        is_bit_set(ordering_idx, self.dfsm_states[state_idx].follows_interesting_order)
    }

    /// Whether state `a` follows (or can reach) any interesting orders
    /// that `b` does not, ignoring the given set. Used when pruning access
    /// paths: a more expensive path is still worth keeping if it follows
    /// orders the cheaper one does not. `more_ordered_than(a, b)` and
    /// `more_ordered_than(b, a)` can both hold (disjoint orders); if
    /// neither does, the states satisfy the same interesting orderings.
    pub fn more_ordered_than(
        &self,
        a_idx: StateIndex,
        b_idx: StateIndex,
        ignored_orderings: OrderingSet,
    ) -> bool {
        debug_assert!(self.built);
        let a = self.dfsm_states[a_idx].follows_interesting_order & !ignored_orderings;
        let b = self.dfsm_states[b_idx].follows_interesting_order & !ignored_orderings;
        let future_a =
            self.dfsm_states[a_idx].can_reach_interesting_order & !ignored_orderings;
        let future_b =
            self.dfsm_states[b_idx].can_reach_interesting_order & !ignored_orderings;
        (a & b) != a || (future_a & future_b) != future_a
    }

    // -- Printing, used for the optimizer trace. --

    pub fn print_ordering(&self, ordering: &Ordering) -> String {
        let is_grouping = ordering.is_grouping();
        let mut ret = String::from(if is_grouping { "{" } else { "(" });
        for (i, element) in ordering.elements().iter().enumerate() {
            if i != 0 {
                ret.push_str(", ");
            }
            ret.push_str(&self.items[element.term].term.label);
            if element.direction == Direction::Desc {
                ret.push_str(" DESC");
            }
        }
        ret.push(if is_grouping { '}' } else { ')' });
        ret
    }

    pub(crate) fn print_functional_dependency(
        &self,
        fd: &FunctionalDependency,
        html: bool,
    ) -> String {
        match fd.kind {
            FdKind::Decay => {
                if html {
                    "&epsilon;".to_owned()
                } else {
                    "eps".to_owned()
                }
            }
            FdKind::Equivalence => format!(
                "{}={}",
                self.items[fd.head[0]].term.label, self.items[fd.tail].term.label
            ),
            FdKind::Fd => {
                let mut ret = String::from("{");
                for (i, head_item) in fd.head.iter().enumerate() {
                    if i != 0 {
                        ret.push_str(", ");
                    }
                    ret.push_str(&self.items[*head_item].term.label);
                }
                ret.push_str(if html { "} &rarr; " } else { "} -> " });
                ret.push_str(&self.items[fd.tail].term.label);
                ret
            }
        }
    }

    pub(crate) fn print_functional_dependencies(&self, trace: &mut String) {
        if self.fds.len() <= 1 {
            trace.push_str("\nNo functional dependencies (after pruning).\n\n");
            return;
        }
        trace.push_str("\nFunctional dependencies (after pruning):\n");
        for fd in &self.fds[1..] {
            trace.push_str(" - ");
            trace.push_str(&self.print_functional_dependency(fd, /*html=*/ false));
            if fd.always_active {
                trace.push_str(" [always active]");
            }
            trace.push('\n');
        }
        trace.push('\n');
    }

    pub(crate) fn print_interesting_orders(&self, trace: &mut String) {
        trace.push_str("Interesting orders:\n");
        for (order_idx, ordering) in self.orderings.iter().enumerate().skip(1) {
            trace.push_str(&format!(
                " - {}: {}",
                order_idx,
                self.print_ordering(&ordering.ordering)
            ));
            match ordering.type_ {
                OrderingType::Homogenized => {
                    trace.push_str(" [homogenized from other ordering]");
                }
                OrderingType::Uninteresting => trace.push_str(" [support order]"),
                OrderingType::Interesting => {}
            }
            trace.push('\n');
        }
        trace.push('\n');
    }

    pub(crate) fn print_nfsm_dotty_graph(&self, trace: &mut String) {
        trace.push_str("digraph G {\n");
        for (state_idx, state) in self.states.iter().enumerate() {
            if state.type_ == NfsmStateType::Deleted {
                continue;
            }

            trace.push_str(&format!(
                "  s{} [label=\"{}\"",
                state_idx,
                self.print_ordering(&state.satisfied_ordering)
            ));
            if state.type_ == NfsmStateType::Interesting {
                trace.push_str(", peripheries=2");
            }
            trace.push_str("]\n");

            for &edge_idx in &state.outgoing_edges {
                let edge = &self.edges[edge_idx];
                if edge.required_fd_idx < 0 {
                    trace.push_str(&format!(
                        "  s{} -> s{} [label=\"ordering {}\"]\n",
                        state_idx,
                        edge.state_idx,
                        edge.required_fd_idx - CONSTRUCTOR_FD_BASE
                    ));
                } else {
                    let fd = &self.fds[edge.required_fd_idx as usize];
                    trace.push_str(&format!(
                        "  s{} -> s{} [label=\"{}\"]\n",
                        state_idx,
                        edge.state_idx,
                        self.print_functional_dependency(fd, /*html=*/ true)
                    ));
                }
            }
        }
        trace.push_str("}\n");
    }

    pub(crate) fn print_dfsm_dotty_graph(&self, trace: &mut String) {
        trace.push_str("digraph G {\n");
        for (state_idx, state) in self.dfsm_states.iter().enumerate() {
            trace.push_str(&format!("  s{state_idx} [label=< "));

            let mut any_interesting = false;
            for (i, &nfsm_state_idx) in state.nfsm_states.iter().enumerate() {
                let nfsm_state = &self.states[nfsm_state_idx];
                if i != 0 {
                    trace.push_str(", ");
                }
                if nfsm_state.type_ == NfsmStateType::Interesting {
                    any_interesting = true;
                    trace.push_str("<b>");
                }
                trace.push_str(&self.print_ordering(&nfsm_state.satisfied_ordering));
                if nfsm_state.type_ == NfsmStateType::Interesting {
                    trace.push_str("</b>");
                }
            }
            trace.push_str(" >");
            if any_interesting {
                trace.push_str(", peripheries=2");
            }
            trace.push_str("]\n");

            for &edge_idx in &state.outgoing_edges {
                let edge = &self.dfsm_edges[edge_idx];
                if edge.required_fd_idx < 0 {
                    trace.push_str(&format!(
                        "  s{} -> s{} [label=\"ordering {}\"]\n",
                        state_idx,
                        edge.state_idx,
                        edge.required_fd_idx - CONSTRUCTOR_FD_BASE
                    ));
                } else {
                    let fd = &self.fds[edge.required_fd_idx as usize];
                    trace.push_str(&format!(
                        "  s{} -> s{} [label=\"{}\"]\n",
                        state_idx,
                        edge.state_idx,
                        self.print_functional_dependency(fd, /*html=*/ true)
                    ));
                }
            }
        }
        trace.push_str("}\n");
    }
}
