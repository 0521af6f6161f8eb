//! Build pipeline for [`LogicalOrderings`]: equivalence classes,
//! homogenization, pruning, NFSM construction, and the powerset conversion
//! to the DFSM.

use hyperjoin_common::bitset::{bits_set_in, is_subset, table_bitmap};

use crate::fd::{FdKind, FunctionalDependency};
use crate::logical_orderings::{
    DfsmEdge, DfsmState, LogicalOrderings, NfsmEdge, NfsmState, NfsmStateType, OrderingType,
    CONSTRUCTOR_FD_BASE,
};
use crate::ordering::{Direction, Ordering, OrderingElement, OrderingKind};
use crate::{TermHandle, MAX_SUPPORTED_FDS, MAX_SUPPORTED_ORDERINGS};

/// Safety valve against NFSM explosion: beyond this many states, no new
/// states are created (edges to existing states are still added). Losing
/// states loses optimality, never correctness.
const MAX_NFSM_STATES: usize = 200;

impl LogicalOrderings {
    /// Builds the state machines. All orderings and FDs become locked;
    /// after this, only the runtime interface may be used. May prune away
    /// orderings and FDs, and may add homogenized orderings (derived from
    /// interesting ones but restricted to a single table, or covering a
    /// grouping).
    ///
    /// If `trace` is given, human-readable build output is appended to it.
    pub fn build(&mut self, mut trace: Option<&mut String>) {
        debug_assert!(!self.built);

        self.build_equivalence_classes();
        self.recanonicalize_groupings();
        self.create_orderings_from_groupings();
        self.create_homogenized_orderings();
        self.prune_fds();
        if let Some(trace) = trace.as_mut() {
            self.print_functional_dependencies(trace);
        }
        self.find_elements_that_can_be_added_by_fds();
        self.prune_uninteresting_orders();
        if let Some(trace) = trace.as_mut() {
            self.print_interesting_orders(trace);
        }
        self.build_nfsm();
        if let Some(trace) = trace.as_mut() {
            trace.push_str("NFSM for interesting orders, before pruning:\n");
            self.print_nfsm_dotty_graph(trace);
        }
        self.prune_nfsm();
        if let Some(trace) = trace.as_mut() {
            trace.push_str("\nNFSM for interesting orders, after pruning:\n");
            self.print_nfsm_dotty_graph(trace);
        }
        self.convert_nfsm_to_dfsm();
        if let Some(trace) = trace.as_mut() {
            trace.push_str("\nDFSM for interesting orders:\n");
            self.print_dfsm_dotty_graph(trace);
        }
        self.find_initial_states_for_ordering();
        self.built = true;
    }

    /// Populates `canonical_item` for every term: the lowest-indexed
    /// member of its equivalence class, as given by the transitive closure
    /// of EQUIVALENCE FDs. Direction-use flags are folded onto the class
    /// head along the way.
    fn build_equivalence_classes(&mut self) {
        // In the worst case (n equal items, FDs ordered maximally badly)
        // this is O(nm); in practice much better.
        let mut done_anything = true;
        while done_anything {
            done_anything = false;
            for fd_idx in 0..self.fds.len() {
                if self.fds[fd_idx].kind != FdKind::Equivalence {
                    continue;
                }
                let left_item = self.fds[fd_idx].head[0];
                let right_item = self.fds[fd_idx].tail;

                if self.items[left_item].canonical_item == self.items[right_item].canonical_item
                {
                    continue;
                }

                // Merge so that the lowest index is always the canonical
                // member of its class.
                let (canonical_item, duplicate_item) = if self.items[right_item].canonical_item
                    < self.items[left_item].canonical_item
                {
                    (self.items[right_item].canonical_item, left_item)
                } else {
                    (self.items[left_item].canonical_item, right_item)
                };
                self.items[duplicate_item].canonical_item = canonical_item;
                let dup = self.items[duplicate_item].clone();
                let canon = &mut self.items[canonical_item];
                canon.used_asc |= dup.used_asc;
                canon.used_desc |= dup.used_desc;
                canon.used_in_grouping |= dup.used_in_grouping;
                done_anything = true;
            }
        }
    }

    fn grouping_sort_key(&self, element: &OrderingElement) -> (TermHandle, TermHandle) {
        (self.items[element.term].canonical_item, element.term)
    }

    /// Re-sorts every grouping by (equivalence class, handle). Sorting by
    /// canonical item first means that swapping an element for an
    /// equivalent one (applying an EQUIVALENCE FD) does not change the
    /// element order, which would otherwise give false negatives in
    /// `could_become_interesting_ordering`.
    fn recanonicalize_groupings(&mut self) {
        for ordering_idx in 0..self.orderings.len() {
            if !self.orderings[ordering_idx].ordering.is_grouping() {
                continue;
            }
            let mut ordering = self.orderings[ordering_idx].ordering.clone();
            let mut elements = std::mem::take(ordering.elements_mut());
            elements.sort_by_key(|e| self.grouping_sort_key(e));
            *ordering.elements_mut() = elements;
            self.orderings[ordering_idx].ordering = ordering;
        }
    }

    /// For each interesting grouping, synthesizes an ordering that covers
    /// it: sorting by the cover and then "forgetting" the element order
    /// yields the grouping. The cover reuses the longest interesting
    /// ordering whose elements all lie within the grouping (so one sort
    /// can serve both), and appends the remaining elements in canonical
    /// order, ascending.
    fn create_orderings_from_groupings(&mut self) {
        let num_original_orderings = self.orderings.len();
        for grouping_idx in 1..num_original_orderings {
            if self.orderings[grouping_idx].type_ != OrderingType::Interesting
                || !self.orderings[grouping_idx].ordering.is_grouping()
            {
                continue;
            }
            let grouping = self.orderings[grouping_idx].ordering.clone();

            // Find the longest interesting ordering that the grouping
            // fully contains (matching distinct elements by equivalence
            // class).
            let mut best_prefix: Vec<OrderingElement> = Vec::new();
            let mut best_matched = vec![false; grouping.len()];
            for ordering_idx in 1..num_original_orderings {
                let candidate = &self.orderings[ordering_idx];
                if candidate.type_ != OrderingType::Interesting
                    || candidate.ordering.kind() != OrderingKind::Order
                    || candidate.ordering.len() > grouping.len()
                    || candidate.ordering.len() <= best_prefix.len()
                {
                    continue;
                }
                let mut matched = vec![false; grouping.len()];
                let mut ok = true;
                for element in candidate.ordering.elements() {
                    let canonical = self.items[element.term].canonical_item;
                    let position = grouping.elements().iter().enumerate().position(|(k, ge)| {
                        !matched[k] && self.items[ge.term].canonical_item == canonical
                    });
                    match position {
                        Some(k) => matched[k] = true,
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                if ok {
                    best_prefix = candidate.ordering.elements().to_vec();
                    best_matched = matched;
                }
            }

            let mut cover = best_prefix;
            for (i, element) in grouping.elements().iter().enumerate() {
                if !best_matched[i] {
                    cover.push(OrderingElement::asc(element.term));
                }
            }

            let used_at_end = self.orderings[grouping_idx].used_at_end;
            let homogenize_tables = self.orderings[grouping_idx].homogenize_tables;
            self.add_ordering_internal(
                Ordering::order(cover),
                OrderingType::Homogenized,
                used_at_end,
                homogenize_tables,
            );
        }
    }

    /// Checks whether `item` is redundant given the elements in `prefix`:
    /// a literal duplicate, or implied by functional dependencies. Applied
    /// to every element in turn this "reduces" the ordering (Simmen).
    ///
    /// With `all_fds` set, dependencies that are not always active are
    /// also considered. That is only sound for orderings used after all
    /// joins have been performed (e.g. the final ORDER BY), where every
    /// collected FD is known to hold.
    fn implied_by_earlier_elements(
        &self,
        item: TermHandle,
        prefix: &[OrderingElement],
        all_fds: bool,
    ) -> bool {
        let contains = |i: TermHandle| prefix.iter().any(|e| e.term == i);

        // Straight duplicates first (ASC/DESC makes no difference; the
        // second occurrence is redundant either way).
        if contains(item) {
            return true;
        }

        for fd in &self.fds[1..] {
            if !all_fds && !fd.always_active {
                continue;
            }
            match fd.kind {
                FdKind::Decay => {}
                FdKind::Fd => {
                    if fd.tail == item && fd.head.iter().all(|&h| contains(h)) {
                        return true;
                    }
                }
                FdKind::Equivalence => {
                    // a = b implies both a → b and b → a.
                    if fd.tail == item && contains(fd.head[0]) {
                        return true;
                    }
                    if fd.head[0] == item && contains(fd.tail) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Removes elements made redundant by earlier ones, giving a more
    /// canonical form before homogenization. "Reduce Order" in the Simmen
    /// paper.
    pub fn reduce_ordering(&self, ordering: &Ordering, all_fds: bool) -> Ordering {
        let mut reduced = Vec::with_capacity(ordering.len());
        for (i, element) in ordering.elements().iter().enumerate() {
            if !self.implied_by_earlier_elements(element.term, &ordering.elements()[..i], all_fds)
            {
                reduced.push(*element);
            }
        }
        Ordering::new(ordering.kind(), reduced)
    }

    /// For each interesting ordering, tries to rewrite it so that it
    /// refers to a single table only, by swapping elements for equivalent
    /// ones. Enables sort-ahead: sort one table early in an ordering that,
    /// after the remaining FDs are applied, becomes the desired one. A
    /// heuristic (only equivalences are considered for the rewriting), but
    /// it finds an ordering in most cases where one exists.
    /// "Homogenize Order" in the Simmen paper.
    fn create_homogenized_orderings(&mut self) {
        let seen_tables = self
            .items
            .iter()
            .fold(0, |acc, item| acc | item.term.tables);

        // Reverse map from canonical items to class members, sorted for
        // range lookup.
        let mut reverse_canonical: Vec<(TermHandle, TermHandle)> = (0..self.items.len())
            .map(|item_idx| (self.items[item_idx].canonical_item, item_idx))
            .collect();
        reverse_canonical.sort_unstable();

        let num_original_orderings = self.orderings.len();
        for ordering_idx in 1..num_original_orderings {
            if self.orderings[ordering_idx].type_ != OrderingType::Interesting
                || self.orderings[ordering_idx].ordering.kind() != OrderingKind::Order
            {
                continue;
            }
            let used_at_end = self.orderings[ordering_idx].used_at_end;
            let tables = if used_at_end {
                seen_tables
            } else {
                self.orderings[ordering_idx].homogenize_tables
            };
            let reduced =
                self.reduce_ordering(&self.orderings[ordering_idx].ordering.clone(), used_at_end);
            if reduced.is_empty() {
                continue;
            }

            for table_idx in bits_set_in(tables) {
                self.add_homogenized_ordering_if_possible(
                    &reduced,
                    used_at_end,
                    table_idx,
                    &reverse_canonical,
                );
            }
        }
    }

    fn add_homogenized_ordering_if_possible(
        &mut self,
        reduced_ordering: &Ordering,
        all_fds: bool,
        table_idx: usize,
        reverse_canonical: &[(TermHandle, TermHandle)],
    ) {
        let available_tables = table_bitmap(table_idx);
        let mut new_elements: Vec<OrderingElement> = Vec::new();

        for element in reduced_ordering.elements() {
            if is_subset(self.items[element.term].term.tables, available_tables) {
                // Already refers to the right table.
                if !self.implied_by_earlier_elements(element.term, &new_elements, all_fds) {
                    new_elements.push(*element);
                }
                continue;
            }

            // Find an equivalent item on the wanted table.
            let canonical_item = self.items[element.term].canonical_item;
            let class_start =
                reverse_canonical.partition_point(|&(canon, _)| canon < canonical_item);
            let mut found = false;
            for &(canon, item) in &reverse_canonical[class_start..] {
                if canon != canonical_item {
                    break;
                }
                if is_subset(self.items[item].term.tables, available_tables) {
                    if !self.implied_by_earlier_elements(item, &new_elements, all_fds) {
                        new_elements.push(OrderingElement {
                            term: item,
                            direction: element.direction,
                        });
                    }
                    found = true;
                    break;
                }
            }
            if !found {
                // Not possible to homogenize this ordering.
                return;
            }
        }
        self.add_ordering_internal(
            Ordering::order(new_elements),
            OrderingType::Homogenized,
            /*used_at_end=*/ true,
            /*homogenize_tables=*/ 0,
        );
    }

    /// Discards FDs that cannot contribute to any ordering, and moves
    /// always-active FDs past the range of bitmap-tracked indexes.
    ///
    /// The definition of prunable FDs in the papers seems not practically
    /// realizable, so a simple heuristic is used instead: an FD is useful
    /// iff it can produce an item that some ordering mentions. Items that
    /// are not part of any ordering would cause the proposed new ordering
    /// to be pruned away immediately, so this is safe. The dominant FDs to
    /// prune are key dependencies S → k with non-useful k, and this
    /// heuristic catches those.
    fn prune_fds(&mut self) {
        let old_length = self.fds.len();
        let mut mapping: Vec<Option<usize>> = vec![None; old_length];
        mapping[0] = Some(0);

        let mut kept: Vec<FunctionalDependency> = vec![self.fds[0].clone()];
        let mut deferred: Vec<FunctionalDependency> = Vec::new();

        for fd_idx in 1..old_length {
            let fd = &self.fds[fd_idx];

            let useful_item = |item: TermHandle| {
                let canonical = self.items[item].canonical_item;
                let info = &self.items[canonical];
                info.used_asc || info.used_desc || info.used_in_grouping
            };
            let mut used_fd = useful_item(fd.tail);
            if !used_fd && fd.kind == FdKind::Equivalence {
                used_fd = useful_item(fd.head[0]);
            }
            if !used_fd {
                continue;
            }

            if fd.always_active {
                // Keep these so the state machines can bake them in, but
                // give them no bitmap bit (and no low index): they are
                // never followed explicitly at runtime.
                deferred.push(fd.clone());
            } else {
                mapping[fd_idx] = Some(kept.len());
                kept.push(fd.clone());
            }
        }

        kept.extend(deferred);
        self.fds = kept;
        self.optimized_fd_mapping = mapping;
    }

    /// Populates `can_be_added_by_fd`.
    fn find_elements_that_can_be_added_by_fds(&mut self) {
        for fd_idx in 0..self.fds.len() {
            let tail = self.fds[fd_idx].tail;
            let tail_canonical = self.items[tail].canonical_item;
            self.items[tail_canonical].can_be_added_by_fd = true;
            if self.fds[fd_idx].kind == FdKind::Equivalence {
                let head = self.fds[fd_idx].head[0];
                let head_canonical = self.items[head].canonical_item;
                self.items[head_canonical].can_be_added_by_fd = true;
            }
        }
    }

    /// Shortens or removes uninteresting orderings that cannot reach
    /// anything interesting, then re-deduplicates. In a typical query this
    /// removes a large number of index-produced orderings, shrinking the
    /// FSMs considerably. The only step that moves orderings around; it
    /// populates the index remapping.
    fn prune_uninteresting_orders(&mut self) {
        let mut mapping = vec![0usize; self.orderings.len()];
        let mut new_length = 0;

        for ordering_idx in 0..self.orderings.len() {
            if self.orderings[ordering_idx].type_ == OrderingType::Uninteresting {
                let mut ordering = self.orderings[ordering_idx].ordering.clone();
                if ordering.is_grouping() {
                    // Groupings cannot be shortened (dropping an element
                    // changes their meaning); they are kept or dropped
                    // whole.
                    if !self.could_become_interesting_ordering(&ordering) {
                        ordering.truncate(0);
                    }
                } else {
                    // Shorten element by element until the ordering can
                    // (heuristically) become interesting; possibly down to
                    // nothing, in which case it is deduplicated away below.
                    while !ordering.is_empty()
                        && !self.could_become_interesting_ordering(&ordering)
                    {
                        ordering.truncate(ordering.len() - 1);
                    }
                }
                self.orderings[ordering_idx].ordering = ordering;
            }

            // Shortening may have created duplicates, so re-deduplicate.
            mapping[ordering_idx] = new_length;
            for i in 0..new_length {
                if self.orderings[i].ordering == self.orderings[ordering_idx].ordering {
                    mapping[ordering_idx] = i;
                    let promoted = self.orderings[ordering_idx].type_;
                    self.orderings[i].type_ = self.orderings[i].type_.max(promoted);
                    break;
                }
            }
            if mapping[ordering_idx] == new_length {
                let entry = self.orderings[ordering_idx].clone();
                self.orderings[new_length] = entry;
                new_length += 1;
            }
        }
        self.orderings.truncate(new_length);
        self.optimized_ordering_mapping = mapping;
    }

    /// Heuristically checks whether an ordering has any hope of becoming
    /// an interesting one. The base form is a prefix test: (a, b) can
    /// become the interesting (a, b, c). To make the graph wider at build
    /// time (and thus need fewer FD applications at runtime), a prefix
    /// mismatch is forgiven when the missing item could be added by some
    /// FD later: with ordering (a, b) and interesting (a, x, b), x is
    /// skipped if any FD can produce it.
    ///
    /// This gives false positives, which is fine; the test exists to prune
    /// the NFSM state count, where pruning is essential for performance
    /// but not correctness. The prefix comparison works on equivalence
    /// classes, or orderings that become interesting only after an
    /// equivalence step would be pruned too early.
    ///
    /// An ordering can also become a grouping over its full element set;
    /// a grouping can only ever grow into a larger grouping.
    fn could_become_interesting_ordering(&self, candidate: &Ordering) -> bool {
        for other_ordering in &self.orderings {
            if other_ordering.type_ != OrderingType::Interesting {
                continue;
            }
            let interesting = &other_ordering.ordering;

            let is_match = match (candidate.is_grouping(), interesting.is_grouping()) {
                (false, false) => self.prefix_matches(candidate, interesting),
                (_, true) => self.subset_matches(candidate, interesting),
                (true, false) => false,
            };
            if is_match {
                return true;
            }
        }
        false
    }

    fn prefix_matches(&self, candidate: &Ordering, interesting: &Ordering) -> bool {
        if interesting.len() < candidate.len() {
            return false;
        }
        let cand = candidate.elements();
        let inter = interesting.elements();
        let mut i = 0;
        let mut j = 0;
        while i < cand.len() || j < inter.len() {
            if cand.len() - i > inter.len() - j {
                // Excess items at the end; give up.
                return false;
            }

            let needed_item = self.items[inter[j].term].canonical_item;
            if i < cand.len()
                && self.items[cand[i].term].canonical_item == needed_item
                && cand[i].direction == inter[j].direction
            {
                i += 1;
                j += 1;
                continue;
            }

            if self.items[needed_item].can_be_added_by_fd {
                // Missing, but could be generated; skip it.
                j += 1;
                continue;
            }

            return false;
        }
        true
    }

    fn subset_matches(&self, candidate: &Ordering, interesting: &Ordering) -> bool {
        // Converting to (or growing) the grouping takes all of the
        // candidate's elements, so each must match a distinct grouping
        // element by equivalence class...
        let mut matched = vec![false; interesting.len()];
        for element in candidate.elements() {
            let canonical = self.items[element.term].canonical_item;
            let position = interesting.elements().iter().enumerate().position(|(k, e)| {
                !matched[k] && self.items[e.term].canonical_item == canonical
            });
            match position {
                Some(k) => matched[k] = true,
                None => return false,
            }
        }
        // ...and the grouping elements not yet present must be producible
        // by FDs.
        matched
            .iter()
            .zip(interesting.elements())
            .all(|(&m, e)| m || self.items[self.items[e.term].canonical_item].can_be_added_by_fd)
    }

    /// If a state with the given ordering exists, returns its index;
    /// otherwise adds an artificial state for it. Returns `None` when the
    /// state cap is reached.
    fn add_artificial_state(&mut self, ordering: &Ordering) -> Option<usize> {
        for i in 0..self.states.len() {
            if self.states[i].satisfied_ordering == *ordering {
                return Some(i);
            }
        }
        if self.states.len() >= MAX_NFSM_STATES {
            return None;
        }
        self.states.push(NfsmState {
            type_: NfsmStateType::Artificial,
            outgoing_edges: Vec::new(),
            satisfied_ordering: ordering.clone(),
            satisfied_ordering_idx: None,
            can_reach_interesting_order: 0,
            seen: 0,
        });
        Some(self.states.len() - 1)
    }

    fn add_nfsm_edge(&mut self, state_idx: usize, required_fd_idx: i32, ordering: &Ordering) {
        let Some(target_idx) = self.add_artificial_state(ordering) else {
            return;
        };
        if target_idx == state_idx {
            // Self-edges are implicit.
            return;
        }
        self.edges.push(NfsmEdge { required_fd_idx, state_idx: target_idx });
        let edge_idx = self.edges.len() - 1;
        self.states[state_idx].outgoing_edges.push(edge_idx);
    }

    /// Whether the (non-decay) FD applies to the ordering, and if so, the
    /// index of the last head-matched element. The tail may be inserted at
    /// any point after that index; an EQUIVALENCE FD may instead replace
    /// the element at that index. Head comparison accepts the FD's tail as
    /// a stand-in for the head for equivalences. Returns -1 for
    /// empty-headed FDs.
    fn functional_dependency_applies(
        &self,
        fd: &FunctionalDependency,
        ordering: &Ordering,
    ) -> Option<i32> {
        debug_assert!(fd.kind != FdKind::Decay);
        let mut start_point: i32 = -1;
        for &head_item in &fd.head {
            let mut matched = false;
            for (i, element) in ordering.elements().iter().enumerate() {
                if element.term == head_item
                    || (fd.kind == FdKind::Equivalence && element.term == fd.tail)
                {
                    start_point = start_point.max(i as i32);
                    matched = true;
                    break;
                }
            }
            if !matched {
                return None;
            }
        }
        Some(start_point)
    }

    fn try_adding_order_with_element_inserted(
        &mut self,
        state_idx: usize,
        fd_idx: usize,
        old_ordering: &Ordering,
        start_point: usize,
        item_to_add: TermHandle,
        direction: Direction,
    ) {
        if old_ordering.len() >= self.longest_ordering {
            return;
        }

        for add_pos in start_point..=old_ordering.len() {
            let mut elements = old_ordering.elements().to_vec();
            elements.insert(add_pos, OrderingElement { term: item_to_add, direction });
            let mut new_ordering = Ordering::new(
                if old_ordering.is_empty() { OrderingKind::Order } else { old_ordering.kind() },
                elements,
            );
            new_ordering.deduplicate();

            if self.could_become_interesting_ordering(&new_ordering) {
                self.add_nfsm_edge(state_idx, fd_idx as i32, &new_ordering);
            }
        }
    }

    /// Builds a grouping candidate from a set of elements and proposes an
    /// NFSM edge to it.
    fn try_adding_grouping(&mut self, state_idx: usize, fd_idx: i32, elements: Vec<OrderingElement>) {
        if elements.len() > self.longest_ordering {
            return;
        }
        let mut elements: Vec<OrderingElement> = elements
            .into_iter()
            .map(|e| OrderingElement::grouped(e.term))
            .collect();
        elements.sort_by_key(|e| self.grouping_sort_key(e));
        let mut grouping = Ordering::new(OrderingKind::Group, elements);
        grouping.deduplicate();
        if grouping.is_empty() {
            return;
        }
        if self.could_become_interesting_ordering(&grouping) {
            self.add_nfsm_edge(state_idx, fd_idx, &grouping);
        }
    }

    fn build_nfsm(&mut self) {
        let has_groupings = self.orderings.iter().any(|o| o.ordering.is_grouping());

        // One state per registered ordering (index 0, the empty ordering,
        // doubles as the initial state).
        for i in 0..self.orderings.len() {
            let type_ = if self.orderings[i].type_ == OrderingType::Interesting {
                NfsmStateType::Interesting
            } else {
                NfsmStateType::Artificial
            };
            self.states.push(NfsmState {
                type_,
                outgoing_edges: Vec::new(),
                satisfied_ordering: self.orderings[i].ordering.clone(),
                satisfied_ordering_idx: Some(i),
                can_reach_interesting_order: 0,
                seen: 0,
            });
        }

        // Constructor edges: the only way to _set_ an ordering, e.g. by
        // explicitly sorting. Labeled with negative pseudo-FD indexes.
        for i in 1..self.orderings.len() {
            self.edges.push(NfsmEdge {
                required_fd_idx: CONSTRUCTOR_FD_BASE + i as i32,
                state_idx: i,
            });
            let edge_idx = self.edges.len() - 1;
            self.states[0].outgoing_edges.push(edge_idx);
        }

        // Add FD edges in a breadth-first manner; the state array expands
        // as we go.
        let mut state_idx = 0;
        while state_idx < self.states.len() {
            let ordering = self.states[state_idx].satisfied_ordering.clone();

            if ordering.is_grouping() {
                self.add_group_edges(state_idx, &ordering);
            } else {
                self.add_order_edges(state_idx, &ordering, has_groupings);
            }
            state_idx += 1;
        }
    }

    fn add_order_edges(&mut self, state_idx: usize, ordering: &Ordering, has_groupings: bool) {
        // The decay FD drops the last element. A nondeterministic tail may
        // not be shed: the shorter ordering would allow plans that
        // evaluate the nondeterministic expression at a different point
        // than the sort that produced it.
        if ordering.len() > 1 {
            let last = ordering.elements()[ordering.len() - 1];
            if !self.items[last.term].term.nondeterministic {
                self.add_nfsm_edge(state_idx, 0, &ordering.without_last());
            }
        }

        // An ordering is also a grouping over the same elements.
        if has_groupings && !ordering.is_empty() {
            self.try_adding_grouping(state_idx, 0, ordering.elements().to_vec());
        }

        for fd_idx in 1..self.fds.len() {
            let fd = self.fds[fd_idx].clone();
            let mut old_ordering = ordering.clone();
            let Some(start_point) = self.functional_dependency_applies(&fd, &old_ordering) else {
                continue;
            };
            let mut item_to_add = fd.tail;

            if fd.kind == FdKind::Equivalence {
                // On a = b, try replacing a with b (or b with a).
                let mut other_item = fd.head[0];
                let mut new_elements = old_ordering.elements().to_vec();
                if new_elements[start_point as usize].term == item_to_add {
                    // The tail was the one present, so the head is what
                    // gets substituted in.
                    std::mem::swap(&mut item_to_add, &mut other_item);
                }
                new_elements[start_point as usize].term = item_to_add; // Keep the direction.
                let mut new_ordering = Ordering::new(old_ordering.kind(), new_elements);
                new_ordering.deduplicate();
                if self.could_become_interesting_ordering(&new_ordering) {
                    self.add_nfsm_edge(state_idx, fd_idx as i32, &new_ordering);
                }

                // The replaced item can be added back anywhere after this
                // point (order abc with b = d gives adc, then adbc/adcb),
                // and we also fall through to adding the tail without
                // replacement.
                old_ordering = new_ordering;
                item_to_add = other_item;
            }

            // On S → t, try adding t anywhere after the last element of S,
            // in each direction that some ordering wants.
            let canonical = self.items[item_to_add].canonical_item;
            let add_asc = self.items[canonical].used_asc;
            let add_desc = self.items[canonical].used_desc;
            let insert_from = (start_point + 1) as usize;
            if add_asc {
                self.try_adding_order_with_element_inserted(
                    state_idx,
                    fd_idx,
                    &old_ordering,
                    insert_from,
                    item_to_add,
                    Direction::Asc,
                );
            }
            if add_desc {
                self.try_adding_order_with_element_inserted(
                    state_idx,
                    fd_idx,
                    &old_ordering,
                    insert_from,
                    item_to_add,
                    Direction::Desc,
                );
            }
        }
    }

    fn add_group_edges(&mut self, state_idx: usize, grouping: &Ordering) {
        // Groupings never decay (being grouped on {a, b} does not imply
        // being grouped on {a}) and never turn back into orderings; FDs
        // only ever grow or rewrite them.
        for fd_idx in 1..self.fds.len() {
            let fd = self.fds[fd_idx].clone();
            let contains =
                |item: TermHandle| grouping.elements().iter().any(|e| e.term == item);
            let applies = fd.head.iter().all(|&h| {
                contains(h) || (fd.kind == FdKind::Equivalence && contains(fd.tail))
            });
            if !applies {
                continue;
            }

            match fd.kind {
                FdKind::Decay => {}
                FdKind::Fd => {
                    if !contains(fd.tail) {
                        let mut elements = grouping.elements().to_vec();
                        elements.push(OrderingElement::grouped(fd.tail));
                        self.try_adding_grouping(state_idx, fd_idx as i32, elements);
                    }
                }
                FdKind::Equivalence => {
                    let head = fd.head[0];
                    let (present, absent) = if contains(head) && !contains(fd.tail) {
                        (head, fd.tail)
                    } else if contains(fd.tail) && !contains(head) {
                        (fd.tail, head)
                    } else {
                        continue;
                    };

                    // Replacement: swap the present member for the absent
                    // one.
                    let replaced: Vec<OrderingElement> = grouping
                        .elements()
                        .iter()
                        .map(|e| {
                            if e.term == present {
                                OrderingElement::grouped(absent)
                            } else {
                                *e
                            }
                        })
                        .collect();
                    self.try_adding_grouping(state_idx, fd_idx as i32, replaced);

                    // Growth: both members in the grouping.
                    let mut grown = grouping.elements().to_vec();
                    grown.push(OrderingElement::grouped(absent));
                    self.try_adding_grouping(state_idx, fd_idx as i32, grown);
                }
            }
        }
    }

    /// Prunes irrelevant NFSM states; worth real effort, since NFSM size
    /// can explode the DFSM. Computes the transitive closure
    /// (Floyd-Warshall, O(n³) with a low constant; n is small after the
    /// state cap), then iterates the pruning heuristics to a fixpoint.
    /// Also fills in `can_reach_interesting_order` for each state.
    fn prune_nfsm(&mut self) {
        let n = self.states.len();
        let mut reachable = vec![false; n * n];

        let mut pruned_anything = true;
        while pruned_anything {
            pruned_anything = false;
            reachable.iter_mut().for_each(|r| *r = false);

            for i in 0..n {
                if self.states[i].type_ == NfsmStateType::Deleted {
                    continue;
                }
                // There is always an implicit self-edge.
                reachable[i * n + i] = true;
                for &edge_idx in &self.states[i].outgoing_edges {
                    reachable[i * n + self.edges[edge_idx].state_idx] = true;
                }
            }

            for k in 0..n {
                for i in 0..n {
                    if !reachable[i * n + k] {
                        continue;
                    }
                    for j in 0..n {
                        reachable[i * n + j] |= reachable[k * n + j];
                    }
                }
            }

            // Remove artificial states that are unreachable from the
            // initial state, or that cannot reach any interesting order.
            for i in 1..n {
                if self.states[i].type_ != NfsmStateType::Artificial {
                    continue;
                }

                if !reachable[i] {
                    self.states[i].type_ = NfsmStateType::Deleted;
                    pruned_anything = true;
                    continue;
                }

                let can_reach_interesting = (1..self.orderings.len()).any(|j| {
                    reachable[i * n + j] && self.states[j].type_ == NfsmStateType::Interesting
                });
                if !can_reach_interesting {
                    self.states[i].type_ = NfsmStateType::Deleted;
                    pruned_anything = true;
                }
            }

            // For each producing order, remove edges to states that can
            // reach no _other_ interesting order; this often dislodges
            // such states from the graph entirely, letting a later
            // iteration delete them.
            for i in 1..self.orderings.len() {
                let mut j = 0;
                while j < self.states[i].outgoing_edges.len() {
                    let next_state_idx =
                        self.edges[self.states[i].outgoing_edges[j]].state_idx;
                    let can_reach_other_interesting = (1..self.orderings.len()).any(|k| {
                        k != i
                            && self.states[k].type_ == NfsmStateType::Interesting
                            && reachable[next_state_idx * n + k]
                    });
                    if !can_reach_other_interesting {
                        self.states[i].outgoing_edges.swap_remove(j);
                        pruned_anything = true;
                    } else {
                        j += 1;
                    }
                }
            }

            // Drop edges into deleted states.
            for i in 0..n {
                if self.states[i].type_ == NfsmStateType::Deleted {
                    continue;
                }
                let kept: Vec<usize> = self.states[i]
                    .outgoing_edges
                    .iter()
                    .copied()
                    .filter(|&edge_idx| {
                        self.states[self.edges[edge_idx].state_idx].type_
                            != NfsmStateType::Deleted
                    })
                    .collect();
                self.states[i].outgoing_edges = kept;
            }
        }

        // Record which interesting orders each surviving state can reach.
        for order_idx in 0..self.orderings.len().min(MAX_SUPPORTED_ORDERINGS) {
            if self.orderings[order_idx].type_ != OrderingType::Interesting {
                continue;
            }
            for i in 0..n {
                if self.states[i].type_ == NfsmStateType::Deleted {
                    continue;
                }
                if reachable[i * n + order_idx] {
                    self.states[i].can_reach_interesting_order |= 1u64 << order_idx;
                }
            }
        }
    }

    fn always_active_fd(&self, fd_idx: i32) -> bool {
        // Includes the ϵ (decay) edge; excludes constructor pseudo-edges.
        fd_idx >= 0 && self.fds[fd_idx as usize].always_active
    }

    /// Expands a set of NFSM states along ϵ-edges, always-active FDs, and
    /// one extra allowed FD, breadth-first. Deduplication uses a
    /// generational counter on the states so nothing needs clearing.
    fn expand_through_always_active_fds(
        &mut self,
        nfsm_states: &mut Vec<usize>,
        generation: &mut u32,
        extra_allowed_fd_idx: i32,
    ) {
        *generation += 1;
        let generation = *generation;
        let mut i = 0;
        while i < nfsm_states.len() {
            let state_idx = nfsm_states[i];
            for edge_pos in 0..self.states[state_idx].outgoing_edges.len() {
                let edge = self.edges[self.states[state_idx].outgoing_edges[edge_pos]];
                if (self.always_active_fd(edge.required_fd_idx)
                    || edge.required_fd_idx == extra_allowed_fd_idx)
                    && self.states[edge.state_idx].seen != generation
                {
                    nfsm_states.push(edge.state_idx);
                    self.states[edge.state_idx].seen = generation;
                }
            }
            i += 1;
        }
    }

    fn finalize_dfsm_state(&mut self, state_idx: usize) {
        let mut follows = 0u64;
        let mut can_reach = 0u64;
        for nfsm_idx in self.dfsm_states[state_idx].nfsm_states.clone() {
            let state = &self.states[nfsm_idx];
            if state.type_ == NfsmStateType::Interesting {
                if let Some(ordering_idx) = state.satisfied_ordering_idx {
                    if ordering_idx < MAX_SUPPORTED_ORDERINGS
                        && self.orderings[ordering_idx].type_ == OrderingType::Interesting
                    {
                        follows |= 1u64 << ordering_idx;
                    }
                }
            }
            can_reach |= state.can_reach_interesting_order;
        }
        let num_fds = self.fds.len();
        let dfsm_state = &mut self.dfsm_states[state_idx];
        dfsm_state.follows_interesting_order = follows;
        dfsm_state.can_reach_interesting_order = can_reach;
        dfsm_state.next_state = vec![state_idx; num_fds];
    }

    /// Converts the NFSM to an equivalent DFSM by the powerset
    /// construction (as for NFAs; the difference is that instead of
    /// accepting states, each DFSM state records which interesting orders
    /// its constituent NFSM states satisfy).
    ///
    /// A DFSM state represents the set of NFSM states we could be in.
    /// When forming one, states reachable through always-active FDs (the ϵ
    /// decay edge included) are folded in, so fewer arcs need following at
    /// runtime; those FDs are ignored when forming edge labels. In theory
    /// 2ⁿ states are possible, but orderings generally only grow, so in
    /// practice the count stays modest; states are only created as
    /// actually reached from the initial state.
    fn convert_nfsm_to_dfsm(&mut self) {
        let mut generation: u32 = 0;

        // The initial DFSM state: the initial NFSM state plus everything
        // always-active from it.
        let mut initial_states = vec![0usize];
        self.expand_through_always_active_fds(&mut initial_states, &mut generation, 0);
        self.dfsm_states.push(DfsmState { nfsm_states: initial_states, ..Default::default() });
        self.finalize_dfsm_state(0);

        // Reachability from finalize includes what the constructor edges
        // can reach, which is misleading for the initial state; clear it.
        // (This can cause too little pruning downstream, never too much.)
        self.dfsm_states[0].can_reach_interesting_order = 0;

        let mut dfsm_state_idx = 0;
        while dfsm_state_idx < self.dfsm_states.len() {
            // The union of all outgoing edges of the constituent states,
            // always-active FDs excluded (they are baked into the states
            // themselves). Sorted by FD first, since states are created
            // per FD group.
            let constituents = self.dfsm_states[dfsm_state_idx].nfsm_states.clone();
            let mut nfsm_edges: Vec<NfsmEdge> = Vec::new();
            for &nfsm_state_idx in &constituents {
                for &edge_idx in &self.states[nfsm_state_idx].outgoing_edges {
                    let edge = self.edges[edge_idx];
                    if !self.always_active_fd(edge.required_fd_idx) {
                        nfsm_edges.push(edge);
                    }
                }
            }
            nfsm_edges.sort_by_key(|e| (e.required_fd_idx, e.state_idx));
            nfsm_edges.dedup();

            let mut nfsm_states: Vec<usize> = Vec::new();
            for edge_idx in 0..nfsm_edges.len() {
                nfsm_states.push(nfsm_edges[edge_idx].state_idx);

                // Keep collecting until the FD group ends.
                if edge_idx != nfsm_edges.len() - 1
                    && nfsm_edges[edge_idx].required_fd_idx
                        == nfsm_edges[edge_idx + 1].required_fd_idx
                {
                    continue;
                }
                let required_fd_idx = nfsm_edges[edge_idx].required_fd_idx;

                // Implicit self-edges: we also stay in every state we were
                // in (except the initial one).
                for &nfsm_state_idx in &constituents {
                    if nfsm_state_idx != 0 {
                        nfsm_states.push(nfsm_state_idx);
                    }
                }

                // Close over ϵ-edges and always-active FDs; new edges for
                // the same FD may appear along the way and are followed
                // too.
                self.expand_through_always_active_fds(
                    &mut nfsm_states,
                    &mut generation,
                    required_fd_idx,
                );

                // Canonicalize.
                nfsm_states.sort_unstable();
                nfsm_states.dedup();

                // Find or create the DFSM state for this set.
                let target_dfsm_state_idx = match self
                    .dfsm_states
                    .iter()
                    .position(|s| s.nfsm_states == nfsm_states)
                {
                    Some(idx) => idx,
                    None => {
                        self.dfsm_states.push(DfsmState {
                            nfsm_states: std::mem::take(&mut nfsm_states),
                            ..Default::default()
                        });
                        let new_idx = self.dfsm_states.len() - 1;
                        self.finalize_dfsm_state(new_idx);
                        new_idx
                    }
                };

                // Add the DFSM edge, self-edges excepted (implicit).
                if target_dfsm_state_idx != dfsm_state_idx {
                    self.dfsm_edges.push(DfsmEdge {
                        required_fd_idx,
                        state_idx: target_dfsm_state_idx,
                    });
                    let new_edge_idx = self.dfsm_edges.len() - 1;
                    let dfsm_state = &mut self.dfsm_states[dfsm_state_idx];
                    dfsm_state.outgoing_edges.push(new_edge_idx);
                    if required_fd_idx >= 0 {
                        dfsm_state.next_state[required_fd_idx as usize] =
                            target_dfsm_state_idx;
                        if required_fd_idx >= 1
                            && required_fd_idx <= MAX_SUPPORTED_FDS as i32
                        {
                            dfsm_state.can_use_fd |= 1u64 << (required_fd_idx - 1);
                        }
                    }
                }

                nfsm_states.clear();
            }

            dfsm_state_idx += 1;
        }
    }

    /// Records, for each ordering, the DFSM state its constructor edge
    /// leads to (the state entered when explicitly producing it).
    fn find_initial_states_for_ordering(&mut self) {
        for edge_pos in 0..self.dfsm_states[0].outgoing_edges.len() {
            let edge = self.dfsm_edges[self.dfsm_states[0].outgoing_edges[edge_pos]];
            if edge.required_fd_idx < 0 {
                let ordering_idx = (edge.required_fd_idx - CONSTRUCTOR_FD_BASE) as usize;
                self.orderings[ordering_idx].state_idx = edge.state_idx;
            }
        }
    }
}
