//! DPhyp: enumeration of connected subgraph / connected complement pairs.
//!
//! If the join structure of a query is expressed as a hypergraph, with
//! relations as nodes and join predicates as (hyper)edges, all legal join
//! orders without Cartesian products can be found by enumerating all
//! connected subpartitions of the hypergraph. The algorithm is described in
//! "Dynamic Programming Strikes Back" by Neumann and Moerkotte; an extended
//! version with a few corrections is in Moerkotte's "Building Query
//! Compilers". Some critical details are missing from both and are filled
//! in here. Rough outline:
//!
//!   1. Pick a seed node of the graph.
//!   2. Grow that seed along hyperedges, taking care never to make an
//!      unconnected graph or to see the same subgraph twice.
//!   3. For each connected subgraph (csg), repeat steps 1-2 independently
//!      to create a disjoint connected complement (cmp), and try to connect
//!      the two.
//!   4. Each connected csg-cmp pair is reported to the receiver; it is a
//!      valid subjoin that can be costed.
//!
//! The entry point is [`enumerate_all_connected_partitions`]. It is generic
//! over the receiver so that a pure counting receiver (used when probing
//! whether a graph needs simplification) pays no call overhead.

use hyperjoin_common::bitset::{
    bits_set_in, bits_set_in_descending, is_subset, isolate_lowest_bit, nonzero_subsets_of,
    overlaps, table_bitmap, tables_between, NodeMap,
};

use crate::hypergraph::Hypergraph;

/// Callbacks invoked by the enumeration. Any callback returning `true`
/// aborts the enumeration, which then also returns `true`.
pub trait Receiver {
    /// Called for each node, in descending index order, before any
    /// subgraph pair containing that node is reported.
    fn found_single_node(&mut self, node_idx: usize) -> bool;

    /// Called exactly once for each connected csg-cmp pair (left, right)
    /// connected through the logical edge `edge_idx`. Called `EmitCsgCmp`
    /// in the paper.
    fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> bool;

    /// Whether the given set has been seen as a connected set (a single
    /// node, or the union of an earlier csg-cmp pair). The enumeration
    /// uses this for its connectivity tests.
    fn has_seen(&self, subgraph: NodeMap) -> bool;
}

/// Formats a node set for debugging, e.g. `{R1,R3}`.
pub fn print_set(x: NodeMap) -> String {
    let mut ret = String::from("{");
    for (i, node_idx) in bits_set_in(x).enumerate() {
        if i != 0 {
            ret.push(',');
        }
        ret.push('R');
        ret.push_str(&(node_idx + 1).to_string());
    }
    ret.push('}');
    ret
}

/// One-element memo for neighborhood calculations.
///
/// [`find_neighborhood`] is often called many times with the same forbidden
/// set and subgraphs that keep growing; e.g. with the neighborhood
/// {R1,R2}, we need the neighborhoods of {R1}, {R2} and {R1,R2}, and the
/// latter can start from the result for {R1} and add {R2}. We cannot just
/// union two neighborhoods due to hyperedges, but we can reuse the start.
///
/// The cache refuses to store results whose `just_grown_by` includes the
/// "taboo bit" (the lowest bit of the parent neighborhood): the subset
/// enumeration alternates that bit every iteration, so a subset ending in
/// it can never seed the next one, and keeping the previous entry instead
/// preserves most of the reuse. Measurably critical on star and clique
/// graphs.
///
/// A cache must not be reused across different forbidden sets; that would
/// give wrong results.
pub(crate) struct NeighborhoodCache {
    taboo_bit: NodeMap,
    // !0 means "do not use the cache on the first iteration".
    last_just_grown_by: NodeMap,
    last_full_neighborhood: NodeMap,
    last_neighborhood: NodeMap,
}

impl NeighborhoodCache {
    pub(crate) fn new(neighborhood: NodeMap) -> Self {
        Self {
            taboo_bit: isolate_lowest_bit(neighborhood),
            last_just_grown_by: !0,
            last_full_neighborhood: 0,
            last_neighborhood: 0,
        }
    }

    /// Tells the cache a neighborhood search is about to start. If the
    /// cache can reduce the workload it updates the two neighborhoods, and
    /// either way returns the set of bits that still must be searched.
    #[inline]
    fn init_search(
        &self,
        just_grown_by: NodeMap,
        neighborhood: &mut NodeMap,
        full_neighborhood: &mut NodeMap,
    ) -> NodeMap {
        if is_subset(self.last_just_grown_by, just_grown_by) {
            // Continue the search from the cached result.
            *full_neighborhood |= self.last_full_neighborhood;
            *neighborhood = self.last_neighborhood;
            just_grown_by & !self.last_just_grown_by
        } else {
            just_grown_by
        }
    }

    /// Offers a freshly computed neighborhood for storage.
    #[inline]
    fn store(&mut self, just_grown_by: NodeMap, neighborhood: NodeMap, full_neighborhood: NodeMap) {
        debug_assert!(is_subset(neighborhood, full_neighborhood));
        if overlaps(just_grown_by, self.taboo_bit) {
            return;
        }
        self.last_just_grown_by = just_grown_by;
        self.last_full_neighborhood = full_neighborhood;
        self.last_neighborhood = neighborhood;
    }
}

/// Finds the neighborhood of the subgraph `subgraph`: informally, the set
/// of nodes immediately reachable from it. Edges used to get there must not
/// touch the forbidden set. The DPhyp paper calls this N(S, X).
///
/// The returned set holds one representative node per reachable hypernode
/// (the lowest bit), since the subset enumeration can only enumerate
/// subsets of single nodes. Adding more nodes than needed to the
/// neighborhood affects only speed, never correctness, so subsumption of
/// hypernodes is only checked approximately: any hypernode overlapping the
/// running neighborhood is considered covered.
///
/// Only the nodes in `just_grown_by` can contribute new edges: every node
/// from the previous neighborhood has been added either to the subgraph or
/// to the forbidden set, and both exclude it from the new neighborhood.
///
/// The set of interesting hypernodes seen along the way (whether subsumed
/// or not) is ORed into `full_neighborhood`; only edges into that set can
/// ever connect the subgraph to a complement, which `try_connecting` uses
/// to cut its search space.
#[inline]
pub(crate) fn find_neighborhood(
    g: &Hypergraph,
    subgraph: NodeMap,
    forbidden: NodeMap,
    just_grown_by: NodeMap,
    cache: &mut NeighborhoodCache,
    full_neighborhood_arg: &mut NodeMap,
) -> NodeMap {
    debug_assert!(is_subset(just_grown_by, subgraph));

    let mut full_neighborhood = *full_neighborhood_arg;
    let mut neighborhood = 0;

    let to_search = cache.init_search(just_grown_by, &mut neighborhood, &mut full_neighborhood);
    debug_assert!(is_subset(neighborhood, full_neighborhood));

    for node_idx in bits_set_in(to_search) {
        // Simple edges. This node's simple neighborhood is folded into
        // full_neighborhood below; forbidden nodes are also removed below.
        neighborhood |= g.nodes[node_idx].simple_neighborhood;

        // Go through the complex edges and see which ones point out of the
        // subgraph.
        for &edge_idx in &g.nodes[node_idx].complex_edges {
            let e = g.edges[edge_idx];
            if is_subset(e.left, subgraph) && !overlaps(e.right, subgraph | forbidden) {
                // e.right is an interesting hypernode.
                full_neighborhood |= e.right;
                if !overlaps(e.right, neighborhood) {
                    // Not subsumed by an edge already seen, so add a
                    // representative node for it.
                    neighborhood |= isolate_lowest_bit(e.right);
                }
            }
        }
    }

    neighborhood &= !(subgraph | forbidden);
    full_neighborhood |= neighborhood;

    cache.store(just_grown_by, neighborhood, full_neighborhood);

    *full_neighborhood_arg = full_neighborhood;
    neighborhood
}

/// Given a connected subgraph and a connected complement, reports every
/// edge connecting them. (There may be several if the graph has cycles.)
///
/// Only nodes in the subgraph's full neighborhood need to be examined;
/// edges from elsewhere in the complement cannot touch the subgraph.
fn try_connecting<R: Receiver>(
    g: &Hypergraph,
    subgraph: NodeMap,
    subgraph_full_neighborhood: NodeMap,
    complement: NodeMap,
    receiver: &mut R,
) -> bool {
    for node_idx in bits_set_in(complement & subgraph_full_neighborhood) {
        // Simple edges.
        if overlaps(g.nodes[node_idx].simple_neighborhood, subgraph) {
            for &edge_idx in &g.nodes[node_idx].simple_edges {
                // The tests are really is_subset(), but overlaps() is
                // equivalent for single-node sides and slightly faster.
                let e = g.edges[edge_idx];
                if overlaps(e.right, subgraph) && overlaps(e.left, complement) {
                    if receiver.found_subgraph_pair(subgraph, complement, edge_idx / 2) {
                        return true;
                    }
                }
            }
        }

        // Complex edges.
        let node = table_bitmap(node_idx);
        for &edge_idx in &g.nodes[node_idx].complex_edges {
            let e = g.edges[edge_idx];

            // The lowest-bit test makes sure each edge is seen only once.
            if isolate_lowest_bit(e.left) == node
                && is_subset(e.left, complement)
                && is_subset(e.right, subgraph)
            {
                if receiver.found_subgraph_pair(subgraph, complement, edge_idx / 2) {
                    return true;
                }
            }
        }
    }
    false
}

/// Grows the given complement candidate recursively along its
/// neighborhood; each time the grown complement is connected, checks
/// whether it can be connected to the (fixed) subgraph, forming a csg-cmp
/// pair. Called `EnumerateCmpRec` in the paper.
fn expand_complement<R: Receiver>(
    g: &Hypergraph,
    lowest_node_idx: usize,
    subgraph: NodeMap,
    subgraph_full_neighborhood: NodeMap,
    complement: NodeMap,
    neighborhood: NodeMap,
    forbidden: NodeMap,
    receiver: &mut R,
) -> bool {
    debug_assert!(is_subset(subgraph, forbidden));
    debug_assert!(!is_subset(complement, forbidden));

    // Try growing the complement by all possible subsets of the
    // neighborhood. Unlike expand_subgraph(), a connected complement needs
    // no recursion of its own; we can connect it to the subgraph directly.
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown_complement = complement | grow_by;
        if receiver.has_seen(grown_complement) {
            if try_connecting(
                g,
                subgraph,
                subgraph_full_neighborhood,
                grown_complement,
                receiver,
            ) {
                return true;
            }
        }
    }

    // Grow the grown complements into larger, connected complements. This
    // happens even when a grown complement is not connected, since it may
    // become connected once more nodes join it. It must happen after all
    // the try_connecting() calls above, to guarantee smaller subgraphs are
    // seen before larger ones.
    let mut cache = NeighborhoodCache::new(neighborhood);
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown_complement = complement | grow_by;

        // Recursive calls may not add nodes from our current neighborhood;
        // all those combinations are tried at this level.
        let new_forbidden = (forbidden | neighborhood) & !grown_complement;
        debug_assert!(!is_subset(grown_complement, new_forbidden));

        let mut new_full_neighborhood = 0; // Unused; see try_connecting().
        let new_neighborhood = find_neighborhood(
            g,
            complement | grow_by,
            new_forbidden,
            grow_by,
            &mut cache,
            &mut new_full_neighborhood,
        );

        if expand_complement(
            g,
            lowest_node_idx,
            subgraph,
            subgraph_full_neighborhood,
            grown_complement,
            new_neighborhood,
            new_forbidden,
            receiver,
        ) {
            return true;
        }
    }
    false
}

/// Enumerates all complements to the given connected subgraph, by seeding
/// a complement from each neighborhood node (in descending index order)
/// and growing it. Called `EmitCsg` in the paper.
fn enumerate_complements_to<R: Receiver>(
    g: &Hypergraph,
    lowest_node_idx: usize,
    subgraph: NodeMap,
    full_neighborhood: NodeMap,
    mut neighborhood: NodeMap,
    receiver: &mut R,
) -> bool {
    let forbidden = tables_between(0, lowest_node_idx);

    neighborhood &= !subgraph;

    // Like the top-level enumeration, seeds are considered backwards so
    // that smaller subsets are enumerated before larger ones.
    let mut cache = NeighborhoodCache::new(neighborhood);
    for seed_idx in bits_set_in_descending(neighborhood) {
        // First consider a complement of just the seed node; find any
        // edges connecting it to the subgraph.
        let seed = table_bitmap(seed_idx);
        if overlaps(g.nodes[seed_idx].simple_neighborhood, subgraph) {
            for &edge_idx in &g.nodes[seed_idx].simple_edges {
                let e = g.edges[edge_idx];
                debug_assert_eq!(e.left, seed);
                if overlaps(e.right, subgraph) {
                    if receiver.found_subgraph_pair(subgraph, seed, edge_idx / 2) {
                        return true;
                    }
                }
            }
        }
        for &edge_idx in &g.nodes[seed_idx].complex_edges {
            let e = g.edges[edge_idx];
            if e.left == seed && is_subset(e.right, subgraph) {
                if receiver.found_subgraph_pair(subgraph, seed, edge_idx / 2) {
                    return true;
                }
            }
        }

        // Grow the seed along its neighborhood into a larger, connected
        // complement, even if the seed alone was not connected to the
        // subgraph; it may become connected as it grows.
        //
        // The forbidden set must include the lower-indexed part of the
        // neighborhood, or the same complement would be enumerated from
        // two different seeds. (The DPhyp paper misses this; the
        // "Building Query Compilers" version has it.)
        let new_forbidden =
            forbidden | subgraph | (neighborhood & tables_between(0, seed_idx));
        let mut new_full_neighborhood = 0; // Unused; see try_connecting().
        let new_neighborhood = find_neighborhood(
            g,
            seed,
            new_forbidden,
            seed,
            &mut cache,
            &mut new_full_neighborhood,
        );
        if expand_complement(
            g,
            lowest_node_idx,
            subgraph,
            full_neighborhood,
            seed,
            new_neighborhood,
            new_forbidden,
            receiver,
        ) {
            return true;
        }
    }
    false
}

/// Grows a subgraph recursively along its neighborhood. (The subgraph is
/// not necessarily connected, but may become so.) Each grown subgraph that
/// is connected is used as a base for complement enumeration before being
/// grown further. Called `EnumerateCsgRec` in the paper.
fn expand_subgraph<R: Receiver>(
    g: &Hypergraph,
    lowest_node_idx: usize,
    subgraph: NodeMap,
    full_neighborhood: NodeMap,
    neighborhood: NodeMap,
    forbidden: NodeMap,
    receiver: &mut R,
) -> bool {
    // Try growing the subgraph by every nonzero subset of the
    // neighborhood.
    let mut cache = NeighborhoodCache::new(neighborhood);
    for grow_by in nonzero_subsets_of(neighborhood) {
        // The candidate subgraphs that are connected have been seen
        // before as csg-cmp pairs, so the receiver knows them.
        let grown_subgraph = subgraph | grow_by;
        if receiver.has_seen(grown_subgraph) {
            let mut new_full_neighborhood = full_neighborhood;
            let mut new_neighborhood = find_neighborhood(
                g,
                subgraph | grow_by,
                forbidden,
                grow_by,
                &mut cache,
                &mut new_full_neighborhood,
            );

            // enumerate_complements_to() resets the forbidden set, since
            // nodes forbidden during subgraph growth may well be part of a
            // complement. The neighborhood just computed only looked at
            // recently added nodes, so re-add everything this level has
            // put into the forbidden set, plus our own neighborhood (not
            // yet folded into the forbidden set at this point).
            new_neighborhood |= forbidden & !tables_between(0, lowest_node_idx);
            new_neighborhood |= neighborhood;

            if enumerate_complements_to(
                g,
                lowest_node_idx,
                grown_subgraph,
                new_full_neighborhood,
                new_neighborhood,
                receiver,
            ) {
                return true;
            }
        }
    }

    // Now grow the grown subgraphs further, even the unconnected ones
    // (they may become connected). This must happen after all the
    // enumerate_complements_to() calls above so that every smaller
    // subgraph is presented before a larger one.
    for grow_by in nonzero_subsets_of(neighborhood) {
        let grown_subgraph = subgraph | grow_by;

        // Recursive calls may not add nodes from our current neighborhood;
        // all those combinations are tried at this level.
        let new_forbidden = (forbidden | neighborhood) & !grown_subgraph;
        debug_assert!(!is_subset(grown_subgraph, new_forbidden));

        let mut new_full_neighborhood = full_neighborhood;
        let new_neighborhood = find_neighborhood(
            g,
            subgraph | grow_by,
            new_forbidden,
            grow_by,
            &mut cache,
            &mut new_full_neighborhood,
        );

        if expand_subgraph(
            g,
            lowest_node_idx,
            grown_subgraph,
            new_full_neighborhood,
            new_neighborhood,
            new_forbidden,
            receiver,
        ) {
            return true;
        }
    }
    false
}

/// Runs DPhyp over the graph. Called `Solve` in the paper.
///
/// Seeds are consumed backwards: first only the last node, then the
/// second-to-last as a seed with everything after it allowed, and so on.
/// This gives the key enumeration order property: when a csg-cmp pair is
/// reported, every strict connected sub-split of its union has been
/// reported already.
///
/// Returns `true` as soon as any receiver callback returns `true`.
pub fn enumerate_all_connected_partitions<R: Receiver>(g: &Hypergraph, receiver: &mut R) -> bool {
    for seed_idx in (0..g.nodes.len()).rev() {
        if receiver.found_single_node(seed_idx) {
            return true;
        }

        let seed = table_bitmap(seed_idx);
        let forbidden = tables_between(0, seed_idx);
        let mut full_neighborhood = 0;
        let mut cache = NeighborhoodCache::new(0);
        let neighborhood =
            find_neighborhood(g, seed, forbidden, seed, &mut cache, &mut full_neighborhood);
        if enumerate_complements_to(
            g,
            seed_idx,
            seed,
            full_neighborhood,
            neighborhood,
            receiver,
        ) {
            return true;
        }
        if expand_subgraph(
            g,
            seed_idx,
            seed,
            full_neighborhood,
            neighborhood,
            forbidden | seed,
            receiver,
        ) {
            return true;
        }
    }
    false
}


#[cfg(test)]
mod reference_tests {
    //! Cross-checks the enumeration against a brute-force reference over
    //! small graphs: every csg-cmp pair must be reported exactly once per
    //! connecting edge, and nothing else.

    use super::*;
    use crate::hypergraph::Hypergraph;
    use rustc_hash::{FxHashMap, FxHashSet};

    struct RecordingReceiver {
        seen: FxHashSet<NodeMap>,
        pairs: Vec<(NodeMap, NodeMap, usize)>,
    }

    impl RecordingReceiver {
        fn new() -> Self {
            Self { seen: FxHashSet::default(), pairs: Vec::new() }
        }
    }

    impl Receiver for RecordingReceiver {
        fn found_single_node(&mut self, node_idx: usize) -> bool {
            self.seen.insert(table_bitmap(node_idx));
            false
        }

        fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> bool {
            self.pairs.push((left, right, edge_idx));
            self.seen.insert(left | right);
            false
        }

        fn has_seen(&self, subgraph: NodeMap) -> bool {
            self.seen.contains(&subgraph)
        }
    }

    /// A set is connected if it can be split into two connected halves
    /// joined by an edge with one side in each half.
    fn is_connected(g: &Hypergraph, set: NodeMap, memo: &mut FxHashMap<NodeMap, bool>) -> bool {
        if set.count_ones() <= 1 {
            return set != 0;
        }
        if let Some(&cached) = memo.get(&set) {
            return cached;
        }
        let lowest = isolate_lowest_bit(set);
        let mut connected = false;
        for left in nonzero_subsets_of(set) {
            if left == set || !overlaps(left, lowest) {
                continue;
            }
            let right = set & !left;
            if connecting_edges(g, left, right) > 0
                && is_connected(g, left, memo)
                && is_connected(g, right, memo)
            {
                connected = true;
                break;
            }
        }
        memo.insert(set, connected);
        connected
    }

    /// How many logical edges join the two (disjoint) sets.
    fn connecting_edges(g: &Hypergraph, left: NodeMap, right: NodeMap) -> usize {
        (0..g.edges.len() / 2)
            .filter(|&k| {
                let e = g.edges[2 * k];
                (is_subset(e.left, left) && is_subset(e.right, right))
                    || (is_subset(e.left, right) && is_subset(e.right, left))
            })
            .count()
    }

    /// Brute-force count of (unordered csg, cmp, edge) triples.
    fn reference_pair_count(g: &Hypergraph) -> usize {
        let n = g.nodes.len();
        let mut memo = FxHashMap::default();
        let mut count = 0;
        for left in 1u64..(1 << n) {
            for right in (left + 1)..(1 << n) {
                if overlaps(left, right) {
                    continue;
                }
                let edges = connecting_edges(g, left, right);
                if edges > 0
                    && is_connected(g, left, &mut memo)
                    && is_connected(g, right, &mut memo)
                {
                    count += edges;
                }
            }
        }
        count
    }

    fn check_against_reference(g: &Hypergraph) {
        let mut receiver = RecordingReceiver::new();
        assert!(!enumerate_all_connected_partitions(g, &mut receiver));

        // Exactly once per triple (unordered in the pair).
        let mut unordered: FxHashSet<(NodeMap, NodeMap, usize)> = FxHashSet::default();
        for &(left, right, edge_idx) in &receiver.pairs {
            assert_ne!(left, 0);
            assert_ne!(right, 0);
            assert_eq!(left & right, 0);
            let key = if left < right { (left, right, edge_idx) } else { (right, left, edge_idx) };
            assert!(unordered.insert(key), "pair {left:b}/{right:b} seen twice");

            // Both sides must really be connected, and the edge must
            // really connect them.
            let mut memo = FxHashMap::default();
            assert!(is_connected(g, left, &mut memo));
            assert!(is_connected(g, right, &mut memo));
            let e = g.edges[2 * edge_idx];
            assert!(
                (is_subset(e.left, left) && is_subset(e.right, right))
                    || (is_subset(e.left, right) && is_subset(e.right, left))
            );
        }

        assert_eq!(receiver.pairs.len(), reference_pair_count(g));
    }

    fn graph(num_nodes: usize, edges: &[(NodeMap, NodeMap)]) -> Hypergraph {
        let mut g = Hypergraph::new();
        for _ in 0..num_nodes {
            g.add_node();
        }
        for &(left, right) in edges {
            g.add_edge(left, right);
        }
        g
    }

    #[test]
    fn matches_reference_on_simple_shapes() {
        // Chain.
        check_against_reference(&graph(5, &[(0b1, 0b10), (0b10, 0b100), (0b100, 0b1000), (0b1000, 0b10000)]));
        // Star.
        check_against_reference(&graph(5, &[(0b1, 0b10), (0b1, 0b100), (0b1, 0b1000), (0b1, 0b10000)]));
        // Clique.
        check_against_reference(&graph(4, &[
            (0b1, 0b10), (0b1, 0b100), (0b1, 0b1000),
            (0b10, 0b100), (0b10, 0b1000), (0b100, 0b1000),
        ]));
    }

    #[test]
    fn matches_reference_on_hyperedges() {
        // An outer-join-style hyperedge.
        check_against_reference(&graph(3, &[(0b1, 0b10), (0b11, 0b100)]));
        // A cycle with a hyperedge hanging off it.
        check_against_reference(&graph(4, &[
            (0b1, 0b10), (0b10, 0b100), (0b1, 0b100), (0b101, 0b1000),
        ]));
        // Hypernodes on both sides.
        check_against_reference(&graph(5, &[
            (0b1, 0b10), (0b100, 0b1000), (0b11, 0b1100), (0b1100, 0b10000),
        ]));
    }

    #[test]
    fn matches_reference_on_parallel_edges() {
        // Two edges between the same nodes (loops in the graph); each is
        // reported separately.
        check_against_reference(&graph(3, &[(0b1, 0b10), (0b10, 0b100), (0b1, 0b100)]));
    }
}
