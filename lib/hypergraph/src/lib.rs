//! Join hypergraph structure and subgraph enumeration.
//!
//! A hypergraph in this context is an undirected graph of nodes and
//! hyperedges, where each side of an edge can hold more than one node. In a
//! graph with nodes {A, B, C, D}, a regular edge could be (A, B), while a
//! hyperedge such as ({A, C}, B) is also allowed. Inner joins give rise to
//! regular edges; outer joins, antijoins and hyper-predicates such as
//! `t1.a + t2.b = t3.c` become hyperedges that constrain the allowed join
//! orders.
//!
//! The main consumer of [`Hypergraph`] is the DPhyp enumeration in
//! [`enumeration`]; the [`cycle_finder`] module carries the incremental
//! DAG used by graph simplification to keep forced join orders acyclic.

pub mod cycle_finder;
pub mod enumeration;
mod hypergraph;

pub use cycle_finder::OnlineCycleFinder;
pub use enumeration::{enumerate_all_connected_partitions, Receiver};
pub use hypergraph::{Hyperedge, Hypergraph, Node};
