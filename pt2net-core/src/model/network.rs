//! The multi-modal network: nodes, links and the permitted-mode sets that
//! restrict which routes may traverse which links.

use std::fmt;
use std::sync::Arc;

use ahash::HashSet;
use geo::Point;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::ids::{Interner, LinkId, LinkKind, NodeId, NodeKind};

/// Sentinel mode tag marking links synthesized by the candidate generator
/// for stops with no real coverage. No link in a finalized network may
/// carry this mode.
pub const ARTIFICIAL_MODE: &str = "artificial";

/// An interned travel mode tag (`"bus"`, `"rail"`, `"car"`, `"artificial"`,
/// …). The mode universe is open-ended and driven by configuration, so this
/// is a cheap string wrapper rather than a closed enum.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Mode(Arc<str>);

impl Mode {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_artificial(&self) -> bool {
        &*self.0 == ARTIFICIAL_MODE
    }
}

impl From<&str> for Mode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mode({})", self.0)
    }
}

/// The set of modes a link permits. Modes are append-only in effect: the
/// finalizer may strip the artificial sentinel, but nothing else ever
/// shrinks a link's mode set mid-pipeline.
#[derive(Clone, Debug, Default)]
pub struct ModeSet(HashSet<Mode>);

impl ModeSet {
    #[must_use]
    pub fn new() -> Self {
        Self(HashSet::default())
    }

    pub fn from_modes<I: IntoIterator<Item = Mode>>(modes: I) -> Self {
        Self(modes.into_iter().collect())
    }

    #[must_use]
    pub fn permits(&self, mode: &Mode) -> bool {
        self.0.contains(mode)
    }

    pub fn insert(&mut self, mode: Mode) -> bool {
        self.0.insert(mode)
    }

    pub fn remove(&mut self, mode: &Mode) -> bool {
        self.0.remove(mode)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct NodeRecord {
    pub id: NodeId,
    pub coord: Point<f64>,
}

#[derive(Clone, Debug)]
pub struct LinkRecord {
    pub id: LinkId,
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub length: f64,
    pub freespeed: f64,
    pub capacity: f64,
    pub modes: ModeSet,
    removed: bool,
}

impl LinkRecord {
    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.from_node == self.to_node
    }

    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Freespeed may only be raised, never lowered: repair biases towards
    /// the fastest schedule observed on this link, never slower than what
    /// the network already declared.
    pub fn raise_freespeed(&mut self, candidate: f64) {
        if candidate > self.freespeed {
            self.freespeed = candidate;
        }
    }

    /// Travel time to traverse this link at its current freespeed.
    #[must_use]
    pub fn travel_time(&self) -> f64 {
        if self.freespeed <= 0.0 {
            f64::INFINITY
        } else {
            self.length / self.freespeed
        }
    }
}

/// A directed multigraph of nodes and mode-tagged links. Structurally
/// backed by `petgraph`'s `DiGraph`, kept as an index-only skeleton
/// (`DiGraph<NodeId, LinkId>`) with the actual node/link payload held in
/// parallel `Vec`s — this avoids petgraph's swap-on-remove semantics for
/// edges, which would otherwise invalidate unrelated `LinkId -> EdgeIndex`
/// lookups whenever the finalizer prunes a link. Removed links are
/// tombstoned instead and simply excluded from iteration and output.
#[derive(Debug)]
pub struct Network {
    graph: DiGraph<NodeId, LinkId>,
    node_records: Vec<NodeRecord>,
    link_records: Vec<LinkRecord>,
    node_petgraph: Vec<NodeIndex>,
    node_interner: Interner<NodeKind>,
    link_interner: Interner<LinkKind>,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_records: Vec::new(),
            link_records: Vec::new(),
            node_petgraph: Vec::new(),
            node_interner: Interner::new(),
            link_interner: Interner::new(),
        }
    }

    pub fn add_node(&mut self, external_id: &str, coord: Point<f64>) -> NodeId {
        if let Some(existing) = self.node_interner.get(external_id) {
            return existing;
        }
        let id = self.node_interner.intern(external_id);
        debug_assert_eq!(id.index(), self.node_records.len());
        self.node_records.push(NodeRecord { id, coord });
        let petgraph_index = self.graph.add_node(id);
        self.node_petgraph.push(petgraph_index);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_link(
        &mut self,
        external_id: &str,
        from_node: NodeId,
        to_node: NodeId,
        length: f64,
        freespeed: f64,
        capacity: f64,
        modes: ModeSet,
    ) -> LinkId {
        let id = self.link_interner.intern(external_id);
        debug_assert_eq!(id.index(), self.link_records.len());
        self.link_records.push(LinkRecord {
            id,
            from_node,
            to_node,
            length,
            freespeed,
            capacity,
            modes,
            removed: false,
        });
        self.graph.add_edge(
            self.node_petgraph[from_node.index()],
            self.node_petgraph[to_node.index()],
            id,
        );
        id
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &NodeRecord {
        &self.node_records[id.index()]
    }

    #[must_use]
    pub fn link(&self, id: LinkId) -> &LinkRecord {
        &self.link_records[id.index()]
    }

    pub fn link_mut(&mut self, id: LinkId) -> &mut LinkRecord {
        &mut self.link_records[id.index()]
    }

    pub fn mark_link_removed(&mut self, id: LinkId) {
        self.link_records[id.index()].removed = true;
    }

    #[must_use]
    pub fn node_id_for(&self, external_id: &str) -> Option<NodeId> {
        self.node_interner.get(external_id)
    }

    #[must_use]
    pub fn link_id_for(&self, external_id: &str) -> Option<LinkId> {
        self.link_interner.get(external_id)
    }

    #[must_use]
    pub fn node_interner(&self) -> &Interner<NodeKind> {
        &self.node_interner
    }

    #[must_use]
    pub fn link_interner(&self) -> &Interner<LinkKind> {
        &self.link_interner
    }

    /// Outgoing links of `node` that have not been removed, in no
    /// particular order; callers needing determinism sort by id.
    pub fn outgoing_links(&self, node: NodeId) -> impl Iterator<Item = LinkId> + '_ {
        self.graph
            .edges(self.node_petgraph[node.index()])
            .map(|edge| *edge.weight())
            .filter(|id| !self.link_records[id.index()].removed)
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.link_records.iter().filter(|link| !link.removed)
    }

    /// All links including tombstoned ones, used by the finalizer itself
    /// to decide what to drop.
    pub fn all_links(&self) -> impl Iterator<Item = &LinkRecord> {
        self.link_records.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.node_records.iter()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_records.len()
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.link_records.iter().filter(|l| !l.removed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_network() -> Network {
        let mut net = Network::new();
        let a = net.add_node("A", Point::new(0.0, 0.0));
        let b = net.add_node("B", Point::new(100.0, 0.0));
        net.add_link(
            "AB",
            a,
            b,
            100.0,
            10.0,
            1000.0,
            ModeSet::from_modes([Mode::new("bus")]),
        );
        net
    }

    #[test]
    fn add_node_is_idempotent_by_external_id() {
        let mut net = Network::new();
        let a1 = net.add_node("A", Point::new(0.0, 0.0));
        let a2 = net.add_node("A", Point::new(0.0, 0.0));
        assert_eq!(a1, a2);
        assert_eq!(net.node_count(), 1);
    }

    #[test]
    fn freespeed_never_lowers() {
        let mut net = sample_network();
        let link_id = net.link_id_for("AB").unwrap();
        net.link_mut(link_id).raise_freespeed(5.0);
        assert!(approx::abs_diff_eq!(net.link(link_id).freespeed, 10.0));
        net.link_mut(link_id).raise_freespeed(20.0);
        assert!(approx::abs_diff_eq!(net.link(link_id).freespeed, 20.0));
    }

    #[test]
    fn removed_links_are_excluded_from_iteration() {
        let mut net = sample_network();
        let link_id = net.link_id_for("AB").unwrap();
        assert_eq!(net.link_count(), 1);
        net.mark_link_removed(link_id);
        assert_eq!(net.link_count(), 0);
        assert_eq!(net.all_links().count(), 1);
    }
}
