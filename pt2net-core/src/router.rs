//! Schedule router family: mode-restricted least-cost routing between
//! link endpoints, with an optional shape-bias decorator and a deterministic
//! tie-break for reproducible output.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, RwLock};

use ahash::HashMap;

use crate::config::{MapperConfig, TravelCostType};
use crate::ids::{LinkId, NodeId};
use crate::model::shape::Shape;
use crate::model::{Mode, Network};

/// Per-link travel cost under a chosen policy.
pub trait CostPolicy: Send + Sync {
    fn link_cost(&self, network: &Network, link: LinkId) -> f64;
}

pub struct LinkLengthCost;

impl CostPolicy for LinkLengthCost {
    fn link_cost(&self, network: &Network, link: LinkId) -> f64 {
        network.link(link).length
    }
}

pub struct TravelTimeCost;

impl CostPolicy for TravelTimeCost {
    fn link_cost(&self, network: &Network, link: LinkId) -> f64 {
        network.link(link).travel_time()
    }
}

/// Multiplies a base cost by a penalty that grows with the link's distance
/// from a route's intended shape, capped at `ceiling`. Links within
/// `tolerance` of the shape are unpenalized.
pub struct ShapeBiasedCost<'s> {
    base: Box<dyn CostPolicy>,
    shape: &'s Shape,
    tolerance: f64,
    ceiling: f64,
}

impl<'s> ShapeBiasedCost<'s> {
    #[must_use]
    pub fn new(base: Box<dyn CostPolicy>, shape: &'s Shape, tolerance: f64, ceiling: f64) -> Self {
        Self { base, shape, tolerance, ceiling }
    }
}

impl CostPolicy for ShapeBiasedCost<'_> {
    fn link_cost(&self, network: &Network, link: LinkId) -> f64 {
        let base = self.base.link_cost(network, link);
        let record = network.link(link);
        let from = network.node(record.from_node).coord;
        let to = network.node(record.to_node).coord;
        let midpoint = geo::Point::new((from.x() + to.x()) / 2.0, (from.y() + to.y()) / 2.0);
        let distance = self.shape.distance_to(midpoint);
        if distance <= self.tolerance {
            return base;
        }
        let factor = (1.0 + (distance - self.tolerance) / self.tolerance.max(1.0)).min(self.ceiling);
        base * factor
    }
}

/// Builds the shape-agnostic base cost policy for a config's travel cost
/// type.
#[must_use]
pub fn base_cost_policy(config: &MapperConfig) -> Box<dyn CostPolicy> {
    match config.travel_cost_type {
        TravelCostType::LinkLength => Box::new(LinkLengthCost),
        TravelCostType::TravelTime => Box::new(TravelTimeCost),
    }
}

#[derive(Clone)]
struct ShortestTree {
    dist: HashMap<NodeId, f64>,
    prev_link: HashMap<NodeId, LinkId>,
}

#[derive(Clone, Copy)]
struct HeapEntry {
    cost: f64,
    node: NodeId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.node == other.node
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the smallest cost first.
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}

/// The result of routing between two link endpoints: total cost plus the
/// interior links strictly between them (excluding the two endpoint links
/// themselves).
#[derive(Clone, Debug)]
pub struct RouteLeg {
    pub cost: f64,
    pub interior_links: Vec<LinkId>,
}

/// A mode-restricted router over one network, scoped to a single route's
/// pseudo-graph construction. Caches one shortest-path tree per distinct
/// source node queried so far, behind a single lock — contention is low
/// since each mode gets its own router and cache.
pub struct Router<'a> {
    network: &'a Network,
    allowed_modes: ahash::HashSet<Mode>,
    cost: Box<dyn CostPolicy + 'a>,
    cache: RwLock<HashMap<NodeId, Arc<ShortestTree>>>,
}

impl<'a> Router<'a> {
    #[must_use]
    pub fn new(
        network: &'a Network,
        allowed_modes: ahash::HashSet<Mode>,
        cost: Box<dyn CostPolicy + 'a>,
    ) -> Self {
        Self {
            network,
            allowed_modes,
            cost,
            cache: RwLock::new(HashMap::default()),
        }
    }

    fn link_allowed(&self, link: LinkId) -> bool {
        self.network.link(link).modes.iter().any(|m| self.allowed_modes.contains(m))
    }

    fn tree_from(&self, source: NodeId) -> Arc<ShortestTree> {
        if let Some(tree) = self.cache.read().expect("router cache poisoned").get(&source) {
            return tree.clone();
        }
        let tree = Arc::new(self.dijkstra(source));
        self.cache
            .write()
            .expect("router cache poisoned")
            .entry(source)
            .or_insert(tree)
            .clone()
    }

    fn dijkstra(&self, source: NodeId) -> ShortestTree {
        let mut dist: HashMap<NodeId, f64> = HashMap::default();
        let mut prev_link: HashMap<NodeId, LinkId> = HashMap::default();
        let mut heap = BinaryHeap::new();

        dist.insert(source, 0.0);
        heap.push(HeapEntry { cost: 0.0, node: source });

        while let Some(HeapEntry { cost, node }) = heap.pop() {
            if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
                continue;
            }
            let mut outgoing: Vec<LinkId> =
                self.network.outgoing_links(node).filter(|l| self.link_allowed(*l)).collect();
            outgoing.sort_by(|a, b| self.network.link_interner().lexicographic_order(*a, *b));

            for link in outgoing {
                let record = self.network.link(link);
                let next_cost = cost + self.cost.link_cost(self.network, link);
                let better = next_cost < *dist.get(&record.to_node).unwrap_or(&f64::INFINITY);
                if better {
                    dist.insert(record.to_node, next_cost);
                    prev_link.insert(record.to_node, link);
                    heap.push(HeapEntry { cost: next_cost, node: record.to_node });
                }
            }
        }

        ShortestTree { dist, prev_link }
    }

    /// Least-cost route from `src_link`'s end node to `dst_link`'s start
    /// node. `None` if `dst_link` is unreachable under this router's mode
    /// restriction.
    #[must_use]
    pub fn least_cost(&self, src_link: LinkId, dst_link: LinkId) -> Option<RouteLeg> {
        let src_node = self.network.link(src_link).to_node;
        let dst_node = self.network.link(dst_link).from_node;
        if src_node == dst_node {
            return Some(RouteLeg { cost: 0.0, interior_links: Vec::new() });
        }
        let tree = self.tree_from(src_node);
        let cost = *tree.dist.get(&dst_node)?;

        let mut links = Vec::new();
        let mut cursor = dst_node;
        while cursor != src_node {
            let link = *tree.prev_link.get(&cursor)?;
            links.push(link);
            cursor = self.network.link(link).from_node;
        }
        links.reverse();
        Some(RouteLeg { cost, interior_links: links })
    }
}
