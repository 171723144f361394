//! Spatial index over network link segments, used by the candidate
//! generator to find links near a stop.
//!
//! `rstar`'s `RTree` needs a type implementing `RTreeObject`/`PointDistance`.
//! The query target here is a *segment* (stop-to-link distance, not
//! stop-to-node distance), so the `RTreeObject` + `PointDistance` pair is
//! implemented directly against each link's endpoints.

use geo::Point;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::ids::LinkId;
use crate::model::Network;

#[derive(Clone, Copy, Debug)]
pub(crate) struct LinkSegment {
    pub link_id: LinkId,
    from: [f64; 2],
    to: [f64; 2],
}

impl RTreeObject for LinkSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.from, self.to)
    }
}

impl PointDistance for LinkSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        squared_distance_to_segment(self.from, self.to, *point)
    }
}

/// Squared Euclidean distance from `point` to the segment `from`-`to`.
fn squared_distance_to_segment(from: [f64; 2], to: [f64; 2], point: [f64; 2]) -> f64 {
    let (dx, dy) = (to[0] - from[0], to[1] - from[1]);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f64::EPSILON {
        0.0
    } else {
        (((point[0] - from[0]) * dx) + ((point[1] - from[1]) * dy)) / len_sq
    }
    .clamp(0.0, 1.0);

    let proj_x = from[0] + t * dx;
    let proj_y = from[1] + t * dy;
    let (ex, ey) = (point[0] - proj_x, point[1] - proj_y);
    ex * ex + ey * ey
}

/// Spatial index over a network's links, rebuilt once per batch (the
/// network is read-only during the parallel solve phase).
pub struct LinkSpatialIndex {
    tree: RTree<LinkSegment>,
}

impl LinkSpatialIndex {
    #[must_use]
    pub fn build(network: &Network, allow_loops: bool) -> Self {
        let entries: Vec<LinkSegment> = network
            .links()
            .filter(|link| allow_loops || !link.is_loop())
            .map(|link| {
                let from = network.node(link.from_node).coord;
                let to = network.node(link.to_node).coord;
                LinkSegment {
                    link_id: link.id,
                    from: [from.x(), from.y()],
                    to: [to.x(), to.y()],
                }
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Links within `radius` of `point`, ascending by distance. Euclidean
    /// distance to the link's nearest point, matching the data model's
    /// `LinkCandidate.distance` definition.
    #[must_use]
    pub fn within_radius(&self, point: Point<f64>, radius: f64) -> Vec<(LinkId, f64)> {
        let query = [point.x(), point.y()];
        let radius_sq = radius * radius;
        let mut hits: Vec<(LinkId, f64)> = self
            .tree
            .locate_within_distance(query, radius_sq)
            .map(|seg| (seg.link_id, seg.distance_2(&query).sqrt()))
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mode, ModeSet};

    fn line_network() -> Network {
        let mut net = Network::new();
        let a = net.add_node("A", Point::new(0.0, 0.0));
        let b = net.add_node("B", Point::new(100.0, 0.0));
        net.add_link("AB", a, b, 100.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        net
    }

    #[test]
    fn finds_nearest_point_on_segment_not_just_endpoints() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let hits = index.within_radius(Point::new(50.0, 10.0), 50.0);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 10.0).abs() < 1e-9);
    }

    #[test]
    fn excludes_links_outside_radius() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        assert!(index.within_radius(Point::new(50.0, 1000.0), 50.0).is_empty());
    }
}
