//! Pseudo-graph builder and solver: a layered DAG — SOURCE, one layer
//! of candidates per route stop, SINK — solved by a single forward sweep
//! since edges only ever connect consecutive layers.

use geo::Point;

use crate::candidates::{CandidateLink, LinkCandidate, ARTIFICIAL_CANDIDATE_PENALTY};
use crate::config::TravelCostType;
use crate::model::Network;
use crate::router::Router;

/// Assumed speed for the direct stop-to-stop cost used when a leg touches an
/// artificial candidate (no real network path to route against). Mirrors a
/// conservative walking speed, the same order of magnitude used to bridge an
/// otherwise-disconnected point to the routable graph.
const ARTIFICIAL_LINK_SPEED: f64 = 1.39;

#[derive(Debug)]
pub struct PseudoGraphResult {
    /// For each stop (by layer index), the index into that stop's candidate
    /// list chosen by the solver.
    pub per_stop_choice: Vec<usize>,
    pub total_cost: f64,
}

/// Cost of attaching a stop to one of its candidates. For a real link this
/// is the stop's snap distance to it, unless `use_candidate_distance` is
/// off (in which case every real candidate is equally free to attach and
/// the solver chooses purely on routing cost). An artificial candidate
/// always carries its fixed penalty regardless, since that penalty isn't a
/// distance measurement — it's what keeps the solver from reaching for a
/// synthetic link when a real one is available.
fn attachment_penalty(candidate: &LinkCandidate, use_candidate_distance: bool) -> f64 {
    match candidate.link {
        CandidateLink::Real(_) if use_candidate_distance => candidate.distance,
        CandidateLink::Real(_) => 0.0,
        CandidateLink::Artificial => ARTIFICIAL_CANDIDATE_PENALTY,
    }
}

fn direct_cost(a: Point<f64>, b: Point<f64>, cost_type: TravelCostType) -> f64 {
    let (dx, dy) = (a.x() - b.x(), a.y() - b.y());
    let distance = (dx * dx + dy * dy).sqrt();
    match cost_type {
        TravelCostType::LinkLength => distance,
        TravelCostType::TravelTime => distance / ARTIFICIAL_LINK_SPEED,
    }
}

/// Cost of the edge between two consecutive stops' candidates, or `None` if
/// the network offers no path between them at all. Same-link candidates
/// cost nothing to cross (the vehicle never leaves the link); either
/// candidate being artificial bypasses the router entirely, since an
/// artificial link isn't part of the routable graph.
fn routing_term(
    prev: &LinkCandidate,
    cur: &LinkCandidate,
    prev_coord: Point<f64>,
    cur_coord: Point<f64>,
    router: &Router,
    cost_type: TravelCostType,
) -> Option<f64> {
    match (prev.link, cur.link) {
        (CandidateLink::Real(a), CandidateLink::Real(b)) if a == b => Some(0.0),
        (CandidateLink::Real(a), CandidateLink::Real(b)) => router.least_cost(a, b).map(|leg| leg.cost),
        _ => Some(direct_cost(prev_coord, cur_coord, cost_type)),
    }
}

/// On an exact cost tie, prefer the lower link id lexicographically; real
/// candidates are always preferred over artificial ones.
fn prefer(network: &Network, a: &LinkCandidate, b: &LinkCandidate) -> bool {
    match (a.link, b.link) {
        (CandidateLink::Real(la), CandidateLink::Real(lb)) => {
            network.link_interner().lexicographic_order(la, lb) == std::cmp::Ordering::Less
        }
        (CandidateLink::Real(_), CandidateLink::Artificial) => true,
        (CandidateLink::Artificial, CandidateLink::Real(_)) => false,
        (CandidateLink::Artificial, CandidateLink::Artificial) => false,
    }
}

/// Solves the pseudo-graph for one route. `layers[i]` is the candidate list
/// for the route's `i`-th stop, `coords[i]` its coordinate. Returns `None`
/// if any stop has no candidates, or no path exists from SOURCE to SINK.
#[must_use]
pub fn solve(
    network: &Network,
    layers: &[Vec<LinkCandidate>],
    coords: &[Point<f64>],
    router: &Router,
    cost_type: TravelCostType,
    use_candidate_distance: bool,
) -> Option<PseudoGraphResult> {
    if layers.is_empty() || layers.iter().any(Vec::is_empty) {
        return None;
    }
    let n = layers.len();

    let mut best: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut back: Vec<Vec<Option<usize>>> = Vec::with_capacity(n);

    best.push(
        layers[0]
            .iter()
            .map(|c| attachment_penalty(c, use_candidate_distance))
            .collect(),
    );
    back.push(vec![None; layers[0].len()]);

    for i in 1..n {
        let prev_layer = &layers[i - 1];
        let cur_layer = &layers[i];
        let prev_best = &best[i - 1];

        let mut cur_costs = vec![f64::INFINITY; cur_layer.len()];
        let mut cur_back: Vec<Option<usize>> = vec![None; cur_layer.len()];

        for (j, cand) in cur_layer.iter().enumerate() {
            let attach = attachment_penalty(cand, use_candidate_distance);
            for (k, prev_cand) in prev_layer.iter().enumerate() {
                if !prev_best[k].is_finite() {
                    continue;
                }
                let Some(routing) =
                    routing_term(prev_cand, cand, coords[i - 1], coords[i], router, cost_type)
                else {
                    continue;
                };
                let total = prev_best[k] + attach + routing;
                let is_better = total < cur_costs[j]
                    || ((total - cur_costs[j]).abs() < f64::EPSILON
                        && cur_back[j].is_some_and(|p| prefer(network, prev_cand, &prev_layer[p])));
                if is_better {
                    cur_costs[j] = total;
                    cur_back[j] = Some(k);
                }
            }
        }
        best.push(cur_costs);
        back.push(cur_back);
    }

    let last = n - 1;
    let (best_idx, &best_cost) = best[last]
        .iter()
        .enumerate()
        .filter(|(_, cost)| cost.is_finite())
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    let mut choice = vec![0usize; n];
    let mut idx = best_idx;
    for i in (0..n).rev() {
        choice[i] = idx;
        if let Some(prev) = back[i][idx] {
            idx = prev;
        }
    }

    Some(PseudoGraphResult { per_stop_choice: choice, total_cost: best_cost })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;
    use crate::ids::StopFacilityId;
    use crate::model::{Mode, ModeSet};
    use crate::router::{base_cost_policy, LinkLengthCost};
    use ahash::HashSet;

    fn grid_network() -> Network {
        let mut net = Network::new();
        let a = net.add_node("A", Point::new(0.0, 0.0));
        let b = net.add_node("B", Point::new(10.0, 0.0));
        let c = net.add_node("C", Point::new(20.0, 0.0));
        net.add_link("AB", a, b, 10.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        net.add_link("BC", b, c, 10.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        net
    }

    #[test]
    fn solves_simple_two_stop_route() {
        let net = grid_network();
        let ab = net.link_id_for("AB").unwrap();
        let bc = net.link_id_for("BC").unwrap();
        let allowed = HashSet::from_iter([Mode::new("bus")]);
        let router = Router::new(&net, allowed, Box::new(LinkLengthCost));

        let stop0 = StopFacilityId::from_raw(0);
        let stop1 = StopFacilityId::from_raw(1);
        let layers = vec![
            vec![LinkCandidate { stop: stop0, link: CandidateLink::Real(ab), distance: 1.0 }],
            vec![LinkCandidate { stop: stop1, link: CandidateLink::Real(bc), distance: 1.0 }],
        ];
        let coords = vec![Point::new(0.0, 0.0), Point::new(20.0, 0.0)];

        let result =
            solve(&net, &layers, &coords, &router, TravelCostType::LinkLength, true).unwrap();
        assert_eq!(result.per_stop_choice, vec![0, 0]);
        assert!((result.total_cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn same_link_shortcut_has_no_routing_cost() {
        let net = grid_network();
        let ab = net.link_id_for("AB").unwrap();
        let allowed = HashSet::from_iter([Mode::new("bus")]);
        let router = Router::new(&net, allowed, Box::new(LinkLengthCost));

        let stop0 = StopFacilityId::from_raw(0);
        let stop1 = StopFacilityId::from_raw(1);
        let layers = vec![
            vec![LinkCandidate { stop: stop0, link: CandidateLink::Real(ab), distance: 1.0 }],
            vec![LinkCandidate { stop: stop1, link: CandidateLink::Real(ab), distance: 1.0 }],
        ];
        let coords = vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0)];

        let result =
            solve(&net, &layers, &coords, &router, TravelCostType::LinkLength, true).unwrap();
        assert!((result.total_cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn disabling_candidate_distance_drops_the_attachment_penalty() {
        let net = grid_network();
        let ab = net.link_id_for("AB").unwrap();
        let bc = net.link_id_for("BC").unwrap();
        let allowed = HashSet::from_iter([Mode::new("bus")]);
        let router = Router::new(&net, allowed, Box::new(LinkLengthCost));

        let stop0 = StopFacilityId::from_raw(0);
        let stop1 = StopFacilityId::from_raw(1);
        let layers = vec![
            vec![LinkCandidate { stop: stop0, link: CandidateLink::Real(ab), distance: 5.0 }],
            vec![LinkCandidate { stop: stop1, link: CandidateLink::Real(bc), distance: 5.0 }],
        ];
        let coords = vec![Point::new(0.0, 0.0), Point::new(20.0, 0.0)];

        let result =
            solve(&net, &layers, &coords, &router, TravelCostType::LinkLength, false).unwrap();
        assert!((result.total_cost - 0.0).abs() < 1e-9);
    }

    #[test]
    fn unmappable_when_a_stop_has_no_candidates() {
        let net = grid_network();
        let allowed = HashSet::from_iter([Mode::new("bus")]);
        let router = Router::new(&net, allowed, Box::new(LinkLengthCost));
        let layers: Vec<Vec<LinkCandidate>> = vec![Vec::new()];
        let coords = vec![Point::new(0.0, 0.0)];
        assert!(solve(&net, &layers, &coords, &router, TravelCostType::LinkLength, true).is_none());
    }

    #[test]
    fn config_default_travel_cost_builds() {
        let config = MapperConfig::default();
        let _ = base_cost_policy(&config);
    }
}
