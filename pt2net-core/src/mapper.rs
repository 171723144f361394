//! Pipeline orchestration: wires candidate generation, routing, pseudo-graph
//! solving, materialization and finalization into one call, with a parallel
//! per-route solve phase followed by a single-threaded deterministic commit.

use std::time::{Duration, Instant};

use ahash::{HashMap, HashSet};
use geo::Point;
use rayon::prelude::*;

use crate::candidates::{CandidateGenerator, CandidateLink, LinkCandidate};
use crate::config::MapperConfig;
use crate::error::{Error, Result};
use crate::finalizer;
use crate::ids::{LineId, LinkId, RouteId};
use crate::materializer;
use crate::model::{Mode, Network, Shape, ShapeMap, TransitSchedule};
use crate::pseudograph::{self, PseudoGraphResult};
use crate::report::{MappingReport, UnmappableReason};
use crate::router::{base_cost_policy, Router, ShapeBiasedCost};
use crate::spatial::LinkSpatialIndex;

fn as_mode_set(strings: &HashSet<String>) -> HashSet<Mode> {
    strings.iter().map(|s| Mode::new(s)).collect()
}

fn shaped_router<'n>(
    network: &'n Network,
    config: &MapperConfig,
    allowed: HashSet<Mode>,
    shape: &'n Shape,
) -> Router<'n> {
    Router::new(
        network,
        allowed,
        Box::new(ShapeBiasedCost::new(
            base_cost_policy(config),
            shape,
            config.shape_tolerance,
            config.shape_penalty_ceiling,
        )),
    )
}

/// Everything the commit phase needs to materialize one successfully solved
/// route. Owns no borrow of `Network`/`Router` so it can cross the rayon
/// boundary and outlive the parallel phase untouched.
struct Solved {
    layers: Vec<Vec<LinkCandidate>>,
    result: PseudoGraphResult,
    interior_paths: Vec<Vec<LinkId>>,
}

enum Outcome {
    Mapped(Solved),
    Unmappable(UnmappableReason),
}

/// Fatal pre-checks (configuration errors, missing input) run before any
/// route is scheduled, so a bad input aborts the whole batch instead of
/// failing after partial work.
fn validate_inputs(schedule: &TransitSchedule, config: &MapperConfig) -> Result<()> {
    config.validate()?;
    for line in schedule.lines() {
        for route in line.routes.values() {
            config.network_modes_for(route.mode.as_str())?;
            for stop in &route.stops {
                if schedule.stop_facility_checked(stop.stop).is_none() {
                    return Err(Error::MissingInput(format!(
                        "route {:?} references unknown stop facility {:?}",
                        schedule.route_interner().resolve(route.id),
                        stop.stop
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Runs the full mapper pipeline against `network`/`schedule` in place
/// and returns a summary [`MappingReport`]. `network` gains artificial
/// links and adjusted freespeeds as needed; `schedule` gains per-route link
/// sequences and link-bound child stop facilities.
pub fn run(
    network: &mut Network,
    schedule: &mut TransitSchedule,
    shapes: &ShapeMap,
    config: &MapperConfig,
) -> Result<MappingReport> {
    validate_inputs(schedule, config)?;

    let index = LinkSpatialIndex::build(network, config.allow_loop_links);
    let route_ids = schedule.route_ids_sorted();
    let timeout = config.per_route_timeout_ms.map(Duration::from_millis);

    // One shared router per distinct schedule mode, built once before the
    // parallel phase so every shape-free route solving on that mode reuses
    // the same memoized per-source shortest-path trees. Routes with a shape
    // get their own ephemeral router instead, since the shape changes the
    // cost landscape and a shared cache wouldn't help.
    let mut base_routers: HashMap<String, Router> = HashMap::default();
    for line in schedule.lines() {
        for route in line.routes.values() {
            let key = route.mode.as_str().to_string();
            if base_routers.contains_key(&key) {
                continue;
            }
            let allowed = as_mode_set(config.network_modes_for(&key)?);
            base_routers.insert(key, Router::new(network, allowed, base_cost_policy(config)));
        }
    }

    // Scoped to this batch rather than the global rayon pool, so a config's
    // `nThreads` is honored even if another mapper run with a different
    // value is already live elsewhere in the process.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.n_threads)
        .build()
        .map_err(|e| Error::Configuration(format!("failed to build solve thread pool: {e}")))?;

    let outcomes: Vec<((LineId, RouteId), Outcome)> = pool.install(|| {
        route_ids
            .par_iter()
            .map(|&(line, route_id)| {
                let start = Instant::now();
                let outcome = solve_route(
                    network,
                    schedule,
                    &index,
                    config,
                    shapes,
                    &base_routers,
                    timeout,
                    start,
                    line,
                    route_id,
                );
                ((line, route_id), outcome)
            })
            .collect()
    });

    let mut report = MappingReport::default();
    for ((line, route_id), outcome) in outcomes {
        match outcome {
            Outcome::Mapped(solved) => {
                materializer::materialize(
                    network,
                    schedule,
                    line,
                    route_id,
                    &solved.layers,
                    &solved.result,
                    &solved.interior_paths,
                );
                for layer_idx in 0..solved.layers.len() {
                    let candidate = &solved.layers[layer_idx][solved.result.per_stop_choice[layer_idx]];
                    if matches!(candidate.link, CandidateLink::Artificial) {
                        let route = schedule.route(line, route_id);
                        if let Some(seq) = &route.link_sequence {
                            if let Some(&idx) = route.stop_link_index.as_ref().and_then(|v| v.get(layer_idx)) {
                                if let Some(&link_id) = seq.links().get(idx) {
                                    report.record_artificial_link(link_id);
                                }
                            }
                        }
                    }
                }
                report.record_mapped(line, route_id);
            }
            Outcome::Unmappable(reason) => report.record_unmapped(line, route_id, reason),
        }
    }

    finalizer::finalize(network, schedule, config);

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn solve_route(
    network: &Network,
    schedule: &TransitSchedule,
    index: &LinkSpatialIndex,
    config: &MapperConfig,
    shapes: &ShapeMap,
    base_routers: &HashMap<String, Router>,
    timeout: Option<Duration>,
    start: Instant,
    line: LineId,
    route_id: RouteId,
) -> Outcome {
    let route = schedule.route(line, route_id);
    let allowed_strings = config
        .network_modes_for(route.mode.as_str())
        .expect("validated before the parallel phase began");
    let allowed = as_mode_set(allowed_strings);

    let coords: Vec<_> = route.stops.iter().map(|s| schedule.stop_facility(s.stop).coord).collect();
    let directions = travel_directions(&coords);

    let generator = CandidateGenerator::new(network, index, config);
    let layers: Vec<Vec<LinkCandidate>> = route
        .stops
        .iter()
        .zip(&coords)
        .zip(&directions)
        .map(|((s, &coord), &direction)| generator.generate_for_modes(s.stop, coord, &allowed, direction))
        .collect();

    if layers.iter().any(Vec::is_empty) {
        return Outcome::Unmappable(UnmappableReason::NoCandidates);
    }
    if timed_out(timeout, start) {
        return Outcome::Unmappable(UnmappableReason::Timeout);
    }

    let shape = route.shape.and_then(|id| shapes.get(id));
    let ephemeral;
    let router: &Router = match shape {
        Some(shape) => {
            ephemeral = shaped_router(network, config, allowed, shape);
            &ephemeral
        }
        None => &base_routers[route.mode.as_str()],
    };

    let Some(result) = pseudograph::solve(
        network,
        &layers,
        &coords,
        router,
        config.travel_cost_type,
        config.routing_with_candidate_distance,
    ) else {
        return Outcome::Unmappable(UnmappableReason::NoPath);
    };
    if timed_out(timeout, start) {
        return Outcome::Unmappable(UnmappableReason::Timeout);
    }

    let interior_paths = interior_paths_for(router, &layers, &result);

    let all_real = layers
        .iter()
        .enumerate()
        .all(|(i, layer)| matches!(layer[result.per_stop_choice[i]].link, CandidateLink::Real(_)));
    if all_real && !great_circle_feasible(network, &layers, &result, &interior_paths, &coords, config) {
        return Outcome::Unmappable(UnmappableReason::GreatCircleInfeasible);
    }

    Outcome::Mapped(Solved { layers, result, interior_paths })
}

fn timed_out(timeout: Option<Duration>, start: Instant) -> bool {
    timeout.is_some_and(|budget| start.elapsed() > budget)
}

/// Sum of the lengths of every real link in a solved route's sequence
/// (start candidate, interior paths, end candidate), collapsing consecutive
/// repeats of the same link the same way the materializer does, so a
/// same-link shortcut isn't counted twice.
fn mapped_real_length(
    network: &Network,
    layers: &[Vec<LinkCandidate>],
    result: &PseudoGraphResult,
    interior_paths: &[Vec<LinkId>],
) -> f64 {
    let n = layers.len();
    let mut raw: Vec<LinkId> = Vec::new();
    for i in 0..n {
        if i > 0 {
            raw.extend(interior_paths[i - 1].iter().copied());
        }
        if let CandidateLink::Real(id) = layers[i][result.per_stop_choice[i]].link {
            raw.push(id);
        }
    }
    let mut total = 0.0;
    let mut last = None;
    for link in raw {
        if last != Some(link) {
            total += network.link(link).length;
        }
        last = Some(link);
    }
    total
}

/// A mapped route's link sequence must not be shorter than the straight-line
/// distance between its first and last stop, minus a configured slack —
/// otherwise the solver found a path that can't possibly be the vehicle's
/// real-world route. Only checked when every chosen candidate is real;
/// artificial links exist precisely to bridge coverage gaps a real-link
/// feasibility check can't account for.
fn great_circle_feasible(
    network: &Network,
    layers: &[Vec<LinkCandidate>],
    result: &PseudoGraphResult,
    interior_paths: &[Vec<LinkId>],
    coords: &[Point<f64>],
    config: &MapperConfig,
) -> bool {
    let Some((&first, &last)) = coords.first().zip(coords.last()) else {
        return true;
    };
    let (dx, dy) = (last.x() - first.x(), last.y() - first.y());
    let straight_line = (dx * dx + dy * dy).sqrt();
    let total_length = mapped_real_length(network, layers, result, interior_paths);
    total_length + config.great_circle_slack + 1e-6 >= straight_line
}

/// The route's local travel direction at each stop, as a vector from the
/// previous stop to the next one (falling back to the single adjacent leg
/// at the endpoints). `None` when there is no neighboring stop to derive a
/// direction from, e.g. a single-stop route — the candidate generator then
/// treats direction as ambiguous and does not filter by it.
fn travel_directions(coords: &[Point<f64>]) -> Vec<Option<(f64, f64)>> {
    let n = coords.len();
    (0..n)
        .map(|i| {
            let before = if i > 0 { Some(coords[i - 1]) } else { None };
            let after = if i + 1 < n { Some(coords[i + 1]) } else { None };
            match (before, after) {
                (Some(b), Some(a)) => Some((a.x() - b.x(), a.y() - b.y())),
                (None, Some(a)) => Some((a.x() - coords[i].x(), a.y() - coords[i].y())),
                (Some(b), None) => Some((coords[i].x() - b.x(), coords[i].y() - b.y())),
                (None, None) => None,
            }
        })
        .collect()
}

/// Re-queries the router (still read-only at this point) for the interior
/// link path between every pair of consecutive chosen candidates, so the
/// single-threaded commit phase never needs a live `Router` borrowing the
/// network it is about to mutate.
fn interior_paths_for(
    router: &Router,
    layers: &[Vec<LinkCandidate>],
    result: &PseudoGraphResult,
) -> Vec<Vec<LinkId>> {
    (1..layers.len())
        .map(|i| {
            let prev = &layers[i - 1][result.per_stop_choice[i - 1]];
            let cur = &layers[i][result.per_stop_choice[i]];
            match (prev.link, cur.link) {
                (CandidateLink::Real(a), CandidateLink::Real(b)) if a != b => router
                    .least_cost(a, b)
                    .map(|leg| leg.interior_links)
                    .unwrap_or_default(),
                _ => Vec::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModeSet, TransitRouteStop};
    use geo::Point;

    fn bus_config() -> MapperConfig {
        let mut config = MapperConfig::default();
        config
            .mode_routing_assignment
            .insert("bus".to_string(), HashSet::from_iter(["bus".to_string()]));
        config.max_link_candidate_distance = 60.0;
        config.max_link_candidate_distance_cap = 60.0;
        config.n_link_threshold = 1;
        config
    }

    fn build_grid() -> Network {
        let mut net = Network::new();
        let mut coords = ahash::HashMap::default();
        for y in 0..3 {
            for x in 0..3 {
                let id = format!("n{x}{y}");
                let node = net.add_node(&id, Point::new((x * 100) as f64, (y * 100) as f64));
                coords.insert((x, y), node);
            }
        }
        let bus = || ModeSet::from_modes([Mode::new("bus")]);
        for y in 0..3 {
            for x in 0..2 {
                let a = coords[&(x, y)];
                let b = coords[&(x + 1, y)];
                net.add_link(&format!("h{x}{y}"), a, b, 100.0, 10.0, 1000.0, bus());
            }
        }
        for x in 0..3 {
            for y in 0..2 {
                let a = coords[&(x, y)];
                let b = coords[&(x, y + 1)];
                net.add_link(&format!("v{x}{y}"), a, b, 100.0, 10.0, 1000.0, bus());
            }
        }
        net
    }

    #[test]
    fn scenario_s1_grid_route_picks_bottom_row() {
        let mut net = build_grid();
        let mut schedule = TransitSchedule::new();
        let s1 = schedule.add_stop_facility("S1", "S1".to_string(), Point::new(50.0, 0.0), false);
        let s2 = schedule.add_stop_facility("S2", "S2".to_string(), Point::new(150.0, 0.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("bus"), None);
        schedule.route_mut(line, route).stops = vec![
            TransitRouteStop { stop: s1, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false },
            TransitRouteStop { stop: s2, arrival_offset: 30.0, departure_offset: 30.0, await_departure: false },
        ];

        let shapes = ShapeMap::new();
        let config = bus_config();
        let report = run(&mut net, &mut schedule, &shapes, &config).unwrap();

        assert_eq!(report.mapped_count(), 1);
        assert_eq!(report.unmapped_count(), 0);
        let mapped = schedule.route(line, route);
        let links: Vec<&str> =
            mapped.link_sequence.as_ref().unwrap().links().iter().map(|id| net.link_interner().resolve(*id)).collect();
        assert_eq!(links, vec!["h00", "h10"]);
    }

    #[test]
    fn scenario_s3_far_stop_emits_artificial_link() {
        let mut net = build_grid();
        let mut schedule = TransitSchedule::new();
        let far = schedule.add_stop_facility("Far", "Far".to_string(), Point::new(500.0, 500.0), false);
        let near = schedule.add_stop_facility("Near", "Near".to_string(), Point::new(50.0, 0.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("bus"), None);
        schedule.route_mut(line, route).stops = vec![
            TransitRouteStop { stop: far, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false },
            TransitRouteStop { stop: near, arrival_offset: 60.0, departure_offset: 60.0, await_departure: false },
        ];

        let shapes = ShapeMap::new();
        let mut config = bus_config();
        config.max_link_candidate_distance_cap = 60.0;
        let report = run(&mut net, &mut schedule, &shapes, &config).unwrap();

        assert_eq!(report.mapped_count(), 1);
        assert_eq!(report.artificial_links().len(), 1);
        let artificial_id = net.link_id_for("pt_Far").expect("artificial link kept");
        assert!(net.link(artificial_id).modes.iter().all(|m| !m.is_artificial()));
    }

    #[test]
    fn great_circle_infeasible_route_is_unmapped() {
        // A single link whose declared length (1.0) is wildly shorter than
        // the straight-line distance between its endpoints (the network
        // doesn't require length to match node coordinates) — a stand-in
        // for a data error or a degenerate routing result, which the
        // feasibility check must catch.
        let mut net = Network::new();
        let a = net.add_node("A", Point::new(0.0, 0.0));
        let b = net.add_node("B", Point::new(1000.0, 1000.0));
        net.add_link("AB", a, b, 1.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));

        let mut schedule = TransitSchedule::new();
        let s1 = schedule.add_stop_facility("S1", "S1".to_string(), Point::new(0.0, 0.0), false);
        let s2 = schedule.add_stop_facility("S2", "S2".to_string(), Point::new(1000.0, 1000.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("bus"), None);
        schedule.route_mut(line, route).stops = vec![
            TransitRouteStop { stop: s1, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false },
            TransitRouteStop { stop: s2, arrival_offset: 60.0, departure_offset: 60.0, await_departure: false },
        ];

        let shapes = ShapeMap::new();
        let mut config = bus_config();
        config.use_artificial_links = false;
        let report = run(&mut net, &mut schedule, &shapes, &config).unwrap();

        assert_eq!(report.mapped_count(), 0);
        assert_eq!(report.unmapped_count(), 1);
        assert_eq!(report.unmapped()[0].2, UnmappableReason::GreatCircleInfeasible);
    }

    #[test]
    fn unknown_schedule_mode_is_a_fatal_configuration_error() {
        let mut net = build_grid();
        let mut schedule = TransitSchedule::new();
        let s1 = schedule.add_stop_facility("S1", "S1".to_string(), Point::new(50.0, 0.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("rail"), None);
        schedule.route_mut(line, route).stops =
            vec![TransitRouteStop { stop: s1, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false }];

        let shapes = ShapeMap::new();
        let config = bus_config();
        assert!(run(&mut net, &mut schedule, &shapes, &config).is_err());
    }
}
