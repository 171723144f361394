//! Network finalizer: runs once, after every route has been
//! materialized, to bring the mutated network back into a state fit for
//! simulation — no artificial-mode links, freespeeds that make the
//! schedule feasible, and (optionally) no dead subgraphs or orphaned stop
//! facilities.

use ahash::{HashMap, HashSet};
use petgraph::graph::UnGraph;
use rustworkx_core::connectivity::connected_components;

use crate::config::MapperConfig;
use crate::ids::LinkId;
use crate::model::network::ARTIFICIAL_MODE;
use crate::model::{Mode, Network, TransitSchedule};

/// Every link id appearing in some mapped route's link sequence.
fn links_in_use(schedule: &TransitSchedule) -> HashSet<LinkId> {
    schedule
        .lines()
        .flat_map(|line| line.routes.values())
        .filter_map(|route| route.link_sequence.as_ref())
        .flat_map(|seq| seq.links().iter().copied())
        .collect()
}

/// Step 1: an artificial link not referenced by any mapped route is
/// tombstoned outright, never just stripped of its mode tag.
fn drop_unused_artificial_links(network: &mut Network, used: &HashSet<LinkId>) {
    let artificial_mode = Mode::new(ARTIFICIAL_MODE);
    let stale: Vec<LinkId> = network
        .links()
        .filter(|link| link.modes.permits(&artificial_mode) && !used.contains(&link.id))
        .map(|link| link.id)
        .collect();
    for id in stale {
        network.mark_link_removed(id);
    }
}

/// Step 2: strip the sentinel tag from every surviving link so no
/// link in the finalized network ever permits it.
fn clean_artificial_mode_tag(network: &mut Network) {
    let artificial_mode = Mode::new(ARTIFICIAL_MODE);
    let ids: Vec<LinkId> = network.links().map(|link| link.id).collect();
    for id in ids {
        network.link_mut(id).modes.remove(&artificial_mode);
    }
}

/// Step 3: for links whose mode intersects `scheduleFreespeedModes`,
/// raise freespeed so every mapped route's scheduled inter-stop time is
/// achievable. The target speed for a (route, consecutive-stop-pair) leg is
/// uniform across every link the leg spans — `total leg length / scheduled
/// leg duration` — so apportioning by link length reduces to the
/// same value for each link in the leg; the finalizer takes the maximum of
/// that value over every route/leg touching the link.
fn repair_freespeeds(network: &mut Network, schedule: &TransitSchedule, modes: &HashSet<String>) {
    if modes.is_empty() {
        return;
    }
    let mut target: HashMap<LinkId, f64> = HashMap::default();

    for line in schedule.lines() {
        for route in line.routes.values() {
            let (Some(sequence), Some(stop_link_index)) =
                (route.link_sequence.as_ref(), route.stop_link_index.as_ref())
            else {
                continue;
            };
            for (i, pair) in route.stops.windows(2).enumerate() {
                let duration = pair[1].arrival_offset - pair[0].departure_offset;
                if duration <= 0.0 {
                    continue;
                }
                let start = stop_link_index[i];
                let end = stop_link_index[i + 1];
                if end < start {
                    continue;
                }
                let leg_links = &sequence.links()[start..=end];
                let total_length: f64 = leg_links.iter().map(|id| network.link(*id).length).sum();
                if total_length <= 0.0 {
                    continue;
                }
                let speed = total_length / duration;
                for &link_id in leg_links {
                    let applies = network.link(link_id).modes.iter().any(|m| modes.contains(m.as_str()));
                    if !applies {
                        continue;
                    }
                    target
                        .entry(link_id)
                        .and_modify(|best| {
                            if speed > *best {
                                *best = speed;
                            }
                        })
                        .or_insert(speed);
                }
            }
        }
    }

    for (link_id, speed) in target {
        network.link_mut(link_id).raise_freespeed(speed);
    }
}

/// Step 4 (optional): removes nodes and links not reachable from any
/// schedule-used link. Connectivity is undirected — a link reachable in
/// either direction is still "alive" network coverage: build a throwaway
/// undirected mirror of the node set and hand it to `rustworkx_core`'s
/// component finder, rather than re-deriving reachability by hand.
fn prune_orphans(network: &mut Network, used: &HashSet<LinkId>) {
    let mut undirected = UnGraph::<(), ()>::with_capacity(network.node_count(), network.link_count());
    for _ in 0..network.node_count() {
        undirected.add_node(());
    }
    for link in network.links() {
        undirected.add_edge(
            petgraph::graph::NodeIndex::new(link.from_node.index()),
            petgraph::graph::NodeIndex::new(link.to_node.index()),
            (),
        );
    }

    let used_nodes: HashSet<crate::ids::NodeId> = used
        .iter()
        .flat_map(|id| {
            let link = network.link(*id);
            [link.from_node, link.to_node]
        })
        .collect();

    let reached: HashSet<crate::ids::NodeId> = connected_components(&undirected)
        .into_iter()
        .filter(|component| {
            component.iter().any(|idx| used_nodes.contains(&crate::ids::NodeId::from_raw(idx.index() as u32)))
        })
        .flat_map(|component| component.into_iter().map(|idx| crate::ids::NodeId::from_raw(idx.index() as u32)))
        .collect();

    let dead: Vec<LinkId> = network
        .links()
        .filter(|link| !reached.contains(&link.from_node) || !reached.contains(&link.to_node))
        .map(|link| link.id)
        .collect();
    for id in dead {
        network.mark_link_removed(id);
    }
}

/// Step 5 (optional): drops stop facilities no route — mapped or
/// not — references any more.
fn remove_unused_stop_facilities(schedule: &mut TransitSchedule) {
    let referenced: HashSet<_> = schedule
        .lines()
        .flat_map(|line| line.routes.values())
        .flat_map(|route| route.stops.iter().map(|s| s.stop))
        .collect();
    let all: Vec<_> = schedule.stop_facilities().map(|f| f.id).collect();
    for id in all {
        if !referenced.contains(&id) {
            schedule.remove_stop_facility(id);
        }
    }
}

/// Runs all five finalizer steps in order. Called once, after every
/// route in the batch has been committed by the materializer.
pub fn finalize(network: &mut Network, schedule: &mut TransitSchedule, config: &MapperConfig) {
    let used = links_in_use(schedule);
    drop_unused_artificial_links(network, &used);
    clean_artificial_mode_tag(network);
    repair_freespeeds(network, schedule, &config.schedule_freespeed_modes);
    if config.prune_orphans {
        prune_orphans(network, &used);
    }
    if config.remove_not_used_stop_facilities {
        remove_unused_stop_facilities(schedule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkSequence, ModeSet, TransitRouteStop};
    use geo::Point;

    fn base_config() -> MapperConfig {
        MapperConfig::default()
    }

    #[test]
    fn unused_artificial_link_is_removed_used_one_loses_its_tag() {
        let mut network = Network::new();
        let n1 = network.add_node("n1", Point::new(0.0, 0.0));
        let n2 = network.add_node("n2", Point::new(10.0, 0.0));
        let used_modes = ModeSet::from_modes([Mode::new("bus"), Mode::new(ARTIFICIAL_MODE)]);
        let used_link = network.add_link("used_art", n1, n1, 0.0, 1.0, 1.0, used_modes);
        let stale_modes = ModeSet::from_modes([Mode::new("bus"), Mode::new(ARTIFICIAL_MODE)]);
        network.add_link("stale_art", n2, n2, 0.0, 1.0, 1.0, stale_modes);

        let mut schedule = TransitSchedule::new();
        let stop = schedule.add_stop_facility("S", "S".to_string(), Point::new(0.0, 0.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("bus"), None);
        schedule.route_mut(line, route).stops =
            vec![TransitRouteStop { stop, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false }];
        schedule.route_mut(line, route).link_sequence = Some(LinkSequence::new(vec![used_link]));
        schedule.route_mut(line, route).stop_link_index = Some(vec![0]);

        finalize(&mut network, &mut schedule, &base_config());

        match network.link_id_for("stale_art") {
            Some(id) => assert!(network.link(id).is_removed()),
            None => {}
        }
        let used = network.link(used_link);
        assert!(!used.is_removed());
        assert!(!used.modes.iter().any(Mode::is_artificial));
        assert!(used.modes.permits(&Mode::new("bus")));
    }

    #[test]
    fn freespeed_is_raised_to_cover_scheduled_time_but_never_lowered() {
        let mut network = Network::new();
        let a = network.add_node("A", Point::new(0.0, 0.0));
        let b = network.add_node("B", Point::new(200.0, 0.0));
        let rail_link = network.add_link(
            "AB_rail",
            a,
            b,
            200.0,
            10.0,
            1000.0,
            ModeSet::from_modes([Mode::new("rail")]),
        );

        let mut schedule = TransitSchedule::new();
        let s0 = schedule.add_stop_facility("S0", "S0".to_string(), Point::new(0.0, 0.0), false);
        let s1 = schedule.add_stop_facility("S1", "S1".to_string(), Point::new(200.0, 0.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("rail"), None);
        schedule.route_mut(line, route).stops = vec![
            TransitRouteStop { stop: s0, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false },
            TransitRouteStop { stop: s1, arrival_offset: 10.0, departure_offset: 10.0, await_departure: false },
        ];
        schedule.route_mut(line, route).link_sequence = Some(LinkSequence::new(vec![rail_link]));
        schedule.route_mut(line, route).stop_link_index = Some(vec![0, 0]);

        let mut config = base_config();
        config.schedule_freespeed_modes = HashSet::from_iter(["rail".to_string()]);

        finalize(&mut network, &mut schedule, &config);

        // 200m / 10s = 20 m/s required, current freespeed was 10 m/s.
        assert!((network.link(rail_link).freespeed - 20.0).abs() < 1e-9);
    }

    #[test]
    fn unused_stop_facility_is_removed_when_configured() {
        let mut network = Network::new();
        let mut schedule = TransitSchedule::new();
        let used = schedule.add_stop_facility("used", "used".to_string(), Point::new(0.0, 0.0), false);
        let orphan = schedule.add_stop_facility("orphan", "orphan".to_string(), Point::new(1.0, 1.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("bus"), None);
        schedule.route_mut(line, route).stops =
            vec![TransitRouteStop { stop: used, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false }];

        let mut config = base_config();
        config.remove_not_used_stop_facilities = true;
        finalize(&mut network, &mut schedule, &config);

        assert!(schedule.stop_facility_checked(orphan).is_none());
        assert!(schedule.stop_facility_checked(used).is_some());
    }

    #[test]
    fn prune_orphans_drops_components_untouched_by_any_route() {
        let mut network = Network::new();
        let a = network.add_node("A", Point::new(0.0, 0.0));
        let b = network.add_node("B", Point::new(10.0, 0.0));
        let used_link = network.add_link("AB", a, b, 10.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        let c = network.add_node("C", Point::new(1000.0, 1000.0));
        let d = network.add_node("D", Point::new(1010.0, 1000.0));
        let isolated_link = network.add_link("CD", c, d, 10.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));

        let mut schedule = TransitSchedule::new();
        let stop = schedule.add_stop_facility("S", "S".to_string(), Point::new(0.0, 0.0), false);
        let line = schedule.add_line("L");
        let route = schedule.add_route(line, "R", Mode::new("bus"), None);
        schedule.route_mut(line, route).stops =
            vec![TransitRouteStop { stop, arrival_offset: 0.0, departure_offset: 0.0, await_departure: false }];
        schedule.route_mut(line, route).link_sequence = Some(LinkSequence::new(vec![used_link]));
        schedule.route_mut(line, route).stop_link_index = Some(vec![0]);

        let mut config = base_config();
        config.prune_orphans = true;
        finalize(&mut network, &mut schedule, &config);

        assert!(!network.link(used_link).is_removed());
        assert!(network.link(isolated_link).is_removed());
    }
}
