//! Schedule materializer: commits a solved pseudo-graph into a
//! concrete link sequence, rebinding each route stop to a link-specific
//! child facility. Runs in the single-threaded commit phase — this is
//! the only stage allowed to mutate the shared network and schedule.

use crate::candidates::{CandidateLink, LinkCandidate};
use crate::ids::{LineId, LinkId, RouteId, StopFacilityId};
use crate::model::network::ARTIFICIAL_MODE;
use crate::model::{LinkSequence, Mode, ModeSet, Network, TransitSchedule};
use crate::pseudograph::PseudoGraphResult;

/// Freespeed assigned to a freshly materialized artificial link. Irrelevant
/// to travel time since the link has zero length; kept positive so
/// `travel_time()` never divides by zero.
const ARTIFICIAL_LINK_FREESPEED: f64 = 1.0;
const ARTIFICIAL_LINK_CAPACITY: f64 = 9_999.0;

/// Creates (or reuses) the artificial self-loop link for a stop, deriving
/// its identifier as `pt_<stopId>` so repeated mapping runs
/// land on the same id. Concurrent routes materializing the same stop's
/// artificial link (sequentially, within the single-threaded commit phase)
/// just add their mode to the existing link.
fn materialize_artificial_link(
    network: &mut Network,
    schedule: &TransitSchedule,
    stop: StopFacilityId,
    mode: &Mode,
) -> LinkId {
    let external = format!("pt_{}", schedule.stop_interner().resolve(stop));
    if let Some(existing) = network.link_id_for(&external) {
        network.link_mut(existing).modes.insert(mode.clone());
        return existing;
    }
    let coord = schedule.stop_facility(stop).coord;
    let node = network.add_node(&external, coord);
    let mut modes = ModeSet::new();
    modes.insert(mode.clone());
    modes.insert(Mode::new(ARTIFICIAL_MODE));
    network.add_link(
        &external,
        node,
        node,
        0.0,
        ARTIFICIAL_LINK_FREESPEED,
        ARTIFICIAL_LINK_CAPACITY,
        modes,
    )
}

/// Walks a solved pseudo-graph, materializing any artificial candidates the
/// solver picked, assembling the route's link sequence, and rebinding each
/// stop to a link-specific child facility. Idempotent: re-running on an
/// already-mapped route's own solver output reuses the same child
/// facilities and artificial links.
///
/// `interior_paths[i]` is the router's interior-link path between the
/// chosen candidates of stops `i` and `i+1` (empty if they share a link or
/// either is artificial), precomputed during the read-only parallel solve
/// phase — the router borrows the network immutably for its whole
/// lifetime, so it cannot be queried here once this function starts taking
/// `&mut Network` (routing and the network mutation are different
/// phases on purpose).
pub fn materialize(
    network: &mut Network,
    schedule: &mut TransitSchedule,
    line: LineId,
    route_id: RouteId,
    layers: &[Vec<LinkCandidate>],
    result: &PseudoGraphResult,
    interior_paths: &[Vec<LinkId>],
) {
    let mode = schedule.route(line, route_id).mode.clone();
    let n = layers.len();

    let resolved: Vec<LinkId> = layers
        .iter()
        .enumerate()
        .map(|(i, layer)| {
            let candidate = &layer[result.per_stop_choice[i]];
            match candidate.link {
                CandidateLink::Real(id) => id,
                CandidateLink::Artificial => {
                    materialize_artificial_link(network, schedule, candidate.stop, &mode)
                }
            }
        })
        .collect();

    let mut raw_sequence: Vec<LinkId> = Vec::new();
    let mut stop_raw_index: Vec<usize> = Vec::with_capacity(n);
    for i in 0..n {
        if i > 0 {
            raw_sequence.extend(interior_paths[i - 1].iter().copied());
        }
        stop_raw_index.push(raw_sequence.len());
        raw_sequence.push(resolved[i]);
    }

    let mut sequence: Vec<LinkId> = Vec::with_capacity(raw_sequence.len());
    let mut remap: Vec<usize> = Vec::with_capacity(raw_sequence.len());
    for &link in &raw_sequence {
        if sequence.last() != Some(&link) {
            sequence.push(link);
        }
        remap.push(sequence.len() - 1);
    }
    let stop_link_index: Vec<usize> = stop_raw_index.into_iter().map(|i| remap[i]).collect();

    for (i, layer) in layers.iter().enumerate() {
        let candidate = &layer[result.per_stop_choice[i]];
        let link_external = network.link_interner().resolve(resolved[i]).to_string();
        let child = schedule.child_stop_facility(candidate.stop, resolved[i], &link_external);
        schedule.route_mut(line, route_id).stops[i].stop = child;
    }

    let route = schedule.route_mut(line, route_id);
    route.link_sequence = Some(LinkSequence::new(sequence));
    route.stop_link_index = Some(stop_link_index);
}
