//! Candidate generation: for a stop facility and a mode, find nearby links
//! that could plausibly carry the route through that stop.

use ahash::HashSet;
use geo::Point;

use crate::config::MapperConfig;
use crate::ids::{LinkId, StopFacilityId};
use crate::model::{Mode, Network};
use crate::spatial::LinkSpatialIndex;

/// Penalty added when the solver picks the artificial placeholder over a
/// real link, large enough to dominate any plausible real-link cost. Not
/// configurable: it only needs to be "large", any value that does the job
/// is equivalent.
pub const ARTIFICIAL_CANDIDATE_PENALTY: f64 = 1.0e7;

/// A link a stop could be bound to, with its distance from the stop's
/// coordinate. [`CandidateLink::Artificial`] has no real-link distance; the
/// stop attaches to it exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CandidateLink {
    Real(LinkId),
    /// Not yet a link in the shared network — the network stays read-only
    /// during the parallel solve phase, so this placeholder is only
    /// materialized into a concrete node/link pair if the solver actually
    /// picks it for this stop.
    Artificial,
}

impl CandidateLink {
    #[must_use]
    pub fn as_real(&self) -> Option<LinkId> {
        match self {
            CandidateLink::Real(id) => Some(*id),
            CandidateLink::Artificial => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LinkCandidate {
    pub stop: StopFacilityId,
    pub link: CandidateLink,
    pub distance: f64,
}

/// Finds link candidates for a stop, given a spatial index built once per
/// batch over the (read-only) network.
pub struct CandidateGenerator<'a> {
    network: &'a Network,
    index: &'a LinkSpatialIndex,
    config: &'a MapperConfig,
}

impl<'a> CandidateGenerator<'a> {
    #[must_use]
    pub fn new(network: &'a Network, index: &'a LinkSpatialIndex, config: &'a MapperConfig) -> Self {
        Self { network, index, config }
    }

    /// Candidates for `stop` under `mode`, ascending by distance, capped at
    /// `maxNClosestLinks`. The search radius doubles until `nLinkThreshold`
    /// links are found or the configured radius cap is hit; if the
    /// threshold still isn't met and artificial links are enabled, an
    /// artificial placeholder candidate is appended so the stop always has
    /// at least one candidate to offer the solver.
    #[must_use]
    pub fn generate(&self, stop: StopFacilityId, coord: Point<f64>, mode: &Mode) -> Vec<LinkCandidate> {
        let modes = HashSet::from_iter([mode.clone()]);
        self.generate_for_modes(stop, coord, &modes, None)
    }

    /// Same as [`Self::generate`], but a link is eligible if it permits any
    /// mode in `modes` — used when a schedule mode is routable on several
    /// network modes at once (`modeRoutingAssignment`).
    ///
    /// `travel_direction`, when known, is the route's local travel vector
    /// at this stop (e.g. next stop's coordinate minus the previous one's).
    /// Links whose own from-to direction opposes it are dropped, unless
    /// doing so would leave nothing in range at all — in which case
    /// direction can't actually resolve anything here, so both orientations
    /// are kept. Same fallback when the direction itself is ambiguous
    /// (`None`, or degenerate — coincident neighboring stops).
    #[must_use]
    pub fn generate_for_modes(
        &self,
        stop: StopFacilityId,
        coord: Point<f64>,
        modes: &HashSet<Mode>,
        travel_direction: Option<(f64, f64)>,
    ) -> Vec<LinkCandidate> {
        let mut radius = self.config.max_link_candidate_distance;
        let mut found = self.search(coord, modes, radius, travel_direction);
        while found.len() < self.config.n_link_threshold
            && radius < self.config.max_link_candidate_distance_cap
        {
            radius = (radius * 2.0).min(self.config.max_link_candidate_distance_cap);
            found = self.search(coord, modes, radius, travel_direction);
        }

        found.truncate(self.config.max_n_closest_links);
        let mut candidates: Vec<LinkCandidate> = found
            .into_iter()
            .map(|(link, distance)| LinkCandidate {
                stop,
                link: CandidateLink::Real(link),
                distance,
            })
            .collect();

        if candidates.len() < self.config.n_link_threshold && self.config.use_artificial_links {
            candidates.push(LinkCandidate {
                stop,
                link: CandidateLink::Artificial,
                distance: 0.0,
            });
        }
        candidates
    }

    fn search(
        &self,
        coord: Point<f64>,
        modes: &HashSet<Mode>,
        radius: f64,
        travel_direction: Option<(f64, f64)>,
    ) -> Vec<(LinkId, f64)> {
        let base: Vec<(LinkId, f64)> = self
            .index
            .within_radius(coord, radius)
            .into_iter()
            .filter(|(id, _)| self.network.link(*id).modes.iter().any(|m| modes.contains(m)))
            .filter(|(id, _)| self.config.allow_loop_links || !self.network.link(*id).is_loop())
            .collect();

        let Some(direction) = travel_direction else { return base };
        if !Self::is_meaningful(direction) {
            return base;
        }
        let agreeing: Vec<(LinkId, f64)> =
            base.iter().copied().filter(|(id, _)| self.link_direction_agrees(*id, direction)).collect();
        // If every candidate in range opposes the route's travel direction,
        // direction can't actually resolve anything here — fall back to the
        // unfiltered set rather than starving the stop of real candidates.
        if agreeing.is_empty() {
            base
        } else {
            agreeing
        }
    }

    fn is_meaningful((tx, ty): (f64, f64)) -> bool {
        tx * tx + ty * ty > f64::EPSILON
    }

    /// Whether a link's from-to orientation agrees with a travel direction
    /// vector: a non-negative dot product, i.e. the link does not point
    /// backwards against the route. Loops (zero-length link vector) always
    /// agree, since they have no orientation to compare.
    fn link_direction_agrees(&self, link: LinkId, (tx, ty): (f64, f64)) -> bool {
        let link = self.network.link(link);
        let from = self.network.node(link.from_node).coord;
        let to = self.network.node(link.to_node).coord;
        let (lx, ly) = (to.x() - from.x(), to.y() - from.y());
        if !Self::is_meaningful((lx, ly)) {
            return true;
        }
        lx * tx + ly * ty >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModeSet;
    use ahash::HashSet;

    fn config() -> MapperConfig {
        let mut config = MapperConfig::default();
        config
            .mode_routing_assignment
            .insert("bus".to_string(), HashSet::from_iter(["bus".to_string()]));
        config.max_link_candidate_distance = 20.0;
        config.max_link_candidate_distance_cap = 80.0;
        config
    }

    fn line_network() -> Network {
        let mut net = Network::new();
        let a = net.add_node("A", Point::new(0.0, 0.0));
        let b = net.add_node("B", Point::new(100.0, 0.0));
        net.add_link("AB", a, b, 100.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        net
    }

    #[test]
    fn grows_radius_until_threshold_met() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let candidates = generator.generate(StopFacilityId::from_raw(0), Point::new(50.0, 10.0), &Mode::new("bus"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link.as_real(), net.link_id_for("AB"));
    }

    #[test]
    fn falls_back_to_artificial_when_nothing_in_range() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        config.max_link_candidate_distance_cap = 10.0;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let candidates =
            generator.generate(StopFacilityId::from_raw(0), Point::new(50.0, 5000.0), &Mode::new("bus"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link, CandidateLink::Artificial);
    }

    #[test]
    fn mode_mismatch_excludes_link() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        config.use_artificial_links = false;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let candidates =
            generator.generate(StopFacilityId::from_raw(0), Point::new(50.0, 10.0), &Mode::new("rail"));
        assert!(candidates.is_empty());
    }

    /// Two links over the same point, opposite orientation — a common shape
    /// for a two-way street modeled as a pair of directed links.
    fn opposite_direction_pair() -> Network {
        let mut net = Network::new();
        let a = net.add_node("A", Point::new(0.0, 0.0));
        let b = net.add_node("B", Point::new(100.0, 0.0));
        net.add_link("AB", a, b, 100.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        net.add_link("BA", b, a, 100.0, 10.0, 1000.0, ModeSet::from_modes([Mode::new("bus")]));
        net
    }

    #[test]
    fn opposing_link_direction_is_excluded_in_favor_of_the_agreeing_twin() {
        // AB runs left-to-right, BA right-to-left, both through the query
        // point. Travelling left-to-right must keep only AB.
        let net = opposite_direction_pair();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let modes = HashSet::from_iter([Mode::new("bus")]);
        let candidates = generator.generate_for_modes(
            StopFacilityId::from_raw(0),
            Point::new(50.0, 10.0),
            &modes,
            Some((1.0, 0.0)),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link.as_real(), net.link_id_for("AB"));
    }

    #[test]
    fn direction_never_starves_a_stop_with_only_an_opposing_link_in_range() {
        // AB is the only link in range, and it opposes travel direction;
        // direction can't resolve anything here, so it must still be
        // offered rather than forcing an artificial fallback.
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        config.use_artificial_links = false;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let modes = HashSet::from_iter([Mode::new("bus")]);
        let candidates = generator.generate_for_modes(
            StopFacilityId::from_raw(0),
            Point::new(50.0, 10.0),
            &modes,
            Some((-1.0, 0.0)),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link.as_real(), net.link_id_for("AB"));
    }

    #[test]
    fn agreeing_link_direction_is_kept_when_travel_direction_is_known() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let modes = HashSet::from_iter([Mode::new("bus")]);
        let candidates = generator.generate_for_modes(
            StopFacilityId::from_raw(0),
            Point::new(50.0, 10.0),
            &modes,
            Some((1.0, 0.0)),
        );
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link.as_real(), net.link_id_for("AB"));
    }

    #[test]
    fn ambiguous_travel_direction_does_not_filter() {
        let net = line_network();
        let index = LinkSpatialIndex::build(&net, true);
        let mut config = config();
        config.n_link_threshold = 1;
        let generator = CandidateGenerator::new(&net, &index, &config);
        let modes = HashSet::from_iter([Mode::new("bus")]);
        // Zero-length travel vector (coincident neighboring stops): ambiguous.
        let candidates = generator.generate_for_modes(
            StopFacilityId::from_raw(0),
            Point::new(50.0, 10.0),
            &modes,
            Some((0.0, 0.0)),
        );
        assert_eq!(candidates.len(), 1);
    }
}
