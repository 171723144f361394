//! The transit schedule: lines, routes, stop facilities and departures.
//!
//! A `TransitRoute` starts out with its stops bound to *parent* stop
//! facilities and no link sequence. After mapping, each stop is rebound to
//! a route-specific *child* facility tied to one link, and the route
//! carries a concrete [`LinkSequence`].

use ahash::HashMap;
use geo::Point;

use crate::ids::{Interner, LineId, LineKind, LinkId, RouteId, RouteKind, ShapeId, StopFacilityId,
    StopFacilityKind};
use crate::model::network::Mode;

/// The chosen, concrete path of a mapped `TransitRoute`: a start link,
/// interior links, and an end link such that consecutive links share an
/// endpoint node. Stored flat; consecutive repetitions of the same link
/// are collapsed by the materializer before construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkSequence(Vec<LinkId>);

impl LinkSequence {
    #[must_use]
    pub fn new(links: Vec<LinkId>) -> Self {
        Self(links)
    }

    #[must_use]
    pub fn links(&self) -> &[LinkId] {
        &self.0
    }

    #[must_use]
    pub fn start(&self) -> Option<LinkId> {
        self.0.first().copied()
    }

    #[must_use]
    pub fn end(&self) -> Option<LinkId> {
        self.0.last().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Clone, Debug)]
pub struct TransitStopFacility {
    pub id: StopFacilityId,
    pub name: String,
    pub coord: Point<f64>,
    pub blocking: bool,
    /// Set once the mapper has committed this facility to a specific link.
    /// Parent facilities (pre-mapping) have `link = None`.
    pub link: Option<LinkId>,
    /// The original, never-mapped facility this one was ultimately derived
    /// from. Equal to `id` itself for a parent facility. Lets
    /// `child_stop_facility` resolve a `(parent, link)` binding correctly
    /// even when `parent` is already a child from an earlier mapping run,
    /// so re-mapping an already-mapped schedule is a no-op.
    pub root_parent: StopFacilityId,
}

#[derive(Clone, Copy, Debug)]
pub struct TransitRouteStop {
    pub stop: StopFacilityId,
    pub arrival_offset: f64,
    pub departure_offset: f64,
    pub await_departure: bool,
}

#[derive(Clone, Debug)]
pub struct Departure {
    pub id: String,
    pub departure_time: u32,
}

#[derive(Clone, Debug)]
pub struct TransitRoute {
    pub id: RouteId,
    pub mode: Mode,
    pub stops: Vec<TransitRouteStop>,
    pub departures: Vec<Departure>,
    pub shape: Option<ShapeId>,
    pub link_sequence: Option<LinkSequence>,
    /// For each entry in `stops`, the index into `link_sequence` of that
    /// stop's chosen link, set by the materializer alongside
    /// `link_sequence`. Lets the freespeed repair pass attribute a leg's
    /// scheduled travel time to the exact links that cover it.
    pub stop_link_index: Option<Vec<usize>>,
}

impl TransitRoute {
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.link_sequence.is_some()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransitLine {
    pub id: LineId,
    pub routes: HashMap<RouteId, TransitRoute>,
}

/// Top-level schedule: lines keyed by id, plus the shared pool of stop
/// facilities every route's stops reference into.
#[derive(Debug, Default)]
pub struct TransitSchedule {
    lines: HashMap<LineId, TransitLine>,
    stop_facilities: HashMap<StopFacilityId, TransitStopFacility>,
    /// (parent facility, link) -> child facility, so the materializer can
    /// reuse a child it already created for an earlier route/stop sharing
    /// the same binding (idempotence).
    child_index: HashMap<(StopFacilityId, LinkId), StopFacilityId>,
    line_interner: Interner<LineKind>,
    route_interner: Interner<RouteKind>,
    stop_interner: Interner<StopFacilityKind>,
}

impl TransitSchedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stop_facility(
        &mut self,
        external_id: &str,
        name: String,
        coord: Point<f64>,
        blocking: bool,
    ) -> StopFacilityId {
        let id = self.stop_interner.intern(external_id);
        self.stop_facilities.entry(id).or_insert(TransitStopFacility {
            id,
            name,
            coord,
            blocking,
            link: None,
            root_parent: id,
        });
        id
    }

    #[must_use]
    pub fn stop_facility(&self, id: StopFacilityId) -> &TransitStopFacility {
        &self.stop_facilities[&id]
    }

    /// Fallible lookup used to validate route stops against the facility
    /// pool before mapping starts.
    #[must_use]
    pub fn stop_facility_checked(&self, id: StopFacilityId) -> Option<&TransitStopFacility> {
        self.stop_facilities.get(&id)
    }

    pub fn stop_facility_mut(&mut self, id: StopFacilityId) -> &mut TransitStopFacility {
        self.stop_facilities.get_mut(&id).expect("stop facility id must exist")
    }

    pub fn stop_facilities(&self) -> impl Iterator<Item = &TransitStopFacility> {
        self.stop_facilities.values()
    }

    #[must_use]
    pub fn stop_facility_id_for(&self, external_id: &str) -> Option<StopFacilityId> {
        self.stop_interner.get(external_id)
    }

    pub fn add_line(&mut self, external_id: &str) -> LineId {
        let id = self.line_interner.intern(external_id);
        self.lines.entry(id).or_insert_with(|| TransitLine {
            id,
            routes: HashMap::default(),
        });
        id
    }

    pub fn add_route(
        &mut self,
        line: LineId,
        external_id: &str,
        mode: Mode,
        shape: Option<ShapeId>,
    ) -> RouteId {
        let id = self.route_interner.intern(external_id);
        self.lines
            .get_mut(&line)
            .expect("line id must exist")
            .routes
            .entry(id)
            .or_insert(TransitRoute {
                id,
                mode,
                stops: Vec::new(),
                departures: Vec::new(),
                shape,
                link_sequence: None,
                stop_link_index: None,
            });
        id
    }

    #[must_use]
    pub fn lines(&self) -> impl Iterator<Item = &TransitLine> {
        self.lines.values()
    }

    pub fn lines_mut(&mut self) -> impl Iterator<Item = &mut TransitLine> {
        self.lines.values_mut()
    }

    #[must_use]
    pub fn route(&self, line: LineId, route: RouteId) -> &TransitRoute {
        &self.lines[&line].routes[&route]
    }

    pub fn route_mut(&mut self, line: LineId, route: RouteId) -> &mut TransitRoute {
        self.lines.get_mut(&line).unwrap().routes.get_mut(&route).unwrap()
    }

    /// Every `(line, route)` pair in the schedule, in a deterministic order
    /// (sorted by interned id) so parallel solving and sequential commit
    /// agree on "route identifier order".
    #[must_use]
    pub fn route_ids_sorted(&self) -> Vec<(LineId, RouteId)> {
        let mut ids: Vec<(LineId, RouteId)> = self
            .lines
            .values()
            .flat_map(|line| line.routes.keys().map(move |r| (line.id, *r)))
            .collect();
        ids.sort_by(|a, b| {
            self.line_interner
                .lexicographic_order(a.0, b.0)
                .then_with(|| self.route_interner.lexicographic_order(a.1, b.1))
        });
        ids
    }

    #[must_use]
    pub fn find_child(&self, parent: StopFacilityId, link: LinkId) -> Option<StopFacilityId> {
        let root = self.stop_facilities.get(&parent).map_or(parent, |f| f.root_parent);
        self.child_index.get(&(root, link)).copied()
    }

    /// Obtains the child stop facility bound to `(root, link)`, where `root`
    /// is `parent`'s ultimate, never-mapped ancestor — resolved via
    /// [`TransitStopFacility::root_parent`] rather than trusting `parent`
    /// itself to be a root. This is what makes mapping idempotent: on a
    /// second mapper run over an already-mapped schedule, `parent` is
    /// already a child facility from the first run, but it still resolves
    /// back to the same root and therefore the same `child_index` entry,
    /// so re-binding the same stop to the same link returns the existing
    /// child instead of deriving a grandchild.
    ///
    /// Cloning happens from the root's own record (not `parent`'s) the
    /// first time a `(root, link)` pair is seen, so a derived id is always
    /// `<rootId>.link:<linkId>`, never nested. `link_external_id` is the
    /// link's I/O-boundary string form, used to build that identifier.
    pub fn child_stop_facility(
        &mut self,
        parent: StopFacilityId,
        link: LinkId,
        link_external_id: &str,
    ) -> StopFacilityId {
        let root = self.stop_facilities[&parent].root_parent;
        if let Some(existing) = self.child_index.get(&(root, link)) {
            return *existing;
        }
        let root_record = self.stop_facilities[&root].clone();
        let root_external = self.stop_interner.resolve(root).to_string();
        let derived_id = format!("{root_external}.link:{link_external_id}");
        let child_id = self.stop_interner.intern(&derived_id);
        self.stop_facilities.entry(child_id).or_insert(TransitStopFacility {
            id: child_id,
            name: root_record.name,
            coord: root_record.coord,
            blocking: root_record.blocking,
            link: Some(link),
            root_parent: root,
        });
        self.child_index.insert((root, link), child_id);
        child_id
    }

    pub fn remove_stop_facility(&mut self, id: StopFacilityId) {
        self.stop_facilities.remove(&id);
    }

    #[must_use]
    pub fn line_interner(&self) -> &Interner<LineKind> {
        &self.line_interner
    }

    #[must_use]
    pub fn route_interner(&self) -> &Interner<RouteKind> {
        &self.route_interner
    }

    #[must_use]
    pub fn stop_interner(&self) -> &Interner<StopFacilityKind> {
        &self.stop_interner
    }
}
