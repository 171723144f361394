//! Mapper configuration. Loadable from JSON; validated once before any
//! route is scheduled so a bad config aborts the whole batch instead of
//! failing midway through.

use std::path::Path;

use ahash::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TravelCostType {
    LinkLength,
    TravelTime,
}

impl Default for TravelCostType {
    fn default() -> Self {
        Self::TravelTime
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapperConfig {
    /// Schedule mode -> set of network modes it may be routed on.
    pub mode_routing_assignment: HashMap<String, HashSet<String>>,
    /// Initial candidate search radius, in the network's coordinate units.
    pub max_link_candidate_distance: f64,
    /// Radius ceiling; doubling stops once this is exceeded.
    #[serde(default = "default_max_radius")]
    pub max_link_candidate_distance_cap: f64,
    #[serde(default = "default_max_n_closest_links")]
    pub max_n_closest_links: usize,
    #[serde(default = "default_n_link_threshold")]
    pub n_link_threshold: usize,
    #[serde(default)]
    pub travel_cost_type: TravelCostType,
    #[serde(default = "default_true")]
    pub use_artificial_links: bool,
    #[serde(default)]
    pub schedule_freespeed_modes: HashSet<String>,
    /// Whether a real candidate's snap distance to its stop counts toward
    /// the solver's attachment cost. Off makes every real candidate equally
    /// free to attach, so the solver picks purely on routing cost.
    #[serde(default = "default_true")]
    pub routing_with_candidate_distance: bool,
    #[serde(default = "default_true")]
    pub remove_not_used_stop_facilities: bool,
    /// Worker threads for the per-route parallel solve phase.
    #[serde(default = "default_n_threads")]
    pub n_threads: usize,
    #[serde(default)]
    pub allow_loop_links: bool,
    /// Half-width of the band around a shape within which links incur no
    /// shape-bias penalty.
    #[serde(default = "default_shape_tolerance")]
    pub shape_tolerance: f64,
    /// Ceiling on the shape-bias multiplicative penalty.
    #[serde(default = "default_shape_penalty_ceiling")]
    pub shape_penalty_ceiling: f64,
    /// Optional per-route wall-clock budget, in milliseconds.
    #[serde(default)]
    pub per_route_timeout_ms: Option<u64>,
    /// Whether the finalizer should prune nodes/links unreachable from any
    /// schedule-used link.
    #[serde(default)]
    pub prune_orphans: bool,
    /// Allowed slack (in the network's length units) subtracted from the
    /// great-circle feasibility check.
    #[serde(default)]
    pub great_circle_slack: f64,
}

fn default_max_radius() -> f64 {
    2000.0
}
fn default_max_n_closest_links() -> usize {
    16
}
fn default_n_link_threshold() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_n_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}
fn default_shape_tolerance() -> f64 {
    30.0
}
fn default_shape_penalty_ceiling() -> f64 {
    10.0
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            mode_routing_assignment: HashMap::default(),
            max_link_candidate_distance: 300.0,
            max_link_candidate_distance_cap: default_max_radius(),
            max_n_closest_links: default_max_n_closest_links(),
            n_link_threshold: default_n_link_threshold(),
            travel_cost_type: TravelCostType::default(),
            use_artificial_links: true,
            schedule_freespeed_modes: HashSet::default(),
            routing_with_candidate_distance: true,
            remove_not_used_stop_facilities: true,
            n_threads: default_n_threads(),
            allow_loop_links: false,
            shape_tolerance: default_shape_tolerance(),
            shape_penalty_ceiling: default_shape_penalty_ceiling(),
            per_route_timeout_ms: None,
            prune_orphans: false,
            great_circle_slack: 0.0,
        }
    }
}

impl MapperConfig {
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Routable network modes for a given schedule mode, or a configuration
    /// error if the mode is unknown.
    pub fn network_modes_for(&self, schedule_mode: &str) -> Result<&HashSet<String>> {
        self.mode_routing_assignment.get(schedule_mode).ok_or_else(|| {
            Error::Configuration(format!(
                "no modeRoutingAssignment entry for schedule mode {schedule_mode:?}"
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.mode_routing_assignment.is_empty() {
            return Err(Error::Configuration(
                "modeRoutingAssignment must not be empty".to_string(),
            ));
        }
        if self.mode_routing_assignment.values().any(HashSet::is_empty) {
            return Err(Error::Configuration(
                "every modeRoutingAssignment entry must map to at least one network mode"
                    .to_string(),
            ));
        }
        if self.n_link_threshold > self.max_n_closest_links {
            return Err(Error::Configuration(format!(
                "nLinkThreshold ({}) must not exceed maxNClosestLinks ({})",
                self.n_link_threshold, self.max_n_closest_links
            )));
        }
        if self.max_link_candidate_distance <= 0.0 {
            return Err(Error::Configuration(
                "maxLinkCandidateDistance must be positive".to_string(),
            ));
        }
        if self.max_link_candidate_distance_cap < self.max_link_candidate_distance {
            return Err(Error::Configuration(
                "maxLinkCandidateDistanceCap must be >= maxLinkCandidateDistance".to_string(),
            ));
        }
        if self.n_threads == 0 {
            return Err(Error::Configuration("nThreads must be at least 1".to_string()));
        }
        Ok(())
    }
}
