//! Schedule-to-network mapper: turns a transit schedule whose routes only
//! name stops into one where every route carries an explicit, traversable
//! path through a multi-modal network.
//!
//! [`mapper::run`] is the entry point; everything else is a stage it wires
//! together.

pub mod candidates;
pub mod config;
pub mod error;
pub mod export;
pub mod finalizer;
pub mod ids;
pub mod loaders;
pub mod mapper;
pub mod materializer;
pub mod model;
pub mod pseudograph;
pub mod report;
pub mod router;
pub mod spatial;

pub use config::{MapperConfig, TravelCostType};
pub use error::{Error, Result};
pub use mapper::run;
pub use model::{
    Mode, ModeSet, Network, NodeRecord, LinkRecord, Shape, ShapeMap, TransitLine, TransitRoute,
    TransitRouteStop, TransitSchedule, TransitStopFacility,
};
pub use report::{MappingReport, UnmappableReason};
