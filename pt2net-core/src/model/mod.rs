//! The data model shared by every pipeline stage.

pub mod network;
pub mod schedule;
pub mod shape;

pub use network::{Mode, ModeSet, Network, NodeRecord, LinkRecord, ARTIFICIAL_MODE};
pub use schedule::{
    Departure, LinkSequence, TransitLine, TransitRoute, TransitRouteStop, TransitSchedule,
    TransitStopFacility,
};
pub use shape::{Shape, ShapeMap};
