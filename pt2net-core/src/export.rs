//! GeoJSON export: an inspection convenience for the mapped network and
//! per-route itineraries. MATSim-style tooling chains consuming this
//! system's output always want a quick way to eyeball what got mapped.

use geojson::{Feature, FeatureCollection, Geometry, Value};
use serde_json::map::Map;

use crate::ids::{LineId, RouteId};
use crate::model::{Network, TransitSchedule};

fn linestring_feature(coords: Vec<Vec<f64>>, mut properties: Map<String, serde_json::Value>) -> Feature {
    properties.insert("kind".to_string(), "pt".into());
    Feature {
        geometry: Some(Geometry::new(Value::LineString(coords))),
        properties: Some(properties),
        id: None,
        bbox: None,
        foreign_members: None,
    }
}

/// One feature per surviving network link, its geometry the straight
/// segment between its endpoints, tagged with id/length/freespeed/modes.
#[must_use]
pub fn network_to_geojson(network: &Network) -> geojson::GeoJson {
    let features: Vec<Feature> = network
        .links()
        .map(|link| {
            let from = network.node(link.from_node).coord;
            let to = network.node(link.to_node).coord;
            let mut properties = Map::new();
            properties.insert("link_id".to_string(), network.link_interner().resolve(link.id).into());
            properties.insert("length".to_string(), link.length.into());
            properties.insert("freespeed".to_string(), link.freespeed.into());
            let modes: Vec<String> = link.modes.iter().map(|m| m.as_str().to_string()).collect();
            properties.insert("modes".to_string(), modes.into());
            linestring_feature(vec![vec![from.x(), from.y()], vec![to.x(), to.y()]], properties)
        })
        .collect();

    geojson::GeoJson::FeatureCollection(FeatureCollection { features, bbox: None, foreign_members: None })
}

/// One feature per mapped route, its geometry the concatenation of its
/// link sequence's endpoint coordinates, tagged with line/route id and the
/// link count. Unmapped routes (no link sequence) are skipped.
#[must_use]
pub fn itineraries_to_geojson(network: &Network, schedule: &TransitSchedule) -> geojson::GeoJson {
    let mut features = Vec::new();
    for line in schedule.lines() {
        for route in line.routes.values() {
            let Some(sequence) = &route.link_sequence else { continue };
            let coords = route_coords(network, sequence.links());
            if coords.len() < 2 {
                continue;
            }
            let mut properties = Map::new();
            properties.insert("line_id".to_string(), schedule.line_interner().resolve(line.id).into());
            properties.insert("route_id".to_string(), schedule.route_interner().resolve(route.id).into());
            properties.insert("link_count".to_string(), sequence.len().into());
            features.push(linestring_feature(coords, properties));
        }
    }
    geojson::GeoJson::FeatureCollection(FeatureCollection { features, bbox: None, foreign_members: None })
}

fn route_coords(network: &Network, links: &[crate::ids::LinkId]) -> Vec<Vec<f64>> {
    let mut coords = Vec::with_capacity(links.len() + 1);
    for (i, &link_id) in links.iter().enumerate() {
        let link = network.link(link_id);
        let from = network.node(link.from_node).coord;
        if i == 0 {
            coords.push(vec![from.x(), from.y()]);
        }
        let to = network.node(link.to_node).coord;
        coords.push(vec![to.x(), to.y()]);
    }
    coords
}

/// Convenience for the CLI: a single feature collection mixing the route's
/// link-sequence geometry with a debug line/route id pair, useful when
/// manually spot-checking one route rather than the whole batch.
#[must_use]
pub fn single_route_to_geojson(
    network: &Network,
    schedule: &TransitSchedule,
    line: LineId,
    route: RouteId,
) -> Option<geojson::GeoJson> {
    let route = schedule.route(line, route);
    let sequence = route.link_sequence.as_ref()?;
    let coords = route_coords(network, sequence.links());
    let mut properties = Map::new();
    properties.insert("link_count".to_string(), sequence.len().into());
    let feature = linestring_feature(coords, properties);
    Some(geojson::GeoJson::FeatureCollection(FeatureCollection {
        features: vec![feature],
        bbox: None,
        foreign_members: None,
    }))
}
