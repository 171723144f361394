//! Thin I/O-boundary loaders: turn a CSV-described network and a
//! GTFS-shaped schedule directory into the in-memory [`Network`] and
//! [`TransitSchedule`] the mapper consumes. Feed validation, service-day
//! filtering and arbitrary schema variance are explicitly out of scope;
//! these exist only to produce a runnable pair for the CLI and integration
//! tests.

use std::path::{Path, PathBuf};

use ahash::HashMap;
use geo::Point;
use itertools::Itertools;
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;

use crate::error::{Error, Result};
use crate::model::schedule::Departure;
use crate::model::{Mode, ModeSet, Network, ShapeMap, TransitRouteStop, TransitSchedule};

fn read_csv(file_path: PathBuf) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .try_into_reader_with_file_path(Some(file_path))?
        .finish()?;
    Ok(df)
}

fn required_str<'a>(df: &'a DataFrame, column: &str) -> Result<Vec<&'a str>> {
    Ok(df
        .column(column)?
        .str()?
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect())
}

fn required_f64(df: &DataFrame, column: &str) -> Result<Vec<f64>> {
    Ok(df
        .column(column)?
        .cast(&DataType::Float64)?
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect())
}

/// Loads a network from `nodes.csv` (`node_id,x,y`) and `links.csv`
/// (`link_id,from_node,to_node,length,freespeed,capacity,modes`), where
/// `modes` is a `;`-separated list of mode tags permitted on that link.
pub fn load_network(dir: impl AsRef<Path>) -> Result<Network> {
    let dir = dir.as_ref();
    let nodes_df = read_csv(dir.join("nodes.csv"))?;
    let links_df = read_csv(dir.join("links.csv"))?;

    let mut network = Network::new();

    let node_ids = required_str(&nodes_df, "node_id")?;
    let xs = required_f64(&nodes_df, "x")?;
    let ys = required_f64(&nodes_df, "y")?;
    for i in 0..node_ids.len() {
        network.add_node(node_ids[i], Point::new(xs[i], ys[i]));
    }

    let link_ids = required_str(&links_df, "link_id")?;
    let from_nodes = required_str(&links_df, "from_node")?;
    let to_nodes = required_str(&links_df, "to_node")?;
    let lengths = required_f64(&links_df, "length")?;
    let freespeeds = required_f64(&links_df, "freespeed")?;
    let capacities = required_f64(&links_df, "capacity")?;
    let modes_col = required_str(&links_df, "modes")?;

    for i in 0..link_ids.len() {
        let from = network.node_id_for(from_nodes[i]).ok_or_else(|| {
            Error::MissingInput(format!("link {} references unknown node {}", link_ids[i], from_nodes[i]))
        })?;
        let to = network.node_id_for(to_nodes[i]).ok_or_else(|| {
            Error::MissingInput(format!("link {} references unknown node {}", link_ids[i], to_nodes[i]))
        })?;
        let modes = ModeSet::from_modes(modes_col[i].split(';').filter(|m| !m.is_empty()).map(Mode::new));
        network.add_link(link_ids[i], from, to, lengths[i], freespeeds[i], capacities[i], modes);
    }

    Ok(network)
}

/// Loads an unmapped schedule from a GTFS-shaped directory: `stops.txt`,
/// `routes.txt`, `trips.txt`, `stop_times.txt`, and an optional
/// `shapes.txt`. No calendar/service-day filtering is applied — every trip
/// is assumed active — and `routes.txt`'s `mode` column is taken verbatim
/// as the schedule mode tag rather than decoded from a GTFS `route_type`
/// integer, since that decoding is policy the mapper itself does not own.
pub fn load_schedule(dir: impl AsRef<Path>) -> Result<(TransitSchedule, ShapeMap)> {
    let dir = dir.as_ref();
    let mut schedule = TransitSchedule::new();
    let mut shapes = ShapeMap::new();

    load_stops(&mut schedule, &read_csv(dir.join("stops.txt"))?)?;
    let route_modes = load_route_modes(&read_csv(dir.join("routes.txt"))?)?;
    let trip_routes = load_trips(&read_csv(dir.join("trips.txt"))?, &route_modes)?;

    let shapes_path = dir.join("shapes.txt");
    if shapes_path.exists() {
        load_shapes(&mut shapes, &read_csv(shapes_path)?)?;
    }

    load_stop_times(
        &mut schedule,
        &read_csv(dir.join("stop_times.txt"))?,
        &trip_routes,
        &route_modes,
        &shapes,
    )?;

    Ok((schedule, shapes))
}

fn load_stops(schedule: &mut TransitSchedule, df: &DataFrame) -> Result<()> {
    let ids = required_str(df, "stop_id")?;
    let names = required_str(df, "stop_name")?;
    let xs = required_f64(df, "stop_lon")?;
    let ys = required_f64(df, "stop_lat")?;
    for i in 0..ids.len() {
        schedule.add_stop_facility(ids[i], names[i].to_string(), Point::new(xs[i], ys[i]), false);
    }
    Ok(())
}

/// `route_id -> schedule mode`, read once up front so trip/stop_time rows
/// (which only carry the GTFS `route_id` foreign key) can resolve a route's
/// mode without re-reading `routes.txt`.
fn load_route_modes(df: &DataFrame) -> Result<HashMap<String, Mode>> {
    let ids = required_str(df, "route_id")?;
    let modes = required_str(df, "mode")?;
    Ok(ids.iter().zip(&modes).map(|(id, mode)| ((*id).to_string(), Mode::new(mode))).collect())
}

struct TripInfo {
    route_id: String,
    shape_id: Option<String>,
}

fn load_trips(df: &DataFrame, route_modes: &HashMap<String, Mode>) -> Result<HashMap<String, TripInfo>> {
    let trip_ids = required_str(df, "trip_id")?;
    let route_ids = required_str(df, "route_id")?;
    let shape_ids: Option<Vec<&str>> = df.column("shape_id").ok().and_then(|c| c.str().ok()).map(|c| {
        c.into_iter().map(|v| v.unwrap_or_default()).collect()
    });

    let mut out = HashMap::default();
    for i in 0..trip_ids.len() {
        if !route_modes.contains_key(route_ids[i]) {
            return Err(Error::MissingInput(format!(
                "trip {} references unknown route {}",
                trip_ids[i], route_ids[i]
            )));
        }
        let shape_id = shape_ids.as_ref().map(|ids| ids[i]).filter(|s| !s.is_empty()).map(str::to_string);
        out.insert(trip_ids[i].to_string(), TripInfo { route_id: route_ids[i].to_string(), shape_id });
    }
    Ok(out)
}

fn load_shapes(shapes: &mut ShapeMap, df: &DataFrame) -> Result<()> {
    let shape_ids = required_str(df, "shape_id")?;
    let lons = required_f64(df, "shape_pt_lon")?;
    let lats = required_f64(df, "shape_pt_lat")?;
    let seqs = required_f64(df, "shape_pt_sequence")?;

    let mut rows: Vec<(&str, f64, f64, f64)> =
        (0..shape_ids.len()).map(|i| (shape_ids[i], lons[i], lats[i], seqs[i])).collect();
    rows.sort_by(|a, b| a.0.cmp(b.0).then(a.3.partial_cmp(&b.3).unwrap_or(std::cmp::Ordering::Equal)));

    for (shape_id, group) in &rows.into_iter().chunk_by(|row| row.0.to_string()) {
        let points: Vec<Point<f64>> = group.map(|(_, lon, lat, _)| Point::new(lon, lat)).collect();
        shapes.insert(&shape_id, points);
    }
    Ok(())
}

/// First trip encountered per route establishes the route's stop sequence
/// (arrival/departure offsets relative to that trip's own first departure);
/// every trip on the route becomes one [`Departure`].
fn load_stop_times(
    schedule: &mut TransitSchedule,
    df: &DataFrame,
    trip_routes: &HashMap<String, TripInfo>,
    route_modes: &HashMap<String, Mode>,
    shapes: &ShapeMap,
) -> Result<()> {
    let trip_ids = required_str(df, "trip_id")?;
    let stop_ids = required_str(df, "stop_id")?;
    let sequences = required_f64(df, "stop_sequence")?;
    let arrivals = time_column(df, "arrival_time")?;
    let departures = time_column(df, "departure_time")?;

    let mut rows: Vec<(&str, &str, f64, u32, u32)> =
        (0..trip_ids.len()).map(|i| (trip_ids[i], stop_ids[i], sequences[i], arrivals[i], departures[i])).collect();
    rows.sort_by(|a, b| a.0.cmp(b.0).then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal)));

    let mut route_ids: HashMap<String, crate::ids::RouteId> = HashMap::default();
    let mut line_ids: HashMap<String, crate::ids::LineId> = HashMap::default();

    for (trip_id, group) in &rows.into_iter().chunk_by(|row| row.0.to_string()) {
        let stop_rows: Vec<_> = group.collect();
        let trip_info = trip_routes
            .get(&trip_id)
            .ok_or_else(|| Error::MissingInput(format!("stop_times references unknown trip {trip_id}")))?;

        let line_id = *line_ids
            .entry(trip_info.route_id.clone())
            .or_insert_with(|| schedule.add_line(&trip_info.route_id));

        let route_id = if let Some(&route_id) = route_ids.get(&trip_info.route_id) {
            route_id
        } else {
            let mode = route_modes
                .get(&trip_info.route_id)
                .ok_or_else(|| Error::MissingInput(format!("route {} has no mode", trip_info.route_id)))?
                .clone();
            let shape_id = trip_info.shape_id.as_ref().and_then(|s| shapes.id_for(s));
            let stops = build_stops(schedule, &stop_rows)?;
            let route_id = schedule.add_route(line_id, &trip_info.route_id, mode, shape_id);
            schedule.route_mut(line_id, route_id).stops = stops;
            route_ids.insert(trip_info.route_id.clone(), route_id);
            route_id
        };

        let departure_time = stop_rows.first().map(|r| r.4).unwrap_or(0);
        schedule
            .route_mut(line_id, route_id)
            .departures
            .push(Departure { id: trip_id, departure_time });
    }

    Ok(())
}

fn build_stops(schedule: &TransitSchedule, rows: &[(&str, &str, f64, u32, u32)]) -> Result<Vec<TransitRouteStop>> {
    let t0 = f64::from(rows.first().map(|r| r.4).unwrap_or(0));
    rows.iter()
        .map(|&(_, stop_id, _, arrival, departure)| {
            let stop = schedule
                .stop_facility_id_for(stop_id)
                .ok_or_else(|| Error::MissingInput(format!("stop_times references unknown stop {stop_id}")))?;
            Ok(TransitRouteStop {
                stop,
                arrival_offset: f64::from(arrival) - t0,
                departure_offset: f64::from(departure) - t0,
                await_departure: false,
            })
        })
        .collect()
}

fn time_column(df: &DataFrame, column: &str) -> Result<Vec<u32>> {
    let series = df.column(column)?;
    if let Ok(strs) = series.str() {
        return Ok(strs.into_iter().map(|v| hhmmss_to_sec(v.unwrap_or("00:00:00"))).collect());
    }
    Ok(series.cast(&DataType::UInt32)?.u32()?.into_iter().map(|v| v.unwrap_or(0)).collect())
}

fn hhmmss_to_sec(value: &str) -> u32 {
    let parts: Vec<u32> = value.splitn(3, ':').map(|p| p.parse().unwrap_or(0)).collect();
    match parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [h, m] => h * 3600 + m * 60,
        _ => 0,
    }
}
