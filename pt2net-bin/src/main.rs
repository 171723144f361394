use std::path::PathBuf;
use std::process::ExitCode;

use pt2net_core::config::MapperConfig;
use pt2net_core::export;
use pt2net_core::loaders;

struct Args {
    network_dir: PathBuf,
    schedule_dir: PathBuf,
    config_path: PathBuf,
    geojson_out: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut positional = std::env::args().skip(1);
    let network_dir = positional.next().ok_or("missing NETWORK_DIR argument")?.into();
    let schedule_dir = positional.next().ok_or("missing SCHEDULE_DIR argument")?.into();
    let config_path = positional.next().ok_or("missing CONFIG_PATH argument")?.into();
    let geojson_out = positional.next().map(PathBuf::from);
    Ok(Args { network_dir, schedule_dir, config_path, geojson_out })
}

fn usage() -> String {
    "usage: pt2net NETWORK_DIR SCHEDULE_DIR CONFIG_PATH [GEOJSON_OUT]".to_string()
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}\n{}", usage());
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pt2net: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> pt2net_core::Result<()> {
    let config = MapperConfig::load(&args.config_path)?;

    let t0 = std::time::Instant::now();
    let mut network = loaders::load_network(&args.network_dir)?;
    let (mut schedule, shapes) = loaders::load_schedule(&args.schedule_dir)?;
    println!(
        "loaded network ({} nodes, {} links) and schedule in {:?}",
        network.node_count(),
        network.link_count(),
        t0.elapsed()
    );

    let t1 = std::time::Instant::now();
    let report = pt2net_core::run(&mut network, &mut schedule, &shapes, &config)?;
    println!("mapped in {:?}", t1.elapsed());
    println!("{}", report.summary(&schedule));

    if let Some(out_dir) = &args.geojson_out {
        std::fs::create_dir_all(out_dir)?;
        write_geojson(&out_dir.join("network.geojson"), &export::network_to_geojson(&network))?;
        write_geojson(
            &out_dir.join("itineraries.geojson"),
            &export::itineraries_to_geojson(&network, &schedule),
        )?;
        println!("wrote GeoJSON preview to {}", out_dir.display());
    }

    Ok(())
}

fn write_geojson(path: &std::path::Path, geojson: &geojson::GeoJson) -> pt2net_core::Result<()> {
    std::fs::write(path, geojson.to_string())?;
    Ok(())
}
