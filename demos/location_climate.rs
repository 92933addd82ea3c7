//! Prints the monthly climate at a location, blended from nearby SMHI stations.
//!
//! Usage: `cargo run --example location_climate -- [lat] [lon] [day|month|year] [config.json]`

use station_climate::{ClimateEngine, ClimateError, EngineConfig, LatLon, Resolution};
use std::env;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<(), ClimateError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let latitude = args.first().and_then(|s| s.parse().ok()).unwrap_or(59.33);
    let longitude = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(18.07);
    let resolution = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(Resolution::Month);
    let config = match args.get(3) {
        Some(path) => EngineConfig::from_json_file(Path::new(path))?,
        None => EngineConfig::default(),
    };

    let engine = ClimateEngine::new(config).await?;
    let climate = engine
        .select_and_blend()
        .location(LatLon(latitude, longitude))
        .resolution(resolution)
        .call()
        .await?;

    println!("--- Cloud stations ---");
    for station in &climate.cloud_stations {
        println!(
            "{:>8} {:<30} {:>7.1} km {:>5.1}%",
            station.station_id,
            station.name,
            station.distance_km,
            station.weight_pct()
        );
    }
    println!("--- Lightning stations ---");
    for station in &climate.lightning_stations {
        println!(
            "{:>8} {:<30} {:>7.1} km {:>5.1}%",
            station.station_id,
            station.name,
            station.distance_km,
            station.weight_pct()
        );
    }

    println!("--- {} climate ---", climate.resolution);
    for point in &climate.points {
        if point.no_data {
            println!("{:>6}  no data", point.label);
            continue;
        }
        let cloud = point
            .cloud_coverage
            .map(|c| format!("{c:5.1}%"))
            .unwrap_or_else(|| "    -".to_string());
        let lightning = match (point.lightning_probability, point.lightning_lower, point.lightning_upper) {
            (Some(p), Some(lo), Some(hi)) => format!(
                "{:.2}% [{:.2}%, {:.2}%]",
                p * 100.0,
                lo * 100.0,
                hi * 100.0
            ),
            (Some(p), _, _) => format!("{:.2}%", p * 100.0),
            _ => "-".to_string(),
        };
        println!("{:>6}  cloud {}  lightning {}", point.label, cloud, lightning);
    }

    println!("--- Quality: {:?} ---", climate.overall_quality);
    println!("{:#?}", climate.quality);
    if let Some(quality) = &climate.lightning_quality {
        println!("lightning: {:?}", quality.level);
    }

    Ok(())
}
