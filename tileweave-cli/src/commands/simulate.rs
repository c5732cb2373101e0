//! Simulate command - load a batch of tiles and report how each one ends.
//!
//! Tiles are laid out row by row from the north-west corner of the grid at
//! the requested zoom. By default every producer reads from an in-memory
//! source that synthesizes payloads; `--source http` uses the URL template
//! from config.ini instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::{Args, ValueEnum};
use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tileweave::config::ConfigFile;
use tileweave::coord::{grid_size, TileCoord};
use tileweave::coordinator::TileCoordinatorBuilder;
use tileweave::decode::{ImageHandle, ELEVATION_SAMPLE_COUNT};
use tileweave::events::{Subscription, TileEvent, TileEventKind};
use tileweave::fetch::{FetchBackend, FetchError, FetchRequest, MemoryFetchBackend};
use tileweave::logging::init_logging;
use tileweave::tile::{DataChannel, DataChannelState, ProducerKind, TileHandle};

use crate::error::CliError;

/// Where producers fetch their payloads from.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SourceType {
    /// Synthesized payloads, no network access
    Memory,
    /// The `[fetch] url_template` from config.ini
    Http,
}

/// Arguments for the simulate command.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of tiles to load
    #[arg(long, default_value_t = 16)]
    pub tiles: u32,

    /// Zoom level of the loaded tiles
    #[arg(long, default_value_t = 12)]
    pub zoom: u8,

    /// Payload source for every producer
    #[arg(long, value_enum, default_value_t = SourceType::Memory)]
    pub source: SourceType,

    /// Fail the elevation fetch of every K-th tile (memory source only)
    #[arg(long, value_name = "K")]
    pub fail_elevation_every: Option<u32>,

    /// Simulated fetch latency in milliseconds (memory source only)
    #[arg(long, default_value_t = 20)]
    pub latency_ms: u64,

    /// Seconds to wait for all tiles before reporting
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,

    /// Worker concurrency per producer (overrides config.ini)
    #[arg(long)]
    pub max_in_flight: Option<usize>,
}

/// How a tile ended within the wait window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    ReadyOnly,
    Stalled,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Finished => "finished",
            Outcome::ReadyOnly => "ready",
            Outcome::Stalled => "stalled",
        }
    }
}

/// Run the simulate command.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let _logging = init_logging(&config.logging).map_err(CliError::Logging)?;

    let coords = tile_layout(args.tiles, args.zoom)?;

    let interrupt = CancellationToken::new();
    let handler_token = interrupt.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(simulate(&args, &config, coords, interrupt))
}

async fn simulate(
    args: &SimulateArgs,
    config: &ConfigFile,
    coords: Vec<TileCoord>,
    interrupt: CancellationToken,
) -> Result<(), CliError> {
    let mut builder = TileCoordinatorBuilder::from_config(config);
    if let Some(max_in_flight) = args.max_in_flight {
        let mut worker = config.worker_config();
        worker.max_in_flight = max_in_flight.max(1);
        builder = builder.with_worker_config(worker);
    }
    let coordinator = with_backends(builder, args, config)?.build();

    info!(tiles = coords.len(), zoom = args.zoom, source = ?args.source, "Simulation started");
    let started = Instant::now();

    let mut loads = Vec::with_capacity(coords.len());
    for coord in &coords {
        loads.push(coordinator.load_and_subscribe(*coord)?);
    }

    let window = Duration::from_secs(args.timeout_secs);
    let outcomes = join_all(
        loads
            .into_iter()
            .map(|(tile, events)| watch_tile(tile, events, window, &interrupt)),
    )
    .await;
    if interrupt.is_cancelled() {
        warn!("Simulation interrupted, reporting partial results");
    }

    print_report(&outcomes, started.elapsed());
    println!();
    println!("{}", coordinator.metrics_snapshot());

    coordinator.shutdown().await;
    Ok(())
}

/// Tile coordinates for `count` tiles, row by row.
fn tile_layout(count: u32, zoom: u8) -> Result<Vec<TileCoord>, CliError> {
    let side = grid_size(zoom);
    if u64::from(count) > side * side {
        return Err(CliError::Config(format!(
            "Zoom {} holds only {} tiles, {} requested",
            zoom,
            side * side,
            count
        )));
    }
    (0..u64::from(count))
        .map(|i| TileCoord::new((i / side) as u32, (i % side) as u32, zoom).map_err(CliError::from))
        .collect()
}

fn with_backends(
    builder: TileCoordinatorBuilder,
    args: &SimulateArgs,
    config: &ConfigFile,
) -> Result<TileCoordinatorBuilder, CliError> {
    let backends: [(ProducerKind, Arc<dyn FetchBackend>); 3] = match args.source {
        SourceType::Memory => {
            let latency = Duration::from_millis(args.latency_ms);
            [
                (ProducerKind::Imagery, memory_backend(imagery_bytes, None, latency)),
                (
                    ProducerKind::Elevation,
                    memory_backend(elevation_bytes, args.fail_elevation_every, latency),
                ),
                (ProducerKind::Geometry, memory_backend(geometry_bytes, None, latency)),
            ]
        }
        SourceType::Http => {
            let backend: Arc<dyn FetchBackend> = match config.fetch.http_backend()? {
                Some(backend) => Arc::new(backend),
                None => {
                    return Err(CliError::Config(
                        "No url_template set in [fetch]. Use 'tileweave config show' to check."
                            .to_string(),
                    ))
                }
            };
            [
                (ProducerKind::Imagery, Arc::clone(&backend)),
                (ProducerKind::Elevation, Arc::clone(&backend)),
                (ProducerKind::Geometry, backend),
            ]
        }
    };

    Ok(backends
        .into_iter()
        .fold(builder, |builder, (kind, backend)| builder.with_producer(kind, backend)))
}

fn memory_backend(
    payload: fn(&TileCoord) -> Result<Bytes, FetchError>,
    fail_every: Option<u32>,
    latency: Duration,
) -> Arc<dyn FetchBackend> {
    let backend = MemoryFetchBackend::new()
        .with_latency(latency)
        .with_generator(move |request: &FetchRequest| {
            if fails(&request.coord, fail_every) {
                return Err(FetchError::NotFound(format!(
                    "{} {} (simulated)",
                    request.kind, request.coord
                )));
            }
            payload(&request.coord)
        });
    Arc::new(backend)
}

/// Whether the tile's position in the layout is a multiple of `every`.
fn fails(coord: &TileCoord, every: Option<u32>) -> bool {
    let Some(every) = every.filter(|k| *k > 0) else {
        return false;
    };
    let index = u64::from(coord.row) * grid_size(coord.zoom) + u64::from(coord.col);
    index % u64::from(every) == 0
}

fn imagery_bytes(coord: &TileCoord) -> Result<Bytes, FetchError> {
    let shade = (coord.col * 16 % 256) as u8;
    ImageHandle::solid(16, 16, [shade, 128, 255 - shade, 255])
        .encode_png()
        .map(Bytes::from)
        .map_err(|e| FetchError::Network(e.to_string()))
}

/// Raw ARGB grid with a flat height derived from the tile position, at the
/// default 0.1 m resolution.
fn elevation_bytes(coord: &TileCoord) -> Result<Bytes, FetchError> {
    let steps = (coord.row + coord.col) * 100;
    let sample = [0, (steps >> 16) as u8, (steps >> 8) as u8, steps as u8];
    let buffer: Vec<u8> = sample
        .iter()
        .copied()
        .cycle()
        .take(ELEVATION_SAMPLE_COUNT * 4)
        .collect();
    Ok(Bytes::from(buffer))
}

fn geometry_bytes(coord: &TileCoord) -> Result<Bytes, FetchError> {
    let document = serde_json::json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [coord.col as f64 + 0.5, coord.row as f64 + 0.5] },
            "properties": { "tile": coord.to_string() }
        }]
    });
    serde_json::to_vec(&document)
        .map(Bytes::from)
        .map_err(|e| FetchError::Network(e.to_string()))
}

/// Follows one tile until it finishes, the window closes or the user
/// interrupts.
async fn watch_tile(
    tile: TileHandle,
    mut events: Subscription<TileEvent>,
    window: Duration,
    interrupt: &CancellationToken,
) -> (TileHandle, Outcome) {
    let mut ready = false;
    let follow = async {
        while let Some(event) = events.recv().await {
            match event.kind {
                TileEventKind::ReadyForGeometryProcessing => ready = true,
                TileEventKind::TileFinished => return true,
                TileEventKind::DataChanged(_) => {}
            }
        }
        false
    };
    let finished = tokio::select! {
        biased;
        _ = interrupt.cancelled() => false,
        result = timeout(window, follow) => result.unwrap_or(false),
    };

    let outcome = match (finished, ready) {
        (true, _) => Outcome::Finished,
        (false, true) => Outcome::ReadyOnly,
        (false, false) => Outcome::Stalled,
    };
    (tile, outcome)
}

fn print_report(outcomes: &[(TileHandle, Outcome)], elapsed: Duration) {
    println!(
        "{:<16} {:<9} {:<9} {:<9} {:<9} {:>10}",
        "Tile", "Imagery", "Elevation", "Geometry", "Outcome", "Height"
    );
    for (tile, outcome) in outcomes {
        let channel = |c| match tile.channel_state(c) {
            Ok(DataChannelState::None) => "-",
            Ok(DataChannelState::Working) => "working",
            Ok(DataChannelState::Finished) => "done",
            Err(_) => "stale",
        };
        println!(
            "{:<16} {:<9} {:<9} {:<9} {:<9} {:>9.1}m",
            tile.coord().to_string(),
            channel(DataChannel::Imagery),
            channel(DataChannel::Elevation),
            channel(DataChannel::Geometry),
            outcome.label(),
            tile.query_elevation(0.5, 0.5)
        );
    }

    let count = |wanted| outcomes.iter().filter(|(_, o)| *o == wanted).count();
    println!();
    println!(
        "{} finished, {} ready only, {} stalled in {:.2}s",
        count(Outcome::Finished),
        count(Outcome::ReadyOnly),
        count(Outcome::Stalled),
        elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tileweave::decode::{decode_elevation, decode_imagery, parse_geometry, ElevationEncoding};

    #[test]
    fn test_layout_fills_rows_first() {
        let coords = tile_layout(3, 1).unwrap();
        assert_eq!(coords.len(), 3);
        assert_eq!(coords[0], TileCoord::new(0, 0, 1).unwrap());
        assert_eq!(coords[1], TileCoord::new(0, 1, 1).unwrap());
        assert_eq!(coords[2], TileCoord::new(1, 0, 1).unwrap());
    }

    #[test]
    fn test_layout_rejects_overflow() {
        assert!(tile_layout(5, 0).is_err());
        assert_eq!(tile_layout(1, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_fail_every_uses_layout_index() {
        let first = TileCoord::new(0, 0, 2).unwrap();
        let third = TileCoord::new(0, 3, 2).unwrap();
        let fifth = TileCoord::new(1, 0, 2).unwrap();
        assert!(fails(&first, Some(4)));
        assert!(!fails(&third, Some(4)));
        assert!(fails(&fifth, Some(4)));
        assert!(!fails(&first, None));
        assert!(!fails(&first, Some(0)));
    }

    #[test]
    fn test_synthesized_payloads_decode() {
        let coord = TileCoord::new(2, 3, 4).unwrap();

        let image = decode_imagery(&imagery_bytes(&coord).unwrap()).unwrap();
        assert_eq!(image.width(), 16);

        let grid =
            decode_elevation(&elevation_bytes(&coord).unwrap(), &ElevationEncoding::default())
                .unwrap();
        assert!((grid.sample(0.5, 0.5) - 50.0).abs() < 1e-3);

        let document = parse_geometry(&geometry_bytes(&coord).unwrap()).unwrap();
        assert_eq!(document.feature_count(), 1);
    }
}
