//! tilectl - Command line interface for tilecore
//!
//! Exposes the extent arithmetic and configuration for scripting, and a
//! `demo` command that runs a small in-process cluster.

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tilecore::blob_ctx::WorkerMap;
use tilecore::config::Flags;
use tilecore::extent::{self, Extent};
use tilecore::{
    BlobContext, Buffer, Config, ElementType, LoopbackProxy, MemoryRegistry, Reducer, Tile,
    TileId, TileStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilectl")]
#[command(about = "Inspect and exercise the tilecore array storage core")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Intersect two extents
    Intersect {
        /// First extent, as `ul..lr[@array_shape]` (e.g. `0,0..4,4@8,8`)
        a: String,
        /// Second extent
        b: String,
    },

    /// Select a region of an array with a slice expression
    Slice {
        /// Array shape (e.g. `10,20`)
        shape: String,
        /// Slice expression (e.g. `2:5, -3:`)
        spec: String,
    },

    /// Row-major linear index of a coordinate
    Ravel {
        /// Coordinate (e.g. `1,2`)
        coord: String,
        /// Array shape
        #[arg(short, long)]
        shape: String,
    },

    /// Coordinate of a row-major linear index
    Unravel {
        index: i64,
        /// Array shape
        #[arg(short, long)]
        shape: String,
    },

    /// Recover the array shape from a set of extents tiling it
    FindShape {
        /// Extents, as `ul..lr`
        #[arg(required = true)]
        extents: Vec<String>,
    },

    /// Show every flag with its current value
    Flags,

    /// Run an in-process cluster: create row tiles, update, read back
    Demo {
        /// Number of workers (defaults to the `num_workers` setting)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Number of row tiles (defaults to one per worker)
        #[arg(short, long)]
        tiles: Option<usize>,
        /// Rows per tile
        #[arg(short, long, default_value = "2")]
        rows: i64,
        /// Columns of the array
        #[arg(long, default_value = "4")]
        cols: i64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?.with_env()?,
        None => Config::from_env()?,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Intersect { a, b } => {
            let a = parse_extent(&a)?;
            let b = parse_extent(&b)?;
            let region = extent::intersection(&a, &b)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "empty": region.is_none(),
                    "extent": region.as_ref().map(extent_json),
                }),
            );
        }

        Commands::Slice { shape, spec } => {
            let shape = parse_list(&shape)?;
            let items = extent::parse_slice_spec(&spec)?;
            let region = extent::from_slice(&items, &shape)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "empty": region.is_none(),
                    "extent": region.as_ref().map(extent_json),
                }),
            );
        }

        Commands::Ravel { coord, shape } => {
            let coord = parse_list(&coord)?;
            let shape = parse_list(&shape)?;
            check_rank(&coord, &shape)?;
            output(
                &cli.format,
                &serde_json::json!({
                    "index": extent::ravelled_pos(&coord, &shape)
                }),
            );
        }

        Commands::Unravel { index, shape } => {
            let shape = parse_list(&shape)?;
            let total: i64 = shape.iter().product();
            if index < 0 || index >= total {
                anyhow::bail!("index {} out of range for {} elements", index, total);
            }
            output(
                &cli.format,
                &serde_json::json!({
                    "coord": extent::unravelled_pos(index, &shape)
                }),
            );
        }

        Commands::FindShape { extents } => {
            let extents = extents
                .iter()
                .map(|e| parse_extent(e))
                .collect::<anyhow::Result<Vec<_>>>()?;
            output(
                &cli.format,
                &serde_json::json!({
                    "shape": extent::find_shape(&extents)?
                }),
            );
        }

        Commands::Flags => {
            let flags = Flags::from_config(&config);
            let items: Vec<_> = flags
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "name": f.name,
                        "kind": f.value.kind(),
                        "value": f.value.to_string(),
                        "help": f.help
                    })
                })
                .collect();
            output(
                &cli.format,
                &serde_json::json!({
                    "count": items.len(),
                    "flags": items
                }),
            );
        }

        Commands::Demo {
            workers,
            tiles,
            rows,
            cols,
        } => {
            let workers = workers.unwrap_or(config.num_workers);
            let tiles = tiles.unwrap_or(workers);
            if workers < 1 || tiles < 1 || rows < 1 || cols < 1 {
                anyhow::bail!("workers, tiles, rows and cols must all be positive");
            }
            let report = run_demo(&config, workers, tiles, rows, cols)?;
            output(&cli.format, &report);
        }
    }

    Ok(())
}

/// Split an array of `tiles * rows` by `cols` into row bands placed on
/// workers by the configured strategy, add a ramp to every band, and read
/// the middle column back.
fn run_demo(
    config: &Config,
    workers: usize,
    tiles: usize,
    rows: i64,
    cols: i64,
) -> anyhow::Result<serde_json::Value> {
    let array_shape = [rows * i64::try_from(tiles)?, cols];
    let hosts = config.placement(workers);
    let registry = MemoryRegistry::global();

    let mut stores = Vec::new();
    let mut peers: WorkerMap = HashMap::new();
    for w in 0..i32::try_from(workers)? {
        let store = if config.use_shared_memory {
            Arc::new(TileStore::with_registry(w, registry.clone()))
        } else {
            Arc::new(TileStore::new(w))
        };
        peers.insert(w, Arc::new(LoopbackProxy::spawn(store.clone())?));
        stores.push(store);
    }
    let master = BlobContext::master(peers);
    info!(workers, tiles, ?array_shape, shared = config.use_shared_memory, "cluster ready");

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(async {
        let mut placed = Vec::new();
        for t in 0..tiles {
            let owner = config.tile_owner(t, tiles, workers)?;
            let band = rows * t as i64;
            let tile = Tile::zeros(
                Extent::create(&[band, 0], &[band + rows, cols], Some(&array_shape))?,
                ElementType::Int64,
            );
            let id = master
                .create(TileId::for_worker(i32::try_from(owner)?), tile)
                .await?;
            placed.push((id, owner));
        }

        let ramp: Vec<i64> = (0..rows * cols).collect();
        let payload = Buffer::from_elements(&[rows as usize, cols as usize], &ramp)?;
        let pending: Vec<_> = placed
            .iter()
            .map(|&(id, _)| master.update(id, None, payload.clone(), Reducer::Sum))
            .collect();
        for fut in pending {
            fut.await?;
        }

        let column = Extent::create(&[0, cols / 2], &[rows, cols / 2 + 1], None)?;
        let mut report = Vec::new();
        for &(id, owner) in &placed {
            let resp = master.get_flatten(id, Some(&column)).await?;
            report.push(serde_json::json!({
                "id": id.to_string(),
                "worker": owner,
                "host": hosts[owner],
                "extent": extent_json(&resp.extent),
                "values": resp.data.to_vec::<i64>()?
            }));
        }

        Ok::<_, anyhow::Error>(serde_json::json!({
            "array_shape": array_shape,
            "workers": workers,
            "tiles": report,
            "stored": stores.iter().map(|s| s.len()).sum::<usize>(),
            "shared_memory": config.use_shared_memory,
            "shared_sources": registry.len()
        }))
    })
}

fn parse_list(text: &str) -> anyhow::Result<Vec<i64>> {
    text.split(',')
        .map(|s| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| anyhow::anyhow!("invalid integer '{}' in '{}'", s.trim(), text))
        })
        .collect()
}

fn check_rank(a: &[i64], b: &[i64]) -> anyhow::Result<()> {
    if a.len() != b.len() {
        anyhow::bail!("rank mismatch: {} vs {}", a.len(), b.len());
    }
    Ok(())
}

/// Parse `ul..lr` with an optional `@array_shape` suffix
fn parse_extent(text: &str) -> anyhow::Result<Extent> {
    let (bounds, array_shape) = match text.split_once('@') {
        Some((bounds, shape)) => (bounds, Some(parse_list(shape)?)),
        None => (text, None),
    };
    let (ul, lr) = bounds
        .split_once("..")
        .ok_or_else(|| anyhow::anyhow!("expected ul..lr, got '{}'", text))?;
    Ok(Extent::create(
        &parse_list(ul)?,
        &parse_list(lr)?,
        array_shape.as_deref(),
    )?)
}

fn extent_json(extent: &Extent) -> serde_json::Value {
    serde_json::json!({
        "ul": extent.ul(),
        "lr": extent.lr(),
        "shape": extent.shape(),
        "array_shape": extent.array_shape(),
        "size": extent.size()
    })
}

fn output(format: &OutputFormat, value: &serde_json::Value) {
    match format {
        OutputFormat::Json => {
            println!("{}", value);
        }
        OutputFormat::Text => {
            println!("{:#}", value);
        }
    }
}
