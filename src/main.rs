use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use propgeo::observability::{logging, metrics};
use propgeo::{GeocoderConfig, HierarchicalGeocoder};

#[derive(Parser)]
#[command(name = "propgeo")]
#[command(about = "Hierarchical geocoder for the PropPulse real-estate data platform")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a single address and print the result as JSON
    One {
        /// Free-text address
        address: String,
    },
    /// Resolve a file of addresses (one per line) and emit NDJSON results
    Batch {
        /// Input file, one address per line
        #[arg(long)]
        input: PathBuf,
        /// Output file; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        /// Addresses per sequential batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Concurrent requests within a batch
        #[arg(long)]
        max_concurrency: Option<usize>,
    },
    /// Delete expired rows from the geocode cache
    PurgeCache,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables (commercial credential, cache path)
    dotenv::dotenv().ok();

    logging::init_logging();
    metrics::init_metrics();

    let config = GeocoderConfig::load(cli.config.as_deref())?;
    let batch_defaults = config.geocoder.clone();
    let geocoder = Arc::new(HierarchicalGeocoder::new(config)?);

    match cli.command {
        Commands::One { address } => {
            let result = geocoder.geocode(&address).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Batch { input, output, batch_size, max_concurrency } => {
            let file = std::fs::File::open(&input)?;
            let addresses: Vec<String> = std::io::BufReader::new(file)
                .lines()
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .filter(|line| !line.trim().is_empty())
                .collect();
            info!("batch input: {} addresses from {}", addresses.len(), input.display());

            let results = Arc::clone(&geocoder)
                .geocode_batch(
                    &addresses,
                    batch_size.unwrap_or(batch_defaults.batch_size),
                    max_concurrency.unwrap_or(batch_defaults.max_concurrency),
                )
                .await;

            let mut out: Box<dyn Write> = match output {
                Some(path) => Box::new(std::fs::File::create(path)?),
                None => Box::new(std::io::stdout()),
            };
            for result in &results {
                writeln!(out, "{}", serde_json::to_string(result)?)?;
            }

            let stats = geocoder.stats();
            info!(
                "batch done: {} ok, {} failed, cache hit rate {:.1}%",
                stats.successes,
                stats.failures,
                stats.cache_hit_rate * 100.0
            );
            eprintln!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::PurgeCache => {
            let purged = geocoder.purge_cache();
            println!("purged {} expired cache rows", purged);
        }
    }

    Ok(())
}
