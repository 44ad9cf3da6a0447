//! MindRecord command-line tool
//!
//! Inspects, dumps, verifies and converts MindRecord shard sets.
//!
//! # Usage
//!
//! ```bash
//! # Show schema, record count and data files
//! mindrecord info data/train.mindrecord
//!
//! # Print the first ten records as JSON lines, decoded on four threads
//! mindrecord dump data/train.mindrecord --limit 10 --workers 4
//!
//! # Re-save a set as eight data files with zstd-compressed blobs
//! mindrecord --config mindrecord.toml copy data/train.mindrecord out/train.mindrecord --num-files 8
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mindrecord_core::{MindRecordConfig, Session};

/// MindRecord shard set tool
#[derive(Parser, Debug)]
#[command(name = "mindrecord")]
#[command(about = "Inspect and convert MindRecord shard sets")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print schema, record count and data files
    Info {
        path: PathBuf,
    },

    /// Print records as JSON lines
    Dump {
        path: PathBuf,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,

        /// Decode threads
        #[arg(long)]
        workers: Option<usize>,

        /// Shuffle the output order
        #[arg(long)]
        shuffle: bool,

        /// Seed for a reproducible shuffle
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Decode every record with checksum verification
    Verify {
        path: PathBuf,

        /// Decode threads
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Re-save a shard set through the convert pipeline
    Copy {
        source: PathBuf,
        destination: PathBuf,

        /// Number of data files to write (1-1000)
        #[arg(long, default_value = "1")]
        num_files: usize,

        /// Output format
        #[arg(long, default_value = "mindrecord")]
        format: String,

        /// Replace an existing shard set at the destination
        #[arg(long)]
        overwrite: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = match &args.config {
        Some(path) => MindRecordConfig::from_file(path)?.with_env_overrides(),
        None => MindRecordConfig::default().with_env_overrides(),
    };

    match args.command {
        Command::Info { path } => {
            let session = Session::from_config(config)?;
            let reader = session.open_reader(&path)?;

            println!("path:        {}", path.display());
            println!("schema:      {}", reader.schema_name());
            println!("records:     {}", reader.get_size());
            println!("compression: {}", reader.index().compression.name());
            println!("fields:");
            for (name, spec) in reader.schema().fields() {
                println!("  {:<24} {}", name, spec.describe());
            }
            println!("files:");
            for (file, meta) in reader.shard_files().iter().zip(&reader.index().shard_files) {
                println!(
                    "  {} ({} records, {} bytes)",
                    file.display(),
                    meta.record_count,
                    meta.byte_len
                );
            }
        }

        Command::Dump {
            path,
            limit,
            workers,
            shuffle,
            seed,
        } => {
            if let Some(workers) = workers {
                config.reader.num_parallel_workers = workers;
            }
            config.reader.shuffle = shuffle || config.reader.shuffle;
            if seed.is_some() {
                config.reader.seed = seed;
            }

            let session = Session::from_config(config)?;
            let reader = session.open_reader(&path)?;
            let limit = limit.unwrap_or(usize::MAX);

            for record in reader.records().take(limit) {
                println!("{}", serde_json::to_string(&record?)?);
            }
        }

        Command::Verify { path, workers } => {
            if let Some(workers) = workers {
                config.reader.num_parallel_workers = workers;
            }
            config.reader.shuffle = false;
            config.reader.verify_checksums = true;

            let session = Session::from_config(config)?;
            let reader = session.open_reader(&path)?;

            let mut verified = 0u64;
            for record in reader.records() {
                record?;
                verified += 1;
            }
            tracing::info!("Verified {} of {} records in {}", verified, reader.get_size(), path.display());
            println!("{verified} records OK");
        }

        Command::Copy {
            source,
            destination,
            num_files,
            format,
            overwrite,
        } => {
            config.writer.overwrite = overwrite || config.writer.overwrite;
            config.reader.shuffle = false;

            let session = Session::from_config(config)?;
            let reader = session.open_reader(&source)?;
            let summary = session.save(reader.records(), &destination, num_files, &format)?;

            for (from, to) in summary.field_names.iter().filter(|(from, to)| from != to) {
                tracing::info!("Renamed field '{}' to '{}'", from, to);
            }
            println!(
                "copied {} records to {} ({} files)",
                summary.record_count,
                summary.destination.display(),
                summary.shard_files.len()
            );
        }
    }

    Ok(())
}
