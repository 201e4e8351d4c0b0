//! rangesync CLI - canonical row hashing and packing for range-based table sync.

mod rows;

use clap::{Parser, Subcommand};
use rangesync::digest::{self, DigestAlgorithm};
use rangesync::{
    init_registry, Config, Packer, RowConsumer, RowHasher, RowPacker, RowStream, StreamSink,
    SyncError, Unpacker,
};
use rows::{write_row, DelimitedReader};
use serde_json::json;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "rangesync")]
#[command(about = "Canonical row hashing and packing for range-based table sync")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash delimited rows and print digest, row count and last key
    Hash {
        /// Read rows from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Override hash.algorithm
        #[arg(short, long)]
        algorithm: Option<String>,

        /// Override rows.primary_key_columns (comma-separated indexes)
        #[arg(long, value_delimiter = ',')]
        key_columns: Option<Vec<usize>>,
    },

    /// Encode delimited rows as a canonical rowset on stdout
    Pack {
        /// Read rows from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write the encoded [digest, row_count] result instead of the rows
        #[arg(long)]
        hash: bool,

        /// Override hash.algorithm (with --hash)
        #[arg(short, long)]
        algorithm: Option<String>,

        /// Override rows.primary_key_columns (comma-separated indexes)
        #[arg(long, value_delimiter = ',')]
        key_columns: Option<Vec<usize>>,
    },

    /// Decode a canonical rowset back to delimited rows
    Unpack {
        /// Read the rowset from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List the registered digest algorithms
    Algorithms,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity, &cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), SyncError> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::load(path)?
        }
        None => Config::default(),
    };
    init_registry();

    match cli.command {
        Commands::Hash {
            input,
            algorithm,
            key_columns,
        } => {
            apply_overrides(&mut config, algorithm, key_columns)?;
            hash(&config, open_input(input.as_deref())?, cli.output_json)
        }
        Commands::Pack {
            input,
            hash,
            algorithm,
            key_columns,
        } => {
            apply_overrides(&mut config, algorithm, key_columns)?;
            let input = open_input(input.as_deref())?;
            if hash {
                pack_hash(&config, input)
            } else {
                pack(&config, input)
            }
        }
        Commands::Unpack { input } => unpack(&config, open_input(input.as_deref())?),
        Commands::Algorithms => list_algorithms(cli.output_json),
    }
}

fn apply_overrides(
    config: &mut Config,
    algorithm: Option<String>,
    key_columns: Option<Vec<usize>>,
) -> Result<(), SyncError> {
    if let Some(algorithm) = algorithm {
        config.hash.algorithm = algorithm;
    }
    if let Some(key_columns) = key_columns {
        config.rows.primary_key_columns = key_columns;
    }
    config.validate()
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn BufRead>, SyncError> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn hash(config: &Config, input: Box<dyn BufRead>, output_json: bool) -> Result<(), SyncError> {
    let algorithm = digest::lookup(&config.hash.algorithm)?;
    let mut hasher = RowHasher::new(algorithm).track_last_key(config.rows.primary_key_columns.clone());
    let mut reader = DelimitedReader::new(input, &config.rows);
    while let Some(row) = reader.next_row()? {
        hasher.process(&row);
    }

    let (result, last_key) = hasher.finish();
    info!(
        "Hashed {} rows ({} bytes) with {}",
        result.row_count,
        result.bytes_hashed,
        algorithm.name()
    );
    let last_key: Option<Vec<String>> = last_key.map(|key| {
        key.iter()
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .collect()
    });

    if output_json {
        let output = json!({
            "algorithm": algorithm.name(),
            "digest": result.digest,
            "row_count": result.row_count,
            "bytes_hashed": result.bytes_hashed,
            "last_key": last_key,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("algorithm: {}", algorithm.name());
        println!("digest: {}", result.digest);
        println!("rows: {}", result.row_count);
        println!("bytes: {}", result.bytes_hashed);
        match last_key {
            Some(key) => println!("last_key: {}", key.join(",")),
            None => println!("last_key: -"),
        }
    }
    Ok(())
}

fn pack(config: &Config, input: Box<dyn BufRead>) -> Result<(), SyncError> {
    let stdout = io::stdout();
    let mut output = Packer::new(StreamSink::with_threshold(
        stdout.lock(),
        config.transfer.flush_threshold,
    ));
    let mut reader = DelimitedReader::new(input, &config.rows);
    let batch_size = config.transfer.batch_size;

    let mut packer =
        RowPacker::new(&mut output).track_last_key(config.rows.primary_key_columns.clone());
    let mut outcome = Ok(());
    let mut batches = 0u64;
    loop {
        match reader.next_row() {
            Ok(Some(row)) => {
                packer.process(&row);
                if packer.row_count() == batch_size {
                    batches += 1;
                    info!(
                        "Packed batch {} ({} rows) up to key {}",
                        batches,
                        batch_size,
                        display_key(packer.last_key().unwrap_or_default())
                    );
                    packer.reset_row_count();
                }
                packer.inner_mut().output_mut().sink_mut().flush_if_full()?;
            }
            Ok(None) => break,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    // the rowset is terminated even when the input breaks off
    let (total, _) = packer.finish();
    output.into_inner().into_inner()?;
    outcome?;

    info!("Packed {} rows", total);
    Ok(())
}

fn pack_hash(config: &Config, input: Box<dyn BufRead>) -> Result<(), SyncError> {
    let algorithm = digest::lookup(&config.hash.algorithm)?;
    let stdout = io::stdout();
    let mut output = Packer::new(StreamSink::with_threshold(
        stdout.lock(),
        config.transfer.flush_threshold,
    ));
    let mut reader = DelimitedReader::new(input, &config.rows);

    let outcome = RowHasher::new(algorithm)
        .emit_to(&mut output)
        .scope(|emitter| {
            while let Some(row) = reader.next_row()? {
                emitter.process(&row);
            }
            Ok::<_, SyncError>(())
        });
    output.into_inner().into_inner()?;
    let ((), result) = outcome?;

    info!(
        "Hashed {} rows with {}: {}",
        result.row_count,
        algorithm.name(),
        result.digest
    );
    Ok(())
}

fn unpack(config: &Config, mut input: Box<dyn BufRead>) -> Result<(), SyncError> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;
    let mut unpacker = Unpacker::new(data);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut stream = RowStream::new(&mut unpacker);
    for row in stream.by_ref() {
        write_row(&mut out, &row?, &config.rows)?;
    }
    let rows = stream.rows_read();
    out.flush()?;

    if !unpacker.is_empty() {
        warn!(
            "Ignoring {} bytes after end of rowset",
            unpacker.remaining()
        );
    }
    info!("Unpacked {} rows", rows);
    Ok(())
}

fn display_key(key: &[Vec<u8>]) -> String {
    key.iter()
        .map(|value| String::from_utf8_lossy(value))
        .collect::<Vec<_>>()
        .join(",")
}

fn list_algorithms(output_json: bool) -> Result<(), SyncError> {
    let registry = digest::registry()?;
    let algorithms = registry
        .names()
        .map(|name| registry.lookup(name))
        .collect::<Result<Vec<DigestAlgorithm>, _>>()?;

    if output_json {
        let output: Vec<_> = algorithms
            .iter()
            .map(|a| json!({ "name": a.name(), "output_len": a.output_len() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for algorithm in &algorithms {
            println!("{}\t{} bytes", algorithm.name(), algorithm.output_len());
        }
    }
    Ok(())
}

/// Setup logging based on verbosity and format. Logs go to stderr so stdout
/// carries only results.
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
