use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use echocheck::audio::{compute_spectrogram, extract_peaks, load_and_prepare_audio};
use echocheck::matching::get_match_quality;
use echocheck::visualize::save_spectrogram;
use echocheck::{Config, Recognizer, SqliteStore};

#[derive(Parser)]
#[command(name = "echocheck")]
#[command(author, version, about = "Audio fingerprint matching", long_about = None)]
struct Cli {
    /// SQLite database holding the fingerprint index
    #[arg(long, global = true, default_value = "echocheck.db")]
    db: PathBuf,

    /// TOML file overriding the default fingerprinting parameters
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint reference WAV files and store them
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Recording id (single file only); defaults to the file stem
        #[arg(long)]
        id: Option<String>,
    },

    /// Match a WAV clip against the stored references
    Query {
        file: PathBuf,

        /// Start of the clip to use, in seconds
        #[arg(long)]
        start: Option<f64>,

        /// End of the clip to use, in seconds
        #[arg(long)]
        end: Option<f64>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored recordings and their fingerprint counts
    List,

    /// Delete stored data
    Delete(DeleteArgs),

    /// Render a spectrogram with its peaks to a PNG
    Plot { file: PathBuf, output: PathBuf },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DeleteArgs {
    /// Delete every fingerprint and recording
    #[arg(long)]
    all: bool,

    /// Delete every recording marker
    #[arg(long)]
    recordings: bool,

    /// Delete the fingerprints of one recording
    #[arg(long)]
    recording: Option<String>,
}

fn recording_id_for(path: &std::path::Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a recording id from {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let db = cli.db;
    let open = || -> anyhow::Result<Recognizer<SqliteStore>> {
        let store = SqliteStore::open(&db)?;
        Ok(Recognizer::new(config.clone(), store)?)
    };

    match cli.command {
        Commands::Ingest { files, id } => {
            if id.is_some() && files.len() > 1 {
                bail!("--id can only be used with a single file");
            }
            let items = files
                .iter()
                .map(|path| {
                    let recording_id = match &id {
                        Some(id) => id.clone(),
                        None => recording_id_for(path)?,
                    };
                    Ok((recording_id, path.clone()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            for report in open()?.ingest_dataset(&items)? {
                println!(
                    "{}: {} fingerprints stored",
                    report.recording_id, report.fingerprints
                );
            }
        }
        Commands::Query {
            file,
            start,
            end,
            json,
        } => {
            let results = open()?.recognize_file(&file, start, end)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No match found.");
            } else {
                println!("Matches for {}:", file.display());
                for (rank, result) in results.iter().enumerate() {
                    println!(
                        "  {}. {}  offset {:.2}s  confidence {:.3} ({})  votes {}",
                        rank + 1,
                        result.recording_id,
                        result.offset_sec,
                        result.confidence,
                        get_match_quality(result.confidence).as_str(),
                        result.votes
                    );
                }
            }
        }
        Commands::List => {
            let recognizer = open()?;
            let recordings = recognizer.recordings()?;
            if recordings.is_empty() {
                println!("No recordings stored.");
            }
            for recording in recordings {
                let count = recognizer.fingerprint_count(&recording.recording_id)?;
                println!("{}  {} fingerprints", recording.recording_id, count);
            }
        }
        Commands::Delete(args) => {
            let recognizer = open()?;
            if args.all {
                recognizer.delete_all_fingerprints()?;
                recognizer.delete_all_recordings()?;
            } else if args.recordings {
                recognizer.delete_all_recordings()?;
            } else if let Some(recording_id) = args.recording {
                recognizer.delete_fingerprints_for(&recording_id)?;
            }
        }
        Commands::Plot { file, output } => {
            let samples = load_and_prepare_audio(&file, config.sample_rate)?;
            let spectrogram = compute_spectrogram(&samples, &config);
            let peaks = extract_peaks(&samples, &config);
            save_spectrogram(&spectrogram, &peaks, &output)?;
            println!("{} peaks plotted to {}", peaks.len(), output.display());
        }
    }

    Ok(())
}
