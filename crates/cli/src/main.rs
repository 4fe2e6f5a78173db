use clap::{Parser, Subcommand, ValueEnum};
use quiverdb_core::{config, Coordinator, CoordinatorConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quiverdb", about = "Inspect and maintain a quiverdb data directory")]
struct Args {
    /// Data directory holding store/ and index/
    #[arg(short, long, env = config::ENV_DATA_DIR, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Threads used for index searches
    #[arg(long, env = config::ENV_SEARCH_THREADS)]
    search_threads: Option<usize>,

    /// Permit destructive resets
    #[arg(long, env = config::ENV_ALLOW_RESET, default_value_t = false)]
    allow_reset: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Command {
    /// List collections with their row counts as JSON
    Collections,
    /// Print record and index counters for a collection
    Stats { name: String },
    /// Rebuild a collection's index from the store and persist it
    Rebuild { name: String },
    /// Check a collection's index invariants
    Validate { name: String },
    /// Persist every open index and compact the store log
    Checkpoint,
    /// Remove every collection (requires --allow-reset)
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("quiverdb=info,quiverdb_core=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = CoordinatorConfig::default()
        .with_data_dir(&args.data_dir)
        .with_allow_reset(args.allow_reset);
    if let Some(threads) = args.search_threads {
        cfg = cfg.with_search_threads(threads);
    }
    if args.data_dir.exists() && !args.data_dir.is_dir() {
        return Err(format!("{} exists but is not a directory", args.data_dir.display()).into());
    }
    let db = Coordinator::open(cfg)?;

    match args.command {
        Command::Collections => {
            let mut rows = Vec::new();
            for info in db.list_collections()? {
                rows.push(serde_json::json!({
                    "name": info.name,
                    "id": info.id,
                    "count": db.count(&info.name)?,
                    "dimension": info.dimension,
                    "space": info.config.space,
                    "embedding": info.embedding.name(),
                    "created_at": info.created_at,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::Stats { name } => {
            println!("{}", serde_json::to_string_pretty(&db.stats(&name)?)?);
        }
        Command::Rebuild { name } => {
            let stats = db.create_index(&name)?;
            db.persist(&name)?;
            tracing::info!(collection = %name, elements = stats.element_count, "index rebuilt");
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Validate { name } => {
            db.validate_index(&name)?;
            println!("ok");
        }
        Command::Checkpoint => {
            db.persist_all()?;
        }
        Command::Reset { yes } => {
            if !yes {
                return Err("reset deletes every collection; pass --yes to confirm".into());
            }
            db.reset()?;
            return Ok(());
        }
    }
    db.close()?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_format);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
