use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wikiprint::dataset::{self, IntegrityReport};
use wikiprint::fingerprint::fingerprint_file;
use wikiprint::manifest::{self, DigestCheck};
use wikiprint::{PipelineConfig, PipelineError};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "wikiprint")]
#[command(about = "Build reproducible, fingerprinted text corpora from Wikipedia dumps")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, normalize and fingerprint a dump, then write its manifest
    Process(ProcessArgs),
    /// Recompute digests of a dump and corpus and compare them with a manifest
    Verify(VerifyArgs),
    /// Compare two manifests field by field
    Diff(DiffArgs),
    /// Print the SHA-256 of a file
    Hash(HashArgs),
    /// Content manifests for whole dataset directories
    #[command(subcommand)]
    Dataset(DatasetCommand),
}

#[derive(Subcommand)]
enum DatasetCommand {
    /// Hash every visible file under a directory
    Hash {
        dir: PathBuf,

        /// Save the directory manifest as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a directory against a saved directory manifest
    Verify {
        #[arg(short, long)]
        manifest: PathBuf,

        dir: PathBuf,
    },
    /// Compare two directory manifests
    Compare { old: PathBuf, new: PathBuf },
}

#[derive(Args)]
struct ProcessArgs {
    /// Path to the Wikipedia dump file (.xml.bz2 or .xml)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for the corpus and manifest
    #[arg(short, long, default_value = "data")]
    output: PathBuf,

    /// Also record Merkle roots over chunks of this many bytes
    #[arg(long)]
    merkle_chunk_size: Option<NonZeroUsize>,

    /// Corpus path (default: <output>/processed/wiki_clean.txt)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Manifest path (default: <output>/dataset_manifest.json)
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Hide the progress spinner
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct VerifyArgs {
    /// Manifest to check against
    #[arg(short, long)]
    manifest: PathBuf,

    /// The dump the manifest was produced from
    #[arg(short, long)]
    input: PathBuf,

    /// The processed corpus
    #[arg(short, long)]
    corpus: PathBuf,
}

#[derive(Args)]
struct DiffArgs {
    left: PathBuf,
    right: PathBuf,
}

#[derive(Args)]
struct HashArgs {
    path: PathBuf,

    /// Also print the Merkle root over chunks of this many bytes
    #[arg(long)]
    merkle_chunk_size: Option<NonZeroUsize>,
}

fn run_process(args: ProcessArgs) -> Result<ExitCode> {
    let mut config = PipelineConfig::new(&args.input, &args.output).with_progress(!args.no_progress);
    if let Some(size) = args.merkle_chunk_size {
        config = config.with_merkle_chunk_size(size);
    }
    if let Some(path) = args.corpus {
        config = config.with_corpus_path(path);
    }
    if let Some(path) = args.manifest {
        config = config.with_manifest_path(path);
    }

    let start = Instant::now();
    let outcome = wikiprint::run_pipeline(&config)?;
    let duration = start.elapsed();
    info!(duration_secs = duration.as_secs_f64(), "Processing complete");

    let m = &outcome.manifest;
    println!();
    println!("=== Summary ===");
    println!("Dump:               {}", m.wikipedia_dump);
    println!("Dump date:          {}", m.dump_date);
    println!("Articles:           {}", outcome.stats.articles());
    println!("Non-empty:          {}", outcome.stats.non_empty());
    println!("Empty articles:     {}", outcome.stats.empty());
    println!("Raw bytes:          {}", outcome.stats.raw_bytes);
    println!("Processed bytes:    {}", outcome.stats.processed_bytes);
    println!("Raw SHA-256:        {}", m.raw_sha256);
    println!("Processed SHA-256:  {}", m.processed_sha256);
    if let (Some(raw), Some(processed)) = (&m.raw_merkle_root, &m.processed_merkle_root) {
        println!("Raw Merkle root:    {}", raw);
        println!("Proc. Merkle root:  {}", processed);
    }
    println!("Corpus:             {}", outcome.corpus_path.display());
    println!("Manifest:           {}", outcome.manifest_path.display());
    println!("Time:               {:.2}s", duration.as_secs_f64());

    Ok(ExitCode::SUCCESS)
}

fn print_check(label: &str, check: &DigestCheck) {
    let status = if check.matches() { "ok" } else { "MISMATCH" };
    println!("{:<22}{:<9}{}", label, status, check.actual);
    if !check.matches() {
        println!("{:<31}expected {}", "", check.expected);
    }
}

fn run_verify(args: VerifyArgs) -> Result<ExitCode> {
    let manifest = manifest::load_manifest(&args.manifest)?;
    let report = manifest::verify(&manifest, &args.input, &args.corpus)?;

    if !report.dump_name_matches {
        println!(
            "{:<22}MISMATCH manifest names {}",
            "wikipedia_dump", manifest.wikipedia_dump
        );
    }
    print_check("raw_sha256", &report.raw_sha256);
    print_check("processed_sha256", &report.processed_sha256);
    if let Some(check) = &report.raw_merkle_root {
        print_check("raw_merkle_root", check);
    }
    if let Some(check) = &report.processed_merkle_root {
        print_check("processed_merkle_root", check);
    }

    if report.is_ok() {
        println!("Dataset verified.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Verification FAILED.");
        Ok(ExitCode::FAILURE)
    }
}

fn run_diff(args: DiffArgs) -> Result<ExitCode> {
    let left = manifest::load_manifest(&args.left)?;
    let right = manifest::load_manifest(&args.right)?;
    let changes = manifest::diff(&left, &right);

    if changes.is_empty() {
        println!("Manifests are identical.");
        return Ok(ExitCode::SUCCESS);
    }
    for change in &changes {
        println!("{}:", change.field);
        println!("  - {}", change.left.as_deref().unwrap_or("<absent>"));
        println!("  + {}", change.right.as_deref().unwrap_or("<absent>"));
    }
    Ok(ExitCode::FAILURE)
}

fn run_hash(args: HashArgs) -> Result<ExitCode> {
    let fp = fingerprint_file(&args.path, args.merkle_chunk_size)
        .with_context(|| format!("Failed to hash {}", args.path.display()))?;
    println!("{}  {}", fp.sha256, args.path.display());
    if let Some(root) = fp.merkle_root {
        println!("{}  {} (merkle)", root, args.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn print_integrity(report: &IntegrityReport) {
    for path in &report.verified {
        println!("{:<10}{}", "ok", path);
    }
    for path in &report.modified {
        println!("{:<10}{}", "MODIFIED", path);
    }
    for path in &report.missing {
        println!("{:<10}{}", "MISSING", path);
    }
}

fn run_dataset(command: DatasetCommand) -> Result<ExitCode> {
    match command {
        DatasetCommand::Hash { dir, output } => {
            let listing = dataset::scan_directory(&dir)?;
            let hash = listing.hash().context("Failed to encode directory manifest")?;
            if let Some(path) = output {
                manifest::write_manifest(&listing, &path)?;
            }
            println!("Files:  {}", listing.files.len());
            println!("Hash:   {}", hash);
            Ok(ExitCode::SUCCESS)
        }
        DatasetCommand::Verify { manifest, dir } => {
            let expected = dataset::load_directory_manifest(&manifest)?;
            let report = dataset::validate_directory(&expected, &dir)?;
            print_integrity(&report);
            if report.is_ok() {
                println!("Dataset verified.");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Verification FAILED.");
                Ok(ExitCode::FAILURE)
            }
        }
        DatasetCommand::Compare { old, new } => {
            let old = dataset::load_directory_manifest(&old)?;
            let new = dataset::load_directory_manifest(&new)?;
            let cmp = dataset::compare_directories(&old, &new);
            for (label, paths) in [
                ("added", &cmp.added),
                ("removed", &cmp.removed),
                ("modified", &cmp.modified),
            ] {
                for path in paths {
                    println!("{:<10}{}", label, path);
                }
            }
            println!("{} unchanged", cmp.unchanged.len());
            if cmp.is_identical() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG, when set, takes precedence over -v
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Process(args) => run_process(args),
        Commands::Verify(args) => run_verify(args),
        Commands::Diff(args) => run_diff(args),
        Commands::Hash(args) => run_hash(args),
        Commands::Dataset(command) => run_dataset(command),
    };

    match result {
        Ok(code) => {
            info!("Completed successfully");
            code
        }
        Err(e) => match e.downcast_ref::<PipelineError>() {
            Some(pipeline_err) => {
                error!(kind = pipeline_err.kind(), "Error: {:#}", e);
                eprintln!("{}: {:#}", pipeline_err.kind(), e);
                ExitCode::from(pipeline_err.exit_code())
            }
            None => {
                error!("Error: {:#}", e);
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}
