use anyhow::{bail, Context, Result};
use ariadne::cache;
use ariadne::config::{DEFAULT_BATCH_SIZE, DEFAULT_LANGUAGE, DEFAULT_MAX_HOPS};
use ariadne::lookup::ClosureLookup;
use ariadne::models::Relation;
use ariadne::pipeline::{closure_path, PipelineConfig, PipelineContext};
use ariadne::source::DumpFile;
use ariadne::stats::ClosureSummary;
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "ariadne")]
#[command(about = "Extract labels, type tables and transitive closures from Wikidata JSON dumps")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all three passes: label cache, relation tables, closures
    Extract(ExtractArgs),
    /// Recompute closure tables only
    Closures(ClosureArgs),
    /// Check whether a target is in an entity's closure
    Check(CheckArgs),
}

#[derive(Args)]
struct DumpArgs {
    /// Path to the Wikidata JSON dump (.json or .json.bz2)
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory for generated tables
    #[arg(short, long)]
    output: PathBuf,

    /// Limit number of entities read per pass (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Worker threads (defaults to all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Maximum hops followed when closing a relation
    #[arg(long, default_value_t = DEFAULT_MAX_HOPS)]
    max_hops: u32,

    /// Closure relation as PROPERTY=NAME; repeat to replace the default set
    #[arg(long = "closure-relation", value_name = "PROPERTY=NAME")]
    closure_relations: Vec<Relation>,
}

#[derive(Args)]
struct ExtractArgs {
    #[command(flatten)]
    dump: DumpArgs,

    /// Label language code
    #[arg(long, default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Entities between sink flushes
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,

    /// Force rebuild of the label cache
    #[arg(long)]
    no_cache: bool,

    /// Clear the output directory before starting
    #[arg(long)]
    clean: bool,

    /// Stop after the relation tables
    #[arg(long)]
    skip_closures: bool,
}

#[derive(Args)]
struct ClosureArgs {
    #[command(flatten)]
    dump: DumpArgs,
}

#[derive(Args)]
struct CheckArgs {
    /// Directory containing closure tables
    #[arg(short, long)]
    output: PathBuf,

    /// Relation name, e.g. subclass_of
    #[arg(short, long)]
    relation: String,

    /// Entity whose closure is searched
    entity: String,

    /// Entity looked for in the closure
    target: String,
}

impl DumpArgs {
    fn source(&self) -> DumpFile {
        DumpFile::new(&self.input).with_limit(self.limit)
    }

    fn config(&self) -> PipelineConfig {
        let config = PipelineConfig::new(&self.output).with_max_hops(self.max_hops);
        if self.closure_relations.is_empty() {
            config
        } else {
            config.with_closure_relations(self.closure_relations.clone())
        }
    }

    fn init_threads(&self) -> Result<()> {
        if let Some(threads) = self.threads {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("ariadne-worker-{}", i))
                .build_global()
                .context("Failed to configure worker threads")?;
        }
        Ok(())
    }
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let dump = &args.dump;
    dump.init_threads()?;

    if args.clean && dump.output.exists() {
        info!(path = ?dump.output, "Cleaning output directory");
        fs::remove_dir_all(&dump.output).with_context(|| {
            format!("Failed to clean output directory: {}", dump.output.display())
        })?;
    }

    let config = dump
        .config()
        .with_language(&args.language)
        .with_batch_size(args.batch_size);
    let mut context = PipelineContext::new(config)?;
    let source = dump.source();
    // A truncated read must not be cached as if it covered the whole dump
    let use_cache = !args.no_cache && dump.limit.is_none();

    let start_labels = Instant::now();
    let cache_path = cache::cache_path(&dump.output);
    let cached = if use_cache {
        cache::try_load_label_cache(&cache_path, &dump.input, &args.language)?
    } else {
        info!("Cache disabled, building fresh label cache");
        None
    };
    match cached {
        Some(labels) => {
            info!("Loaded label cache from disk");
            context.set_label_cache(labels);
        }
        None => {
            let labels = context.build_label_cache(&source)?;
            if use_cache {
                if let Err(e) =
                    cache::save_label_cache(labels, &dump.input, &args.language, &dump.output)
                {
                    warn!(error = %e, "Failed to save label cache");
                }
            }
        }
    }
    let labels_duration = start_labels.elapsed();
    info!(
        duration_secs = labels_duration.as_secs_f64(),
        "Label pass complete"
    );

    let start_extracting = Instant::now();
    let summary = context.extract_tables(&source)?;
    let extraction_duration = start_extracting.elapsed();
    info!(
        duration_secs = extraction_duration.as_secs_f64(),
        "Extraction pass complete"
    );

    let start_closures = Instant::now();
    let closures = if args.skip_closures {
        Vec::new()
    } else {
        context.compute_closures(&source)?
    };
    let closure_duration = start_closures.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Label pass:         {:.2}s", labels_duration.as_secs_f64());
    println!("Extraction pass:    {:.2}s", extraction_duration.as_secs_f64());
    println!("Closure pass:       {:.2}s", closure_duration.as_secs_f64());
    println!();
    println!(
        "Labels cached:      {}",
        context.label_cache().map_or(0, |labels| labels.len())
    );
    println!("Items processed:    {}", summary.items_processed);
    println!("Properties:         {}", summary.properties_processed);
    println!("Relation rows:      {}", summary.relation_rows);
    println!("Skipped values:     {}", summary.skipped_values);
    println!("Missing labels:     {}", summary.missing_cache_entries);
    println!("Write failures:     {}", summary.write_failures);
    println!("Malformed lines:    {}", summary.malformed_lines);
    print_closures(&closures);

    Ok(())
}

fn run_closures(args: ClosureArgs) -> Result<()> {
    let dump = &args.dump;
    dump.init_threads()?;

    let context = PipelineContext::new(dump.config())?;
    let start = Instant::now();
    let closures = context.compute_closures(&dump.source())?;

    println!();
    println!("=== Summary ===");
    println!("Closure pass:       {:.2}s", start.elapsed().as_secs_f64());
    print_closures(&closures);
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<()> {
    let path = closure_path(&args.output, &args.relation);
    if !path.exists() {
        bail!("No closure table for '{}' at {}", args.relation, path.display());
    }

    let mut lookup = ClosureLookup::new();
    lookup.load(&args.relation, &path)?;
    let found = lookup.contains(&args.relation, &args.entity, &args.target);
    println!(
        "{} {} {} {}",
        args.entity,
        if found { "reaches" } else { "does not reach" },
        args.target,
        args.relation
    );
    Ok(())
}

fn print_closures(closures: &[ClosureSummary]) {
    for closure in closures {
        println!();
        println!("[{}]", closure.relation);
        println!("  Sources:          {}", closure.sources);
        println!("  Direct edges:     {}", closure.direct_edges);
        println!("  Closure edges:    {}", closure.closure_edges);
        println!("  Iterations:       {}", closure.iterations);
        if closure.dropped_edges > 0 {
            println!("  Dropped edges:    {}", closure.dropped_edges);
        }
        if !closure.is_complete() {
            println!("  Truncated:        {}", closure.truncated_sources);
            println!("  Write failures:   {}", closure.write_failures);
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

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Closures(args) => run_closures(args),
        Commands::Check(args) => run_check(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
