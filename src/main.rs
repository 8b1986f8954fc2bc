use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use divipola::batch::{self, BatchOptions};
use divipola::parser::LoadOptions;
use divipola::{CodeResolver, Level, ReferenceCache, Resolution, ResolverConfig};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, Level as LogLevel};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "divipola")]
#[command(about = "Resolve territorial names in health extracts to DIVIPOLA codes")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a single name
    Resolve(ResolveArgs),
    /// Resolve one column of a delimited extract
    Batch(BatchArgs),
    /// Summarize the reference dataset
    Inspect(ReferenceArgs),
}

#[derive(Args)]
struct ReferenceArgs {
    /// Path to the territorial reference dataset (CSV)
    #[arg(short, long)]
    reference: PathBuf,

    /// Field delimiter of the reference dataset and extracts
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Read attempts when the reference file is momentarily unreadable
    #[arg(long, default_value_t = divipola::config::RELOAD_MAX_ATTEMPTS)]
    retries: u32,

    /// Code returned for municipality names that match nothing
    #[arg(long, default_value = divipola::config::DEFAULT_SENTINEL_CODE)]
    sentinel_code: String,
}

#[derive(Args)]
struct ResolveArgs {
    #[command(flatten)]
    reference: ReferenceArgs,

    /// Territorial level (department, municipality, township, urban_center)
    #[arg(short, long, value_parser = parse_level)]
    level: Level,

    /// Municipality name used to disambiguate townships and urban centers
    #[arg(short, long)]
    parent: Option<String>,

    /// Name to resolve
    name: String,
}

#[derive(Args)]
struct BatchArgs {
    #[command(flatten)]
    reference: ReferenceArgs,

    /// Extract to resolve
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the extract with codes appended
    #[arg(short, long)]
    output: PathBuf,

    /// Territorial level of the name column
    #[arg(short, long, value_parser = parse_level)]
    level: Level,

    /// Column holding the names to resolve
    #[arg(long)]
    name_column: String,

    /// Column holding the municipality name, used as context
    #[arg(long)]
    parent_column: Option<String>,

    /// Name of the appended code column
    #[arg(long, default_value = divipola::config::DEFAULT_CODE_COLUMN)]
    code_column: String,

    /// Write the outcome counts of this run as JSON
    #[arg(long)]
    audit_json: Option<PathBuf>,
}

fn parse_level(s: &str) -> Result<Level, divipola::error::ConfigError> {
    s.parse()
}

fn delimiter_byte(c: char) -> Result<u8> {
    if !c.is_ascii() {
        bail!("Delimiter must be a single ASCII character, got {:?}", c);
    }
    Ok(c as u8)
}

fn build_resolver(args: &ReferenceArgs) -> Result<CodeResolver> {
    let options = LoadOptions {
        delimiter: delimiter_byte(args.delimiter)?,
        max_attempts: args.retries,
        retry_delay: Duration::from_millis(divipola::config::RELOAD_RETRY_DELAY_MS),
    };
    let cache = Arc::new(ReferenceCache::with_options(&args.reference, options));
    let config = ResolverConfig {
        sentinel_code: args.sentinel_code.clone(),
    };
    Ok(CodeResolver::with_config(cache, config))
}

/// Line printed by `resolve`: the code and how it was found, or `unresolved`.
fn resolution_line(resolution: &Resolution) -> String {
    match resolution.code() {
        Some(code) => format!("{}\t{}", code, resolution.outcome),
        None => resolution.outcome.to_string(),
    }
}

fn run_resolve(args: ResolveArgs) -> Result<ExitCode> {
    let resolver = build_resolver(&args.reference)?;
    if resolver.cache().get_index(false).is_none() {
        bail!(
            "Reference dataset could not be loaded: {:?}",
            args.reference.reference
        );
    }

    let resolution = resolver.resolve(args.level, &args.name, args.parent.as_deref());
    println!("{}", resolution_line(&resolution));
    if resolution.is_resolved() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn run_batch(args: BatchArgs) -> Result<()> {
    let resolver = build_resolver(&args.reference)?;
    let options = BatchOptions {
        input: args.input,
        output: args.output,
        level: args.level,
        name_column: args.name_column,
        parent_column: args.parent_column,
        code_column: args.code_column,
        delimiter: delimiter_byte(args.reference.delimiter)?,
    };

    let start = Instant::now();
    let summary = batch::resolve_file(&resolver, &options)?;
    let duration = start.elapsed();

    if let Some(path) = &args.audit_json {
        let file = File::create(path)
            .with_context(|| format!("Failed to create audit file: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &summary.audit)
            .context("Failed to write audit JSON")?;
        writer.flush()?;
        info!(path = ?path, "Audit written");
    }

    let audit = summary.audit;
    println!();
    println!("=== Summary ===");
    println!("Rows resolved:      {}", summary.rows);
    println!("Time:               {:.2}s", duration.as_secs_f64());
    println!();
    println!("Context matches:    {}", audit.context);
    println!("Exact matches:      {}", audit.exact);
    println!("Fuzzy matches:      {}", audit.fuzzy);
    println!("Sentinel codes:     {}", audit.sentinel);
    println!("Unresolved:         {}", audit.unresolved);

    Ok(())
}

fn run_inspect(args: ReferenceArgs) -> Result<()> {
    let resolver = build_resolver(&args)?;
    let cache = resolver.cache();
    let index = match cache.get_index(false) {
        Some(index) => index,
        None => bail!("Reference dataset could not be loaded: {:?}", args.reference),
    };
    let quality = index.quality();

    println!("=== Reference dataset ===");
    println!("Path:               {}", cache.source_path().display());
    println!("Distinct names:     {}", index.len());
    for level in Level::ALL {
        println!("{:<20}{}", format!("{}:", level), index.records(level).len());
    }
    println!();
    println!("Skipped rows:       {}", cache.skipped_rows());
    println!("Dropped records:    {}", quality.dropped_records);
    println!("Duplicate names:    {}", quality.duplicate_names);
    println!("Orphan parents:     {}", quality.orphan_parents);

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LogLevel::WARN,
        1 => LogLevel::INFO,
        2 => LogLevel::DEBUG,
        _ => LogLevel::TRACE,
    };

    // RUST_LOG wins over -v, e.g. RUST_LOG=divipola::audit=debug
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let result = match cli.command {
        Commands::Resolve(args) => run_resolve(args),
        Commands::Batch(args) => run_batch(args).map(|()| ExitCode::SUCCESS),
        Commands::Inspect(args) => run_inspect(args).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => {
            info!("Completed");
            code
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use divipola::Outcome;

    #[test]
    fn resolved_line_has_code_and_outcome() {
        let line = resolution_line(&Resolution::matched("73001", Outcome::Exact));
        assert_eq!(line, "73001\texact");
    }

    #[test]
    fn sentinel_is_printed_as_a_code() {
        let line = resolution_line(&Resolution::matched("73999", Outcome::Sentinel));
        assert_eq!(line, "73999\tsentinel");
    }

    #[test]
    fn unresolved_line_says_unresolved() {
        assert_eq!(resolution_line(&Resolution::unresolved()), "unresolved");
    }

    #[test]
    fn level_argument_accepts_spanish_labels() {
        let cli = Cli::try_parse_from([
            "divipola", "resolve", "-r", "ref.csv", "--level", "vereda", "La Esperanza",
        ])
        .unwrap();
        match cli.command {
            Commands::Resolve(args) => assert_eq!(args.level, Level::Township),
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn level_argument_rejects_unknown_values() {
        let result =
            Cli::try_parse_from(["divipola", "resolve", "-r", "ref.csv", "--level", "barrio", "X"]);
        assert!(result.is_err());
    }
}
