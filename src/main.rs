//! CLI entry point for `mimexplode`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser as ClapParser, Subcommand, ValueEnum};

use mimexplode::config::{Config, NestedMessages, RedoHookKind};
use mimexplode::model::Entity;
use mimexplode::{MimeError, Parser};

#[derive(ClapParser)]
#[command(
    name = "mimexplode",
    version,
    about = "Explode MIME messages into a tree of decoded parts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Treat syntax and structural problems as fatal
    #[arg(long, global = true)]
    strict: bool,

    /// Look for uuencoded files inside plain-text parts
    #[arg(long, global = true)]
    uudecode: bool,

    /// What to do with message/rfc822 parts
    #[arg(long, global = true, value_enum, value_name = "POLICY")]
    nested: Option<NestedArg>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the structure of a message
    Dump {
        path: PathBuf,
        /// Print a JSON summary instead of the skeleton
        #[arg(long)]
        json: bool,
    },
    /// Write every decoded part of a message into a directory
    Explode {
        path: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Parse a message and print it back out, re-encoding every body
    Print { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum NestedArg {
    Nest,
    Replace,
    Off,
}

impl From<NestedArg> for NestedMessages {
    fn from(arg: NestedArg) -> Self {
        match arg {
            NestedArg::Nest => NestedMessages::Nest,
            NestedArg::Replace => NestedMessages::Replace,
            NestedArg::Off => NestedMessages::Off,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = mimexplode::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let config = apply_flags(config, &cli);

    match &cli.command {
        Commands::Dump { path, json } => cmd_dump(path, *json, config),
        Commands::Explode { path, output } => cmd_explode(path, output, config),
        Commands::Print { path } => cmd_print(path, config),
    }
}

fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mimexplode::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mimexplode.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Fold command-line switches into the loaded configuration.
fn apply_flags(mut config: Config, cli: &Cli) -> Config {
    if cli.strict {
        config.parser.ignore_errors = false;
    }
    if cli.uudecode && !config.parser.redo_hooks.contains(&RedoHookKind::UuSniff) {
        config.parser.redo_hooks.push(RedoHookKind::UuSniff);
    }
    if let Some(nested) = cli.nested {
        config.parser.extract_nested_messages = nested.into();
    }
    config
}

/// Parse `path`, printing diagnostics and the last top-level header when
/// the parse fails.
fn parse_file(parser: &mut Parser, path: &Path) -> anyhow::Result<Entity> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let start = Instant::now();
    match parser.parse_open(path) {
        Ok(ent) => {
            tracing::info!(elapsed = ?start.elapsed(), "Parse finished");
            for msg in parser.results().msgs() {
                eprintln!("  {msg}");
            }
            Ok(ent)
        }
        Err(e) => {
            report_failure(parser, &e);
            Err(e.into())
        }
    }
}

fn report_failure(parser: &Parser, err: &MimeError) {
    eprintln!("  Parse failed: {err}");
    for diag in parser.results().diagnostics() {
        eprintln!("  {diag}");
    }
    if let Some(head) = parser.last_head() {
        eprintln!();
        eprintln!("  Last top-level header:");
        for line in head.to_string().lines() {
            eprintln!("    {line}");
        }
    }
}

/// Print the skeleton of a message, or a JSON summary.
fn cmd_dump(path: &Path, json: bool, mut config: Config) -> anyhow::Result<()> {
    config.output.to_core = true;
    let mut parser = Parser::with_config(config)?;
    let ent = parse_file(&mut parser, path)?;

    if json {
        let report = serde_json::json!({
            "file": path.to_string_lossy(),
            "entity": ent.summary(),
            "diagnostics": parser.results().diagnostics(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        ent.dump_skeleton(&mut out)?;
        out.flush()?;
    }
    Ok(())
}

/// Decode every leaf into `output` and list what was written.
fn cmd_explode(path: &Path, output: &Path, mut config: Config) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    config.output.to_core = false;
    config.output.dir = Some(output.to_path_buf());
    let mut parser = Parser::with_config(config)?;
    let ent = parse_file(&mut parser, path)?;

    let mut total = 0u64;
    let leaves = ent.leaves();
    for leaf in &leaves {
        let Some(body) = leaf.body() else { continue };
        let size = body.size()?;
        total += size;
        let shown = body
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(in memory)".to_string());
        println!(
            "  {:<12} {:<32} {}",
            format_size(size, BINARY),
            leaf.effective_type().to_string(),
            shown
        );
    }

    println!(
        "  Wrote {} part(s), {} to {}",
        leaves.len(),
        format_size(total, BINARY),
        output.display()
    );
    Ok(())
}

/// Re-serialize the parsed tree to stdout.
fn cmd_print(path: &Path, mut config: Config) -> anyhow::Result<()> {
    config.output.to_core = true;
    let mut parser = Parser::with_config(config)?;
    let ent = parse_file(&mut parser, path)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    ent.print(&mut out, parser.codecs())?;
    out.flush()?;
    Ok(())
}
