//! CLI entry point for `mboxsort`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mboxsort::classify::{Classifier, RuleSet};
use mboxsort::config::{self, Config};
use mboxsort::parser::decoder::MessageDecoder;
use mboxsort::parser::mbox;
use mboxsort::pipeline::{Pipeline, SortOutcome};
use mboxsort::report::{self, Summary};

#[derive(Parser)]
#[command(
    name = "mboxsort",
    version,
    about = "Split, decode and classify MBOX mail archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to $MBOXSORT_CONFIG, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Sort an archive into buckets
    Sort {
        path: PathBuf,
        /// Grouping rules: sender, subject, date, thread (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        group_by: Vec<String>,
        /// Order inside each bucket: date, sender, subject, thread
        #[arg(short, long)]
        sort_by: Option<String>,
        /// asc or desc
        #[arg(short, long)]
        order: Option<String>,
        /// Date bucket size: day, month, year
        #[arg(long)]
        granularity: Option<String>,
        /// Subject keyword (repeatable)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,
        /// Decoder threads (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Print bucket names and counts only
        #[arg(long)]
        summary: bool,
        #[arg(long)]
        json: bool,
    },
    /// List the most frequent senders
    Senders {
        path: PathBuf,
        #[arg(short = 'n', long, default_value_t = report::DEFAULT_TOP_SENDERS)]
        top: usize,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Sort {
            path,
            group_by,
            sort_by,
            order,
            granularity,
            keywords,
            workers,
            summary,
            json,
        } => {
            let mut config = config;
            let cls = &mut config.classification;
            if !group_by.is_empty() {
                cls.group_by = group_by;
            }
            if let Some(sort_by) = sort_by {
                cls.sort_by = sort_by;
            }
            if let Some(order) = order {
                cls.sort_order = order;
            }
            if let Some(granularity) = granularity {
                cls.date_granularity = granularity;
            }
            if !keywords.is_empty() {
                cls.subject_keywords = keywords;
            }
            if let Some(workers) = workers {
                config.performance.workers = workers;
            }
            cmd_sort(&path, &config, summary, json)
        }
        Commands::Senders { path, top, json } => cmd_senders(&path, &config, top, json),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = config::log_file_path(config);
    let log_target = log_path.parent().zip(log_path.file_name());
    if let Some((log_dir, log_name)) =
        log_target.filter(|(dir, _)| std::fs::create_dir_all(dir).is_ok())
    {
        let file_appender = tracing_appender::rolling::never(log_dir, log_name);
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

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mboxsort", &mut std::io::stdout());
    Ok(())
}

fn cmd_manpage() -> anyhow::Result<()> {
    let man = clap_mangen::Man::new(Cli::command());
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Run the pipeline over `path` with a progress bar on stderr.
fn run_pipeline(path: &Path, config: &Config, rules: RuleSet) -> anyhow::Result<SortOutcome> {
    let file_size = std::fs::metadata(path)
        .with_context(|| format!("MBOX file not found: {}", path.display()))?
        .len();
    let splitter = mbox::open(path, config.performance.read_buffer_size)?;

    let pipeline = Pipeline::new(
        MessageDecoder::new().max_message_size(config.performance.max_message_size),
        Classifier::new(rules),
    )
    .workers(config.performance.workers)
    .batch_size(config.performance.batch_size);

    let pb = ProgressBar::new(file_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Sorting [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({msg})")?
            .progress_chars("#>-"),
    );

    let outcome = pipeline.run_with_progress(
        splitter,
        Some(&|attempted, bytes| {
            pb.set_position(bytes);
            pb.set_message(format!("{attempted} messages"));
        }),
    )?;
    pb.finish_and_clear();
    Ok(outcome)
}

fn cmd_sort(path: &Path, config: &Config, summary_only: bool, json: bool) -> anyhow::Result<()> {
    // Rules are validated before the archive is touched.
    let rules = RuleSet::from_config(&config.classification)?;

    let start = Instant::now();
    let outcome = run_pipeline(path, config, rules)?;
    let elapsed = start.elapsed();

    if json {
        print_sort_json(path, &outcome, summary_only)?;
    } else {
        print_sort_table(path, &outcome, summary_only, elapsed);
    }
    Ok(())
}

fn cmd_senders(path: &Path, config: &Config, top: usize, json: bool) -> anyhow::Result<()> {
    let outcome = run_pipeline(path, config, RuleSet::default())?;
    let senders = report::top_senders(&outcome.messages, top);

    if json {
        let output = serde_json::json!({
            "file": path.display().to_string(),
            "attempted": outcome.attempted,
            "succeeded": outcome.succeeded,
            "top_senders": senders,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if senders.is_empty() {
        println!("  No senders found.");
        return Ok(());
    }
    println!();
    println!("  Top {} senders by message count", senders.len());
    println!();
    for (i, s) in senders.iter().enumerate() {
        println!("  {:>2}. Count: {:>6} | Sender: {}", i + 1, s.count, s.address);
    }
    println!();
    println!(
        "  {} of {} messages decoded",
        outcome.succeeded, outcome.attempted
    );
    Ok(())
}

/// Print buckets, counts and diagnostics in a human-readable layout.
fn print_sort_table(
    path: &Path,
    outcome: &SortOutcome,
    summary_only: bool,
    elapsed: std::time::Duration,
) {
    use humansize::{format_size, BINARY};

    let summary = Summary::from_outcome(outcome, 0);

    println!();
    println!("  {:<20} {}", "File", path.display());
    println!(
        "  {:<20} {} attempted, {} decoded, {} failed",
        "Messages", summary.attempted, summary.succeeded, summary.failed
    );
    if let Some(range) = summary.date_range {
        println!(
            "  {:<20} {} to {}",
            "Date range",
            range.oldest.format("%Y-%m-%d"),
            range.newest.format("%Y-%m-%d")
        );
    }
    println!("  {:<20} {}", "Buckets", summary.buckets);
    println!("  {:<20} {:.2}s", "Elapsed", elapsed.as_secs_f64());
    println!();

    let mut current_rule = "";
    for bucket in outcome.buckets.values() {
        if bucket.rule() != current_rule {
            current_rule = bucket.rule();
            println!("  [{current_rule}]");
        }
        println!("    {} ({})", bucket.label(), bucket.len());
        if summary_only {
            continue;
        }
        for &idx in &bucket.members {
            let msg = &outcome.messages[idx];
            let date = msg
                .date
                .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "(undated)".to_string());
            let sender = msg
                .sender
                .as_ref()
                .map(|s| s.address.chars().take(24).collect::<String>())
                .unwrap_or_default();
            let subject: String = msg.subject.chars().take(39).collect();
            println!(
                "      {:<17} {:<25} {:<40} {:>9}",
                date,
                sender,
                subject,
                format_size(msg.size, BINARY)
            );
        }
    }

    if !outcome.diagnostics.is_empty() {
        println!();
        println!("  Diagnostics ({})", outcome.diagnostics.len());
        for d in &outcome.diagnostics {
            println!("      offset {:<12} {:<26} {}", d.offset, d.kind, d.message);
        }
    }
    println!();
}

/// Print the outcome as JSON.
fn print_sort_json(path: &Path, outcome: &SortOutcome, summary_only: bool) -> anyhow::Result<()> {
    let buckets: serde_json::Map<String, serde_json::Value> = outcome
        .buckets
        .iter()
        .map(|(name, bucket)| {
            let value = if summary_only {
                serde_json::json!(bucket.len())
            } else {
                serde_json::Value::Array(
                    bucket
                        .members
                        .iter()
                        .map(|&idx| {
                            let m = &outcome.messages[idx];
                            serde_json::json!({
                                "offset": m.source_offset,
                                "date": m.date.map(|d| d.to_rfc3339()),
                                "sender": m.sender.as_ref().map(|s| s.address.clone()),
                                "subject": m.subject,
                                "message_id": m.message_id,
                                "size": m.size,
                            })
                        })
                        .collect(),
                )
            };
            (name.clone(), value)
        })
        .collect();

    let output = serde_json::json!({
        "file": path.display().to_string(),
        "summary": Summary::from_outcome(outcome, report::DEFAULT_TOP_SENDERS),
        "buckets": buckets,
        "diagnostics": outcome.diagnostics,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
