use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use core_model::{NullPacer, Pacer, ThreadPacer};
use extract::WallClassifier;
use fixture::{Scenario, ScriptedView};
use owo_colors::OwoColorize;
use store_fs::FsTranscriptStore;
use tracing::info;

mod config;

#[derive(Parser)]
#[command(name = "scrollback")]
#[command(about = "Export full conversation history from a scroll-bound chat view")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // Replay a recorded view scenario through the full export pipeline.
    Run(RunArgs),
    // Resolve one time label against now.
    Label { label: String },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    fixture: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
    // Age cutoff for discovery, e.g. "30d".
    #[arg(long)]
    max_age: Option<String>,
    #[arg(long)]
    stagnation_limit: Option<u32>,
    #[arg(long)]
    unresolved_limit: Option<u32>,
    // Scripted replays are deterministic; skip all settle/backoff waits.
    #[arg(long, default_value_t = false)]
    no_wait: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let t = Instant::now();

    match cli.command {
        Commands::Run(args) => {
            let file_config = config::Config::load()?;
            let mut cfg = pipeline::PipelineConfig::default();
            file_config.apply(&mut cfg)?;
            if let Some(age) = &args.max_age {
                cfg.discovery.max_age = config::parse_age(age)?;
            }
            if let Some(n) = args.stagnation_limit {
                cfg.extract.stagnation_limit = n;
            }
            if let Some(n) = args.unresolved_limit {
                cfg.discovery.unresolved_limit = n;
            }

            let scenario = Scenario::load(&args.fixture)
                .with_context(|| format!("load scenario {}", args.fixture.display()))?;
            let mut view = ScriptedView::new(scenario);

            let out_dir = match args.out {
                Some(dir) => dir,
                None => default_out_dir(),
            };
            let mut store = FsTranscriptStore::create(&out_dir)?;

            let mut thread_pacer = ThreadPacer;
            let mut null_pacer = NullPacer;
            let pacer: &mut dyn Pacer = if args.no_wait {
                &mut null_pacer
            } else {
                &mut thread_pacer
            };

            info!(fixture = %args.fixture.display(), out = %out_dir.display(), "starting run");
            let report = pipeline::run_pipeline(
                &mut view,
                pacer,
                &mut store,
                &WallClassifier::default(),
                &cfg,
                Utc::now(),
            )?;
            let report_path = store.finish(&report)?;
            info!(elapsed = ?t.elapsed(), report = %report_path.display(), "run complete");
            print_summary(&report, store.root());
        }
        Commands::Label { label } => {
            match datelabel::parse(&label, Utc::now()).resolved() {
                Some(ts) => println!("{label} -> {}", ts.to_rfc3339()),
                None => println!("{label} -> unresolved"),
            }
        }
    }

    Ok(())
}

fn default_out_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scrollback")
        .join(format!("export-{}", Utc::now().format("%Y%m%d-%H%M%S")))
}

fn print_summary(report: &core_model::RunReport, root: &std::path::Path) {
    println!(
        "{} {}",
        "exported:".green().bold(),
        report.exported.len()
    );
    for summary in &report.exported {
        println!("  {}", summary.title);
    }
    if !report.incomplete.is_empty() {
        println!(
            "{} {}",
            "incomplete:".yellow().bold(),
            report.incomplete.len()
        );
        for record in &report.incomplete {
            let reasons: Vec<&str> = record.reasons.iter().map(|r| r.as_str()).collect();
            println!("  {} ({})", record.title, reasons.join(", "));
        }
    }
    if !report.unresolved.is_empty() {
        println!(
            "{} {}",
            "unresolved timestamps:".yellow().bold(),
            report.unresolved.len()
        );
        for summary in &report.unresolved {
            println!("  {} [{}]", summary.title, summary.time_label);
        }
    }
    println!("artifacts: {}", root.display());
}
