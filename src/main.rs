mod config;
mod crawl;
mod db;
mod error;
mod fetcher;
mod report;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Settings;
use crate::crawl::WalkOutcome;
use crate::db::SqliteSink;
use crate::fetcher::HttpFetcher;
use crate::report::ReportWriter;

#[derive(Parser)]
#[command(name = "job_scraper", about = "Job listing crawler")]
struct Cli {
    /// Settings file (default: ./crawler.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the search results and store every job found
    Crawl {
        /// Search terms
        #[arg(short, long)]
        query: Option<String>,
        /// Location filter
        #[arg(short, long)]
        location: Option<String>,
        /// Only jobs posted in the last N days
        #[arg(short, long)]
        days: Option<u32>,
        /// Max listing pages to walk
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Append a plain-text log of every extracted job to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
        /// Re-fetch jobs that are already stored
        #[arg(long)]
        refetch: bool,
    },
    /// Show stored job and run statistics
    Stats,
    /// Stored jobs table
    List {
        /// Filter by company name (substring)
        #[arg(short, long)]
        company: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Write stored jobs to a file
    Export {
        #[arg(short, long, default_value = "job_details.txt")]
        output: PathBuf,
        #[arg(short, long, value_enum, default_value = "text")]
        format: ExportFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Crawl {
            query,
            location,
            days,
            limit,
            report,
            refetch,
        } => {
            if let Some(q) = query {
                settings.query = q;
            }
            if let Some(l) = location {
                settings.location = l;
            }
            if days.is_some() {
                settings.freshness_days = days;
            }
            if limit.is_some() {
                settings.max_pages = limit;
            }
            if refetch {
                settings.skip_known = false;
            }
            run_crawl(&settings, report).await
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Jobs:      {}", s.jobs);
            println!("Degraded:  {}", s.degraded);
            println!("Companies: {}", s.companies);
            println!("Runs:      {}", s.runs);
            println!("Last job:  {}", s.last_scraped.as_deref().unwrap_or("-"));

            let runs = db::recent_runs(&conn, 5)?;
            if !runs.is_empty() {
                println!("\n--- Recent runs ---");
                for r in &runs {
                    println!(
                        "#{:<4} {:<25} {:<6} {:>3} pages {:>4} records {:>4} saved {:>8}{}",
                        r.id,
                        truncate(&r.started_at, 25),
                        r.outcome,
                        r.pages,
                        r.records,
                        r.persisted,
                        format_duration(Duration::from_millis(r.elapsed_ms.max(0) as u64)),
                        r.failure
                            .as_deref()
                            .map(|f| format!("  ({})", truncate(f, 60)))
                            .unwrap_or_default(),
                    );
                }
            }
            Ok(())
        }
        Commands::List { company, limit } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let jobs = db::fetch_jobs(&conn, company.as_deref(), Some(limit))?;
            if jobs.is_empty() {
                println!("No jobs stored. Run 'crawl' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<36} | {:<20} | {:<20} | {}",
                "#", "Title", "Company", "Location", "URL"
            );
            println!("{}", "-".repeat(110));
            for (i, j) in jobs.iter().enumerate() {
                println!(
                    "{:>3} | {:<36} | {:<20} | {:<20} | {}",
                    i + 1,
                    truncate(&j.title, 36),
                    truncate(&j.company, 20),
                    truncate(&j.location, 20),
                    j.url
                );
            }
            println!("\n{} jobs", jobs.len());
            Ok(())
        }
        Commands::Export { output, format } => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let jobs = db::fetch_jobs(&conn, None, None)?;
            let written = export(&jobs, &output, format)?;
            println!("Wrote {} jobs to {}", written, output.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run_crawl(settings: &Settings, report: Option<PathBuf>) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)?;
    db::init_schema(&conn)?;
    let sink = SqliteSink::new(conn, settings.query.clone());
    let fetcher = HttpFetcher::new(settings.user_agent.clone());

    let mut writer = match &report {
        Some(path) => Some(
            ReportWriter::append(path)
                .with_context(|| format!("Failed to open report {:?}", path))?,
        ),
        None => None,
    };

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} jobs {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(200));

    let started_at = Utc::now();
    let summary = crawl::run(&fetcher, &sink, settings, writer.as_mut(), |record| {
        pb.inc(1);
        pb.set_message(truncate(&record.title, 40));
    })
    .await?;
    pb.finish_and_clear();

    db::record_run(sink.conn(), &summary, started_at)?;
    summary.print();

    match summary.outcome {
        WalkOutcome::Done => Ok(()),
        WalkOutcome::Failed(reason) => anyhow::bail!("crawl failed: {}", reason),
    }
}

fn export(jobs: &[crawl::JobRecord], path: &Path, format: ExportFormat) -> anyhow::Result<usize> {
    match format {
        ExportFormat::Text => {
            let mut writer = ReportWriter::create(path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            for job in jobs {
                writer.write_record(job)?;
            }
            Ok(writer.count())
        }
        ExportFormat::Json => {
            let mut file = std::io::BufWriter::new(
                std::fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
            );
            for job in jobs {
                serde_json::to_writer(&mut file, job)?;
                file.write_all(b"\n")?;
            }
            file.flush()?;
            Ok(jobs.len())
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
