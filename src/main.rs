mod collector;
mod config;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod progress;
mod record;
mod recovery;
mod shutdown;
mod store;
mod work;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::config::Settings;
use crate::fetcher::HttpTransport;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::store::Store;

#[derive(Parser)]
#[command(name = "judgement_scraper", about = "Supreme Court judgement crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the search listing and collect result links per year and page
    Links {
        /// Continue from the saved listing position
        #[arg(long)]
        resume: bool,
    },
    /// Build the flat judgement link index from collected links
    Filter,
    /// Fetch and parse every judgement in the link index
    Scrape {
        /// Continue after the last committed item instead of starting over
        #[arg(long)]
        resume: bool,
    },
    /// Check the progress marker against saved judgements and show statistics
    Verify {
        /// Drop an empty record left at the marker by an interrupted run
        #[arg(long)]
        clean_tail: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;
    info!(settings = ?settings, "Loaded settings");
    let store = Store::open(&settings.data_dir, &settings.output_dir)
        .context("Failed to open data directory")?;

    let result = match cli.command {
        Commands::Links { resume } => {
            let transport = HttpTransport::new(&settings)?;
            let (trigger, mut signal) = shutdown::channel();
            shutdown::listen_for_ctrl_c(trigger);

            let stats =
                collector::collect_links(&transport, &store, &settings, resume, &mut signal)
                    .await?;
            if stats.interrupted {
                println!("Stopped. Progress saved, rerun with --resume to continue.");
            }
            println!(
                "Collected {} links from {} pages.",
                stats.links, stats.pages
            );
            Ok(())
        }
        Commands::Filter => {
            let total = collector::build_link_index(&store)?;
            println!("Total judgement links: {}", total);
            Ok(())
        }
        Commands::Scrape { resume } => scrape(&settings, &store, resume).await,
        Commands::Verify { clean_tail } => verify(&store, clean_tail),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn scrape(settings: &Settings, store: &Store, resume: bool) -> Result<()> {
    let items = store
        .load_link_index()
        .with_context(|| format!("Cannot read {}", store.link_index_path().display()))?;
    info!("Loaded {} links", items.len());

    let marker = if resume {
        store.load_marker().context("Cannot read progress marker")?
    } else {
        None
    };
    let partition_key = pipeline::by_year;
    if let Some(m) = &marker {
        info!("Resuming at index {}", m.index + 1);
        recovery::clean_incomplete_tail(store, m, &items, partition_key)?;
    }
    let start = progress::resume_index(marker.as_ref(), resume);
    if start >= items.len() {
        println!("Nothing to do: all {} links already processed.", items.len());
        return Ok(());
    }

    let transport = HttpTransport::new(settings)?;
    let (trigger, signal) = shutdown::channel();
    shutdown::listen_for_ctrl_c(trigger);

    let pb = ProgressBar::new((items.len() - start) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut driver = Pipeline::new(&transport, store, PipelineOptions::from(settings), signal)
        .with_partition_key(partition_key)
        .with_progress_bar(pb);
    if let Some(m) = marker {
        driver = driver.with_marker(m);
    }

    println!("Scraping {} judgements from index {}...", items.len() - start, start);
    let summary = driver.run(&items, start).await?;
    if summary.interrupted {
        println!("Stopped. Progress saved, rerun with --resume to continue.");
    }
    println!(
        "Done: {} attempted ({} saved, {} failed). {} judgements saved overall.",
        summary.attempted,
        summary.saved,
        summary.failed,
        driver.marker().total_processed
    );
    Ok(())
}

fn verify(store: &Store, clean_tail: bool) -> Result<()> {
    let marker = store.load_marker().context("Cannot read progress marker")?;
    let items = match store.load_link_index() {
        Ok(items) => items,
        Err(e) => {
            println!("No link index ({})", e);
            Vec::new()
        }
    };

    if clean_tail {
        if let Some(m) = &marker {
            if recovery::clean_incomplete_tail(store, m, &items, pipeline::by_year)? {
                println!("Removed incomplete record at index {}", m.index);
            }
        }
    }

    let report = recovery::verify(store, marker.as_ref(), items.len())?;
    if let Some(m) = &marker {
        println!(
            "Progress: index {}, {} processed, status {:?}",
            m.index, m.total_processed, m.status
        );
    }
    if let Some(expected) = report.expected {
        println!("Expected to have processed: {} links", expected);
        println!("Actual judgements in data:  {}", report.actual);
        if report.is_consistent() {
            println!("Data appears consistent");
        } else {
            println!("Inconsistency detected: some judgements might be missing.");
            println!("Run 'scrape --resume' to continue from the last good position.");
        }
    }

    println!("\n--- Data statistics ---");
    println!("Partitions with data: {}", report.partitions.len());
    for p in &report.partitions {
        println!("\n{}: {} judgements", p.key, p.records);
        if let Some(title) = &p.sample_title {
            println!("  Sample: \"{}...\"", title);
            println!("  Text sections: {}", p.sample_sections);
        }
    }
    Ok(())
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
