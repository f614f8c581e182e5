use anyhow::Context;
use clap::{Parser, Subcommand};
use feed_aggregator::{AggregatorConfig, FeedAggregator, FetchConfig, RefreshReport};
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "feed-aggregator", about = "Merge feeds into one list of unseen items")]
struct Cli {
    /// Directory holding feeds.json, viewed.json and config.json
    #[arg(long, env = "FEED_AGGREGATOR_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Per-request HTTP timeout in seconds
    #[arg(long, default_value_t = 20)]
    timeout: u64,

    /// Retries for transient HTTP failures
    #[arg(long, default_value_t = 2)]
    retries: u32,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every feed and print unseen items (default)
    Refresh,
    /// List configured feeds
    List,
    /// Add a feed by url
    Add { url: String },
    /// Remove a feed by url, or by position with --index
    Remove {
        #[arg(required_unless_present = "index")]
        url: Option<String>,
        #[arg(long, conflicts_with = "url")]
        index: Option<usize>,
    },
    /// Change the display name of a feed
    Rename { url: String, name: String },
    /// Mark one or more items as viewed
    MarkSeen {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show or set how many items are taken from each feed
    Limit { value: Option<u32> },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::WARN })
        .with_writer(std::io::stderr)
        .init();

    let config = AggregatorConfig {
        fetch: FetchConfig {
            timeout_seconds: cli.timeout,
            max_retries: cli.retries,
            ..FetchConfig::default()
        },
        refresh_on_change: false,
    };
    let aggregator = FeedAggregator::open(&cli.data_dir, config)
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;

    match cli.command.unwrap_or(Command::Refresh) {
        Command::Refresh => {
            let report = aggregator.refresh().await;
            print_report(&report);
        }
        Command::List => {
            let sources = aggregator.sources().await;
            if sources.is_empty() {
                println!("No feeds configured. Add one with `feed-aggregator add <url>`.");
            }
            for (index, source) in sources.iter().enumerate() {
                println!("{:>3}  {} - {}", index, source.name, source.url);
            }
        }
        Command::Add { url } => {
            let source = aggregator.add_source(&url).await?;
            println!("Added feed: {} - {}", source.name, source.url);
            let report = aggregator.refresh().await;
            print_report(&report);
        }
        Command::Remove { url, index } => {
            let removed = match (url, index) {
                (_, Some(index)) => aggregator.remove_source_at(index).await?,
                (Some(url), None) => aggregator.remove_source(&url).await?,
                (None, None) => anyhow::bail!("give a feed url or --index"),
            };
            println!("Removed feed: {} - {}", removed.name, removed.url);
        }
        Command::Rename { url, name } => {
            aggregator.rename_source(&url, &name).await?;
            println!("Renamed {} to {}", url, name);
        }
        Command::MarkSeen { ids } => {
            for id in ids {
                if aggregator.mark_seen(&id).await {
                    println!("Marked as viewed: {}", id);
                } else {
                    info!("Already viewed: {}", id);
                }
            }
        }
        Command::Limit { value: Some(value) } => {
            let limit = aggregator.set_fetch_limit(value).await?;
            println!("Videos per channel set to {}", limit);
        }
        Command::Limit { value: None } => {
            println!("{}", aggregator.fetch_limit().await);
        }
    }

    Ok(())
}

fn print_report(report: &RefreshReport) {
    if report.items.is_empty() {
        let message = if report.error_count > 0 {
            format!(
                "No new videos found.\n({} feed errors occurred - check the log.)",
                report.error_count
            )
        } else if report.universe_size == 0 {
            "No videos found in feeds. Add RSS feed URLs.".to_string()
        } else {
            "All fetched videos have been marked as viewed.".to_string()
        };
        println!("{}", message);
        return;
    }

    for item in &report.items {
        println!("{}", item.title);
        println!("    {} | {}", item.source_name, item.published_display);
        println!("    {}", item.link);
        println!("    id: {}", item.id);
    }
    println!(
        "Displaying {} new videos ({} feed errors).",
        report.items.len(),
        report.error_count
    );
}
