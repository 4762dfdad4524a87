use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use newswire_adapters::HttpFeedFetcher;
use newswire_storage::{HttpClientConfig, HttpFetcher, PgStore};
use newswire_sync::{maybe_build_scheduler, probe_feed, NewsPipeline, SourceRegistry, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "newswire")]
#[command(about = "Newswire feed aggregator command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one fetch cycle over every active source.
    Sync {
        #[arg(long)]
        tenant: Option<Uuid>,
    },
    /// Fetch a feed without storing anything.
    TestFeed { url: String },
    /// Run the cron schedule until interrupted.
    Schedule,
    Migrate,
    /// Create the registry's sources for a tenant.
    Seed {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long)]
        registry: Option<PathBuf>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Print the source registry grouped by category.
    Registry {
        #[arg(long)]
        registry: Option<PathBuf>,
        #[arg(long)]
        category: Option<String>,
    },
    Stats {
        #[arg(long)]
        tenant: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync { tenant: None }) {
        Commands::Sync { tenant } => {
            let pipeline = NewsPipeline::from_config(&config).await?;
            let report = pipeline.run_fetch_cycle(tenant).await?;
            println!(
                "sync complete: run_id={} total={} successful={} failed={} new_items={}",
                report.run_id, report.total, report.successful, report.failed, report.new_items
            );
            for failure in &report.failures {
                println!("  failed: {} ({}): {}", failure.source_name, failure.source_id, failure.error);
            }
        }
        Commands::TestFeed { url } => {
            let http = HttpFetcher::new(HttpClientConfig {
                timeout: Duration::from_secs(config.http_timeout_secs),
                user_agent: Some(config.user_agent.clone()),
                ..Default::default()
            })?;
            let fetcher = HttpFeedFetcher::new(Arc::new(http));
            let probe = probe_feed(&fetcher, &url).await;
            if probe.valid {
                println!(
                    "valid feed: title={} items={}",
                    probe.feed_title.as_deref().unwrap_or("<untitled>"),
                    probe.item_count.unwrap_or_default()
                );
            } else {
                println!("invalid feed: {}", probe.error.as_deref().unwrap_or("unknown error"));
            }
        }
        Commands::Schedule => {
            let mut config = config;
            config.scheduler_enabled = true;
            let pipeline = Arc::new(NewsPipeline::from_config(&config).await?);
            let Some(mut sched) = maybe_build_scheduler(pipeline, &config).await? else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!(
                hourly = %config.hourly_cron,
                business_hours = %config.business_hours_cron,
                timezone = ?config.schedule_timezone,
                "scheduler running; press ctrl-c to stop"
            );
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
        Commands::Seed {
            tenant,
            registry,
            category,
        } => {
            let path = registry.unwrap_or_else(|| config.sources_registry_path());
            let registry = SourceRegistry::load(&path).await?;
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let summary = registry.seed(&store, tenant, category.as_deref()).await?;
            println!(
                "seed complete: created={} already_present={} rejected={}",
                summary.created, summary.already_present, summary.rejected
            );
        }
        Commands::Registry { registry, category } => {
            let path = registry.unwrap_or_else(|| config.sources_registry_path());
            let registry = SourceRegistry::load(&path).await?;
            let categories = match category.as_deref() {
                Some(category) => vec![category],
                None => registry.categories(),
            };
            for category in categories {
                println!("{category}");
                for entry in registry.by_category(category) {
                    println!("  {} <{}>", entry.name, entry.url);
                    if let Some(description) = &entry.description {
                        println!("    {description}");
                    }
                }
            }
        }
        Commands::Stats { tenant } => {
            let pipeline = NewsPipeline::from_config(&config).await?;
            let stats = pipeline.lifecycle().stats(tenant).await?;
            println!(
                "sources={} active={} pending={} enhanced={} posted={}",
                stats.total_sources,
                stats.active_sources,
                stats.pending_items,
                stats.enhanced_items,
                stats.posted_count
            );
        }
    }

    Ok(())
}
