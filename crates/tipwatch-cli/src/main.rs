mod logging;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
#[cfg(feature = "browser")]
use tipwatch_adapters::{BrowserListingRenderer, BrowserRendererConfig};
use tipwatch_adapters::{HttpListingRenderer, ListingRenderer};
use tipwatch_storage::{
    MemoryRecordStore, PgRecordStore, PoliteFetcher, RecordStore, ReqwestTransport,
};
use tipwatch_sync::{HarvestConfig, HarvestPipeline, RunOptions};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tipwatch")]
#[command(about = "Harvests football match predictions into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Harvest today and the following days once.
    Scrape(ScrapeArgs),
    /// Create the predictions table if it does not exist.
    Migrate,
    /// Verify the store is reachable.
    Check,
    /// Re-run the harvest on the configured cron schedule until Ctrl-C.
    Watch(ScrapeArgs),
}

#[derive(Debug, Clone, Default, Args)]
struct ScrapeArgs {
    /// First listing date (YYYY-MM-DD); defaults to today.
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Extra days after the first date.
    #[arg(long)]
    days: Option<u32>,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Also write the collected records to a spreadsheet.
    #[arg(long)]
    excel: bool,
    /// Keep records in memory instead of writing to Postgres.
    #[arg(long)]
    dry_run: bool,
    /// Render listings in headless Chrome (requires the `browser` feature).
    #[arg(long)]
    browser: bool,
}

impl ScrapeArgs {
    fn apply(&self, config: &mut HarvestConfig) {
        if let Some(days) = self.days {
            config.days_ahead = days;
        }
        if let Some(concurrency) = self.concurrency {
            config.scheduler.concurrency = concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            config.scheduler.batch_size = batch_size;
        }
        config.scheduler = config.scheduler.normalized();
    }

    fn run_options(&self, config: &HarvestConfig) -> RunOptions {
        RunOptions {
            start: self.date,
            days_ahead: config.days_ahead,
            export: self.excel,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let mut config = HarvestConfig::from_env();
    let _log_guard = logging::init(&config.log_dir)?;

    match cli.command.unwrap_or_else(|| Commands::Scrape(ScrapeArgs::default())) {
        Commands::Scrape(args) => {
            args.apply(&mut config);
            let options = args.run_options(&config);
            let pipeline = build_pipeline(config, &args).await?;
            let summary = pipeline.run_once(&options).await?;
            println!(
                "harvest complete: run_id={} dates={}/{} summaries={} inserted={} updated={} failed={}",
                summary.run_id,
                summary.dates_rendered,
                summary.dates_requested,
                summary.summaries,
                summary.tally.inserted,
                summary.tally.updated,
                summary.tally.failed
            );
            if let Some(path) = summary.export_path {
                println!("spreadsheet: {path}");
            }
        }
        Commands::Migrate => {
            let store = connect_postgres(&config).await?;
            store
                .ensure_schema()
                .await
                .with_context(|| format!("creating table {}", config.table))?;
            println!("table {} ready", config.table);
        }
        Commands::Check => {
            let store = connect_postgres(&config).await?;
            store.health_check().await.context("store health check failed")?;
            println!("store reachable");
        }
        Commands::Watch(args) => {
            args.apply(&mut config);
            let options = args.run_options(&config);
            let pipeline = Arc::new(build_pipeline(config, &args).await?);
            pipeline.watch(options).await?;
        }
    }

    Ok(())
}

async fn connect_postgres(config: &HarvestConfig) -> Result<PgRecordStore> {
    PgRecordStore::connect(&config.database_url, &config.table, config.upsert_key)
        .await
        .context("connecting to record store")
}

async fn open_store(config: &HarvestConfig, dry_run: bool) -> Result<Arc<dyn RecordStore>> {
    if dry_run {
        info!("dry run: records are kept in memory only");
        return Ok(Arc::new(MemoryRecordStore::new(config.upsert_key)));
    }
    Ok(Arc::new(connect_postgres(config).await?))
}

async fn open_renderer(
    args: &ScrapeArgs,
    transport: &ReqwestTransport,
) -> Result<Arc<dyn ListingRenderer>> {
    if args.browser {
        #[cfg(feature = "browser")]
        {
            let renderer = BrowserListingRenderer::launch(BrowserRendererConfig::default())
                .await
                .context("launching browser")?;
            return Ok(Arc::new(renderer));
        }
        #[cfg(not(feature = "browser"))]
        anyhow::bail!("--browser needs a build with the `browser` feature");
    }
    Ok(Arc::new(HttpListingRenderer::new(Arc::new(transport.clone()))?))
}

async fn build_pipeline(
    config: HarvestConfig,
    args: &ScrapeArgs,
) -> Result<HarvestPipeline<dyn RecordStore>> {
    let transport = ReqwestTransport::new(&config.http)?;
    let renderer = open_renderer(args, &transport).await?;
    let fetcher = Arc::new(PoliteFetcher::new(transport, config.fetch));
    let store = open_store(&config, args.dry_run).await?;
    HarvestPipeline::new(config, renderer, fetcher, store)
}
