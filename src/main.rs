use anyhow::Result;
use clap::Parser;
use rumahfinder::common_scraper::run_crawl;
use rumahfinder::config::{
    self, FetchOptions, QueryArgs, RunConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_OUTPUT_DIR,
    DEFAULT_STATE_FILE,
};
use rumahfinder::fetcher::FetchSelector;
use rumahfinder::resume::ResumeStore;
use rumahfinder::tui::CrawlTUI;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Rumahfinder - slow but sure crawler for houses on rumahdijual.com")]
struct Args {
    /// Area (city) to search in
    area: Option<String>,

    /// Minimum price in millions (juta)
    min_price: Option<String>,

    /// Maximum price in millions (juta)
    max_price: Option<String>,

    /// File keeping per-area progress between runs
    #[clap(long, default_value = DEFAULT_STATE_FILE)]
    state_file: PathBuf,

    /// Directory receiving one CSV file per area and price range
    #[clap(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Fetch attempts per page before giving up (0 retries forever)
    #[clap(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Pause between fetch attempts in milliseconds
    #[clap(long, default_value = "1000")]
    retry_delay_ms: u64,

    /// Seconds to let the web proxy render the page
    #[clap(long, default_value = "10")]
    settle_secs: u64,

    /// Show the browser window instead of running headless
    #[clap(long)]
    visible: bool,

    /// Load images in the visible browser
    #[clap(long)]
    show_images: bool,

    /// Only fetch directly, never through a web proxy
    #[clap(long)]
    direct_only: bool,

    /// Do not ring the terminal bell after each page
    #[clap(long)]
    no_bell: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let store = ResumeStore::new(&args.state_file);
    let query = config::resolve_query(
        &QueryArgs {
            area: args.area.clone(),
            min_price_millions: args.min_price.clone(),
            max_price_millions: args.max_price.clone(),
        },
        &store,
    )?;

    let config = RunConfig {
        query,
        state_file: args.state_file.clone(),
        output_dir: args.output_dir.clone(),
        fetch: FetchOptions {
            max_attempts: Some(args.max_attempts),
            retry_delay: Duration::from_millis(args.retry_delay_ms),
            settle_time: Duration::from_secs(args.settle_secs),
            headless: !args.visible,
            disable_images: !args.show_images,
            direct_only: args.direct_only,
            ..FetchOptions::default()
        },
        bell: !args.no_bell,
    };

    info!("Crawling {} into {}", config.query, config.output_file().display());

    let mut fetcher = FetchSelector::from_options(&config.fetch)?;
    let mut tui = CrawlTUI::new(config.bell);

    match run_crawl(&config, &mut fetcher, &store, Some(&mut tui)) {
        Ok(summary) => {
            info!(
                "Wrote {} listings from {} pages to {}",
                summary.records_written,
                summary.pages_crawled,
                summary.output_file.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("{:#}", e);
            Err(e)
        }
    }
}
