use crate::models::{QueryKey, MILLION};
use crate::resume::ResumeStore;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AREA: &str = "depok";
pub const DEFAULT_STATE_FILE: &str = "resume.json";
pub const DEFAULT_OUTPUT_DIR: &str = "OUTPUT";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 25;

/// How pages are fetched.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound on strategy attempts per URL, `None` retries forever
    pub max_attempts: Option<u32>,
    pub retry_delay: Duration,
    /// Wait after submitting the URL to the web proxy
    pub settle_time: Duration,
    /// Wait after opening the web proxy front page
    pub navigation_delay: Duration,
    pub headless: bool,
    pub disable_images: bool,
    pub direct_only: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            retry_delay: Duration::from_secs(1),
            settle_time: Duration::from_secs(10),
            navigation_delay: Duration::from_secs(2),
            headless: true,
            disable_images: true,
            direct_only: false,
        }
    }
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub query: QueryKey,
    pub state_file: PathBuf,
    pub output_dir: PathBuf,
    pub fetch: FetchOptions,
    pub bell: bool,
}

impl RunConfig {
    pub fn output_file(&self) -> PathBuf {
        crate::utils::output_path(&self.output_dir, &self.query)
    }
}

/// Raw command line values before they are checked against saved progress.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub area: Option<String>,
    pub min_price_millions: Option<String>,
    pub max_price_millions: Option<String>,
}

/// Resolves the query for this run.
///
/// Missing or unparsable bounds fall back to the saved ones (or defaults). A
/// bound that differs from the saved one resets the area's progress.
pub fn resolve_query(args: &QueryArgs, store: &ResumeStore) -> Result<QueryKey> {
    let area = args
        .area
        .as_deref()
        .map(str::trim)
        .filter(|area| !area.is_empty())
        .unwrap_or(DEFAULT_AREA)
        .to_string();

    let min_price = args.min_price_millions.as_deref().and_then(parse_millions);
    let max_price = args.max_price_millions.as_deref().and_then(parse_millions);

    let state = store.apply_price_bounds(&area, min_price, max_price)?;

    Ok(QueryKey::new(area, state.min_price, state.max_price))
}

fn parse_millions(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|millions| millions.checked_mul(MILLION))
}
