use crate::fetcher::FetchSelector;
use crate::models::{QueryKey, ResumeState};
use crate::resume::ResumeStore;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::ops::RangeInclusive;
use tracing::info;

pub const SEARCH_URL: &str = "http://rumahdijual.com/carirumah.php";
pub const RESULTS_PER_PAGE: u64 = 15;

static SUMMARY_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td.tcat").unwrap());
static RESULT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:dari|of)\b\s*:?\s*([\d.,]+)").unwrap());

/// First results page of a query.
pub fn search_url(query: &QueryKey) -> String {
    format!(
        "{}?transaksi=BELI&jenis=RUMAH&kota={}&minprice={}&maxprice={}",
        SEARCH_URL,
        urlencoding::encode(&query.area),
        query.min_price,
        query.max_price
    )
}

/// A results page sorted the way the site paginates it.
pub fn page_url(query: &QueryKey, page: u32) -> String {
    format!(
        "{}?sort=2&transaksi=BELI&jenis=RUMAH&kota={}&minprice={}&maxprice={}&p={}",
        SEARCH_URL,
        urlencoding::encode(&query.area),
        query.min_price,
        query.max_price,
        page
    )
}

/// Reads the total number of results from the second summary cell,
/// e.g. "Menampilkan 1 sampai 15 (dari 47)".
pub fn parse_result_count(html: &str) -> Result<u64> {
    let document = Html::parse_document(html);

    let summary = document
        .select(&SUMMARY_CELL)
        .nth(1)
        .context("Result summary cell not found")?
        .text()
        .collect::<String>();

    let count = RESULT_COUNT
        .captures(&summary)
        .and_then(|captures| captures.get(1))
        .with_context(|| format!("No result count in summary '{}'", summary.trim()))?
        .as_str()
        .replace(['.', ','], "");

    count
        .parse::<u64>()
        .with_context(|| format!("Invalid result count '{}'", count))
}

pub fn total_pages(result_count: u64) -> u32 {
    u32::try_from(result_count.div_ceil(RESULTS_PER_PAGE)).unwrap_or(u32::MAX)
}

/// Pages still to crawl, right after the last completed one.
pub fn remaining_pages(state: &ResumeState) -> RangeInclusive<u32> {
    state.visited_page.saturating_add(1)..=state.total_pages
}

/// Returns the area's progress with a known page count.
///
/// The count is only worked out when none is saved yet, from the first results
/// page, and saved straight away.
pub fn ensure_total_pages(
    fetcher: &mut FetchSelector,
    store: &ResumeStore,
    query: &QueryKey,
) -> Result<ResumeState> {
    let state = store.get(&query.area)?;
    if state.total_pages > 0 {
        info!(
            "Resuming {} at page {} of {}",
            query,
            state.visited_page + 1,
            state.total_pages
        );
        return Ok(state);
    }

    let url = search_url(query);
    info!("Counting results for {}", query);
    let html = fetcher.fetch(&url)?;
    let count = parse_result_count(&html)
        .with_context(|| format!("Failed to read the result count from {}", url))?;
    let pages = total_pages(count);
    info!("{} results on {} pages", count, pages);

    store.set_total_pages(&query.area, pages)
}
