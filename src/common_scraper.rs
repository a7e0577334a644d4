use crate::config::RunConfig;
use crate::fetcher::FetchSelector;
use crate::resume::ResumeStore;
use crate::tui::CrawlTUI;
use crate::{rumahdijual, scraper, utils};
use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub output_file: PathBuf,
    pub total_pages: u32,
    pub pages_crawled: u32,
    pub records_written: usize,
}

/// Crawls every page of the configured query that has not been done yet.
///
/// Progress is saved after each page, so an interrupted run picks up after the
/// last completed page. Once the final page is written the area's progress is
/// forgotten.
pub fn run_crawl(
    config: &RunConfig,
    fetcher: &mut FetchSelector,
    store: &ResumeStore,
    mut tui: Option<&mut CrawlTUI>,
) -> Result<CrawlSummary> {
    let query = &config.query;
    let output_file = config.output_file();

    if utils::ensure_header(&output_file)? {
        info!("Created {}", output_file.display());
    }

    if let Some(tui) = tui.as_mut() {
        tui.show_header(query, &output_file)?;
    }

    let state = scraper::ensure_total_pages(fetcher, store, query)?;

    if let Some(tui) = tui.as_mut() {
        tui.start_pages(state.total_pages, state.visited_page);
    }

    let mut pages_crawled = 0;
    let mut records_written = 0;

    for page in scraper::remaining_pages(&state) {
        let url = scraper::page_url(query, page);
        info!("Fetching page {} of {}: {}", page, state.total_pages, url);

        if let Some(tui) = tui.as_mut() {
            tui.start_page(page, state.total_pages);
        }

        let html = match fetcher.fetch(&url) {
            Ok(html) => html,
            Err(e) => {
                if let Some(tui) = tui.as_mut() {
                    tui.abandon();
                }
                return Err(e.context(format!(
                    "Stopped at page {} of {}, rerun to resume",
                    page, state.total_pages
                )));
            }
        };

        let records = rumahdijual::extract_listings(&html, &query.area);
        utils::append_records(&output_file, &records)?;
        store.advance(&query.area, page)?;

        pages_crawled += 1;
        records_written += records.len();
        info!("Page {} done, {} listings", page, records.len());

        if let Some(tui) = tui.as_mut() {
            tui.finish_page(page, records.len())?;
        }
    }

    store.remove(&query.area)?;
    info!(
        "Finished {}: {} listings from {} pages",
        query, records_written, pages_crawled
    );

    if let Some(tui) = tui.as_mut() {
        let rows = utils::load_records(&output_file)
            .map(|records| records.len())
            .unwrap_or_else(|e| {
                warn!("Could not count rows in {}: {:#}", output_file.display(), e);
                records_written
            });
        tui.show_completion(&output_file, rows)?;
    }

    Ok(CrawlSummary {
        output_file,
        total_pages: state.total_pages,
        pages_crawled,
        records_written,
    })
}
