use crate::models::ResumeState;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_MIN_PRICE: u64 = 100_000_000;
pub const DEFAULT_MAX_PRICE: u64 = 2_000_000_000;

/// On-disk shape of one area's progress. Values are kept as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Section {
    #[serde(default = "zero")]
    visit: String,
    #[serde(default = "zero")]
    pages: String,
    #[serde(default = "default_min_price")]
    minprice: String,
    #[serde(default = "default_max_price")]
    maxprice: String,
}

fn zero() -> String {
    "0".to_string()
}

fn default_min_price() -> String {
    DEFAULT_MIN_PRICE.to_string()
}

fn default_max_price() -> String {
    DEFAULT_MAX_PRICE.to_string()
}

impl Default for Section {
    fn default() -> Self {
        Self {
            visit: zero(),
            pages: zero(),
            minprice: default_min_price(),
            maxprice: default_max_price(),
        }
    }
}

impl Section {
    fn to_state(&self, area: &str) -> Result<ResumeState> {
        let field = |name: &str, value: &str| -> Result<u64> {
            value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid '{}' value '{}' for area '{}'", name, value, area))
        };

        Ok(ResumeState {
            visited_page: u32::try_from(field("visit", &self.visit)?)
                .with_context(|| format!("Page number out of range for area '{}'", area))?,
            total_pages: u32::try_from(field("pages", &self.pages)?)
                .with_context(|| format!("Page count out of range for area '{}'", area))?,
            min_price: field("minprice", &self.minprice)?,
            max_price: field("maxprice", &self.maxprice)?,
        })
    }

    fn from_state(state: &ResumeState) -> Self {
        Self {
            visit: state.visited_page.to_string(),
            pages: state.total_pages.to_string(),
            minprice: state.min_price.to_string(),
            maxprice: state.max_price.to_string(),
        }
    }
}

type Sections = BTreeMap<String, Section>;

/// Per-area crawl progress, persisted as a JSON object keyed by area.
///
/// Every access reads the whole file and every change rewrites it. Only one run
/// is expected to touch a given file at a time.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self, area: &str) -> Result<bool> {
        Ok(self.read_sections()?.contains_key(area))
    }

    /// Returns the area's progress, creating it with defaults on first access.
    pub fn get(&self, area: &str) -> Result<ResumeState> {
        let mut sections = self.read_sections()?;

        if let Some(section) = sections.get(area) {
            return section.to_state(area);
        }

        debug!("Creating resume section for area '{}'", area);
        let section = Section::default();
        let state = section.to_state(area)?;
        sections.insert(area.to_string(), section);
        self.write_sections(&sections)?;

        Ok(state)
    }

    pub fn save(&self, area: &str, state: &ResumeState) -> Result<()> {
        let mut sections = self.read_sections()?;
        sections.insert(area.to_string(), Section::from_state(state));
        self.write_sections(&sections)
    }

    /// Applies price bounds given on the command line.
    ///
    /// A bound that differs from the persisted one replaces it and resets the
    /// area's page progress, forcing a full re-crawl under the new bounds.
    pub fn apply_price_bounds(
        &self,
        area: &str,
        min_price: Option<u64>,
        max_price: Option<u64>,
    ) -> Result<ResumeState> {
        let mut state = self.get(area)?;
        let mut changed = false;

        if let Some(min_price) = min_price {
            if min_price != state.min_price {
                state.min_price = min_price;
                changed = true;
            }
        }

        if let Some(max_price) = max_price {
            if max_price != state.max_price {
                state.max_price = max_price;
                changed = true;
            }
        }

        if changed {
            info!(
                "Price range for '{}' changed to {}-{}, resetting progress",
                area, state.min_price, state.max_price
            );
            state.visited_page = 0;
            state.total_pages = 0;
            self.save(area, &state)?;
        }

        Ok(state)
    }

    pub fn set_total_pages(&self, area: &str, total_pages: u32) -> Result<ResumeState> {
        let mut state = self.get(area)?;
        state.total_pages = total_pages;
        self.save(area, &state)?;
        Ok(state)
    }

    /// Records `page` as the last completed page.
    pub fn advance(&self, area: &str, page: u32) -> Result<ResumeState> {
        let mut state = self.get(area)?;

        ensure!(
            page >= state.visited_page,
            "Cannot move area '{}' back from page {} to {}",
            area,
            state.visited_page,
            page
        );
        ensure!(
            page <= state.total_pages,
            "Page {} is beyond the {} pages of area '{}'",
            page,
            state.total_pages,
            area
        );

        state.visited_page = page;
        self.save(area, &state)?;
        Ok(state)
    }

    /// Forgets the area entirely. The file goes away with its last section.
    pub fn remove(&self, area: &str) -> Result<()> {
        let mut sections = self.read_sections()?;

        if sections.remove(area).is_none() {
            return Ok(());
        }

        if sections.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).with_context(|| {
                    format!("Failed to remove resume file: {}", self.path.display())
                })?;
            }
            debug!("Removed resume file {}", self.path.display());
            Ok(())
        } else {
            self.write_sections(&sections)
        }
    }

    fn read_sections(&self) -> Result<Sections> {
        if !self.path.exists() {
            return Ok(Sections::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read resume file: {}", self.path.display()))?;

        if content.trim().is_empty() {
            return Ok(Sections::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse resume file: {}", self.path.display()))
    }

    fn write_sections(&self, sections: &Sections) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let json = serde_json::to_string_pretty(sections)
            .context("Failed to serialize resume state")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write resume file: {}", self.path.display()))
    }
}
