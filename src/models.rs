use serde::{Deserialize, Serialize};
use std::fmt;

/// One million, the unit prices are quoted in on the command line and on the site.
pub const MILLION: u64 = 1_000_000;

/// Identifies one crawl and its output table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryKey {
    pub area: String,
    /// Lower price bound in whole currency units
    pub min_price: u64,
    /// Upper price bound in whole currency units
    pub max_price: u64,
}

impl QueryKey {
    pub fn new(area: impl Into<String>, min_price: u64, max_price: u64) -> Self {
        Self {
            area: area.into(),
            min_price,
            max_price,
        }
    }

    pub fn min_millions(&self) -> u64 {
        self.min_price / MILLION
    }

    pub fn max_millions(&self) -> u64 {
        self.max_price / MILLION
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}-{} juta)",
            self.area,
            self.min_millions(),
            self.max_millions()
        )
    }
}

/// Progress of a crawl for a single area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeState {
    pub visited_page: u32,
    /// 0 means not yet computed
    pub total_pages: u32,
    pub min_price: u64,
    pub max_price: u64,
}

/// Why a value could not be read from a listing's specification text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The token stream ended before the field's position
    Missing,
    /// A token was present but was not a number
    Malformed(String),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::Missing => write!(f, "missing"),
            FieldError::Malformed(token) => write!(f, "malformed token '{}'", token),
        }
    }
}

pub type Field = Result<u64, FieldError>;

/// Parsed specification text of one search result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheet {
    /// Asking price in millions
    pub price_millions: Field,
    pub land_area: Field,
    pub building_area: Field,
    pub bedrooms: Field,
    pub bathrooms: Field,
}

impl SpecSheet {
    pub fn price(&self) -> Option<u64> {
        self.price_millions
            .as_ref()
            .ok()
            .and_then(|millions| millions.checked_mul(MILLION))
    }
}

/// One row of the output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub price: Option<u64>,
    #[serde(rename = "landArea")]
    pub land_area: Option<u64>,
    #[serde(rename = "buildingArea")]
    pub building_area: Option<u64>,
    pub bedrooms: Option<u64>,
    pub bathrooms: Option<u64>,
    pub url: String,
}

impl ListingRecord {
    pub fn from_spec(spec: &SpecSheet, url: String) -> Self {
        Self {
            price: spec.price(),
            land_area: spec.land_area.clone().ok(),
            building_area: spec.building_area.clone().ok(),
            bedrooms: spec.bedrooms.clone().ok(),
            bathrooms: spec.bathrooms.clone().ok(),
            url,
        }
    }
}
