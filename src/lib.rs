pub mod common_scraper;
pub mod config;
pub mod fetcher;
pub mod models;
pub mod parser;
pub mod resume;
pub mod rumahdijual;
pub mod scraper;
pub mod tui;
pub mod utils;
