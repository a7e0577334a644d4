use crate::models::ListingRecord;
use crate::parser;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use tracing::{debug, warn};

pub const BASE_URL: &str = "http://rumahdijual.com/";
const SITE_DOMAIN: &str = "rumahdijual.com";
const PREMIUM_CLASS: &str = "tblPremiumClass";

static PREMIUM_ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.tblSearchResultRow.tblPremiumClass").unwrap());
static RESULT_ROW: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.tblSearchResultRow").unwrap());
static SPEC_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td.tdInfoSpec").unwrap());
static TITLE_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td.TdTitleDesc a[href]").unwrap());

/// Why a result row produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSkip {
    NoSpecCell,
    NoLink,
    EmptyLink,
}

impl fmt::Display for RowSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSkip::NoSpecCell => write!(f, "no specification cell"),
            RowSkip::NoLink => write!(f, "no title link"),
            RowSkip::EmptyLink => write!(f, "empty title link"),
        }
    }
}

/// Extracts every listing on a results page, premium rows first.
pub fn extract_listings(html: &str, area: &str) -> Vec<ListingRecord> {
    let document = Html::parse_document(html);

    let premium = document.select(&PREMIUM_ROW);
    let standard = document
        .select(&RESULT_ROW)
        .filter(|row| !row.value().classes().any(|class| class == PREMIUM_CLASS));

    let mut records = Vec::new();
    for (index, row) in premium.chain(standard).enumerate() {
        match extract_row(row, area) {
            Ok(record) => records.push(record),
            Err(reason) => debug!("Skipping result row {}: {}", index, reason),
        }
    }

    records
}

fn extract_row(row: ElementRef, area: &str) -> Result<ListingRecord, RowSkip> {
    let spec_text = row
        .select(&SPEC_CELL)
        .next()
        .ok_or(RowSkip::NoSpecCell)?
        .text()
        .collect::<String>();

    let href = row
        .select(&TITLE_LINK)
        .next()
        .and_then(|link| link.value().attr("href"))
        .ok_or(RowSkip::NoLink)?
        .trim();

    if href.is_empty() {
        return Err(RowSkip::EmptyLink);
    }

    let spec = parser::parse_spec_text(&spec_text);
    for (name, field) in [
        ("price", &spec.price_millions),
        ("land area", &spec.land_area),
        ("building area", &spec.building_area),
        ("bedrooms", &spec.bedrooms),
        ("bathrooms", &spec.bathrooms),
    ] {
        if let Err(e) = field {
            debug!("{} {} in '{}'", name, e, spec_text.trim());
        }
    }

    Ok(ListingRecord::from_spec(&spec, correct_url(href, area)))
}

/// Makes a listing link absolute and undoes web proxy rewriting.
pub fn correct_url(href: &str, area: &str) -> String {
    let url = if href.contains("http") {
        href.to_string()
    } else {
        format!("{}{}/{}", BASE_URL, area, href.trim_start_matches('/'))
    };

    if url.contains(SITE_DOMAIN) {
        return url;
    }

    match decode_proxy_url(&url) {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Keeping undecodable link {}: {:#}", url, e);
            url
        }
    }
}

/// Web proxies put the target, base64 encoded without its "http" prefix, in the
/// last path segment.
pub fn decode_proxy_url(url: &str) -> Result<String> {
    let segment = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let segment = urlencoding::decode(segment).context("Invalid percent-encoding")?;
    let encoded = segment.trim().trim_end_matches('=');

    if encoded.is_empty() {
        bail!("Empty encoded segment");
    }

    let bytes = STANDARD_NO_PAD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .context("Invalid base64")?;
    let decoded = String::from_utf8(bytes).context("Decoded link is not UTF-8")?;

    Ok(format!("http{}", decoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(class: &str, spec: &str, href: Option<&str>) -> String {
        let link = href
            .map(|href| format!(r#"<a href="{}">Rumah dijual</a>"#, href))
            .unwrap_or_default();
        format!(
            r#"<table class="{}"><tr>
                <td class="tdInfoSpec">{}</td>
                <td class="TdTitleDesc">{}</td>
            </tr></table>"#,
            class, spec, link
        )
    }

    fn page(rows: &[String]) -> String {
        format!("<html><body>{}</body></html>", rows.join("\n"))
    }

    #[test]
    fn test_relative_link_is_scoped_to_area() {
        assert_eq!(correct_url("12345", "depok"), "http://rumahdijual.com/depok/12345");
    }

    #[test]
    fn test_absolute_site_link_is_kept() {
        let url = "http://rumahdijual.com/bogor/999-rumah-murah.html";
        assert_eq!(correct_url(url, "depok"), url);
    }

    #[test]
    fn test_proxy_link_is_decoded() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("://rumahdijual.com/depok/12345");
        let href = format!(
            "https://1.hidemyass.com/ip-3/encoded/{}",
            urlencoding::encode(&encoded)
        );

        assert_eq!(correct_url(&href, "depok"), "http://rumahdijual.com/depok/12345");
    }

    #[test]
    fn test_undecodable_proxy_link_is_kept_raw() {
        let href = "https://1.hidemyass.com/ip-3/encoded/%%%";
        assert_eq!(correct_url(href, "depok"), href);
        assert!(decode_proxy_url("https://2.hidemyass.com/").is_err());
    }

    #[test]
    fn test_premium_rows_come_first_and_once() {
        let html = page(&[
            row("tblSearchResultRow", "300 juta 90 m2 tanah 60 m2 bangunan 2 1", Some("2")),
            row(
                "tblSearchResultRow tblPremiumClass",
                "1.2 miliar 200 m2 tanah 150 m2 bangunan 4 3",
                Some("1"),
            ),
            row("tblSearchResultRow", "tanah 100 m2 bangunan 80 m2 3 2", Some("3")),
        ]);

        let records = extract_listings(&html, "depok");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].url, "http://rumahdijual.com/depok/1");
        assert_eq!(records[0].price, Some(1_200_000_000));
        assert_eq!(records[1].url, "http://rumahdijual.com/depok/2");
        assert_eq!(records[1].price, Some(300_000_000));
        assert_eq!(records[1].bathrooms, Some(1));
        assert_eq!(records[2].price, None);
        assert_eq!(records[2].land_area, Some(100));
        assert_eq!(records[2].building_area, Some(80));
    }

    #[test]
    fn test_rows_missing_cells_are_skipped() {
        let html = page(&[
            row("tblSearchResultRow", "300 juta 90 m2 tanah 60 m2 bangunan 2 1", None),
            r#"<table class="tblSearchResultRow"><tr><td class="TdTitleDesc"><a href="5">x</a></td></tr></table>"#.to_string(),
            row("tblSearchResultRow", "500 juta 100 m2 tanah 80 m2 bangunan 32", Some("6")),
        ]);

        let records = extract_listings(&html, "depok");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "http://rumahdijual.com/depok/6");
        assert_eq!(records[0].bedrooms, Some(3));
        assert_eq!(records[0].bathrooms, Some(2));
    }

    #[test]
    fn test_spec_text_spread_over_elements() {
        let html = page(&[row(
            "tblSearchResultRow",
            "<b>500</b>juta<br/>100 m2<i>tanah</i>80 m2<i>bangunan</i>3&nbsp;2",
            Some("7"),
        )]);

        let records = extract_listings(&html, "depok");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, Some(500_000_000));
        assert_eq!(records[0].land_area, Some(100));
        assert_eq!(records[0].building_area, Some(80));
        assert_eq!(records[0].bedrooms, Some(3));
        assert_eq!(records[0].bathrooms, Some(2));
    }

    #[test]
    fn test_page_without_rows() {
        assert!(extract_listings("<html><body>Tidak ada</body></html>", "depok").is_empty());
    }
}
