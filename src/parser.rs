use crate::models::{Field, FieldError, SpecSheet};
use once_cell::sync::Lazy;
use regex::Regex;

static SCALE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(juta|miliar)").unwrap());
static TRAILING_UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(m2|tanah|bangunan)").unwrap());

const MILLION_WORD: &str = "juta";
const BILLION_WORD: &str = "miliar";
const SQUARE_METRE: &str = "m2";

/// Separates unit words glued to numbers and collapses whitespace.
pub fn normalize_spec_text(text: &str) -> String {
    let text = text.replace("&nbsp;", " ").replace('\u{a0}', " ");
    let text = SCALE_WORD.replace_all(&text, " $1 ");
    let text = TRAILING_UNIT.replace_all(&text, "$1 ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokenize(text: &str) -> Vec<String> {
    normalize_spec_text(text)
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AreaLabel {
    Land,
    Building,
}

impl AreaLabel {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "tanah" => Some(AreaLabel::Land),
            "bangunan" => Some(AreaLabel::Building),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Measure {
    label: Option<AreaLabel>,
    value: Field,
}

/// Parses the specification text of a result row.
///
/// The site writes `<price> juta|miliar <land> m2 tanah <building> m2 bangunan <bed> <bath>`,
/// with the price pair left out for some rows. Labels may also precede the numbers.
pub fn parse_spec_text(text: &str) -> SpecSheet {
    let tokens = tokenize(text);
    let (price_millions, body) = split_price(&tokens);

    let (land_area, building_area, rooms) = match parse_measures(body) {
        Some((land, building, consumed)) => (land, building, &body[consumed..]),
        None => {
            // No unit tokens at all: fall back to the fixed column layout
            let rooms = body.get(6..).unwrap_or(&[]);
            (number_at(body, 0), number_at(body, 3), rooms)
        }
    };

    let (bedrooms, bathrooms) = parse_rooms(rooms);

    SpecSheet {
        price_millions,
        land_area,
        building_area,
        bedrooms,
        bathrooms,
    }
}

/// Reads the price and returns the tokens that follow it.
fn split_price(tokens: &[String]) -> (Field, &[String]) {
    if let Some(scale) = tokens.iter().position(|t| t == MILLION_WORD) {
        let price = tokens.first().map_or(Err(FieldError::Missing), |t| parse_number(t));
        (price, &tokens[scale + 1..])
    } else if let Some(scale) = tokens.iter().position(|t| t == BILLION_WORD) {
        let price = tokens
            .first()
            .map_or(Err(FieldError::Missing), |t| parse_billions(t));
        (price, &tokens[scale + 1..])
    } else {
        // Unpriced row: the whole stream describes areas and rooms
        (Err(FieldError::Missing), tokens)
    }
}

/// Matches up to two area measurements at the start of `body`.
///
/// Returns land area, building area and the number of tokens consumed, or `None`
/// when the body holds no measurement at all.
fn parse_measures(body: &[String]) -> Option<(Field, Field, usize)> {
    let labels_lead = body.first().and_then(|t| AreaLabel::parse(t)).is_some();
    let mut measures = Vec::new();
    let mut cursor = 0;

    while measures.len() < 2 {
        let token = |offset: usize| token_at(body, cursor + offset);

        if labels_lead {
            match (token(0).and_then(AreaLabel::parse), token(1), token(2)) {
                (Some(label), Some(value), Some(SQUARE_METRE)) => {
                    measures.push(Measure {
                        label: Some(label),
                        value: parse_number(value),
                    });
                    cursor += 3;
                }
                _ => break,
            }
        } else {
            match (token(0), token(1)) {
                (Some(value), Some(SQUARE_METRE)) => {
                    let label = token(2).and_then(AreaLabel::parse);
                    measures.push(Measure {
                        label,
                        value: parse_number(value),
                    });
                    cursor += if label.is_some() { 3 } else { 2 };
                }
                _ => break,
            }
        }
    }

    if measures.is_empty() {
        return None;
    }

    let mut land = None;
    let mut building = None;
    for measure in measures.iter().filter(|m| m.label.is_some()) {
        match measure.label {
            Some(AreaLabel::Land) if land.is_none() => land = Some(measure.value.clone()),
            Some(AreaLabel::Building) if building.is_none() => building = Some(measure.value.clone()),
            _ => {}
        }
    }
    for measure in measures.iter().filter(|m| m.label.is_none()) {
        if land.is_none() {
            land = Some(measure.value.clone());
        } else if building.is_none() {
            building = Some(measure.value.clone());
        }
    }

    Some((
        land.unwrap_or(Err(FieldError::Missing)),
        building.unwrap_or(Err(FieldError::Missing)),
        cursor,
    ))
}

fn token_at(tokens: &[String], index: usize) -> Option<&str> {
    tokens.get(index).map(String::as_str)
}

fn parse_rooms(rooms: &[String]) -> (Field, Field) {
    let bedrooms = number_at(rooms, 0);
    let bathrooms = number_at(rooms, 1);

    // Some rows glue both counts together, e.g. "32" for 3 bedrooms and 2 bathrooms
    if let (Ok(_), Err(_)) = (&bedrooms, &bathrooms) {
        if let Some((bed, bath)) = split_room_counts(&rooms[0]) {
            return (Ok(bed), Ok(bath));
        }
    }

    (bedrooms, bathrooms)
}

fn split_room_counts(token: &str) -> Option<(u64, u64)> {
    let digits: Vec<u64> = token
        .chars()
        .map(|c| c.to_digit(10).map(u64::from))
        .collect::<Option<_>>()?;

    if digits.len() < 2 {
        return None;
    }

    Some((digits[0], digits[digits.len() - 1]))
}

fn number_at(tokens: &[String], index: usize) -> Field {
    tokens
        .get(index)
        .map_or(Err(FieldError::Missing), |t| parse_number(t))
}

fn parse_number(token: &str) -> Field {
    token
        .parse::<u64>()
        .map_err(|_| FieldError::Malformed(token.to_string()))
}

/// Billions are expressed as thousands of millions, truncating any remainder.
fn parse_billions(token: &str) -> Field {
    let value = token
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| FieldError::Malformed(token.to_string()))?;

    if !value.is_finite() || value < 0.0 {
        return Err(FieldError::Malformed(token.to_string()));
    }

    // Nudge past binary rounding so that e.g. 1.2 gives 1200, not 1199
    Ok((value * 1000.0 + 1e-6).floor() as u64)
}
