use crate::models::{ListingRecord, QueryKey};
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

pub const HEADER: &str = "price, landArea, buildingArea, bedrooms, bathrooms, url";

const CONTENTION_DELAY: Duration = Duration::from_secs(1);

/// `{dir}/{area}-between-{min}-{max}.csv`, bounds in millions.
pub fn output_path(output_dir: &Path, query: &QueryKey) -> PathBuf {
    output_dir.join(format!(
        "{}-between-{}-{}.csv",
        query.area,
        query.min_millions(),
        query.max_millions()
    ))
}

/// Creates the output file with its header row unless it already exists.
///
/// Returns whether the file was created.
pub fn ensure_header(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }
    }

    let mut file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    writeln!(file, "{}", HEADER)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;

    debug!("Created output file {}", path.display());
    Ok(true)
}

/// Appends records in order. Rows already in the file are never touched.
pub fn append_records(path: &Path, records: &[ListingRecord]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to serialize records: {}", e.error()))?;

    loop {
        match write_bytes(path, &bytes) {
            Ok(()) => return Ok(()),
            Err(e) if is_contention(&e) => {
                warn!(
                    "The file {} is being used by another process, close it to continue ({})",
                    path.display(),
                    e
                );
                thread::sleep(CONTENTION_DELAY);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to append to {}", path.display()))
            }
        }
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(bytes)?;
    file.flush()
}

fn is_contention(error: &io::Error) -> bool {
    !matches!(
        error.kind(),
        ErrorKind::NotFound | ErrorKind::InvalidInput | ErrorKind::InvalidData
    )
}

pub fn load_records(path: &Path) -> Result<Vec<ListingRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open output file: {}", path.display()))?;
    // The header is padded after each comma
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: ListingRecord =
            result.with_context(|| format!("Malformed row in {}", path.display()))?;
        records.push(record);
    }

    Ok(records)
}
