use crate::config::{
    DEFAULT_DELIMITER, READ_BUFFER_SIZE, RELOAD_MAX_ATTEMPTS, RELOAD_RETRY_DELAY_MS,
};
use crate::error::LoadError;
use crate::models::{Level, TerritorialRecord};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Accepted header names per field, in precedence order. When a file carries
/// more than one of them, the earliest entry in the list is used.
const LEVEL_COLUMNS: &[&str] = &["level", "tipo"];
const NAME_COLUMNS: &[&str] = &["name", "nombre"];
const CODE_COLUMNS: &[&str] = &["code", "codigo_divipola"];
const PARENT_COLUMNS: &[&str] = &[
    "parent",
    "parent_name",
    "municipio_padre",
    "municipality",
    "municipio",
];

/// How the reference file is read.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub delimiter: u8,
    /// Total read attempts per reparse (at least one is always made)
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            max_attempts: RELOAD_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(RELOAD_RETRY_DELAY_MS),
        }
    }
}

/// Positions of the known fields in one file's header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    level: usize,
    name: Option<usize>,
    code: Option<usize>,
    parent: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Option<Self> {
        Some(Self {
            level: find_column(headers, LEVEL_COLUMNS)?,
            name: find_column(headers, NAME_COLUMNS),
            code: find_column(headers, CODE_COLUMNS),
            parent: find_column(headers, PARENT_COLUMNS),
        })
    }

    fn field(row: &StringRecord, column: Option<usize>) -> Option<String> {
        column
            .and_then(|i| row.get(i))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

fn find_column(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(candidate))
    })
}

/// Records in file order, plus rows dropped because their level was not recognised.
#[derive(Debug, Default)]
pub struct ReferenceDataset {
    pub records: Vec<TerritorialRecord>,
    pub skipped_rows: usize,
}

/// Modification time of the reference file, used as the staleness key.
pub fn source_modified(path: &Path) -> Result<SystemTime, LoadError> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| LoadError::from_io(path.to_path_buf(), e))
}

pub fn read_records(path: &Path, delimiter: u8) -> Result<ReferenceDataset, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::from_io(path.to_path_buf(), e))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_reader(BufReader::with_capacity(READ_BUFFER_SIZE, file));

    let csv_error = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let headers = reader.headers().map_err(csv_error)?.clone();
    let columns = ColumnMap::from_headers(&headers).ok_or_else(|| LoadError::MissingColumn {
        path: path.to_path_buf(),
        column: LEVEL_COLUMNS[0],
    })?;
    debug!(headers = ?headers, columns = ?columns, "Reference columns resolved");

    let mut dataset = ReferenceDataset::default();
    for row in reader.records() {
        let row = row.map_err(csv_error)?;
        let level = row.get(columns.level).unwrap_or_default();
        match level.parse::<Level>() {
            Ok(level) => dataset.records.push(TerritorialRecord::new(
                level,
                ColumnMap::field(&row, columns.name),
                ColumnMap::field(&row, columns.code),
                ColumnMap::field(&row, columns.parent),
            )),
            Err(e) => {
                debug!(error = %e, "Skipping reference row");
                dataset.skipped_rows += 1;
            }
        }
    }

    Ok(dataset)
}

/// Reads the reference file, retrying transient failures.
pub fn read_records_with_retry(
    path: &Path,
    options: &LoadOptions,
) -> Result<ReferenceDataset, LoadError> {
    retry_transient(options, || read_records(path, options.delimiter))
}

/// Runs `read` until it succeeds, fails with a non-transient error, or
/// `options.max_attempts` attempts have been made.
pub fn retry_transient<T>(
    options: &LoadOptions,
    mut read: impl FnMut() -> Result<T, LoadError>,
) -> Result<T, LoadError> {
    let attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match read() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Reference dataset read failed, retrying"
                );
                thread::sleep(options.retry_delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
