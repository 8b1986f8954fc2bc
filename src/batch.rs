use crate::config::{DEFAULT_CODE_COLUMN, DEFAULT_DELIMITER, OUTCOME_COLUMN, WRITE_BUFFER_SIZE};
use crate::models::{Level, Resolution};
use crate::resolver::CodeResolver;
use crate::stats::{AuditSnapshot, ResolutionStats};
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use indicatif::ProgressBar;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tracing::info;

/// One extract column resolved at one level.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub level: Level,
    pub name_column: String,
    /// Municipality name column used as context for townships and urban centers
    pub parent_column: Option<String>,
    pub code_column: String,
    pub delimiter: u8,
}

impl BatchOptions {
    pub fn new(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        level: Level,
        name_column: impl Into<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            level,
            name_column: name_column.into(),
            parent_column: None,
            code_column: DEFAULT_CODE_COLUMN.to_string(),
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    pub rows: usize,
    /// Outcomes of this run only
    pub audit: AuditSnapshot,
}

/// Resolves every row of `options.input` and writes it, unchanged and in the
/// same order, to `options.output` with the code and match outcome appended.
pub fn resolve_file(resolver: &CodeResolver, options: &BatchOptions) -> Result<BatchSummary> {
    let file = File::open(&options.input)
        .with_context(|| format!("Failed to open extract: {:?}", options.input))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .from_reader(BufReader::new(file));

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of: {:?}", options.input))?
        .clone();
    let name_idx = column_index(&headers, &options.name_column)?;
    let parent_idx = options
        .parent_column
        .as_deref()
        .map(|column| column_index(&headers, column))
        .transpose()?;

    let rows: Vec<StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .with_context(|| format!("Failed to read rows of: {:?}", options.input))?;

    info!(
        rows = rows.len(),
        level = %options.level,
        column = %options.name_column,
        "Resolving extract"
    );

    // Build the index once up front so workers start from a warm cache.
    if resolver.cache().get_index(false).is_none() {
        info!("No reference data available, every row will be unresolved");
    }

    let pb = ProgressBar::new(rows.len() as u64);
    let resolutions: Vec<Resolution> = rows
        .par_iter()
        .map(|row| {
            let name = row.get(name_idx).unwrap_or_default();
            let parent = parent_idx
                .and_then(|idx| row.get(idx))
                .filter(|p| !p.trim().is_empty());
            let resolution = resolver.resolve(options.level, name, parent);
            pb.inc(1);
            resolution
        })
        .collect();
    pb.finish_and_clear();

    let out = File::create(&options.output)
        .with_context(|| format!("Failed to create output: {:?}", options.output))?;
    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(BufWriter::with_capacity(WRITE_BUFFER_SIZE, out));

    let mut out_headers = headers.clone();
    out_headers.push_field(&options.code_column);
    out_headers.push_field(OUTCOME_COLUMN);
    writer.write_record(&out_headers)?;

    let run = ResolutionStats::new();
    for (row, resolution) in rows.iter().zip(&resolutions) {
        let mut record = row.clone();
        record.push_field(resolution.code().unwrap_or_default());
        record.push_field(resolution.outcome.as_str());
        writer.write_record(&record)?;
        run.record(resolution.outcome);
    }
    writer.flush()?;

    let audit = run.snapshot();
    info!(
        rows = rows.len(),
        exact = audit.exact,
        context = audit.context,
        fuzzy = audit.fuzzy,
        sentinel = audit.sentinel,
        unresolved = audit.unresolved,
        "Extract resolved"
    );

    Ok(BatchSummary {
        rows: rows.len(),
        audit,
    })
}

fn column_index(headers: &StringRecord, column: &str) -> Result<usize> {
    match headers.iter().position(|h| h.trim() == column) {
        Some(idx) => Ok(idx),
        None => bail!("Column {:?} not found (available: {:?})", column, headers),
    }
}
