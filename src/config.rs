/// Code returned for a municipality name that matched nothing (Tolima, unclassified)
pub const DEFAULT_SENTINEL_CODE: &str = "73999";

/// Read attempts per reparse before keeping the previous index
pub const RELOAD_MAX_ATTEMPTS: u32 = 3;

/// Pause between read attempts when the reference file is momentarily unreadable
pub const RELOAD_RETRY_DELAY_MS: u64 = 50;

/// Field delimiter for reference datasets and extracts
pub const DEFAULT_DELIMITER: u8 = b',';

/// Column appended by batch resolution when no name is given
pub const DEFAULT_CODE_COLUMN: &str = "codigo_divipola";

/// Column carrying the match outcome in batch output
pub const OUTCOME_COLUMN: &str = "match";

/// Buffer size for reading reference datasets
pub const READ_BUFFER_SIZE: usize = 128 * 1024;

/// Buffer size for batch output writers
pub const WRITE_BUFFER_SIZE: usize = 256 * 1024;
