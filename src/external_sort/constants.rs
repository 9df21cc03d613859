use crate::constants::BYTES_PER_MB;

pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 64 * BYTES_PER_MB as u64;
pub const DEFAULT_MAX_FILES_TO_MERGE: usize = 15;
pub const DEFAULT_INITIAL_INPUT_BUFFER_BYTES: usize = 32 * BYTES_PER_MB;
pub const DEFAULT_INITIAL_OUTPUT_BUFFER_BYTES: usize = 8 * BYTES_PER_MB;
pub const DEFAULT_MERGE_INPUT_BUFFER_BYTES: usize = 4 * BYTES_PER_MB;
pub const DEFAULT_MERGE_OUTPUT_BUFFER_BYTES: usize = 10_000_000;
pub const DEFAULT_MERGE_QUEUE_CAPACITY: usize = 4;
pub const DEFAULT_MERGE_BLOCK_LINES: usize = 4096;

pub const MIN_MAX_FILES_TO_MERGE: usize = 2;
pub const MIN_MEMORY_USAGE_PERCENT: f64 = 1.0;
pub const MAX_MEMORY_USAGE_PERCENT: f64 = 90.0;
pub const MAX_SORTER_THREADS: usize = 256;

pub const TEMP_FILE_EXTENSION_PREFIX: &str = "sorttmp";
pub const TEMP_FILE_NAME_MARKER: &str = ".sorttmp";
pub const PARTIAL_FILE_EXTENSION: &str = "part";

pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
pub const LINE_TERMINATOR: &[u8] = b"\r\n";
pub const NUMBER_SEPARATOR: u8 = b'.';
pub const PAYLOAD_SEPARATOR: u8 = b' ';

/// Enough room for every digit of `i32::MIN` without the sign.
pub const DIGIT_BUFFER_LEN: usize = 10;

pub const QUEUE_CANCELLATION_POLL_MS: u64 = 50;

pub const CHUNK_QUEUE_NAME: &str = "unsorted chunks";
pub const SORTED_QUEUE_NAME: &str = "sorted chunks";
