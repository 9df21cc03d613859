pub const BYTES_PER_MB: usize = 1_048_576;

pub const DEFAULT_LOG_TARGET: &str = "ext_line_sort";

// Test data generation
pub const DEFAULT_MIN_STRING_LENGTH: usize = 200;
pub const DEFAULT_MAX_STRING_LENGTH: usize = 300;
pub const DEFAULT_DUPLICATES_PROBABILITY: f64 = 0.1;
pub const RECENT_STRINGS_CAPACITY: usize = 1000;
pub const GENERATED_QUEUE_NAME: &str = "generated lines";
pub const GENERATED_BLOCK_LINES: usize = 1024;
pub const GENERATED_BLOCKS_PER_THREAD: usize = 4;
pub const GENERATOR_OUTPUT_BUFFER_BYTES: usize = BYTES_PER_MB;
