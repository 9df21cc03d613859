pub mod cancel;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod kway;
pub mod line;
pub mod merger;
pub mod processor;
pub mod queue;
pub mod temp_files;
pub mod verify;


pub use cancel::CancellationToken;
pub use config::ExternalSortConfig;
pub use error::{Result, SortError};
pub use events::{SharedEventSink, SortEventSink, TracingEventSink};
pub use line::{ByteLine, Line, LineRepresentation, TextLine};
pub use merger::{plan_merge, MergePlan};
pub use processor::ExternalSortProcessor;
pub use verify::{verify_sorted, VerifyReport};

use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExternalSortStats {
    pub total_lines: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Phase-1 files written by the chunked sort.
    pub chunks_created: usize,
    /// Intermediate merge levels run before the final merge.
    pub merge_levels: usize,
    pub files_per_batch: usize,
    pub chunk_phase_ms: u64,
    pub merge_phase_ms: u64,
    pub processing_time_ms: u64,
}

/// Sorts `path` in place with a fresh processor.
pub fn sort_file(path: &Path, config: ExternalSortConfig) -> Result<ExternalSortStats> {
    ExternalSortProcessor::new(config)?.sort_file(path)
}
