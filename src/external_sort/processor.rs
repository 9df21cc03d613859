use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info};

use crate::external_sort::cancel::CancellationToken;
use crate::external_sort::chunk::{ChunkedSortPhase, INITIAL_PHASE};
use crate::external_sort::error::{Result, SortError};
use crate::external_sort::events::{
    default_sink, MeasuredOperation, SharedEventSink, SortEventSink,
};
use crate::external_sort::line::{ByteLine, Line, LineRepresentation, TextLine};
use crate::external_sort::merger::{plan_merge, MergePhase};
use crate::external_sort::temp_files::remove_all;
use crate::external_sort::{ExternalSortConfig, ExternalSortStats};

/// Drives a whole external sort: chunked sort, the planned merge levels and
/// the final merge back into the destination.
///
/// One processor can sort many files; nothing is carried over between runs
/// except the configuration, the cancellation token and the event sink.
pub struct ExternalSortProcessor {
    config: ExternalSortConfig,
    cancel: CancellationToken,
    events: SharedEventSink,
}

impl ExternalSortProcessor {
    pub fn new(config: ExternalSortConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            events: default_sink(),
        })
    }

    pub fn with_shutdown_signal(mut self, shutdown_flag: Arc<AtomicBool>) -> Self {
        self.cancel = CancellationToken::from_flag(shutdown_flag);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_event_sink(mut self, events: SharedEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ExternalSortConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sorts `path` in place. The file is truncated to the sorted length,
    /// which differs from the input when it used LF terminators.
    pub fn sort_file(&self, path: &Path) -> Result<ExternalSortStats> {
        let temp_dir = self.temp_dir_for(path);
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        info!("Sorting {} (temp files in {})", path.display(), temp_dir.display());
        let stats = self.sort_stream(&mut file, &temp_dir)?;
        file.set_len(stats.output_bytes)?;
        file.sync_all()?;

        info!(
            "Sorted {} lines in {} ms ({} chunks, {} merge levels)",
            stats.total_lines, stats.processing_time_ms, stats.chunks_created, stats.merge_levels
        );
        Ok(stats)
    }

    /// Sorts the remainder of `stream`, from its current position, and
    /// writes the result back starting at that same position.
    ///
    /// The stream is not truncated; `output_bytes` in the returned stats
    /// tells the caller where the sorted data ends relative to the start.
    pub fn sort_stream<S: Read + Write + Seek>(
        &self,
        stream: &mut S,
        temp_dir: &Path,
    ) -> Result<ExternalSortStats> {
        match self.config.line_representation {
            LineRepresentation::Bytes => self.sort_stream_as::<ByteLine, S>(stream, temp_dir),
            LineRepresentation::Text => self.sort_stream_as::<TextLine, S>(stream, temp_dir),
        }
    }

    fn sort_stream_as<L: Line, S: Read + Write + Seek>(
        &self,
        stream: &mut S,
        temp_dir: &Path,
    ) -> Result<ExternalSortStats> {
        let events: &dyn SortEventSink = self.events.as_ref();
        let cancel = &self.cancel;
        let total_op = MeasuredOperation::start(events, "entire sorting operation");

        std::fs::create_dir_all(temp_dir)?;
        remove_all(temp_dir)?;
        let start = stream.stream_position()?;

        let chunk_op = MeasuredOperation::start(events, "chunked sort phase");
        let chunked = ChunkedSortPhase::new(&self.config, events);
        debug!("Chunk threshold: {} bytes", chunked.chunk_size_bytes());
        let outcome = chunked.run::<L, _>(&mut *stream, temp_dir, cancel)?;
        let chunk_phase_ms = chunk_op.elapsed().as_millis() as u64;
        drop(chunk_op);

        let plan = plan_merge(outcome.files.len(), self.config.max_files_to_merge);
        info!(
            "Merging {} sorted chunks: {} phases, {} files per batch",
            outcome.files.len(),
            plan.phases,
            plan.files_per_batch
        );

        let merge_op = MeasuredOperation::start(events, "all merge phases");
        let mut phase = MergePhase::<L>::open(
            INITIAL_PHASE,
            temp_dir,
            plan.files_per_batch,
            &self.config,
            events,
        )?;
        let mut merge_levels = 0;
        while !phase.can_finalize() {
            phase = phase.run_intermediate(cancel)?;
            merge_levels += 1;
        }

        stream.seek(SeekFrom::Start(start))?;
        let lines_written = phase.run_final(&mut *stream, outcome.had_bom, cancel)?;
        let output_bytes = stream.stream_position()? - start;
        let merge_phase_ms = merge_op.elapsed().as_millis() as u64;
        drop(merge_op);

        if lines_written != outcome.lines_read {
            return Err(SortError::InvalidState(format!(
                "Read {} lines but wrote {}",
                outcome.lines_read, lines_written
            )));
        }

        Ok(ExternalSortStats {
            total_lines: outcome.lines_read,
            input_bytes: outcome.bytes_read,
            output_bytes,
            chunks_created: outcome.files.len(),
            merge_levels,
            files_per_batch: plan.files_per_batch,
            chunk_phase_ms,
            merge_phase_ms,
            processing_time_ms: total_op.elapsed().as_millis() as u64,
        })
    }

    /// Removes the temp files a sort of `path` would use, e.g. after a
    /// cancelled run.
    pub fn cleanup_temp_files(&self, path: &Path) -> Result<usize> {
        remove_all(&self.temp_dir_for(path))
    }

    pub fn temp_dir_for(&self, path: &Path) -> PathBuf {
        if let Some(dir) = &self.config.temp_directory {
            return dir.clone();
        }
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}
