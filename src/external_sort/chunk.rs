use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::debug;

use crate::external_sort::cancel::CancellationToken;
use crate::external_sort::codec::{LineReader, LineWriter};
use crate::external_sort::config::ExternalSortConfig;
use crate::external_sort::constants::*;
use crate::external_sort::error::{first_failure, Result, SortError};
use crate::external_sort::events::{MeasuredOperation, SortEventSink};
use crate::external_sort::line::Line;
use crate::external_sort::queue::{BoundedQueue, CompleteOnDrop};
use crate::external_sort::temp_files::{new_phase_file, PendingFile};

pub const INITIAL_PHASE: usize = 1;

/// What the chunked sort phase left behind.
#[derive(Debug, Clone, Default)]
pub struct ChunkedSortOutcome {
    /// Phase-1 files in flush order.
    pub files: Vec<PathBuf>,
    pub lines_read: u64,
    pub bytes_read: u64,
    pub had_bom: bool,
}

/// Splits the input into byte-bounded chunks, sorts them in parallel and
/// flushes each one to its own phase-1 temp file.
///
/// Three stages run concurrently: the calling thread reads, a pool of
/// sorters sorts, and one flusher writes. Two bounded queues sized by the
/// sorter count connect them, which caps the number of chunks in memory.
pub struct ChunkedSortPhase<'a> {
    chunk_size_bytes: u64,
    sorter_threads: usize,
    input_buffer_bytes: usize,
    output_buffer_bytes: usize,
    events: &'a dyn SortEventSink,
}

impl<'a> ChunkedSortPhase<'a> {
    pub fn new(config: &ExternalSortConfig, events: &'a dyn SortEventSink) -> Self {
        Self {
            chunk_size_bytes: config.effective_chunk_size_bytes(),
            sorter_threads: config.sorter_threads,
            input_buffer_bytes: config.initial_input_buffer_bytes,
            output_buffer_bytes: config.initial_output_buffer_bytes,
            events,
        }
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_bytes
    }

    /// Consumes all of `input`.
    ///
    /// Any stage failing stops the others; the first real failure is
    /// returned, `Cancelled` only if nothing else went wrong. Files flushed
    /// before a failure stay on disk and are complete.
    pub fn run<L: Line, R: Read>(
        &self,
        input: R,
        temp_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ChunkedSortOutcome> {
        let mut reader = LineReader::<R, L>::new(input, self.input_buffer_bytes)?;
        let stages = cancel.child();

        let unsorted = BoundedQueue::<Vec<L>>::new(CHUNK_QUEUE_NAME, self.sorter_threads);
        let sorted = BoundedQueue::<Vec<L>>::new(SORTED_QUEUE_NAME, self.sorter_threads);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.sorter_threads)
            .thread_name(|i| format!("chunk-sorter-{}", i))
            .build()
            .map_err(|e| SortError::InvalidState(format!("Failed to start sorter pool: {}", e)))?;

        let (read_result, sort_result, flush_result) = thread::scope(|s| {
            let sorters = s.spawn(|| {
                let _done = CompleteOnDrop(&sorted);
                let results = pool.broadcast(|_| {
                    cancel_siblings_on_error(&stages, self.sort_chunks(&unsorted, &sorted, &stages))
                });
                first_failure(results)
            });
            let flusher = s.spawn(|| {
                cancel_siblings_on_error(&stages, self.flush_chunks(&sorted, temp_dir, &stages))
            });

            let read_result = {
                let _done = CompleteOnDrop(&unsorted);
                cancel_siblings_on_error(&stages, self.read_chunks(&mut reader, &unsorted, &stages))
            };

            let sort_result = sorters
                .join()
                .unwrap_or_else(|_| Err(SortError::worker_panicked("chunk sorter")));
            let flush_result = flusher
                .join()
                .unwrap_or_else(|_| Err(SortError::worker_panicked("chunk flusher")));
            (read_result, sort_result, flush_result)
        });

        let (chunks, read_status) = split_result(read_result);
        let (files, flush_status) = split_result(flush_result);
        first_failure([read_status, sort_result, flush_status])?;
        cancel.check()?;

        let files = files.unwrap_or_default();
        debug!(
            "Chunked sort produced {} files from {} chunks ({} lines, {} bytes)",
            files.len(),
            chunks.unwrap_or_default(),
            reader.lines_read(),
            reader.bytes_consumed()
        );

        Ok(ChunkedSortOutcome {
            files,
            lines_read: reader.lines_read(),
            bytes_read: reader.bytes_consumed(),
            had_bom: reader.had_bom(),
        })
    }

    /// Reader stage. Emits a chunk each time the bytes consumed since the
    /// previous one reach the threshold, so a chunk overshoots it by less
    /// than one line. Returns the number of chunks emitted.
    fn read_chunks<R: Read, L: Line>(
        &self,
        reader: &mut LineReader<R, L>,
        output: &BoundedQueue<Vec<L>>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut buffer: Vec<L> = Vec::new();
        let mut chunk_start = reader.bytes_consumed();
        let mut chunks = 0;

        while let Some(line) = reader.read_line()? {
            cancel.check()?;
            buffer.push(line);

            if reader.bytes_consumed() - chunk_start >= self.chunk_size_bytes {
                // chunks are roughly the same size, reuse the last capacity
                let next = Vec::with_capacity(buffer.capacity());
                output.put_measured(std::mem::replace(&mut buffer, next), cancel, self.events)?;
                chunk_start = reader.bytes_consumed();
                chunks += 1;
            }
        }

        if !buffer.is_empty() {
            output.put_measured(buffer, cancel, self.events)?;
            chunks += 1;
        }
        Ok(chunks)
    }

    fn sort_chunks<L: Line>(
        &self,
        input: &BoundedQueue<Vec<L>>,
        output: &BoundedQueue<Vec<L>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for mut chunk in input.drain_measured(cancel, self.events) {
            cancel.check()?;
            {
                let _op = MeasuredOperation::start(self.events, "in-memory sort");
                chunk.sort_unstable();
            }
            output.put_measured(chunk, cancel, self.events)?;
        }
        cancel.check()
    }

    fn flush_chunks<L: Line>(
        &self,
        input: &BoundedQueue<Vec<L>>,
        temp_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for chunk in input.drain_measured(cancel, self.events) {
            files.push(self.flush_chunk(&chunk, temp_dir, cancel)?);
        }
        cancel.check()?;
        Ok(files)
    }

    fn flush_chunk<L: Line>(
        &self,
        chunk: &[L],
        temp_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let _op = MeasuredOperation::start(self.events, "flush to temp file");

        let (pending, file) = PendingFile::create(new_phase_file(temp_dir, INITIAL_PHASE))?;
        let mut writer = LineWriter::new(file, self.output_buffer_bytes, false)?;
        for line in chunk {
            cancel.check()?;
            writer.write_line(line)?;
        }
        drop(writer.finish()?);
        pending.commit()
    }
}

fn split_result<T>(result: Result<T>) -> (Option<T>, Result<()>) {
    match result {
        Ok(value) => (Some(value), Ok(())),
        Err(e) => (None, Err(e)),
    }
}

fn cancel_siblings_on_error<T>(stages: &CancellationToken, result: Result<T>) -> Result<T> {
    if result.is_err() {
        stages.cancel();
    }
    result
}
