use std::fs::File;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::debug;

use crate::external_sort::cancel::CancellationToken;
use crate::external_sort::codec::{LineReader, LineWriter};
use crate::external_sort::config::ExternalSortConfig;
use crate::external_sort::error::{first_failure, Result, SortError};
use crate::external_sort::events::{MeasuredOperation, SortEventSink};
use crate::external_sort::kway::{merge_sorted, QueueSource};
use crate::external_sort::line::Line;
use crate::external_sort::queue::{AbortOnDrop, BoundedQueue, CompleteOnDrop};
use crate::external_sort::temp_files::{
    files_for_phase, new_phase_file, remove_files, PendingFile,
};

const MERGE_QUEUE_NAME: &str = "merge input";

/// How many merge levels a sort needs and how wide each batch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergePlan {
    /// Merge passes including the final one; `phases - 1` are intermediate.
    pub phases: usize,
    pub files_per_batch: usize,
}

impl MergePlan {
    pub fn intermediate_levels(&self) -> usize {
        self.phases.saturating_sub(1)
    }
}

/// Finds the fewest phases `p` with `ceil(initial_files^(1/p)) <= fan_in_limit`
/// and uses that root as the batch width.
///
/// Keeping every level at the same width, instead of always merging
/// `fan_in_limit` files, spreads the work evenly across levels.
pub fn plan_merge(initial_files: usize, fan_in_limit: usize) -> MergePlan {
    let fan_in_limit = fan_in_limit.max(2);
    let mut phases = 1;
    let mut files_per_batch = initial_files;

    while files_per_batch > fan_in_limit {
        phases += 1;
        files_per_batch = ceil_root(initial_files, phases);
    }

    MergePlan {
        phases,
        files_per_batch: files_per_batch.max(1),
    }
}

/// Smallest `b` with `b^exp >= n`, i.e. `ceil(n^(1/exp))` without float error.
fn ceil_root(n: usize, exp: usize) -> usize {
    if n <= 1 {
        return n;
    }
    let mut root = ((n as f64).powf(1.0 / exp as f64).ceil() as usize).max(1);
    while root > 1 && pow_reaches(root - 1, exp, n) {
        root -= 1;
    }
    while !pow_reaches(root, exp, n) {
        root += 1;
    }
    root
}

fn pow_reaches(base: usize, exp: usize, target: usize) -> bool {
    let target = target as u128;
    let mut acc: u128 = 1;
    for _ in 0..exp {
        acc = acc.saturating_mul(base as u128);
        if acc >= target {
            return true;
        }
    }
    acc >= target
}

#[derive(Debug, Clone, Copy)]
struct MergeBuffers {
    input_bytes: usize,
    output_bytes: usize,
    queue_capacity: usize,
    block_lines: usize,
}

impl From<&ExternalSortConfig> for MergeBuffers {
    fn from(config: &ExternalSortConfig) -> Self {
        Self {
            input_bytes: config.merge_input_buffer_bytes,
            output_bytes: config.merge_output_buffer_bytes,
            queue_capacity: config.merge_queue_capacity,
            block_lines: config.merge_block_lines,
        }
    }
}

/// One level of the merge hierarchy.
///
/// Opening a phase lists the finished temp files of that phase and splits
/// them into batches of at most `files_per_batch`. Each batch is merged by
/// one reader thread per file, feeding a small bounded queue, and a k-way
/// merge consuming all of them, so a batch never holds more than
/// `files_per_batch` files open.
pub struct MergePhase<'a, L: Line> {
    number: usize,
    temp_dir: PathBuf,
    files_per_batch: usize,
    batches: Vec<Vec<PathBuf>>,
    buffers: MergeBuffers,
    events: &'a dyn SortEventSink,
    _line: PhantomData<fn() -> L>,
}

impl<'a, L: Line> MergePhase<'a, L> {
    pub fn open(
        number: usize,
        temp_dir: &Path,
        files_per_batch: usize,
        config: &ExternalSortConfig,
        events: &'a dyn SortEventSink,
    ) -> Result<Self> {
        Self::open_with(number, temp_dir, files_per_batch, MergeBuffers::from(config), events)
    }

    fn open_with(
        number: usize,
        temp_dir: &Path,
        files_per_batch: usize,
        buffers: MergeBuffers,
        events: &'a dyn SortEventSink,
    ) -> Result<Self> {
        if files_per_batch == 0 {
            return Err(SortError::InvalidState("batches must hold at least one file".into()));
        }

        let batches: Vec<Vec<PathBuf>> = files_for_phase(temp_dir, number)?
            .chunks(files_per_batch)
            .map(<[PathBuf]>::to_vec)
            .collect();

        debug!(
            "Merge phase {}: {} batches of up to {} files",
            number,
            batches.len(),
            files_per_batch
        );

        Ok(Self {
            number,
            temp_dir: temp_dir.to_path_buf(),
            files_per_batch,
            batches,
            buffers,
            events,
            _line: PhantomData,
        })
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn batches(&self) -> &[Vec<PathBuf>] {
        &self.batches
    }

    /// True when at most one batch is left, so the next merge can write the
    /// final output.
    pub fn can_finalize(&self) -> bool {
        self.batches.len() <= 1
    }

    /// Merges every batch into one file of the next phase, deleting each
    /// batch's inputs once its output is complete.
    pub fn run_intermediate(self, cancel: &CancellationToken) -> Result<MergePhase<'a, L>> {
        let next = self.number + 1;
        let _phase_op =
            MeasuredOperation::start(self.events, format!("merge phase {}", self.number));

        for batch in &self.batches {
            cancel.check()?;
            let _op = MeasuredOperation::start(
                self.events,
                format!("merge batch (phase {})", self.number),
            );

            let (pending, file) = PendingFile::create(new_phase_file(&self.temp_dir, next))?;
            let mut writer = LineWriter::new(file, self.buffers.output_bytes, false)?;
            self.merge_batch(batch, &mut writer, cancel)?;
            drop(writer.finish()?);
            pending.commit()?;
            remove_files(batch)?;
        }

        MergePhase::open_with(next, &self.temp_dir, self.files_per_batch, self.buffers, self.events)
    }

    /// Merges the last batch straight into `output`. Returns lines written.
    pub fn run_final<W: Write>(
        self,
        output: W,
        write_bom: bool,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if !self.can_finalize() {
            return Err(SortError::InvalidState(format!(
                "Cannot run the final merge with {} batches left in phase {}",
                self.batches.len(),
                self.number
            )));
        }

        let _op =
            MeasuredOperation::start(self.events, format!("final merge (phase {})", self.number));
        let mut writer = LineWriter::new(output, self.buffers.output_bytes, write_bom)?;
        if let Some(batch) = self.batches.first() {
            self.merge_batch(batch, &mut writer, cancel)?;
        }
        let lines = writer.lines_written();
        writer.finish()?;

        if let Some(batch) = self.batches.first() {
            remove_files(batch)?;
        }
        Ok(lines)
    }

    fn merge_batch<W: Write>(
        &self,
        batch: &[PathBuf],
        writer: &mut LineWriter<W>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let batch_cancel = cancel.child();
        let queues: Vec<BoundedQueue<Vec<L>>> = batch
            .iter()
            .map(|_| BoundedQueue::new(MERGE_QUEUE_NAME, self.buffers.queue_capacity))
            .collect();

        let results = thread::scope(|s| {
            let readers: Vec<_> = batch
                .iter()
                .zip(&queues)
                .map(|(path, queue)| {
                    let batch_cancel = &batch_cancel;
                    s.spawn(move || {
                        let result = self.read_sorted_file(path, queue, batch_cancel);
                        if result.is_err() {
                            batch_cancel.cancel();
                        }
                        result
                    })
                })
                .collect();

            let merge_result = {
                // releases readers blocked on a full queue if the merge stops early
                let _abort: Vec<AbortOnDrop<'_, Vec<L>>> = queues.iter().map(AbortOnDrop).collect();
                self.write_merged(&queues, writer, &batch_cancel)
            };

            let mut results = vec![merge_result];
            for reader in readers {
                results.push(
                    reader
                        .join()
                        .unwrap_or_else(|_| Err(SortError::worker_panicked("merge reader"))),
                );
            }
            results
        });

        first_failure(results)?;
        cancel.check()
    }

    fn read_sorted_file(
        &self,
        path: &Path,
        queue: &BoundedQueue<Vec<L>>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let _done = CompleteOnDrop(queue);
        let reader = LineReader::<_, L>::new(File::open(path)?, self.buffers.input_bytes)?;

        let block_lines = self.buffers.block_lines;
        let mut block = Vec::with_capacity(block_lines);
        for line in reader {
            block.push(line?);
            if block.len() == block_lines {
                queue.put(std::mem::replace(&mut block, Vec::with_capacity(block_lines)), cancel)?;
            }
        }
        if !block.is_empty() {
            queue.put(block, cancel)?;
        }
        Ok(())
    }

    fn write_merged<W: Write>(
        &self,
        queues: &[BoundedQueue<Vec<L>>],
        writer: &mut LineWriter<W>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sources = queues.iter().map(|queue| QueueSource::new(queue, cancel));
        for line in merge_sorted(sources) {
            writer.write_line(&line)?;
        }
        cancel.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_single_phase_when_within_limit() {
        assert_eq!(plan_merge(0, 15), MergePlan { phases: 1, files_per_batch: 1 });
        assert_eq!(plan_merge(1, 15), MergePlan { phases: 1, files_per_batch: 1 });
        assert_eq!(plan_merge(15, 15), MergePlan { phases: 1, files_per_batch: 15 });
    }

    #[test]
    fn test_plan_adds_phases_until_batches_fit() {
        // 10^(1/2) rounds up to 4 > 3, 10^(1/3) rounds up to 3
        assert_eq!(plan_merge(10, 3), MergePlan { phases: 3, files_per_batch: 3 });
        assert_eq!(plan_merge(16, 15), MergePlan { phases: 2, files_per_batch: 4 });
        assert_eq!(plan_merge(1000, 10), MergePlan { phases: 3, files_per_batch: 10 });
    }

    #[test]
    fn test_ceil_root_is_exact_on_perfect_powers() {
        assert_eq!(ceil_root(27, 3), 3);
        assert_eq!(ceil_root(28, 3), 4);
        assert_eq!(ceil_root(1 << 20, 20), 2);
        assert_eq!(ceil_root(1_000_000, 2), 1000);
        assert_eq!(ceil_root(1_000_001, 2), 1001);
    }

    #[test]
    fn test_plan_levels_reduce_to_one_batch() {
        for initial in 0..300 {
            for limit in 2..12 {
                let plan = plan_merge(initial, limit);
                assert!(plan.files_per_batch <= limit.max(1));

                let mut files = initial;
                let mut levels = 0;
                while files > plan.files_per_batch {
                    files = files.div_ceil(plan.files_per_batch);
                    levels += 1;
                }
                assert_eq!(
                    levels,
                    plan.intermediate_levels(),
                    "initial {} limit {}",
                    initial,
                    limit
                );
            }
        }
    }
}
