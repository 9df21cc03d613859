//! Random `<number>. <letters>` test data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::thread;
use tracing::{debug, info};

use crate::constants::*;
use crate::external_sort::cancel::CancellationToken;
use crate::external_sort::codec::LineWriter;
use crate::external_sort::constants::UTF8_BOM;
use crate::external_sort::error::{first_failure, Result, SortError};
use crate::external_sort::line::{ByteLine, Line};
use crate::external_sort::queue::{AbortOnDrop, BoundedQueue};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub generator_threads: usize,
    pub min_string_length: usize,
    pub max_string_length: usize,
    /// Chance that a line reuses the text of one of the recent lines.
    pub duplicates_probability: f64,
    pub write_bom: bool,
    /// Fixed seed for reproducible single-threaded output.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            generator_threads: num_cpus::get(),
            min_string_length: DEFAULT_MIN_STRING_LENGTH,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            duplicates_probability: DEFAULT_DUPLICATES_PROBABILITY,
            write_bom: true,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.generator_threads == 0 {
            return Err(SortError::Config("At least one generator thread is required".into()));
        }
        if self.min_string_length == 0 || self.min_string_length > self.max_string_length {
            return Err(SortError::Config(format!(
                "Invalid string length range {}..={}",
                self.min_string_length, self.max_string_length
            )));
        }
        if !(0.0..=1.0).contains(&self.duplicates_probability) {
            return Err(SortError::Config("Duplicates probability must be between 0 and 1".into()));
        }
        Ok(())
    }
}

/// Produces random lines. One generator per thread.
pub struct LineGenerator {
    rng: StdRng,
    min_string_length: usize,
    max_string_length: usize,
    duplicates_probability: f64,
    recent: VecDeque<Box<[u8]>>,
}

impl LineGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    pub fn with_rng(config: &GeneratorConfig, rng: StdRng) -> Self {
        Self {
            rng,
            min_string_length: config.min_string_length,
            max_string_length: config.max_string_length,
            duplicates_probability: config.duplicates_probability,
            recent: VecDeque::with_capacity(RECENT_STRINGS_CAPACITY),
        }
    }

    pub fn next_line(&mut self) -> ByteLine {
        let number = self.rng.gen_range(0..i32::MAX);
        let reuse = !self.recent.is_empty() && self.rng.gen_bool(self.duplicates_probability);

        let text = if reuse {
            let ix = self.rng.gen_range(0..self.recent.len());
            self.recent[ix].clone()
        } else {
            self.random_text()
        };
        ByteLine::new(number, text)
    }

    fn random_text(&mut self) -> Box<[u8]> {
        let len = self.rng.gen_range(self.min_string_length..=self.max_string_length);
        let text: Box<[u8]> = (0..len)
            .map(|_| ALPHABET[self.rng.gen_range(0..ALPHABET.len())])
            .collect();

        if self.recent.len() == RECENT_STRINGS_CAPACITY {
            self.recent.pop_front();
        }
        self.recent.push_back(text.clone());
        text
    }
}

impl Iterator for LineGenerator {
    type Item = ByteLine;

    fn next(&mut self) -> Option<ByteLine> {
        Some(self.next_line())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateStats {
    pub lines: u64,
    pub bytes: u64,
}

/// Writes random lines to `output` until at least `bytes` bytes are written.
///
/// Generator threads fill a bounded queue with blocks of lines and the
/// calling thread writes them, so the output overshoots `bytes` by less
/// than one line.
pub fn generate_lines<W: Write>(
    bytes: u64,
    output: W,
    config: &GeneratorConfig,
    cancel: &CancellationToken,
) -> Result<GenerateStats> {
    config.validate()?;
    let stop = cancel.child();
    let queue = BoundedQueue::<Vec<ByteLine>>::new(
        GENERATED_QUEUE_NAME,
        config.generator_threads * GENERATED_BLOCKS_PER_THREAD,
    );

    let (write_result, generator_results) = thread::scope(|s| {
        let generators: Vec<_> = (0..config.generator_threads)
            .map(|i| {
                let mut generator = match config.seed {
                    Some(seed) => {
                        let rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                        LineGenerator::with_rng(config, rng)
                    }
                    None => LineGenerator::new(config),
                };
                let queue = &queue;
                let stop = &stop;
                s.spawn(move || -> Result<()> {
                    while !stop.is_cancelled() {
                        let block: Vec<ByteLine> =
                            generator.by_ref().take(GENERATED_BLOCK_LINES).collect();
                        match queue.put(block, stop) {
                            Ok(()) => {}
                            Err(SortError::Cancelled) => break,
                            Err(e) => return Err(e),
                        }
                    }
                    Ok(())
                })
            })
            .collect();
        debug!("Started {} generator threads", generators.len());

        let write_result = write_until(bytes, output, config.write_bom, &queue, &stop);
        stop.cancel();

        let generator_results: Vec<Result<()>> = generators
            .into_iter()
            .map(|g| g.join().unwrap_or_else(|_| Err(SortError::worker_panicked("line generator"))))
            .collect();
        (write_result, generator_results)
    });

    first_failure(generator_results)?;
    let stats = write_result?;
    cancel.check()?;

    info!("Generated {} lines ({} bytes)", stats.lines, stats.bytes);
    Ok(stats)
}

fn write_until<W: Write>(
    target: u64,
    output: W,
    write_bom: bool,
    queue: &BoundedQueue<Vec<ByteLine>>,
    stop: &CancellationToken,
) -> Result<GenerateStats> {
    let _abort = AbortOnDrop(queue);
    let mut writer = LineWriter::new(output, GENERATOR_OUTPUT_BUFFER_BYTES, write_bom)?;
    let mut stats = GenerateStats {
        lines: 0,
        bytes: if write_bom { UTF8_BOM.len() as u64 } else { 0 },
    };

    'blocks: while stats.bytes < target {
        let Some(block) = queue.take(stop) else {
            break;
        };
        for line in block {
            if stats.bytes >= target {
                break 'blocks;
            }
            writer.write_line(&line)?;
            stats.bytes += line.encoded_len() as u64;
            stats.lines += 1;
        }
    }

    stop.check()?;
    writer.finish()?;
    Ok(stats)
}
