use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::external_sort::constants::*;
use crate::external_sort::error::SortError;
use crate::external_sort::line::LineRepresentation;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSortConfig {
    /// Input bytes collected into one in-memory chunk before it is sorted.
    pub chunk_size_bytes: u64,
    /// When set, overrides `chunk_size_bytes` with a share of total RAM.
    pub memory_usage_percent: Option<f64>,
    pub sorter_threads: usize,
    /// Fan-in limit: most files merged together in one batch.
    pub max_files_to_merge: usize,
    pub initial_input_buffer_bytes: usize,
    pub initial_output_buffer_bytes: usize,
    pub merge_input_buffer_bytes: usize,
    pub merge_output_buffer_bytes: usize,
    /// Blocks buffered between each merge input reader and the merger.
    pub merge_queue_capacity: usize,
    pub merge_block_lines: usize,
    pub line_representation: LineRepresentation,
    /// Defaults to the directory of the file being sorted.
    pub temp_directory: Option<PathBuf>,
}

impl Default for ExternalSortConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            memory_usage_percent: None,
            sorter_threads: num_cpus::get(),
            max_files_to_merge: DEFAULT_MAX_FILES_TO_MERGE,
            initial_input_buffer_bytes: DEFAULT_INITIAL_INPUT_BUFFER_BYTES,
            initial_output_buffer_bytes: DEFAULT_INITIAL_OUTPUT_BUFFER_BYTES,
            merge_input_buffer_bytes: DEFAULT_MERGE_INPUT_BUFFER_BYTES,
            merge_output_buffer_bytes: DEFAULT_MERGE_OUTPUT_BUFFER_BYTES,
            merge_queue_capacity: DEFAULT_MERGE_QUEUE_CAPACITY,
            merge_block_lines: DEFAULT_MERGE_BLOCK_LINES,
            line_representation: LineRepresentation::Bytes,
            temp_directory: None,
        }
    }
}

impl ExternalSortConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), SortError> {
        if self.chunk_size_bytes == 0 {
            return Err(SortError::Config("Chunk size must be greater than zero".into()));
        }

        if let Some(percent) = self.memory_usage_percent {
            if !(MIN_MEMORY_USAGE_PERCENT..=MAX_MEMORY_USAGE_PERCENT).contains(&percent) {
                return Err(SortError::Config(format!(
                    "Memory usage percent must be between {} and {}",
                    MIN_MEMORY_USAGE_PERCENT, MAX_MEMORY_USAGE_PERCENT
                )));
            }
        }

        if self.sorter_threads == 0 || self.sorter_threads > MAX_SORTER_THREADS {
            return Err(SortError::Config(format!(
                "Sorter threads must be between 1 and {}",
                MAX_SORTER_THREADS
            )));
        }

        if self.max_files_to_merge < MIN_MAX_FILES_TO_MERGE {
            return Err(SortError::Config(format!(
                "At least {} files must be merged per batch",
                MIN_MAX_FILES_TO_MERGE
            )));
        }

        let buffers = [
            ("initial input", self.initial_input_buffer_bytes),
            ("initial output", self.initial_output_buffer_bytes),
            ("merge input", self.merge_input_buffer_bytes),
            ("merge output", self.merge_output_buffer_bytes),
        ];
        for (name, size) in buffers {
            if size == 0 {
                return Err(SortError::Config(format!(
                    "The {} buffer size must be greater than zero",
                    name
                )));
            }
        }

        if self.merge_queue_capacity == 0 || self.merge_block_lines == 0 {
            return Err(SortError::Config(
                "Merge queue capacity and block size must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        use sysinfo::System;

        let percent = self.memory_usage_percent?;
        let mut system = System::new();
        system.refresh_memory();
        Some((system.total_memory() as f64 * percent / 100.0) as u64)
    }

    /// Chunk threshold the chunked sort phase uses.
    ///
    /// With a memory budget, the budget is split across every chunk that can
    /// be alive at once: one per sorter, a full queue on each side of the
    /// sorters, plus the chunk being read and the one being flushed.
    pub fn effective_chunk_size_bytes(&self) -> u64 {
        match self.memory_limit_bytes() {
            Some(limit) => {
                let in_flight = 3 * self.sorter_threads as u64 + 2;
                (limit / in_flight).max(1)
            }
            None => self.chunk_size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_validation() {
        let mut config = ExternalSortConfig::default();
        assert!(config.validate().is_ok());

        config.max_files_to_merge = 1;
        assert!(config.validate().is_err());
        config.max_files_to_merge = 2;

        config.sorter_threads = 0;
        assert!(config.validate().is_err());
        config.sorter_threads = 2;

        config.memory_usage_percent = Some(95.0);
        assert!(config.validate().is_err());
        config.memory_usage_percent = Some(50.0);
        assert!(config.validate().is_ok());

        config.merge_input_buffer_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_chunk_size_without_budget() {
        let config = ExternalSortConfig {
            chunk_size_bytes: 1234,
            ..Default::default()
        };
        assert_eq!(config.effective_chunk_size_bytes(), 1234);
    }

    #[test]
    fn test_file_round_trip_and_partial_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sort_config.json");

        let config = ExternalSortConfig {
            max_files_to_merge: 3,
            line_representation: LineRepresentation::Text,
            ..Default::default()
        };
        config.to_file(&path).unwrap();
        let loaded = ExternalSortConfig::from_file(&path).unwrap();
        assert_eq!(loaded.max_files_to_merge, 3);
        assert_eq!(loaded.line_representation, LineRepresentation::Text);

        std::fs::write(
            &path,
            r#"{ "chunk_size_bytes": 4096, "line_representation": "bytes" }"#,
        )
        .unwrap();
        let partial = ExternalSortConfig::from_file(&path).unwrap();
        assert_eq!(partial.chunk_size_bytes, 4096);
        assert_eq!(partial.max_files_to_merge, DEFAULT_MAX_FILES_TO_MERGE);

        std::fs::write(&path, r#"{ "max_files_to_merge": 1 }"#).unwrap();
        assert!(ExternalSortConfig::from_file(&path).is_err());
    }
}
