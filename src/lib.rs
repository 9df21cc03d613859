// External merge sort engine
pub mod external_sort;

pub mod constants;
pub mod generator;
pub mod utils;

pub use external_sort::{
    CancellationToken, ExternalSortConfig, ExternalSortProcessor, ExternalSortStats, SortError,
};
pub use generator::{generate_lines, GeneratorConfig, LineGenerator};
