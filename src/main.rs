use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use ext_line_sort::constants::BYTES_PER_MB;
use ext_line_sort::external_sort::verify_sorted;
use ext_line_sort::utils::{
    self, ensure_parent_dir, existing_file_size, format_bytes, format_duration,
};
use ext_line_sort::{
    generate_lines, CancellationToken, ExternalSortConfig, ExternalSortProcessor, GeneratorConfig,
};

#[derive(Parser)]
#[command(name = "ext-line-sort")]
#[command(about = "Sorts huge `<number>. <text>` files in bounded memory")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Sort a file in place
    Sort {
        file: PathBuf,

        #[arg(
            short,
            long,
            help = "Directory for temporary files (defaults to the file's directory)"
        )]
        temp_dir: Option<PathBuf>,

        #[arg(short, long, help = "Configuration file, created with defaults if missing")]
        config: Option<PathBuf>,

        #[arg(long, help = "Number of in-memory sorter threads")]
        threads: Option<usize>,

        #[arg(long, help = "In-memory chunk size in MB")]
        chunk_size_mb: Option<u64>,

        #[arg(long, help = "Maximum number of files merged together")]
        max_files_to_merge: Option<usize>,
    },
    /// Generate a file of random lines
    Generate {
        file: PathBuf,

        #[arg(short, long, help = "Target size in MB")]
        size_mb: u64,

        #[arg(short, long, help = "Probability that a line repeats a recent text")]
        duplicates: Option<f64>,

        #[arg(long, help = "Number of generator threads")]
        threads: Option<usize>,
    },
    /// Check that a file is sorted
    Verify { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    utils::setup_logging(if args.verbose { "verbose" } else { "normal" })?;

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_clone = shutdown_flag.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Shutdown signal received. Stopping...");
            shutdown_flag_clone.store(true, Ordering::Relaxed);
        }
    });

    let cancel = CancellationToken::from_flag(shutdown_flag);

    match args.command {
        Command::Sort {
            file,
            temp_dir,
            config,
            threads,
            chunk_size_mb,
            max_files_to_merge,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(dir) = temp_dir {
                config.temp_directory = Some(dir);
            }
            if let Some(threads) = threads {
                config.sorter_threads = threads;
            }
            if let Some(mb) = chunk_size_mb {
                config.chunk_size_bytes = mb * BYTES_PER_MB as u64;
            }
            if let Some(limit) = max_files_to_merge {
                config.max_files_to_merge = limit;
            }
            run_sort(file, config, cancel).await
        }
        Command::Generate {
            file,
            size_mb,
            duplicates,
            threads,
        } => {
            let mut config = GeneratorConfig::default();
            if let Some(p) = duplicates {
                config.duplicates_probability = p;
            }
            if let Some(threads) = threads {
                config.generator_threads = threads;
            }
            run_generate(file, size_mb * BYTES_PER_MB as u64, config, cancel).await
        }
        Command::Verify { file } => run_verify(file).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<ExternalSortConfig> {
    let Some(path) = path else {
        return Ok(ExternalSortConfig::default());
    };

    if path.exists() {
        ExternalSortConfig::from_file(path)
    } else {
        println!("📄 Config file not found, creating default: {}", path.display());
        let config = ExternalSortConfig::default();
        config.to_file(path)?;
        Ok(config)
    }
}

async fn run_sort(
    file: PathBuf,
    config: ExternalSortConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let size = existing_file_size(&file)?;
    println!("🔍 Sorting {} ({})", file.display(), format_bytes(size));
    println!("🔧 Sorter threads: {}", config.sorter_threads);
    println!("📦 Max files per merge: {}", config.max_files_to_merge);
    if let Some(dir) = &config.temp_directory {
        info!("Temp directory: {}", dir.display());
    }

    let processor = ExternalSortProcessor::new(config)?.with_cancellation(cancel);
    let start_time = Instant::now();

    let (processor, file, result) = tokio::task::spawn_blocking(move || {
        let result = processor.sort_file(&file);
        (processor, file, result)
    })
    .await
    .context("Sort task failed")?;

    let stats = match result {
        Ok(stats) => stats,
        Err(e) if e.is_cancelled() => {
            let removed = processor.cleanup_temp_files(&file)?;
            warn!("Sort cancelled, removed {} temp files", removed);
            println!("🛑 Sort of {} cancelled", file.display());
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to sort {}", file.display())),
    };

    let total_time = start_time.elapsed();
    println!("\n🎉 Sort completed successfully! 🎉");
    println!("=======================================");
    println!("📊 Lines: {}", stats.total_lines);
    println!("📦 Chunks created: {}", stats.chunks_created);
    println!(
        "🔀 Merge levels: {} (up to {} files per batch)",
        stats.merge_levels, stats.files_per_batch
    );
    println!("⏱️ Chunked sort: {}", format_duration(stats.chunk_phase_ms as f64 / 1000.0));
    println!("⏱️ Merge: {}", format_duration(stats.merge_phase_ms as f64 / 1000.0));
    println!("⏱️ Total time: {}", format_duration(total_time.as_secs_f64()));
    println!(
        "🔄 Throughput: {:.0} lines/sec",
        utils::throughput(stats.total_lines, stats.processing_time_ms)
    );

    Ok(())
}

async fn run_generate(
    file: PathBuf,
    bytes: u64,
    config: GeneratorConfig,
    cancel: CancellationToken,
) -> Result<()> {
    ensure_parent_dir(&file)?;
    println!("📝 Generating {} of lines into {}", format_bytes(bytes), file.display());

    let output =
        File::create(&file).with_context(|| format!("Failed to create {}", file.display()))?;
    let start_time = Instant::now();
    let result =
        tokio::task::spawn_blocking(move || generate_lines(bytes, output, &config, &cancel))
            .await
            .context("Generator task failed")?;

    match result {
        Ok(stats) => {
            println!(
                "✨ Generated {} lines ({}) in {}",
                stats.lines,
                format_bytes(stats.bytes),
                format_duration(start_time.elapsed().as_secs_f64())
            );
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!("🛑 Generation cancelled; {} is incomplete", file.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_verify(file: PathBuf) -> Result<()> {
    existing_file_size(&file)?;
    let input = File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?;
    let report = tokio::task::spawn_blocking(move || verify_sorted(input))
        .await
        .context("Verify task failed")??;

    println!("📊 Lines: {}", report.lines);
    println!("🔁 Repeated texts: {}", report.duplicate_texts);
    println!("🔑 Checksum: {:016x}", report.checksum);

    match report.first_unsorted_line {
        None => {
            println!("✅ {} is sorted", file.display());
            Ok(())
        }
        Some(line) => bail!("{} is not sorted: line {} is out of order", file.display(), line),
    }
}
