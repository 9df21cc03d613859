use std::cmp::Ordering;
use std::fs;
use std::io::Cursor;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use proptest::prelude::*;
use tempfile::TempDir;

use ext_line_sort::external_sort::codec::{LineReader, LineWriter};
use ext_line_sort::external_sort::kway::merge_sorted;
use ext_line_sort::external_sort::line::{compare_lines, ByteLine, Line};
use ext_line_sort::external_sort::{plan_merge, sort_file, verify_sorted};
use ext_line_sort::{
    generate_lines, CancellationToken, ExternalSortConfig, ExternalSortProcessor, GeneratorConfig,
};

const PROPTEST_CASES: u32 = 24;

/// Small buffers and chunks so even tiny inputs go through several merge levels.
fn small_config() -> ExternalSortConfig {
    ExternalSortConfig {
        chunk_size_bytes: 64,
        sorter_threads: 2,
        max_files_to_merge: 2,
        initial_input_buffer_bytes: 256,
        initial_output_buffer_bytes: 256,
        merge_input_buffer_bytes: 256,
        merge_output_buffer_bytes: 256,
        merge_queue_capacity: 2,
        merge_block_lines: 4,
        ..Default::default()
    }
}

fn encode(lines: &[(i32, String)]) -> Vec<u8> {
    let mut writer = LineWriter::new(Vec::new(), 1024, false).unwrap();
    for (number, text) in lines {
        writer.write_line(&ByteLine::new(*number, text.as_bytes().to_vec())).unwrap();
    }
    writer.finish().unwrap()
}

fn decode(data: &[u8]) -> Vec<ByteLine> {
    LineReader::<_, ByteLine>::new(data, 1024)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn raw_lines(data: &[u8]) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = data
        .split_inclusive(|b| *b == b'\n')
        .map(|l| l.to_vec())
        .collect();
    lines.sort();
    lines
}

fn line_strategy() -> impl Strategy<Value = (i32, String)> {
    (any::<i32>(), "[a-cA-C éÉß]{0,6}")
}

#[test]
fn test_sort_file_end_to_end() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("data.txt");

    let generator = GeneratorConfig {
        generator_threads: 2,
        min_string_length: 2,
        max_string_length: 10,
        seed: Some(1),
        ..Default::default()
    };
    let output = fs::File::create(&path)?;
    let generated = generate_lines(64 * 1024, output, &generator, &CancellationToken::new())?;
    let before = verify_sorted(fs::File::open(&path)?)?;
    assert_eq!(before.lines, generated.lines);
    assert!(before.had_bom);

    let config = ExternalSortConfig {
        chunk_size_bytes: 4096,
        max_files_to_merge: 4,
        ..small_config()
    };
    let stats = sort_file(&path, config)?;

    let after = verify_sorted(fs::File::open(&path)?)?;
    assert!(after.is_sorted());
    assert!(after.same_lines_as(&before));
    assert!(after.had_bom);
    assert_eq!(stats.total_lines, generated.lines);
    assert_eq!(stats.output_bytes, fs::metadata(&path)?.len());

    let plan = plan_merge(stats.chunks_created, 4);
    assert_eq!(stats.merge_levels, plan.intermediate_levels());
    Ok(())
}

#[test]
fn test_config_file_drives_sort() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("sort_config.json");
    let data_path = temp_dir.path().join("data.txt");

    fs::write(
        &config_path,
        r#"{ "chunk_size_bytes": 32, "max_files_to_merge": 2, "sorter_threads": 1, "line_representation": "text" }"#,
    )?;
    fs::write(&data_path, "3. c\r\n1. a\r\n2. B\r\n1. b\r\n")?;

    let config = ExternalSortConfig::from_file(&config_path)?;
    let stats = ExternalSortProcessor::new(config)?.sort_file(&data_path)?;

    assert_eq!(fs::read_to_string(&data_path)?, "1. a\r\n1. b\r\n2. B\r\n3. c\r\n");
    assert_eq!(stats.total_lines, 4);
    Ok(())
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = ExternalSortConfig {
        max_files_to_merge: 1,
        ..small_config()
    };
    assert!(ExternalSortProcessor::new(config).is_err());
}

#[test]
fn test_shutdown_signal_cancels_sort() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("data.txt");
    fs::write(&path, "2. b\r\n1. a\r\n")?;

    let flag = Arc::new(AtomicBool::new(true));
    let processor = ExternalSortProcessor::new(small_config())?.with_shutdown_signal(flag);
    let err = processor.sort_file(&path).unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(fs::read_to_string(&path)?, "2. b\r\n1. a\r\n");
    processor.cleanup_temp_files(&path)?;
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn sorted_output_is_ordered_permutation(
        lines in prop::collection::vec(line_strategy(), 0..80)
    ) {
        let temp_dir = TempDir::new().unwrap();
        let input = encode(&lines);

        let mut stream = Cursor::new(input.clone());
        let stats = ExternalSortProcessor::new(small_config())
            .unwrap()
            .sort_stream(&mut stream, temp_dir.path())
            .unwrap();
        let mut output = stream.into_inner();
        output.truncate(stats.output_bytes as usize);

        prop_assert_eq!(stats.total_lines, lines.len() as u64);
        prop_assert_eq!(raw_lines(&output), raw_lines(&input));

        let sorted = decode(&output);
        for pair in sorted.windows(2) {
            prop_assert_ne!(pair[0].cmp(&pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn codec_round_trip_is_exact(lines in prop::collection::vec(line_strategy(), 0..40)) {
        let bytes = encode(&lines);
        let decoded = decode(&bytes);

        prop_assert_eq!(decoded.len(), lines.len());
        let mut writer = LineWriter::new(Vec::new(), 16, false).unwrap();
        for line in &decoded {
            writer.write_line(line).unwrap();
        }
        prop_assert_eq!(writer.finish().unwrap(), bytes);
    }

    #[test]
    fn merge_equals_sorted_concatenation(
        sources in prop::collection::vec(prop::collection::vec(line_strategy(), 0..20), 0..6)
    ) {
        let sorted_sources: Vec<Vec<ByteLine>> = sources
            .iter()
            .map(|lines| {
                let mut decoded = decode(&encode(lines));
                decoded.sort();
                decoded
            })
            .collect();

        let merged: Vec<ByteLine> =
            merge_sorted(sorted_sources.clone().into_iter().map(Vec::into_iter)).collect();

        let mut expected: Vec<ByteLine> = sorted_sources.into_iter().flatten().collect();
        expected.sort();

        prop_assert_eq!(merged.len(), expected.len());
        for (a, b) in merged.iter().zip(&expected) {
            prop_assert_eq!(
                compare_lines(a.number(), a.text_bytes(), b.number(), b.text_bytes()),
                Ordering::Equal
            );
        }
    }

    #[test]
    fn comparator_is_antisymmetric(a in line_strategy(), b in line_strategy()) {
        let ab = compare_lines(a.0, a.1.as_bytes(), b.0, b.1.as_bytes());
        let ba = compare_lines(b.0, b.1.as_bytes(), a.0, a.1.as_bytes());
        prop_assert_eq!(ab, ba.reverse());
    }
}
