use serde::Serialize;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Read;

use crate::external_sort::codec::LineReader;
use crate::external_sort::constants::DEFAULT_MERGE_INPUT_BUFFER_BYTES;
use crate::external_sort::error::Result;
use crate::external_sort::line::{compare_text, ByteLine, Line};

/// Summary of one pass over a line file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub lines: u64,
    /// Lines whose text compares equal to the text of the line before them.
    pub duplicate_texts: u64,
    /// Sum of per-line hashes; equal for any two permutations of the same lines.
    pub checksum: u64,
    /// 1-based number of the first line that sorts before its predecessor.
    pub first_unsorted_line: Option<u64>,
    pub had_bom: bool,
}

impl VerifyReport {
    pub fn is_sorted(&self) -> bool {
        self.first_unsorted_line.is_none()
    }

    /// True when `other` holds the same multiset of lines, judged by count
    /// and checksum.
    pub fn same_lines_as(&self, other: &VerifyReport) -> bool {
        self.lines == other.lines && self.checksum == other.checksum
    }
}

/// Streams `input` once and reports whether it is sorted.
///
/// Works on unsorted input too, so the same call gives the checksum of a file
/// before sorting. Malformed lines are errors.
pub fn verify_sorted<R: Read>(input: R) -> Result<VerifyReport> {
    let mut reader = LineReader::<R, ByteLine>::new(input, DEFAULT_MERGE_INPUT_BUFFER_BYTES)?;
    let mut report = VerifyReport::default();
    let mut previous: Option<ByteLine> = None;

    while let Some(line) = reader.read_line()? {
        report.lines += 1;
        report.checksum = report.checksum.wrapping_add(line_hash(&line));

        if let Some(prev) = &previous {
            if compare_text(prev.text_bytes(), line.text_bytes()) == Ordering::Equal {
                report.duplicate_texts += 1;
            }
            if report.first_unsorted_line.is_none() && *prev > line {
                report.first_unsorted_line = Some(report.lines);
            }
        }
        previous = Some(line);
    }

    report.had_bom = reader.had_bom();
    Ok(report)
}

fn line_hash(line: &ByteLine) -> u64 {
    let mut hasher = DefaultHasher::new();
    line.number().hash(&mut hasher);
    line.text_bytes().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_input() {
        let data = b"2. apple\r\n10. Apple\r\n30432. Something\r\n";
        let report = verify_sorted(&data[..]).unwrap();
        assert_eq!(report.lines, 3);
        assert_eq!(report.duplicate_texts, 1);
        assert!(report.is_sorted());
        assert!(!report.had_bom);
    }

    #[test]
    fn test_reports_first_unsorted_line() {
        let data = b"1. a\r\n2. c\r\n3. b\r\n4. a\r\n";
        let report = verify_sorted(&data[..]).unwrap();
        assert_eq!(report.first_unsorted_line, Some(3));
        assert!(!report.is_sorted());
    }

    #[test]
    fn test_checksum_ignores_order() {
        let a = verify_sorted(&b"30432. Something\r\n2. apple\r\n10. Apple\r\n"[..]).unwrap();
        let b = verify_sorted(&b"2. apple\n10. Apple\n30432. Something"[..]).unwrap();
        assert!(a.same_lines_as(&b));

        let c = verify_sorted(&b"2. apple\r\n11. Apple\r\n30432. Something\r\n"[..]).unwrap();
        assert!(!a.same_lines_as(&c));
    }

    #[test]
    fn test_empty_input() {
        let report = verify_sorted(&b""[..]).unwrap();
        assert_eq!(report, VerifyReport::default());
        assert!(report.is_sorted());
    }
}
