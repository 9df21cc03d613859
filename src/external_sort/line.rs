use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::external_sort::error::{Result, SortError};

/// One `<number>. <text>` record.
///
/// Lines order by their text compared case-insensitively, then by number.
/// Both implementations share [`compare_lines`], so switching representation
/// never changes the output order.
pub trait Line: Ord + Send + Sized + 'static {
    fn number(&self) -> i32;

    /// Payload bytes, without the `<number>. ` prefix and the terminator.
    fn text_bytes(&self) -> &[u8];

    /// Builds a line from an already split record.
    ///
    /// `line_number` is only used for error reporting.
    fn from_parts(number: i32, payload: Vec<u8>, line_number: u64) -> Result<Self>;

    /// Bytes the line occupies when written by the codec, terminator included.
    fn encoded_len(&self) -> usize {
        number_width(self.number()) + 2 + self.text_bytes().len() + 2
    }
}

/// Which [`Line`] implementation a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineRepresentation {
    #[default]
    Bytes,
    Text,
}

/// Byte-buffer line used on the hot path. Payload is not required to be UTF-8.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ByteLine {
    number: i32,
    text: Box<[u8]>,
}

impl ByteLine {
    pub fn new(number: i32, text: impl Into<Box<[u8]>>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

impl Line for ByteLine {
    fn number(&self) -> i32 {
        self.number
    }

    fn text_bytes(&self) -> &[u8] {
        &self.text
    }

    fn from_parts(number: i32, payload: Vec<u8>, _line_number: u64) -> Result<Self> {
        Ok(Self::new(number, payload))
    }
}

impl Ord for ByteLine {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_lines(self.number, &self.text, other.number, &other.text)
    }
}

impl PartialOrd for ByteLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ByteLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number, String::from_utf8_lossy(&self.text))
    }
}

/// String-backed line for callers that want `&str` access to the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextLine {
    number: i32,
    text: String,
}

impl TextLine {
    pub fn new(number: i32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Line for TextLine {
    fn number(&self) -> i32 {
        self.number
    }

    fn text_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    fn from_parts(number: i32, payload: Vec<u8>, line_number: u64) -> Result<Self> {
        let text = String::from_utf8(payload)
            .map_err(|e| {
                SortError::malformed(line_number, format!("payload is not UTF-8: {}", e))
            })?;
        Ok(Self { number, text })
    }
}

impl Ord for TextLine {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_lines(
            self.number,
            self.text.as_bytes(),
            other.number,
            other.text.as_bytes(),
        )
    }
}

impl PartialOrd for TextLine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TextLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number, self.text)
    }
}

/// Total order over lines: case-insensitive text, then number.
pub fn compare_lines(number_a: i32, text_a: &[u8], number_b: i32, text_b: &[u8]) -> Ordering {
    compare_text(text_a, text_b).then_with(|| number_a.cmp(&number_b))
}

/// Case-insensitive comparison of two payloads.
///
/// ASCII bytes are upper-cased and compared directly. At the first position
/// where either side holds a non-ASCII byte, the remaining suffixes are
/// decoded and compared char by char after Unicode upper-casing. Everything
/// before that position is ASCII on both sides and already known to be equal,
/// so it is not decoded again.
pub fn compare_text(a: &[u8], b: &[u8]) -> Ordering {
    for (i, (&x, &y)) in a.iter().zip(b.iter()).enumerate() {
        if !x.is_ascii() || !y.is_ascii() {
            return compare_unicode_suffix(&a[i..], &b[i..]);
        }
        let ordering = x.to_ascii_uppercase().cmp(&y.to_ascii_uppercase());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_unicode_suffix(a: &[u8], b: &[u8]) -> Ordering {
    // Invalid sequences decode to U+FFFD; upper-casing an ASCII char yields the
    // same value as the byte path, which keeps the order transitive.
    let a = String::from_utf8_lossy(a);
    let b = String::from_utf8_lossy(b);
    a.chars()
        .flat_map(char::to_uppercase)
        .cmp(b.chars().flat_map(char::to_uppercase))
}

/// Decimal width of `number` including a leading `-`.
pub fn number_width(number: i32) -> usize {
    let mut n = number.unsigned_abs();
    let mut width = 1;
    while n >= 10 {
        n /= 10;
        width += 1;
    }
    if number < 0 {
        width + 1
    } else {
        width
    }
}
