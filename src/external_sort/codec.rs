//! Streaming reader and writer for the `<number>. <text>\r\n` format.
//!
//! Both sides work on raw bytes; text is never decoded here.

use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;

use crate::external_sort::constants::*;
use crate::external_sort::error::{Result, SortError};
use crate::external_sort::line::Line;

pub struct LineReader<R: Read, L: Line> {
    inner: BufReader<R>,
    payload: Vec<u8>,
    bytes_consumed: u64,
    lines_read: u64,
    had_bom: bool,
    _line: PhantomData<L>,
}

impl<R: Read, L: Line> LineReader<R, L> {
    /// Wraps `input`, skipping a UTF-8 byte-order mark if the stream starts with one.
    pub fn new(input: R, buffer_size: usize) -> Result<Self> {
        let mut inner = BufReader::with_capacity(buffer_size.max(UTF8_BOM.len()), input);
        let had_bom = {
            let buf = inner.fill_buf()?;
            buf.starts_with(&UTF8_BOM)
        };
        let mut bytes_consumed = 0;
        if had_bom {
            inner.consume(UTF8_BOM.len());
            bytes_consumed = UTF8_BOM.len() as u64;
        }

        Ok(Self {
            inner,
            payload: Vec::new(),
            bytes_consumed,
            lines_read: 0,
            had_bom,
            _line: PhantomData,
        })
    }

    pub fn had_bom(&self) -> bool {
        self.had_bom
    }

    /// Bytes taken from the underlying stream so far, BOM included.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Reads the next line, `Ok(None)` at a clean end of stream.
    pub fn read_line(&mut self) -> Result<Option<L>> {
        let line_number = self.lines_read + 1;
        let number = match self.read_number(line_number)? {
            Some(number) => number,
            None => return Ok(None),
        };

        match self.next_byte()? {
            Some(PAYLOAD_SEPARATOR) => {}
            Some(_) => {
                return Err(SortError::malformed(line_number, "expected a space after '.'"));
            }
            None => {
                return Err(SortError::malformed(line_number, "stream ended after '.'"));
            }
        }

        self.read_payload()?;

        self.lines_read = line_number;
        let payload = self.payload.as_slice().to_vec();
        L::from_parts(number, payload, line_number).map(Some)
    }

    /// Fills `payload` up to the first `\r` or `\n`. A `\r` may be followed
    /// by one `\n`, which belongs to the same terminator.
    fn read_payload(&mut self) -> Result<()> {
        self.payload.clear();
        let terminator = loop {
            let (used, found) = {
                let buf = self.inner.fill_buf()?;
                if buf.is_empty() {
                    return Ok(());
                }
                match buf.iter().position(|&b| b == b'\r' || b == b'\n') {
                    Some(pos) => {
                        self.payload.extend_from_slice(&buf[..pos]);
                        (pos + 1, Some(buf[pos]))
                    }
                    None => {
                        self.payload.extend_from_slice(buf);
                        (buf.len(), None)
                    }
                }
            };
            self.inner.consume(used);
            self.bytes_consumed += used as u64;
            if let Some(byte) = found {
                break byte;
            }
        };

        if terminator == b'\r' {
            let followed_by_lf = self.inner.fill_buf()?.first() == Some(&b'\n');
            if followed_by_lf {
                self.inner.consume(1);
                self.bytes_consumed += 1;
            }
        }
        Ok(())
    }

    fn read_number(&mut self, line_number: u64) -> Result<Option<i32>> {
        let first = match self.next_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };

        let negative = first == b'-';
        let mut value: i64 = 0;
        let mut digits = 0usize;
        let mut current = if negative { self.next_byte()? } else { Some(first) };

        loop {
            match current {
                Some(NUMBER_SEPARATOR) => break,
                Some(b @ b'0'..=b'9') => {
                    value = value * 10 + i64::from(b - b'0');
                    digits += 1;
                    if value > i64::from(i32::MAX) + 1 {
                        return Err(SortError::malformed(
                            line_number,
                            "number does not fit in 32 bits",
                        ));
                    }
                }
                Some(other) => {
                    return Err(SortError::malformed(
                        line_number,
                        format!("unexpected byte 0x{:02x} in number", other),
                    ));
                }
                None => {
                    return Err(SortError::malformed(line_number, "stream ended before '.'"));
                }
            }
            current = self.next_byte()?;
        }

        if digits == 0 {
            return Err(SortError::malformed(line_number, "missing number before '.'"));
        }

        let value = if negative { -value } else { value };
        i32::try_from(value)
            .map(Some)
            .map_err(|_| SortError::malformed(line_number, "number does not fit in 32 bits"))
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = {
            let buf = self.inner.fill_buf()?;
            match buf.first() {
                Some(&b) => b,
                None => return Ok(None),
            }
        };
        self.inner.consume(1);
        self.bytes_consumed += 1;
        Ok(Some(byte))
    }
}

impl<R: Read, L: Line> Iterator for LineReader<R, L> {
    type Item = Result<L>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}

pub struct LineWriter<W: Write> {
    inner: BufWriter<W>,
    digits: [u8; DIGIT_BUFFER_LEN],
    lines_written: u64,
}

impl<W: Write> LineWriter<W> {
    pub fn new(output: W, buffer_size: usize, write_bom: bool) -> Result<Self> {
        let mut inner = BufWriter::with_capacity(buffer_size, output);
        if write_bom {
            inner.write_all(&UTF8_BOM)?;
        }
        Ok(Self {
            inner,
            digits: [0; DIGIT_BUFFER_LEN],
            lines_written: 0,
        })
    }

    pub fn write_line<L: Line>(&mut self, line: &L) -> Result<()> {
        self.write_number(line.number())?;
        self.inner.write_all(&[NUMBER_SEPARATOR, PAYLOAD_SEPARATOR])?;
        self.inner.write_all(line.text_bytes())?;
        self.inner.write_all(LINE_TERMINATOR)?;
        self.lines_written += 1;
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Flushes buffered bytes and hands back the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| SortError::Io(e.into_error()))
    }

    fn write_number(&mut self, number: i32) -> Result<()> {
        if number < 0 {
            self.inner.write_all(b"-")?;
        }

        let mut n = number.unsigned_abs();
        if n == 0 {
            self.inner.write_all(b"0")?;
            return Ok(());
        }

        // digits land in reverse order, least significant first
        let mut len = 0;
        while n != 0 {
            self.digits[len] = b'0' + (n % 10) as u8;
            n /= 10;
            len += 1;
        }
        self.digits[..len].reverse();
        self.inner.write_all(&self.digits[..len])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_sort::line::{ByteLine, TextLine};
    use std::io::Cursor;

    fn read_all<L: Line>(input: &[u8], buffer: usize) -> Result<Vec<L>> {
        LineReader::<_, L>::new(Cursor::new(input.to_vec()), buffer)?.collect()
    }

    fn write_all<L: Line>(lines: &[L], bom: bool) -> Vec<u8> {
        let mut writer = LineWriter::new(Vec::new(), 8, bom).unwrap();
        for line in lines {
            writer.write_line(line).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_reads_all_lines_with_small_buffer() {
        let input = b"415. Apple\r\n30432. Something something something\r\n32. Cherry is the best\r\n";
        let lines: Vec<TextLine> = read_all(input, 8).unwrap();
        let rendered: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["415. Apple", "30432. Something something something", "32. Cherry is the best"]
        );
    }

    #[test]
    fn test_read_then_write_reproduces_input() {
        let input = "\u{feff}415. Apple\r\n-7. négatif\r\n0. \r\n2147483647. max\r\n-2147483648. min\r\n";
        let lines: Vec<ByteLine> = read_all(input.as_bytes(), 8).unwrap();
        assert_eq!(write_all(&lines, true), input.as_bytes());
    }

    #[test]
    fn test_accepts_lf_and_missing_final_terminator() {
        let lines: Vec<TextLine> = read_all(b"1. a\n2. b\r\n3. c", 64).unwrap();
        assert_eq!(
            lines,
            vec![TextLine::new(1, "a"), TextLine::new(2, "b"), TextLine::new(3, "c")]
        );
    }

    #[test]
    fn test_carriage_return_at_end_of_stream_ends_payload() {
        let input = b"2. b\r\n1. a\r";
        let mut reader = LineReader::<_, ByteLine>::new(Cursor::new(input.to_vec()), 4).unwrap();
        let lines: Vec<ByteLine> = reader.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(lines[0].text_bytes(), b"b");
        assert_eq!(lines[1].text_bytes(), b"a");
        assert_eq!(reader.bytes_consumed(), input.len() as u64);
        assert_eq!(write_all(&lines, false), b"2. b\r\n1. a\r\n");
    }

    #[test]
    fn test_lone_carriage_return_terminates_line() {
        let input = Cursor::new(b"1. a\rb\r\n".to_vec());
        let mut reader = LineReader::<_, ByteLine>::new(input, 16).unwrap();
        let first = reader.read_line().unwrap().unwrap();
        assert_eq!(first.text_bytes(), b"a");
        let err = reader.read_line().unwrap_err();
        assert!(matches!(err, SortError::MalformedLine { line_number: 2, .. }));

        let lines: Vec<ByteLine> = read_all(b"1. a\r2. b\r\n", 3).unwrap();
        assert_eq!(lines, vec![ByteLine::new(1, b"a".to_vec()), ByteLine::new(2, b"b".to_vec())]);
    }

    #[test]
    fn test_reports_bom_and_consumed_bytes() {
        let input = "\u{feff}1. a\r\n";
        let mut reader = LineReader::<_, ByteLine>::new(Cursor::new(input.as_bytes()), 64).unwrap();
        assert!(reader.had_bom());
        assert_eq!(reader.bytes_consumed(), 3);
        reader.read_line().unwrap().unwrap();
        assert_eq!(reader.bytes_consumed(), input.len() as u64);
        assert!(reader.read_line().unwrap().is_none());
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: &[&[u8]] = &[
            b"12x. text\r\n",
            b"12 text\r\n",
            b"12.text\r\n",
            b". text\r\n",
            b"12",
            b"12.",
            b"99999999999. overflow\r\n",
            b"--1. x\r\n",
        ];
        for case in cases {
            let err = read_all::<ByteLine>(case, 16).unwrap_err();
            assert!(
                matches!(err, SortError::MalformedLine { line_number: 1, .. }),
                "input {:?} gave {:?}",
                String::from_utf8_lossy(case),
                err
            );
        }
    }

    #[test]
    fn test_error_reports_failing_line_number() {
        let err = read_all::<ByteLine>(b"1. ok\r\n2. ok\r\nbroken\r\n", 16).unwrap_err();
        assert!(matches!(err, SortError::MalformedLine { line_number: 3, .. }));
    }

    #[test]
    fn test_writer_without_bom() {
        let lines = [ByteLine::new(0, b"zero".to_vec()), ByteLine::new(-10, b"x".to_vec())];
        let out = write_all(&lines, false);
        assert_eq!(out, b"0. zero\r\n-10. x\r\n");
    }
}
