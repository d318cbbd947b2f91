use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use niffler::send::compression::Format;

use crate::error::Result;

/// Number of bytes niffler needs to sniff a compression format
const SNIFF_LEN: u64 = 5;

pub type BoxedRead = Box<dyn Read + Send>;
pub type BoxedBufRead = Box<dyn BufRead + Send>;

/// Opens a possibly compressed input, returning the decompressed stream and
/// the detected format
///
/// Files shorter than the sniff window cannot be compressed streams and are
/// read as-is.
pub fn open_input<P: AsRef<Path>>(path: P) -> Result<(BoxedRead, Format)> {
    let path = path.as_ref();
    if std::fs::metadata(path)?.len() < SNIFF_LEN {
        return Ok((Box::new(File::open(path)?), Format::No));
    }
    let (reader, format) = niffler::send::from_path(path)?;
    Ok((reader, format))
}

/// Opens a possibly compressed input with line buffering
pub fn open_lines<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Lines<BoxedBufRead>> {
    let (reader, _) = open_input(path)?;
    Ok(Lines::new(Box::new(BufReader::with_capacity(capacity, reader))))
}

/// Streams lines through a single reusable buffer, tracking the line number
pub struct Lines<R: BufRead> {
    reader: R,
    buf: String,
    line: u64,
}
impl<R: BufRead> Lines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: String::new(),
            line: 0,
        }
    }

    /// Returns the 1-based number and the text (without its terminator) of the
    /// next line, or `None` at end of input
    pub fn next_line(&mut self) -> Result<Option<(u64, &str)>> {
        self.buf.clear();
        if self.reader.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        Ok(Some((self.line, self.buf.trim_end_matches(['\n', '\r']))))
    }

    /// 1-based number of the line last returned
    #[must_use]
    pub fn line_number(&self) -> u64 {
        self.line
    }
}

/// Returns true if a tab-separated field holds no value
#[must_use]
pub fn is_null_field(field: &str) -> bool {
    matches!(field.trim(), "" | "NA")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_lines_strip_terminators() -> Result<()> {
        let mut lines = Lines::new(Cursor::new(b"a\tb\r\nc\n\nd".to_vec()));
        assert_eq!(lines.next_line()?, Some((1, "a\tb")));
        assert_eq!(lines.next_line()?, Some((2, "c")));
        assert_eq!(lines.next_line()?, Some((3, "")));
        assert_eq!(lines.next_line()?, Some((4, "d")));
        assert_eq!(lines.line_number(), 4);
        assert_eq!(lines.next_line()?, None);
        Ok(())
    }

    #[test]
    fn test_open_plain_and_tiny_inputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tiny = dir.path().join("tiny.tsv");
        std::fs::write(&tiny, b"x\n")?;
        let (mut reader, format) = open_input(&tiny)?;
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        assert_eq!(text, "x\n");
        assert_eq!(format, Format::No);

        let plain = dir.path().join("plain.tsv");
        std::fs::write(&plain, b"first\nsecond\n")?;
        let mut lines = open_lines(&plain, 16)?;
        assert_eq!(lines.next_line()?, Some((1, "first")));
        assert_eq!(lines.next_line()?, Some((2, "second")));
        assert_eq!(lines.next_line()?, None);
        Ok(())
    }

    #[test]
    fn test_open_gzip_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.tsv.gz");
        {
            let mut writer = niffler::to_path(&path, niffler::Format::Gzip, niffler::Level::One)?;
            writer.write_all(b"compressed\nlines\n")?;
        }
        let (_, format) = open_input(&path)?;
        assert_eq!(format, Format::Gzip);
        let mut lines = open_lines(&path, 1024)?;
        assert_eq!(lines.next_line()?, Some((1, "compressed")));
        assert_eq!(lines.next_line()?, Some((2, "lines")));
        Ok(())
    }

    #[test]
    fn test_null_fields() {
        assert!(is_null_field(""));
        assert!(is_null_field("NA"));
        assert!(is_null_field(" "));
        assert!(!is_null_field("0"));
        assert!(!is_null_field("Unknown"));
    }
}
