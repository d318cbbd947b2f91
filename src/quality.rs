//! Quality Table and high-quality bitmap
//!
//! Six row-aligned column artifacts (`antifam`, `terminal`, `rnacode`,
//! `metat`, `riboseq`, `metap`) plus a `u8` bitmap flagging the rows that pass
//! the fixed high-quality predicate. Absent numeric values are stored as NaN
//! (floats) or `i32::MIN` (integers).

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::input::{is_null_field, open_lines};
use crate::core::{ArrayWriter, ArtifactKind, MmapArray};
use crate::error::{ArtifactError, BuildError, QueryError, Result};
use crate::DEFAULT_CHUNK_SIZE;

/// Stored value of an absent integer metric
pub const ABSENT_INT: i32 = i32::MIN;

/// Column names, in input order
pub const COLUMN_NAMES: [&str; 6] = ["antifam", "terminal", "rnacode", "metat", "riboseq", "metap"];

/// RNAcode score below which a record can be high quality
pub const HQ_RNACODE_MAX: f32 = 0.05;
/// Metatranscriptomic or Ribo-Seq count above which a record has expression support
pub const HQ_COUNT_MIN: i32 = 1;
/// Metaproteomic score at or above which a record has expression support
pub const HQ_METAP_MIN: f32 = 0.5;

/// Quality metrics of one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub antifam: bool,
    pub terminal: bool,
    pub rnacode: Option<f32>,
    pub metat: Option<i32>,
    pub riboseq: Option<i32>,
    pub metap: Option<f32>,
}
impl QualityMetrics {
    /// Parses one tab-separated line of the quality file
    pub fn parse(line: &str, line_number: u64) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < COLUMN_NAMES.len() {
            return Err(BuildError::MalformedRecord {
                line: line_number,
                reason: format!(
                    "expected {} columns, found {}",
                    COLUMN_NAMES.len(),
                    fields.len()
                ),
            }
            .into());
        }
        Ok(Self {
            antifam: fields[0].trim() == "T",
            terminal: fields[1].trim() == "T",
            rnacode: parse_numeric(fields[2], COLUMN_NAMES[2], line_number)?,
            metat: parse_numeric(fields[3], COLUMN_NAMES[3], line_number)?,
            riboseq: parse_numeric(fields[4], COLUMN_NAMES[4], line_number)?,
            metap: parse_numeric(fields[5], COLUMN_NAMES[5], line_number)?,
        })
    }

    /// The fixed high-quality predicate
    ///
    /// Rows missing any numeric metric are never high quality.
    #[must_use]
    pub fn is_high_quality(&self) -> bool {
        let (Some(rnacode), Some(metat), Some(riboseq), Some(metap)) =
            (self.rnacode, self.metat, self.riboseq, self.metap)
        else {
            return false;
        };
        self.antifam
            && self.terminal
            && rnacode < HQ_RNACODE_MAX
            && (metat > HQ_COUNT_MIN || riboseq > HQ_COUNT_MIN || metap >= HQ_METAP_MIN)
    }
}

fn parse_numeric<T: std::str::FromStr>(field: &str, column: &str, line: u64) -> Result<Option<T>> {
    if is_null_field(field) {
        return Ok(None);
    }
    field.trim().parse().map(Some).map_err(|_| {
        BuildError::MalformedRecord {
            line,
            reason: format!("invalid {column} value {field:?}"),
        }
        .into()
    })
}

fn encode_f32(value: Option<f32>) -> f32 {
    value.unwrap_or(f32::NAN)
}

fn decode_f32(value: f32) -> Option<f32> {
    (!value.is_nan()).then_some(value)
}

fn encode_i32(value: Option<i32>) -> i32 {
    value.unwrap_or(ABSENT_INT)
}

fn decode_i32(value: i32) -> Option<i32> {
    (value != ABSENT_INT).then_some(value)
}

/// Paths of the six column artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityPaths {
    pub antifam: PathBuf,
    pub terminal: PathBuf,
    pub rnacode: PathBuf,
    pub metat: PathBuf,
    pub riboseq: PathBuf,
    pub metap: PathBuf,
}
impl QualityPaths {
    /// `{prefix}.{column}` for every column
    #[must_use]
    pub fn with_prefix(prefix: &Path) -> Self {
        let column = |name: &str| {
            let mut path = prefix.as_os_str().to_owned();
            path.push(".");
            path.push(name);
            PathBuf::from(path)
        };
        Self {
            antifam: column("antifam"),
            terminal: column("terminal"),
            rnacode: column("rnacode"),
            metat: column("metat"),
            riboseq: column("riboseq"),
            metap: column("metap"),
        }
    }

    /// True if every column artifact exists
    #[must_use]
    pub fn exist(&self) -> bool {
        self.missing().is_empty()
    }

    /// Column files in [`COLUMN_NAMES`] order
    #[must_use]
    pub fn all(&self) -> [&Path; 6] {
        [
            self.antifam.as_path(),
            self.terminal.as_path(),
            self.rnacode.as_path(),
            self.metat.as_path(),
            self.riboseq.as_path(),
            self.metap.as_path(),
        ]
    }

    /// Column files that do not exist
    #[must_use]
    pub fn missing(&self) -> Vec<&Path> {
        self.all().into_iter().filter(|path| !path.exists()).collect()
    }
}

/// Summary of a finished quality table build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySummary {
    pub rows: u64,
    pub high_quality: u64,
}

/// Streams quality rows into the column artifacts and the bitmap
pub struct QualityTableWriter {
    antifam: ArrayWriter<u8>,
    terminal: ArrayWriter<u8>,
    rnacode: ArrayWriter<f32>,
    metat: ArrayWriter<i32>,
    riboseq: ArrayWriter<i32>,
    metap: ArrayWriter<f32>,
    bitmap: ArrayWriter<u8>,
    high_quality: u64,
}
impl QualityTableWriter {
    pub fn create(paths: &QualityPaths, bitmap_path: &Path) -> Result<Self> {
        Ok(Self {
            antifam: ArrayWriter::create(&paths.antifam, ArtifactKind::QualityColumn)?,
            terminal: ArrayWriter::create(&paths.terminal, ArtifactKind::QualityColumn)?,
            rnacode: ArrayWriter::create(&paths.rnacode, ArtifactKind::QualityColumn)?,
            metat: ArrayWriter::create(&paths.metat, ArtifactKind::QualityColumn)?,
            riboseq: ArrayWriter::create(&paths.riboseq, ArtifactKind::QualityColumn)?,
            metap: ArrayWriter::create(&paths.metap, ArtifactKind::QualityColumn)?,
            bitmap: ArrayWriter::create(bitmap_path, ArtifactKind::Bitmap)?,
            high_quality: 0,
        })
    }

    pub fn push(&mut self, row: &QualityMetrics) -> Result<()> {
        self.antifam.push(u8::from(row.antifam))?;
        self.terminal.push(u8::from(row.terminal))?;
        self.rnacode.push(encode_f32(row.rnacode))?;
        self.metat.push(encode_i32(row.metat))?;
        self.riboseq.push(encode_i32(row.riboseq))?;
        self.metap.push(encode_f32(row.metap))?;

        let hq = row.is_high_quality();
        self.high_quality += u64::from(hq);
        self.bitmap.push(u8::from(hq))
    }

    #[must_use]
    pub fn rows(&self) -> u64 {
        self.bitmap.len()
    }

    /// Publishes the columns, then the bitmap
    pub fn finish(self) -> Result<QualitySummary> {
        let rows = self.bitmap.len();
        self.antifam.finish()?;
        self.terminal.finish()?;
        self.rnacode.finish()?;
        self.metat.finish()?;
        self.riboseq.finish()?;
        self.metap.finish()?;
        self.bitmap.finish()?;
        Ok(QualitySummary {
            rows,
            high_quality: self.high_quality,
        })
    }
}

/// Builds the quality table and bitmap from a (possibly compressed) TSV file
pub fn build_from_path<P: AsRef<Path>>(
    input: P,
    has_header: bool,
    paths: &QualityPaths,
    bitmap_path: &Path,
) -> Result<QualitySummary> {
    let mut lines = open_lines(input.as_ref(), DEFAULT_CHUNK_SIZE)?;
    let mut writer = QualityTableWriter::create(paths, bitmap_path)?;
    if has_header {
        lines.next_line()?;
    }
    while let Some((line_number, line)) = lines.next_line()? {
        let row = QualityMetrics::parse(line, line_number)?;
        writer.push(&row)?;
        if writer.rows() % 1_000_000 == 0 {
            debug!("Processed {}m", writer.rows() / 1_000_000);
        }
    }
    let summary = writer.finish()?;
    info!(
        "Wrote quality table with {} rows ({} high quality) to {}",
        summary.rows,
        summary.high_quality,
        bitmap_path.display()
    );
    Ok(summary)
}

/// Optional thresholds over the quality columns, combined with AND
///
/// `antifam` and `terminal` only constrain when `Some(true)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QualityPredicate {
    pub antifam: Option<bool>,
    pub terminal: Option<bool>,
    pub rnacode_max: Option<f32>,
    pub metat_min: Option<i32>,
    pub metap_min: Option<f32>,
    pub riboseq_min: Option<f32>,
}
impl QualityPredicate {
    /// True if the predicate constrains any row
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.antifam == Some(true)
            || self.terminal == Some(true)
            || self.rnacode_max.is_some()
            || self.metat_min.is_some()
            || self.metap_min.is_some()
            || self.riboseq_min.is_some()
    }

    /// Evaluates the predicate over one row; absent values never satisfy a threshold
    #[must_use]
    pub fn matches(&self, row: &QualityMetrics) -> bool {
        (self.antifam != Some(true) || row.antifam)
            && (self.terminal != Some(true) || row.terminal)
            && self
                .rnacode_max
                .is_none_or(|t| row.rnacode.is_some_and(|v| v <= t))
            && self
                .metat_min
                .is_none_or(|t| row.metat.is_some_and(|v| v >= t))
            && self
                .metap_min
                .is_none_or(|t| row.metap.is_some_and(|v| v >= t))
            && self
                .riboseq_min
                .is_none_or(|t| row.riboseq.is_some_and(|v| f64::from(v) >= f64::from(t)))
    }
}

/// Read side of the quality table
#[derive(Clone)]
pub struct QualityTable {
    antifam: MmapArray<u8>,
    terminal: MmapArray<u8>,
    rnacode: MmapArray<f32>,
    metat: MmapArray<i32>,
    riboseq: MmapArray<i32>,
    metap: MmapArray<f32>,
}
impl QualityTable {
    /// Maps all six columns and checks they share one length
    pub fn open(paths: &QualityPaths) -> Result<Self> {
        let table = Self {
            antifam: MmapArray::open(&paths.antifam, ArtifactKind::QualityColumn)?,
            terminal: MmapArray::open(&paths.terminal, ArtifactKind::QualityColumn)?,
            rnacode: MmapArray::open(&paths.rnacode, ArtifactKind::QualityColumn)?,
            metat: MmapArray::open(&paths.metat, ArtifactKind::QualityColumn)?,
            riboseq: MmapArray::open(&paths.riboseq, ArtifactKind::QualityColumn)?,
            metap: MmapArray::open(&paths.metap, ArtifactKind::QualityColumn)?,
        };
        let rows = table.antifam.len() as u64;
        for (name, len) in [
            ("quality.terminal", table.terminal.len()),
            ("quality.rnacode", table.rnacode.len()),
            ("quality.metat", table.metat.len()),
            ("quality.riboseq", table.riboseq.len()),
            ("quality.metap", table.metap.len()),
        ] {
            if len as u64 != rows {
                return Err(ArtifactError::LengthMismatch {
                    artifact: name,
                    expected: rows,
                    found: len as u64,
                }
                .into());
            }
        }
        Ok(table)
    }

    #[must_use]
    pub fn num_rows(&self) -> u64 {
        self.antifam.len() as u64
    }

    fn row_at(&self, idx: usize) -> QualityMetrics {
        QualityMetrics {
            antifam: self.antifam.as_slice()[idx] != 0,
            terminal: self.terminal.as_slice()[idx] != 0,
            rnacode: decode_f32(self.rnacode.as_slice()[idx]),
            metat: decode_i32(self.metat.as_slice()[idx]),
            riboseq: decode_i32(self.riboseq.as_slice()[idx]),
            metap: decode_f32(self.metap.as_slice()[idx]),
        }
    }

    /// The metrics of one record
    pub fn row(&self, ordinal: u64) -> Result<QualityMetrics> {
        if ordinal >= self.num_rows() {
            return Err(QueryError::InvalidOrdinal {
                requested: ordinal,
                max: self.num_rows(),
            }
            .into());
        }
        Ok(self.row_at(ordinal as usize))
    }

    /// Evaluates `predicate` for one record
    pub fn evaluate(&self, predicate: &QualityPredicate, ordinal: u64) -> Result<bool> {
        self.row(ordinal).map(|row| predicate.matches(&row))
    }

    /// Clears every position of `mask` whose row fails `predicate`
    pub fn and_mask(&self, predicate: &QualityPredicate, mask: &mut [bool]) {
        mask.par_iter_mut().enumerate().for_each(|(idx, m)| {
            if *m {
                *m = predicate.matches(&self.row_at(idx));
            }
        });
    }

    #[must_use]
    pub fn mask(&self, predicate: &QualityPredicate) -> Vec<bool> {
        let mut mask = vec![true; self.num_rows() as usize];
        self.and_mask(predicate, &mut mask);
        mask
    }
}

/// Precomputed high-quality flags, one byte per record
#[derive(Clone)]
pub struct HighQualityBitmap {
    bits: MmapArray<u8>,
}
impl HighQualityBitmap {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            bits: MmapArray::open(path, ArtifactKind::Bitmap)?,
        })
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.bits.len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// True if the record is high quality; out-of-range ordinals are not
    #[must_use]
    pub fn contains(&self, ordinal: u64) -> bool {
        self.bits.get(ordinal as usize).is_some_and(|b| b != 0)
    }

    /// Number of high-quality records
    #[must_use]
    pub fn count(&self) -> u64 {
        self.bits.as_slice().par_iter().filter(|&&b| b != 0).count() as u64
    }

    /// Clears every position of `mask` that is not high quality
    pub fn and_mask(&self, mask: &mut [bool]) {
        mask.par_iter_mut()
            .zip(self.bits.as_slice().par_iter())
            .for_each(|(m, &b)| *m &= b != 0);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::error::{Error, ErrorKind};

    const QUALITY: &str = "T\tT\t0.01\t2\t0\t0.0\n\
                           T\tF\t0.2\t5\t5\t1.0\n\
                           T\tT\t0.05\t0\t0\t0.6\n\
                           T\tT\tNA\t3\t3\t1.0\n\
                           F\tT\t0.001\t0\t2\tNA\n\
                           T\tT\t0.04\t1\t1\t0.5\n";

    fn build(dir: &Path, text: &str, has_header: bool) -> Result<(QualitySummary, QualityTable, HighQualityBitmap)> {
        let input = dir.join("quality.tsv");
        fs::write(&input, text)?;
        let paths = QualityPaths::with_prefix(&dir.join("GMSC10.90AA.quality"));
        let bitmap = dir.join("GMSC10.90AA.high_quality.bitmap");
        let summary = build_from_path(&input, has_header, &paths, &bitmap)?;
        Ok((summary, QualityTable::open(&paths)?, HighQualityBitmap::open(&bitmap)?))
    }

    #[test]
    fn test_parse_row() -> Result<()> {
        let row = QualityMetrics::parse("T\tF\tNA\t3\t\t0.25", 1)?;
        assert!(row.antifam);
        assert!(!row.terminal);
        assert_eq!(row.rnacode, None);
        assert_eq!(row.metat, Some(3));
        assert_eq!(row.riboseq, None);
        assert_eq!(row.metap, Some(0.25));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            QualityMetrics::parse("T\tT\t0.1", 4),
            Err(Error::BuildError(BuildError::MalformedRecord { line: 4, .. }))
        ));
        assert!(matches!(
            QualityMetrics::parse("T\tT\tabc\t1\t1\t1", 2),
            Err(Error::BuildError(BuildError::MalformedRecord { line: 2, .. }))
        ));
    }

    #[test]
    fn test_high_quality_predicate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (summary, _, bitmap) = build(dir.path(), QUALITY, false)?;
        assert_eq!(summary.rows, 6);
        // row 0: metat > 1; row 2: rnacode not < 0.05; row 3: null rnacode;
        // row 4: antifam fails and null metap; row 5: metap >= 0.5
        let expected = [true, false, false, false, false, true];
        for (ordinal, &hq) in expected.iter().enumerate() {
            assert_eq!(bitmap.contains(ordinal as u64), hq, "row {ordinal}");
        }
        assert_eq!(summary.high_quality, 2);
        assert_eq!(bitmap.count(), 2);
        assert!(!bitmap.contains(100));
        Ok(())
    }

    #[test]
    fn test_rows_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, table, _) = build(dir.path(), QUALITY, false)?;
        assert_eq!(table.num_rows(), 6);
        let row = table.row(3)?;
        assert_eq!(row.rnacode, None);
        assert_eq!(row.metat, Some(3));
        let row = table.row(4)?;
        assert!(!row.antifam);
        assert_eq!(row.metap, None);
        assert_eq!(table.row(6).unwrap_err().kind(), ErrorKind::InvalidOrdinal);
        Ok(())
    }

    #[test]
    fn test_header_line_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let text = format!("antifam\tterminal\trnacode\tmetat\triboseq\tmetap\n{QUALITY}");
        let (summary, table, _) = build(dir.path(), &text, true)?;
        assert_eq!(summary.rows, 6);
        assert_eq!(table.row(0)?.rnacode, Some(0.01));
        Ok(())
    }

    #[test]
    fn test_rnacode_threshold() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let text = "T\tT\t0.01\t0\t0\t0\nT\tT\t0.2\t0\t0\t0\nT\tT\t0.05\t0\t0\t0\n";
        let (_, table, _) = build(dir.path(), text, false)?;
        let predicate = QualityPredicate {
            rnacode_max: Some(0.05),
            ..Default::default()
        };
        assert!(predicate.is_active());
        assert_eq!(table.mask(&predicate), vec![true, false, true]);
        assert!(table.evaluate(&predicate, 2)?);
        Ok(())
    }

    #[test]
    fn test_thresholds_and_absent_values() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, table, _) = build(dir.path(), QUALITY, false)?;

        let predicate = QualityPredicate {
            metat_min: Some(2),
            ..Default::default()
        };
        assert_eq!(table.mask(&predicate), vec![true, true, false, true, false, false]);

        let predicate = QualityPredicate {
            metap_min: Some(0.5),
            riboseq_min: Some(1.0),
            ..Default::default()
        };
        assert_eq!(table.mask(&predicate), vec![false, true, false, true, false, true]);

        // Absent rnacode never satisfies a threshold
        let predicate = QualityPredicate {
            rnacode_max: Some(10.0),
            ..Default::default()
        };
        assert!(!table.evaluate(&predicate, 3)?);
        Ok(())
    }

    #[test]
    fn test_boolean_flags_only_constrain_when_true() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, table, _) = build(dir.path(), QUALITY, false)?;
        let predicate = QualityPredicate {
            antifam: Some(false),
            terminal: Some(false),
            ..Default::default()
        };
        assert!(!predicate.is_active());
        assert!(table.mask(&predicate).iter().all(|&m| m));

        let predicate = QualityPredicate {
            antifam: Some(true),
            terminal: Some(true),
            ..Default::default()
        };
        assert_eq!(table.mask(&predicate), vec![true, false, true, true, false, true]);
        Ok(())
    }

    #[test]
    fn test_bitmap_and_mask() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let (_, _, bitmap) = build(dir.path(), QUALITY, false)?;
        let mut mask = vec![true, true, true, true, true, false];
        bitmap.and_mask(&mut mask);
        assert_eq!(mask, vec![true, false, false, false, false, false]);
        Ok(())
    }

    #[test]
    fn test_open_rejects_column_length_mismatch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("q.tsv");
        fs::write(&input, QUALITY)?;
        let paths = QualityPaths::with_prefix(&dir.path().join("q"));
        build_from_path(&input, false, &paths, &dir.path().join("q.bitmap"))?;
        crate::core::write_array(&paths.metat, ArtifactKind::QualityColumn, &[1i32])?;
        let err = QualityTable::open(&paths).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptArtifact);
        Ok(())
    }
}
