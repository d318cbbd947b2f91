//! Categorical Attribute Index
//!
//! A categorical column (habitat, taxonomy) is stored as a small sorted label
//! dictionary plus one `u32` code per record. Predicates are evaluated once
//! against the dictionary and the resulting code set is broadcast over the
//! code array.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::core::input::{is_null_field, open_lines};
use crate::core::{read_dictionary, write_array, write_dictionary, ArrayWriter, ArtifactKind, MmapArray};
use crate::error::{ArtifactError, BuildError, QueryError, Result};
use crate::{DEFAULT_CHUNK_SIZE, UNKNOWN_LABEL};

/// Default ZSTD level for dictionary artifacts
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// The categorical attributes indexed per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Habitat,
    Taxonomy,
}
impl Attribute {
    /// Name used in artifact file names and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Habitat => "habitat",
            Self::Taxonomy => "taxonomy",
        }
    }
}

/// Extracts the label of one annotation line, normalizing nulls
fn label_of(line: &str, column: usize) -> &str {
    match line.split('\t').nth(column) {
        Some(field) if !is_null_field(field) => field,
        _ => UNKNOWN_LABEL,
    }
}

/// Summary of a finished attribute index build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSummary {
    pub records: u64,
    pub labels: usize,
}

/// Two-pass builder for one categorical column of an annotation file
#[derive(Debug, Clone, Copy)]
pub struct AttributeIndexBuilder {
    column: usize,
    capacity: usize,
    compression_level: i32,
}
impl AttributeIndexBuilder {
    #[must_use]
    pub fn new(column: usize) -> Self {
        Self {
            column,
            capacity: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Sets the read buffer size used for both passes
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// First pass: the sorted set of distinct labels and the record count
    fn collect_labels(&self, input: &Path) -> Result<(Vec<String>, u64)> {
        let mut distinct = BTreeSet::new();
        let mut lines = open_lines(input, self.capacity)?;
        while let Some((line_number, line)) = lines.next_line()? {
            let label = label_of(line, self.column);
            if !distinct.contains(label) {
                distinct.insert(label.to_string());
            }
            if line_number % 1_000_000 == 0 {
                debug!("Processed {}m", line_number / 1_000_000);
            }
        }
        Ok((distinct.into_iter().collect(), lines.line_number()))
    }

    /// Builds the dictionary and code artifacts of column `column` of `input`
    ///
    /// The dictionary is written first; the code array is streamed in the
    /// second pass and published last.
    pub fn build_from_path<P: AsRef<Path>>(
        &self,
        input: P,
        dict_path: &Path,
        codes_path: &Path,
    ) -> Result<AttributeSummary> {
        let input = input.as_ref();
        let (labels, records) = self.collect_labels(input)?;
        info!(
            "Finished reading in label set of column {} ({} elements)",
            self.column,
            labels.len()
        );
        if labels.len() > u32::MAX as usize {
            return Err(BuildError::MalformedRecord {
                line: records,
                reason: format!("{} distinct labels do not fit a u32 code", labels.len()),
            }
            .into());
        }
        write_dictionary(dict_path, &labels, self.compression_level)?;

        let mut codes = ArrayWriter::<u32>::create(codes_path, ArtifactKind::Codes)?;
        let mut lines = open_lines(input, self.capacity)?;
        while let Some((line_number, line)) = lines.next_line()? {
            let label = label_of(line, self.column);
            let Ok(code) = labels.binary_search_by(|probe| probe.as_str().cmp(label)) else {
                return Err(BuildError::InputChanged(format!(
                    "label {label:?} on line {line_number} was not seen in the first pass"
                ))
                .into());
            };
            codes.push(code as u32)?;
        }
        if codes.len() != records {
            return Err(BuildError::InputChanged(format!(
                "first pass read {records} lines, second pass read {}",
                codes.len()
            ))
            .into());
        }
        let path = codes.finish()?;
        info!("Wrote {} codes to {}", records, path.display());

        Ok(AttributeSummary {
            records,
            labels: labels.len(),
        })
    }
}

/// Builds an attribute index from labels already held in memory
///
/// `None` labels normalize to the sentinel label.
pub fn build_from_labels<S: AsRef<str>>(
    labels: &[Option<S>],
    dict_path: &Path,
    codes_path: &Path,
) -> Result<AttributeSummary> {
    let normalized: Vec<&str> = labels
        .iter()
        .map(|label| match label {
            Some(label) if !is_null_field(label.as_ref()) => label.as_ref(),
            _ => UNKNOWN_LABEL,
        })
        .collect();
    let dictionary: Vec<String> = normalized
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();
    let codes: Vec<u32> = normalized
        .iter()
        .map(|label| {
            dictionary
                .binary_search_by(|probe| probe.as_str().cmp(label))
                .unwrap_or_default() as u32
        })
        .collect();
    write_dictionary(dict_path, &dictionary, DEFAULT_COMPRESSION_LEVEL)?;
    write_array(codes_path, ArtifactKind::Codes, &codes)?;
    Ok(AttributeSummary {
        records: codes.len() as u64,
        labels: dictionary.len(),
    })
}

/// A set of dictionary codes, stored as one flag per label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSet {
    member: Vec<bool>,
}
impl CodeSet {
    #[must_use]
    pub fn contains(&self, code: u32) -> bool {
        self.member.get(code as usize).copied().unwrap_or(false)
    }

    /// Number of codes in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.member.iter().filter(|&&m| m).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.member.iter().any(|&m| m)
    }
}

/// Read side of one categorical attribute
#[derive(Clone)]
pub struct AttributeIndex {
    labels: Vec<String>,
    codes: MmapArray<u32>,
    dict_path: PathBuf,
}
impl AttributeIndex {
    /// Loads the dictionary and maps the code array
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(dict_path: P, codes_path: Q) -> Result<Self> {
        let labels = read_dictionary(&dict_path)?;
        let codes = MmapArray::<u32>::open(codes_path, ArtifactKind::Codes)?;
        if labels.is_empty() && !codes.is_empty() {
            return Err(ArtifactError::CodeOutOfRange { code: 0, labels: 0 }.into());
        }
        Ok(Self {
            labels,
            codes,
            dict_path: dict_path.as_ref().to_path_buf(),
        })
    }

    /// Number of records (length of the code array)
    #[must_use]
    pub fn num_records(&self) -> u64 {
        self.codes.len() as u64
    }

    /// The sorted label dictionary
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn codes(&self) -> &[u32] {
        self.codes.as_slice()
    }

    #[must_use]
    pub fn dict_path(&self) -> &Path {
        &self.dict_path
    }

    /// Resolves the label of a record
    pub fn resolve(&self, ordinal: u64) -> Result<&str> {
        let Some(code) = self.codes.get(ordinal as usize) else {
            return Err(QueryError::InvalidOrdinal {
                requested: ordinal,
                max: self.num_records(),
            }
            .into());
        };
        self.labels
            .get(code as usize)
            .map(String::as_str)
            .ok_or_else(|| {
                ArtifactError::CodeOutOfRange {
                    code,
                    labels: self.labels.len(),
                }
                .into()
            })
    }

    /// Evaluates `predicate` once per dictionary label
    pub fn match_codes<F: Fn(&str) -> bool>(&self, predicate: F) -> CodeSet {
        CodeSet {
            member: self.labels.iter().map(|label| predicate(label)).collect(),
        }
    }

    /// Codes of the labels containing every one of `substrings`
    pub fn match_substrings<S: AsRef<str>>(&self, substrings: &[S]) -> CodeSet {
        self.match_codes(|label| substrings.iter().all(|s| label.contains(s.as_ref())))
    }

    /// Clears every position of `mask` whose code is not in `set`
    ///
    /// `mask` must have one entry per record.
    pub fn and_mask(&self, set: &CodeSet, mask: &mut [bool]) {
        mask.par_iter_mut()
            .zip(self.codes().par_iter())
            .for_each(|(m, &code)| *m &= set.contains(code));
    }

    /// A fresh per-record mask of the records whose code is in `set`
    #[must_use]
    pub fn mask(&self, set: &CodeSet) -> Vec<bool> {
        self.codes()
            .par_iter()
            .map(|&code| set.contains(code))
            .collect()
    }
}
