//! Cluster Index
//!
//! A CSR pair mapping each coarse-tier ordinal `k` to the fine-tier ordinals
//! of its cluster: `members[offsets[k]..offsets[k + 1]]`.
//!
//! The builder consumes `(fine, coarse)` pairs sorted by coarse ordinal with
//! no gaps. Any inversion or gap aborts the build, since a partial index
//! would misattribute cluster membership.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::core::input::{open_lines, BoxedBufRead, Lines};
use crate::core::{ArrayWriter, ArtifactKind, MmapArray};
use crate::error::{ArtifactError, BuildError, QueryError, Result};
use crate::id::ordinal_of;
use crate::DEFAULT_CHUNK_SIZE;

/// Parses one `fine_id coarse_id` line of the cluster mapping
fn parse_pair(line: &str, line_number: u64) -> Result<(u64, u64)> {
    let mut tokens = line.split_whitespace();
    let (Some(fine), Some(coarse), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return Err(BuildError::MalformedRecord {
            line: line_number,
            reason: "expected two whitespace-separated identifiers".to_string(),
        }
        .into());
    };
    let parse = |id: &str| {
        ordinal_of(id).ok_or_else(|| BuildError::MalformedRecord {
            line: line_number,
            reason: format!("cannot parse an ordinal from {id:?}"),
        })
    };
    Ok((parse(fine)?, parse(coarse)?))
}

/// Tracks the previous coarse ordinal and rejects inversions and gaps
#[derive(Debug, Clone, Copy)]
struct SortCheck {
    prev: Option<u64>,
}
impl SortCheck {
    fn new() -> Self {
        Self { prev: None }
    }

    /// Returns true if `coarse` starts a new cluster
    fn check(&mut self, line: u64, coarse: u64) -> Result<bool> {
        let expected = self.prev.map_or(0, |prev| prev + 1);
        match self.prev {
            Some(prev) if coarse < prev => Err(BuildError::UnsortedInput {
                line,
                previous: prev,
                found: coarse,
            }
            .into()),
            Some(prev) if coarse == prev => Ok(false),
            _ if coarse > expected => Err(BuildError::SkippedOrdinal {
                line,
                previous: self.prev.map_or(-1, |prev| prev as i64),
                found: coarse,
            }
            .into()),
            _ => {
                self.prev = Some(coarse);
                Ok(true)
            }
        }
    }
}

/// Sizing information gathered by the validation pre-pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterSizes {
    /// Number of `(fine, coarse)` rows
    pub total_rows: u64,
    /// Largest coarse ordinal seen, `None` for an empty mapping
    pub max_coarse: Option<u64>,
}
impl ClusterSizes {
    /// Number of coarse clusters (`M`)
    #[must_use]
    pub fn num_clusters(&self) -> u64 {
        self.max_coarse.map_or(0, |max| max + 1)
    }
}

/// Validation pre-pass over a cluster mapping
///
/// Rejects unsorted or gapped input before anything is written.
pub fn scan_sizes<R: std::io::BufRead>(lines: &mut Lines<R>) -> Result<ClusterSizes> {
    let mut check = SortCheck::new();
    let mut sizes = ClusterSizes {
        total_rows: 0,
        max_coarse: None,
    };
    while let Some((line_number, line)) = lines.next_line()? {
        let (_, coarse) = parse_pair(line, line_number)?;
        check.check(line_number, coarse)?;
        sizes.total_rows += 1;
        sizes.max_coarse = sizes.max_coarse.max(Some(coarse));
        if line_number % 1_000_000 == 0 {
            debug!("Processed {}m", line_number / 1_000_000);
        }
    }
    Ok(sizes)
}

/// Streams `(fine, coarse)` pairs into the CSR artifacts
pub struct ClusterIndexBuilder {
    offsets: ArrayWriter<u64>,
    members: ArrayWriter<u64>,
    check: SortCheck,
}
impl ClusterIndexBuilder {
    pub fn create(offsets_path: &Path, members_path: &Path) -> Result<Self> {
        Ok(Self {
            offsets: ArrayWriter::create(offsets_path, ArtifactKind::ClusterOffsets)?,
            members: ArrayWriter::create(members_path, ArtifactKind::ClusterMembers)?,
            check: SortCheck::new(),
        })
    }

    /// Appends one row
    ///
    /// # Errors
    ///
    /// Fails with `UnsortedInput` if `coarse` decreases and `SkippedOrdinal`
    /// if it jumps by more than one.
    pub fn push(&mut self, fine: u64, coarse: u64) -> Result<()> {
        let row = self.members.len();
        if self.check.check(row + 1, coarse)? {
            self.offsets.push(row)?;
        }
        self.members.push(fine)
    }

    /// Number of rows pushed so far
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.members.len()
    }

    /// Number of clusters opened so far
    #[must_use]
    pub fn clusters(&self) -> u64 {
        self.offsets.len()
    }

    /// Appends the sentinel offset and publishes both artifacts
    pub fn finish(mut self) -> Result<ClusterSizes> {
        let sizes = ClusterSizes {
            total_rows: self.members.len(),
            max_coarse: self.check.prev,
        };
        self.offsets.push(sizes.total_rows)?;
        self.members.finish()?;
        self.offsets.finish()?;
        Ok(sizes)
    }
}

/// Builds the cluster index from in-memory pairs
pub fn build_cluster_index<I>(pairs: I, offsets_path: &Path, members_path: &Path) -> Result<ClusterSizes>
where
    I: IntoIterator<Item = (u64, u64)>,
{
    let mut builder = ClusterIndexBuilder::create(offsets_path, members_path)?;
    for (fine, coarse) in pairs {
        builder.push(fine, coarse)?;
    }
    builder.finish()
}

/// Runs the sizing pre-pass and then the build over a mapping file
///
/// The second pass is checked against the sizes of the first.
pub fn build_from_path<P: AsRef<Path>>(
    input: P,
    offsets_path: &Path,
    members_path: &Path,
) -> Result<ClusterSizes> {
    let input = input.as_ref();
    let expected = scan_sizes(&mut open_lines(input, DEFAULT_CHUNK_SIZE)?)?;
    info!(
        "Cluster mapping has {} rows over {} clusters",
        expected.total_rows,
        expected.num_clusters()
    );

    let mut lines: Lines<BoxedBufRead> = open_lines(input, DEFAULT_CHUNK_SIZE)?;
    let mut builder = ClusterIndexBuilder::create(offsets_path, members_path)?;
    while let Some((line_number, line)) = lines.next_line()? {
        let (fine, coarse) = parse_pair(line, line_number)?;
        builder.push(fine, coarse)?;
    }
    let sizes = builder.finish()?;
    if sizes != expected {
        return Err(BuildError::InputChanged(format!(
            "sizing pass found {expected:?}, build pass found {sizes:?}"
        ))
        .into());
    }
    info!(
        "Wrote cluster index to {} and {}",
        offsets_path.display(),
        members_path.display()
    );
    Ok(sizes)
}

/// Read side of the cluster index
#[derive(Clone)]
pub struct ClusterIndex {
    offsets: MmapArray<u64>,
    members: MmapArray<u64>,
    path: PathBuf,
}
impl ClusterIndex {
    /// Maps both CSR arrays and checks that they agree
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(offsets: P, members: Q) -> Result<Self> {
        let path = offsets.as_ref().to_path_buf();
        let offsets = MmapArray::<u64>::open(offsets, ArtifactKind::ClusterOffsets)?;
        let members = MmapArray::<u64>::open(members, ArtifactKind::ClusterMembers)?;

        let slice = offsets.as_slice();
        let (Some(&first), Some(&last)) = (slice.first(), slice.last()) else {
            return Err(ArtifactError::OffsetMismatch {
                path,
                reason: "offset array is empty".to_string(),
            }
            .into());
        };
        if first != 0 {
            return Err(ArtifactError::OffsetMismatch {
                path,
                reason: format!("first offset is {first}, expected 0"),
            }
            .into());
        }
        if last != members.len() as u64 {
            return Err(ArtifactError::LengthMismatch {
                artifact: "cluster members",
                expected: last,
                found: members.len() as u64,
            }
            .into());
        }
        Ok(Self {
            offsets,
            members,
            path,
        })
    }

    /// Number of coarse clusters (`M`)
    #[must_use]
    pub fn num_clusters(&self) -> u64 {
        (self.offsets.len() - 1) as u64
    }

    /// Total number of fine members (`T`)
    #[must_use]
    pub fn num_members(&self) -> u64 {
        self.members.len() as u64
    }

    /// Fine ordinals of coarse cluster `k`, in input order
    pub fn members_of(&self, k: u64) -> Result<&[u64]> {
        if k >= self.num_clusters() {
            return Err(QueryError::InvalidOrdinal {
                requested: k,
                max: self.num_clusters(),
            }
            .into());
        }
        let offsets = self.offsets.as_slice();
        let lbound = offsets[k as usize];
        let rbound = offsets[k as usize + 1];
        if lbound > rbound || rbound > self.num_members() {
            return Err(ArtifactError::OffsetMismatch {
                path: self.path.clone(),
                reason: format!("invalid bounds for cluster {k}: [{lbound}, {rbound})"),
            }
            .into());
        }
        Ok(&self.members.as_slice()[lbound as usize..rbound as usize])
    }

    /// Full check that the offsets are non-decreasing
    pub fn validate(&self) -> Result<()> {
        if let Some(pos) = self
            .offsets
            .as_slice()
            .windows(2)
            .position(|w| w[0] > w[1])
        {
            return Err(ArtifactError::OffsetMismatch {
                path: self.path.clone(),
                reason: format!("offsets decrease at cluster {pos}"),
            }
            .into());
        }
        Ok(())
    }
}
