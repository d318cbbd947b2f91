//! Sequence Store
//!
//! A byte-offset index over a FASTA-style archive, enabling O(1) random access
//! to any record by ordinal. Record `i` occupies `[offsets[i], offsets[i+1])`
//! and is laid out as a `>header` line followed by the payload line.
//!
//! The index is built by scanning the (decompressed) archive in fixed-size
//! chunks for record-start markers, so peak memory is bounded by the chunk
//! size regardless of the archive size.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memchr::{memchr, memchr_iter};
use memmap2::Mmap;
use tracing::{debug, info};

use crate::core::input::open_input;
use crate::core::{staging_path, ArrayWriter, ArtifactKind, MmapArray};
use crate::error::{ArtifactError, BuildError, QueryError, Result};
use crate::DEFAULT_CHUNK_SIZE;

/// Byte that starts every record in the archive
pub const RECORD_MARKER: u8 = b'>';

/// Scans `reader` in chunks, reporting every chunk and every record start
///
/// Returns the total number of bytes read.
fn scan_chunks<R: Read>(
    mut reader: R,
    chunk_size: usize,
    mut on_chunk: impl FnMut(&[u8]) -> Result<()>,
    mut on_start: impl FnMut(u64) -> Result<()>,
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut start = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let chunk = &buf[..n];
        if start == 0 && chunk[0] != RECORD_MARKER {
            return Err(BuildError::MalformedRecord {
                line: 1,
                reason: "archive does not start with a record marker".to_string(),
            }
            .into());
        }
        for pos in memchr_iter(RECORD_MARKER, chunk) {
            on_start(start + pos as u64)?;
        }
        on_chunk(chunk)?;
        start += n as u64;
    }
    Ok(start)
}

/// Builds the record offsets of an archive in memory
///
/// The returned vector has `N + 1` entries: the start of every record followed
/// by a sentinel equal to the archive length.
pub fn build_offsets<R: Read>(reader: R, chunk_size: usize) -> Result<Vec<u64>> {
    let mut offsets = Vec::new();
    let total = scan_chunks(
        reader,
        chunk_size,
        |_| Ok(()),
        |pos| {
            offsets.push(pos);
            Ok(())
        },
    )?;
    offsets.push(total);
    Ok(offsets)
}

/// Summary of a finished sequence index build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceIndexSummary {
    /// Number of records indexed
    pub records: u64,
    /// Length of the (decompressed) archive in bytes
    pub archive_len: u64,
}

/// Streams an archive into an offsets artifact, optionally writing the
/// decompressed archive next to it
#[derive(Debug, Clone, Copy)]
pub struct SequenceIndexBuilder {
    chunk_size: usize,
}
impl Default for SequenceIndexBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}
impl SequenceIndexBuilder {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Indexes a possibly compressed archive on disk
    pub fn build_from_path<P: AsRef<Path>>(
        &self,
        input: P,
        offsets_path: &Path,
        archive_path: Option<&Path>,
    ) -> Result<SequenceIndexSummary> {
        let (reader, format) = open_input(input.as_ref())?;
        debug!(
            "Indexing {} (compression: {:?})",
            input.as_ref().display(),
            format
        );
        self.build(reader, offsets_path, archive_path)
    }

    /// Indexes an archive stream
    ///
    /// The archive copy (if requested) is published before the offsets so a
    /// reader never sees offsets without their archive.
    pub fn build<R: Read>(
        &self,
        reader: R,
        offsets_path: &Path,
        archive_path: Option<&Path>,
    ) -> Result<SequenceIndexSummary> {
        let mut offsets = ArrayWriter::<u64>::create(offsets_path, ArtifactKind::Offsets)?;
        let mut archive = archive_path.map(StagedArchive::create).transpose()?;

        let total = scan_chunks(
            reader,
            self.chunk_size,
            |chunk| match archive.as_mut() {
                Some(archive) => archive.write_all(chunk),
                None => Ok(()),
            },
            |pos| {
                offsets.push(pos)?;
                if offsets.len() % 1_000_000 == 0 {
                    debug!("Processed {}m records", offsets.len() / 1_000_000);
                }
                Ok(())
            },
        )?;

        let records = offsets.len();
        offsets.push(total)?;
        if let Some(archive) = archive {
            archive.finish()?;
        }
        let path = offsets.finish()?;
        info!(
            "Indexed {} records ({} bytes) into {}",
            records,
            total,
            path.display()
        );
        Ok(SequenceIndexSummary {
            records,
            archive_len: total,
        })
    }
}

/// A raw archive copy written to a staging path and renamed on success
struct StagedArchive {
    inner: Option<BufWriter<File>>,
    path: PathBuf,
    staging: PathBuf,
}
impl StagedArchive {
    fn create(path: &Path) -> Result<Self> {
        let staging = staging_path(path);
        Ok(Self {
            inner: Some(BufWriter::new(File::create(&staging)?)),
            path: path.to_path_buf(),
            staging,
        })
    }

    fn write_all(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(inner) = self.inner.as_mut() {
            inner.write_all(chunk)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            let file = inner.into_inner().map_err(io::IntoInnerError::into_error)?;
            file.sync_all()?;
            fs::rename(&self.staging, &self.path)?;
        }
        Ok(())
    }
}
impl Drop for StagedArchive {
    fn drop(&mut self) {
        if self.inner.take().is_some() {
            let _ = fs::remove_file(&self.staging);
        }
    }
}

/// Random-access reader over an indexed sequence archive
///
/// Both the archive and its offsets are memory-mapped; lookups are pure
/// functions of immutable storage and need no locking.
#[derive(Clone)]
pub struct SequenceStore {
    archive: Arc<Mmap>,
    offsets: MmapArray<u64>,
    path: PathBuf,
}
impl SequenceStore {
    /// Opens an archive together with its offsets artifact
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be mapped, or if the offsets do
    /// not describe the archive (`offsets[0] != 0` or
    /// `offsets[N] != archive length`).
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(archive: P, offsets: Q) -> Result<Self> {
        let path = archive.as_ref().to_path_buf();
        let offsets = MmapArray::<u64>::open(offsets, ArtifactKind::Offsets)?;
        let file = File::open(&path)?;

        // Safety: the archive is immutable once published
        let archive = unsafe { Mmap::map(&file)? };

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
        if last != archive.len() as u64 {
            return Err(ArtifactError::OffsetMismatch {
                path,
                reason: format!(
                    "final offset is {last}, archive length is {}",
                    archive.len()
                ),
            }
            .into());
        }

        Ok(Self {
            archive: Arc::new(archive),
            offsets,
            path,
        })
    }

    /// Total number of records in the archive
    #[must_use]
    pub fn num_records(&self) -> u64 {
        (self.offsets.len() - 1) as u64
    }

    /// Length of the archive in bytes
    #[must_use]
    pub fn archive_len(&self) -> u64 {
        self.archive.len() as u64
    }

    /// The offset array, including the final sentinel
    #[must_use]
    pub fn offsets(&self) -> &[u64] {
        self.offsets.as_slice()
    }

    /// Performs the full monotonicity check over the offsets
    pub fn validate(&self) -> Result<()> {
        if let Some(pos) = self.offsets().windows(2).position(|w| w[0] > w[1]) {
            return Err(ArtifactError::OffsetMismatch {
                path: self.path.clone(),
                reason: format!("offsets decrease at record {pos}"),
            }
            .into());
        }
        Ok(())
    }

    /// Returns the raw bytes of a record, header line included
    pub fn record(&self, ordinal: u64) -> Result<&[u8]> {
        if ordinal >= self.num_records() {
            return Err(QueryError::InvalidOrdinal {
                requested: ordinal,
                max: self.num_records(),
            }
            .into());
        }
        let offsets = self.offsets();
        let lbound = offsets[ordinal as usize];
        let rbound = offsets[ordinal as usize + 1];
        if lbound > rbound || rbound > self.archive_len() {
            return Err(ArtifactError::OffsetMismatch {
                path: self.path.clone(),
                reason: format!("invalid bounds for record {ordinal}: [{lbound}, {rbound})"),
            }
            .into());
        }
        Ok(&self.archive[lbound as usize..rbound as usize])
    }

    /// Splits a record into its header (without the marker) and payload lines
    fn split_record(&self, ordinal: u64) -> Result<(&[u8], &[u8])> {
        let bytes = self.record(ordinal)?;
        if bytes.first() != Some(&RECORD_MARKER) {
            return Err(ArtifactError::MalformedRecord(ordinal).into());
        }
        let Some(header_end) = memchr(b'\n', bytes) else {
            return Err(ArtifactError::MalformedRecord(ordinal).into());
        };
        let header = &bytes[1..header_end];
        let rest = &bytes[header_end + 1..];
        let payload_end = memchr(b'\n', rest).unwrap_or(rest.len());
        let trailer = &rest[payload_end..];
        if !trailer.iter().all(u8::is_ascii_whitespace) {
            return Err(ArtifactError::MalformedRecord(ordinal).into());
        }
        let payload = &rest[..payload_end];
        let payload = payload.strip_suffix(b"\r").unwrap_or(payload);
        Ok((header, payload))
    }

    /// Returns the payload (sequence) line of a record
    ///
    /// # Errors
    ///
    /// Fails with `InvalidOrdinal` if `ordinal` is outside `[0, N)`.
    pub fn get(&self, ordinal: u64) -> Result<&[u8]> {
        self.split_record(ordinal).map(|(_, payload)| payload)
    }

    /// Returns the header line of a record, without the leading marker
    pub fn header(&self, ordinal: u64) -> Result<&[u8]> {
        self.split_record(ordinal).map(|(header, _)| header)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::core::write_array;
    use crate::error::{Error, ErrorKind};

    const FASTA: &[u8] = b">GMSC10.90AA.000_000_000\nATGAAATAA\n>GMSC10.90AA.000_000_001\nATGCCCGGGTGA\n>GMSC10.90AA.000_000_002\nATGTAG\n";

    fn build_store(dir: &Path, data: &[u8], chunk_size: usize) -> Result<SequenceStore> {
        let archive = dir.join("seqs.fna");
        let offsets = dir.join("seqs.starts.idx");
        SequenceIndexBuilder::new(chunk_size).build(Cursor::new(data), &offsets, Some(&archive))?;
        SequenceStore::open(&archive, &offsets)
    }

    fn random_fasta(rng: &mut SmallRng, n: usize) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut data = Vec::new();
        let mut seqs = Vec::new();
        for i in 0..n {
            let len = rng.random_range(0..200);
            let seq: Vec<u8> = (0..len).map(|_| b"ACGT"[rng.random_range(0..4)]).collect();
            data.extend_from_slice(format!(">seq{i}\n").as_bytes());
            data.extend_from_slice(&seq);
            data.push(b'\n');
            seqs.push(seq);
        }
        (data, seqs)
    }

    #[test]
    fn test_build_offsets() -> Result<()> {
        let offsets = build_offsets(Cursor::new(FASTA), 7)?;
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 35);
        assert_eq!(*offsets.last().unwrap(), FASTA.len() as u64);
        Ok(())
    }

    #[test]
    fn test_get_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = build_store(dir.path(), FASTA, 1024)?;
        assert_eq!(store.num_records(), 3);
        assert_eq!(store.get(0)?, b"ATGAAATAA");
        assert_eq!(store.get(1)?, b"ATGCCCGGGTGA");
        assert_eq!(store.get(2)?, b"ATGTAG");
        assert_eq!(store.header(1)?, b"GMSC10.90AA.000_000_001");
        Ok(())
    }

    #[test]
    fn test_get_out_of_range() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = build_store(dir.path(), FASTA, 1024)?;
        let err = store.get(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOrdinal);
        assert!(store.get(u64::MAX).is_err());
        Ok(())
    }

    #[test]
    fn test_blank_line_separated_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data = b">a\nACGT\n\n>b\nTTTT\n\n";
        let store = build_store(dir.path(), data, 3)?;
        assert_eq!(store.num_records(), 2);
        assert_eq!(store.get(0)?, b"ACGT");
        assert_eq!(store.get(1)?, b"TTTT");
        Ok(())
    }

    #[test]
    fn test_empty_archive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = build_store(dir.path(), b"", 16)?;
        assert_eq!(store.num_records(), 0);
        assert_eq!(store.offsets(), &[0]);
        assert!(store.get(0).is_err());
        Ok(())
    }

    #[test]
    fn test_rejects_archive_without_marker() {
        let result = build_offsets(Cursor::new(b"ACGT\n>a\nAC\n".to_vec()), 4);
        assert!(matches!(
            result,
            Err(Error::BuildError(BuildError::MalformedRecord { .. }))
        ));
    }

    #[test]
    fn test_offset_invariants_random() -> Result<()> {
        let mut rng = SmallRng::seed_from_u64(42);
        let dir = tempfile::tempdir()?;
        for (round, chunk_size) in [1usize, 3, 64, 4096].into_iter().enumerate() {
            let (data, seqs) = random_fasta(&mut rng, 50);
            let sub = dir.path().join(format!("round{round}"));
            fs::create_dir(&sub)?;
            let store = build_store(&sub, &data, chunk_size)?;
            store.validate()?;

            let offsets = store.offsets();
            assert_eq!(offsets[0], 0);
            assert_eq!(*offsets.last().unwrap(), data.len() as u64);
            assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(store.num_records(), seqs.len() as u64);
            for (i, seq) in seqs.iter().enumerate() {
                assert_eq!(store.get(i as u64)?, seq.as_slice());
            }
        }
        Ok(())
    }

    #[test]
    fn test_open_rejects_mismatched_archive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("seqs.fna");
        let offsets = dir.path().join("seqs.starts.idx");
        SequenceIndexBuilder::default().build(Cursor::new(FASTA), &offsets, Some(&archive))?;
        fs::write(&archive, &FASTA[..FASTA.len() - 3])?;
        let err = SequenceStore::open(&archive, &offsets).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::CorruptArtifact);
        Ok(())
    }

    #[test]
    fn test_out_of_bounds_offsets_are_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("seqs.fna");
        let offsets = dir.path().join("seqs.starts.idx");
        fs::write(&archive, b">a\nACGT\n>b\nGG\n")?;
        write_array(&offsets, ArtifactKind::Offsets, &[0u64, 1000, 14])?;

        // First and last offsets pass the checks done at open
        let store = SequenceStore::open(&archive, &offsets)?;
        let err = store.get(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptArtifact);
        assert!(!err.is_recoverable());
        assert_eq!(store.get(1).unwrap_err().kind(), ErrorKind::CorruptArtifact);
        assert!(store.validate().is_err());
        Ok(())
    }

    #[test]
    fn test_record_without_marker_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("seqs.fna");
        let offsets = dir.path().join("seqs.starts.idx");
        fs::write(&archive, b">a\nACGT\n\nGG\n")?;
        write_array(&offsets, ArtifactKind::Offsets, &[0u64, 8, 12])?;

        let store = SequenceStore::open(&archive, &offsets)?;
        assert_eq!(store.get(0)?, b"ACGT");
        assert_eq!(store.get(1).unwrap_err().kind(), ErrorKind::CorruptArtifact);
        Ok(())
    }

    #[test]
    fn test_build_from_gzip_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("seqs.fna.gz");
        {
            let mut writer = niffler::to_path(&input, niffler::Format::Gzip, niffler::Level::One)?;
            writer.write_all(FASTA)?;
        }
        let archive = dir.path().join("seqs.fna");
        let offsets = dir.path().join("seqs.starts.idx");
        let summary =
            SequenceIndexBuilder::new(5).build_from_path(&input, &offsets, Some(&archive))?;
        assert_eq!(summary.records, 3);
        assert_eq!(summary.archive_len, FASTA.len() as u64);
        assert_eq!(fs::read(&archive)?, FASTA);

        let store = SequenceStore::open(&archive, &offsets)?;
        assert_eq!(store.get(2)?, b"ATGTAG");
        Ok(())
    }
}
