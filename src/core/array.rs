//! Fixed-width array artifacts
//!
//! An array artifact is an [`ArtifactHeader`] followed by `count` little-endian
//! elements. [`ArrayWriter`] streams elements to a temporary file and publishes
//! it with a rename, so readers never observe a partially written artifact.
//! [`MmapArray`] maps a published artifact read-only and exposes it as a slice.

use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::Pod;
use byteorder::{LittleEndian, WriteBytesExt};
use memmap2::Mmap;

use super::header::{ArtifactHeader, ArtifactKind, SIZE_HEADER};
use crate::error::{ArtifactError, Result};

/// A fixed-width value that can be stored in an array artifact
pub trait Element: Pod + Send + Sync {
    /// Writes the value in little-endian byte order
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()>;
}
impl Element for u8 {
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self)
    }
}
impl Element for u32 {
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self)
    }
}
impl Element for u64 {
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self)
    }
}
impl Element for i32 {
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self)
    }
}
impl Element for f32 {
    fn write_le<W: Write>(self, writer: &mut W) -> io::Result<()> {
        writer.write_f32::<LittleEndian>(self)
    }
}

/// Path of the temporary file an artifact is written to before publishing
pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Streams elements into a new array artifact
///
/// The artifact only appears at its final path once [`ArrayWriter::finish`]
/// succeeds. Dropping an unfinished writer removes the temporary file.
pub struct ArrayWriter<T: Element> {
    inner: Option<BufWriter<File>>,
    kind: ArtifactKind,
    path: PathBuf,
    staging: PathBuf,
    count: u64,
    _marker: PhantomData<T>,
}
impl<T: Element> ArrayWriter<T> {
    pub fn create<P: AsRef<Path>>(path: P, kind: ArtifactKind) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let staging = staging_path(&path);
        let mut inner = BufWriter::new(File::create(&staging)?);

        // Placeholder header, the count is patched in on finish
        inner.write_all(ArtifactHeader::new(kind, size_of::<T>(), 0).as_bytes())?;

        Ok(Self {
            inner: Some(inner),
            kind,
            path,
            staging,
            count: 0,
            _marker: PhantomData,
        })
    }

    /// Appends one element
    pub fn push(&mut self, value: T) -> Result<()> {
        if let Some(inner) = self.inner.as_mut() {
            value.write_le(inner)?;
            self.count += 1;
        }
        Ok(())
    }

    /// Appends a slice of elements
    pub fn extend_from_slice(&mut self, values: &[T]) -> Result<()> {
        for &value in values {
            self.push(value)?;
        }
        Ok(())
    }

    /// Number of elements written so far
    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Patches the header, syncs and publishes the artifact at its final path
    pub fn finish(mut self) -> Result<PathBuf> {
        let Some(inner) = self.inner.take() else {
            return Ok(self.path.clone());
        };
        let mut file = inner.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(ArtifactHeader::new(self.kind, size_of::<T>(), self.count).as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.staging, &self.path)?;
        Ok(self.path.clone())
    }
}
impl<T: Element> Drop for ArrayWriter<T> {
    fn drop(&mut self) {
        if self.inner.take().is_some() {
            let _ = fs::remove_file(&self.staging);
        }
    }
}

/// Writes a complete in-memory slice as an artifact
pub fn write_array<T: Element, P: AsRef<Path>>(
    path: P,
    kind: ArtifactKind,
    values: &[T],
) -> Result<PathBuf> {
    let mut writer = ArrayWriter::create(path, kind)?;
    writer.extend_from_slice(values)?;
    writer.finish()
}

/// A read-only memory-mapped array artifact
///
/// The map is shared through an `Arc`, so clones are cheap and can be handed
/// to other threads.
pub struct MmapArray<T: Element> {
    mmap: Arc<Mmap>,
    header: ArtifactHeader,
    path: PathBuf,
    _marker: PhantomData<T>,
}
impl<T: Element> Clone for MmapArray<T> {
    fn clone(&self) -> Self {
        Self {
            mmap: self.mmap.clone(),
            header: self.header,
            path: self.path.clone(),
            _marker: PhantomData,
        }
    }
}
impl<T: Element> MmapArray<T> {
    /// Opens and shape-checks an array artifact
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be opened or mapped
    /// * The header is invalid or of another [`ArtifactKind`]
    /// * The element size or file size disagree with the header
    /// * The payload cannot be viewed as `T`
    pub fn open<P: AsRef<Path>>(path: P, kind: ArtifactKind) -> Result<Self> {
        if cfg!(target_endian = "big") {
            return Err(ArtifactError::UnsupportedEndianness.into());
        }
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;

        // Safety: artifacts are immutable once published
        let mmap = unsafe { Mmap::map(&file)? };

        let header = ArtifactHeader::from_bytes(&mmap, kind, &path)?;
        if usize::from(header.elem_size) != size_of::<T>() {
            return Err(ArtifactError::SizeMismatch {
                path,
                expected: size_of::<T>() as u64,
                actual: u64::from(header.elem_size),
            }
            .into());
        }

        let expected = header
            .count
            .checked_mul(size_of::<T>() as u64)
            .and_then(|payload| payload.checked_add(SIZE_HEADER as u64));
        if expected != Some(mmap.len() as u64) {
            return Err(ArtifactError::SizeMismatch {
                path,
                expected: expected.unwrap_or(u64::MAX),
                actual: mmap.len() as u64,
            }
            .into());
        }
        if bytemuck::try_cast_slice::<u8, T>(&mmap[SIZE_HEADER..]).is_err() {
            return Err(ArtifactError::Misaligned(path).into());
        }

        Ok(Self {
            mmap: Arc::new(mmap),
            header,
            path,
            _marker: PhantomData,
        })
    }

    /// The payload as a typed slice
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // Checked to be castable in `open`
        bytemuck::cast_slice(&self.mmap[SIZE_HEADER..])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.header.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<T> {
        self.as_slice().get(idx).copied()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_write_and_map_u64() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("values.idx");
        write_array(&path, ArtifactKind::Offsets, &[0u64, 5, 9, 20])?;

        let array = MmapArray::<u64>::open(&path, ArtifactKind::Offsets)?;
        assert_eq!(array.len(), 4);
        assert_eq!(array.as_slice(), &[0, 5, 9, 20]);
        assert_eq!(array.get(2), Some(9));
        assert_eq!(array.get(4), None);
        Ok(())
    }

    #[test]
    fn test_streamed_writer_counts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("codes");
        let mut writer = ArrayWriter::<u32>::create(&path, ArtifactKind::Codes)?;
        assert!(writer.is_empty());
        for i in 0..1000 {
            writer.push(i % 7)?;
        }
        assert_eq!(writer.len(), 1000);
        assert!(!path.exists());
        writer.finish()?;

        let array = MmapArray::<u32>::open(&path, ArtifactKind::Codes)?;
        assert_eq!(array.len(), 1000);
        assert_eq!(array.get(15), Some(1));
        Ok(())
    }

    #[test]
    fn test_empty_array() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty");
        write_array::<f32, _>(&path, ArtifactKind::QualityColumn, &[])?;
        let array = MmapArray::<f32>::open(&path, ArtifactKind::QualityColumn)?;
        assert!(array.is_empty());
        assert!(array.as_slice().is_empty());
        Ok(())
    }

    #[test]
    fn test_dropped_writer_leaves_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("partial");
        {
            let mut writer = ArrayWriter::<u64>::create(&path, ArtifactKind::Offsets)?;
            writer.push(1)?;
        }
        assert!(!path.exists());
        assert!(!staging_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_rewrite_replaces_previous() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bitmap");
        write_array(&path, ArtifactKind::Bitmap, &[1u8, 0, 1])?;
        write_array(&path, ArtifactKind::Bitmap, &[0u8, 1])?;
        let array = MmapArray::<u8>::open(&path, ArtifactKind::Bitmap)?;
        assert_eq!(array.as_slice(), &[0, 1]);
        Ok(())
    }

    #[test]
    fn test_truncated_artifact_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("short");
        write_array(&path, ArtifactKind::Offsets, &[0u64, 1, 2])?;
        let bytes = fs::read(&path)?;
        fs::write(&path, &bytes[..bytes.len() - 4])?;
        let result = MmapArray::<u64>::open(&path, ArtifactKind::Offsets);
        assert!(matches!(
            result,
            Err(Error::ArtifactError(ArtifactError::SizeMismatch { .. }))
        ));
        Ok(())
    }

    #[test]
    fn test_overflowing_count_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("huge");
        let header = ArtifactHeader::new(ArtifactKind::Offsets, size_of::<u64>(), u64::MAX / 4);
        fs::write(&path, header.as_bytes())?;
        let result = MmapArray::<u64>::open(&path, ArtifactKind::Offsets);
        assert!(matches!(
            result,
            Err(Error::ArtifactError(ArtifactError::SizeMismatch {
                expected: u64::MAX,
                ..
            }))
        ));
        Ok(())
    }

    #[test]
    fn test_wrong_element_size_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("codes");
        write_array(&path, ArtifactKind::Codes, &[1u32, 2])?;
        assert!(MmapArray::<u64>::open(&path, ArtifactKind::Codes).is_err());
        Ok(())
    }
}
