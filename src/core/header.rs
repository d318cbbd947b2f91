use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::error::{ArtifactError, Result};

use super::{ARTIFACT_MAGIC, ARTIFACT_VERSION};

/// Size of the [`ArtifactHeader`] on disk
pub const SIZE_HEADER: usize = size_of::<ArtifactHeader>();

/// The kind of data held by an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArtifactKind {
    /// Record start offsets into a sequence archive
    Offsets = 1,
    /// Per-record dictionary codes
    Codes = 2,
    /// Sorted label dictionary
    Dictionary = 3,
    /// CSR offsets over coarse ordinals
    ClusterOffsets = 4,
    /// CSR member array of fine ordinals
    ClusterMembers = 5,
    /// One column of the quality table
    QualityColumn = 6,
    /// Precomputed high-quality flags
    Bitmap = 7,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct ArtifactHeader {
    // Artifact type metadata (8 bytes)
    /// Artifact magic number
    magic: [u8; 7],
    /// Format version number
    pub version: u8,

    // Payload description (8 bytes)
    /// [`ArtifactKind`] discriminant
    pub kind: u8,
    /// Size of one payload element in bytes
    pub elem_size: u8,
    reserved_a: [u8; 6],

    /// Number of payload elements
    pub count: u64,

    /// Reserved for future use
    reserved_b: [u8; 8],
}
impl ArtifactHeader {
    #[must_use]
    pub fn new(kind: ArtifactKind, elem_size: usize, count: u64) -> Self {
        Self {
            magic: *ARTIFACT_MAGIC,
            version: ARTIFACT_VERSION,
            kind: kind as u8,
            elem_size: elem_size as u8,
            reserved_a: [0; 6],
            count,
            reserved_b: [0; 8],
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads and validates a header from the start of `bytes`
    ///
    /// `path` is only used to describe failures.
    pub fn from_bytes(bytes: &[u8], kind: ArtifactKind, path: &Path) -> Result<Self> {
        if bytes.len() < SIZE_HEADER {
            return Err(ArtifactError::SizeMismatch {
                path: path.to_path_buf(),
                expected: SIZE_HEADER as u64,
                actual: bytes.len() as u64,
            }
            .into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_HEADER]);
        if header.magic != *ARTIFACT_MAGIC {
            return Err(ArtifactError::InvalidMagic(path.to_path_buf()).into());
        }
        if header.version != ARTIFACT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                path: path.to_path_buf(),
                version: header.version,
            }
            .into());
        }
        if header.kind != kind as u8 {
            return Err(ArtifactError::KindMismatch {
                path: path.to_path_buf(),
                expected: kind as u8,
                found: header.kind,
            }
            .into());
        }
        Ok(header)
    }
}
