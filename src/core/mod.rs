//! On-disk layout shared by every artifact
//!
//! ```text
//! ┌───────────────────┐
//! │  Artifact Header  │ 32 bytes
//! ├───────────────────┤
//! │                   │
//! │      Payload      │ count * elem_size bytes (arrays)
//! │                   │ or one ZSTD frame (dictionaries)
//! └───────────────────┘
//! ```

mod array;
mod dictionary;
mod header;
pub(crate) mod input;

pub(crate) use array::staging_path;

pub use array::{write_array, ArrayWriter, Element, MmapArray};
pub use dictionary::{read_dictionary, write_dictionary};
pub use header::{ArtifactHeader, ArtifactKind, SIZE_HEADER};

/// The magic number for seqcat artifacts.
pub const ARTIFACT_MAGIC: &[u8; 7] = b"SEQCATA";

/// The current artifact format version.
pub const ARTIFACT_VERSION: u8 = 1;
