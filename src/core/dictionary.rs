use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use zstd::stream::{copy_encode, decode_all};

use super::array::staging_path;
use super::header::{ArtifactHeader, ArtifactKind, SIZE_HEADER};
use crate::error::{ArtifactError, BuildError, Result};

/// Writes a label dictionary artifact
///
/// Labels are stored in code order, joined by newlines, as a single ZSTD frame
/// after the header. Labels must not contain newlines.
pub fn write_dictionary<P: AsRef<Path>>(
    path: P,
    labels: &[String],
    compression_level: i32,
) -> Result<PathBuf> {
    if let Some(label) = labels.iter().find(|label| label.contains('\n')) {
        return Err(BuildError::InvalidLabel(label.clone()).into());
    }
    let path = path.as_ref().to_path_buf();
    let staging = staging_path(&path);

    let joined = labels.join("\n");
    let mut encoded = Vec::default();
    copy_encode(joined.as_bytes(), &mut encoded, compression_level)?;

    let header = ArtifactHeader::new(ArtifactKind::Dictionary, 1, labels.len() as u64);
    let result = (|| -> Result<()> {
        let mut file = File::create(&staging)?;
        file.write_all(header.as_bytes())?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&staging, &path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result.map(|()| path)
}

/// Reads a label dictionary artifact into memory
///
/// Dictionaries are small (one entry per distinct label), so they are loaded
/// eagerly rather than mapped.
pub fn read_dictionary<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let header = ArtifactHeader::from_bytes(&bytes, ArtifactKind::Dictionary, path)?;

    let decoded = decode_all(&bytes[SIZE_HEADER..])?;
    let text = std::str::from_utf8(&decoded)?;
    let labels: Vec<String> = if header.count == 0 {
        Vec::new()
    } else {
        text.split('\n').map(str::to_string).collect()
    };

    if labels.len() as u64 != header.count {
        return Err(ArtifactError::LengthMismatch {
            artifact: "dictionary",
            expected: header.count,
            found: labels.len() as u64,
        }
        .into());
    }
    Ok(labels)
}
