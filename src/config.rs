//! Build and serving configuration
//!
//! Both configurations deserialize from TOML. Every field except the input
//! and output paths has a default, so a minimal build file only names its
//! index directory and inputs:
//!
//! ```toml
//! index_dir = "gmsc-db-index"
//!
//! [[tiers]]
//! tier = "90AA"
//! sequences = "gmsc-db/GMSC10.90AA.fna.xz"
//! annotation = "gmsc-db/GMSC10.90AA.annotation.tsv.xz"
//! quality = "gmsc-db/GMSC10.90AA.quality_test.tsv.xz"
//!
//! [clusters]
//! mapping = "gmsc-db/GMSC10.cluster.sorted2.tsv.xz"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attribute::Attribute;
use crate::error::{ConfigError, Result};
use crate::quality::QualityPaths;
use crate::{Tier, DEFAULT_CHUNK_SIZE, MAX_THICK_RESULTS, MAX_TOTAL_RESULTS};

fn default_catalog_tag() -> String {
    "GMSC10".to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_habitat_column() -> usize {
    0
}
fn default_taxonomy_column() -> usize {
    1
}
fn default_copy_archive() -> bool {
    true
}
fn default_max_total_results() -> usize {
    MAX_TOTAL_RESULTS
}
fn default_max_thick_results() -> usize {
    MAX_THICK_RESULTS
}

/// Configuration of an offline index build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory all artifacts are written to
    pub index_dir: PathBuf,
    #[serde(default = "default_catalog_tag")]
    pub catalog_tag: String,
    /// Read chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Number of build threads (0 = all cores)
    #[serde(default)]
    pub threads: usize,
    /// Annotation column holding the habitat label
    #[serde(default = "default_habitat_column")]
    pub habitat_column: usize,
    /// Annotation column holding the taxonomy label
    #[serde(default = "default_taxonomy_column")]
    pub taxonomy_column: usize,
    /// Skip the first line of every quality file
    #[serde(default)]
    pub quality_has_header: bool,
    #[serde(default)]
    pub tiers: Vec<TierInputs>,
    #[serde(default)]
    pub clusters: Option<ClusterInputs>,
}

/// Inputs of one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierInputs {
    pub tier: Tier,
    /// FASTA archive, plain or compressed
    pub sequences: PathBuf,
    /// Tab-separated annotation file with habitat and taxonomy columns
    pub annotation: PathBuf,
    /// Tab-separated quality metrics file
    #[serde(default)]
    pub quality: Option<PathBuf>,
    /// Write the archive into the index directory even when it is not compressed
    #[serde(default = "default_copy_archive")]
    pub copy_archive: bool,
}

/// Inputs of the cluster index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInputs {
    /// `(fine_id, coarse_id)` pairs sorted by coarse ordinal
    pub mapping: PathBuf,
}

impl BuildConfig {
    #[must_use]
    pub fn new<P: AsRef<Path>>(index_dir: P) -> Self {
        Self {
            index_dir: index_dir.as_ref().to_path_buf(),
            catalog_tag: default_catalog_tag(),
            chunk_size: default_chunk_size(),
            threads: 0,
            habitat_column: default_habitat_column(),
            taxonomy_column: default_taxonomy_column(),
            quality_has_header: false,
            tiers: Vec::new(),
            clusters: None,
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text).map_err(ConfigError::from)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    /// Number of build threads, resolving 0 to the number of cores
    #[must_use]
    pub fn num_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    /// Artifact paths of one tier
    #[must_use]
    pub fn paths(&self, tier: Tier) -> ArtifactPaths {
        ArtifactPaths::new(&self.index_dir, &self.catalog_tag, tier)
    }
}

/// Configuration of a serving catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub index_dir: PathBuf,
    #[serde(default = "default_catalog_tag")]
    pub catalog_tag: String,
    pub tier: Tier,
    /// Sequence archive to serve instead of the one in the index directory
    #[serde(default)]
    pub archive: Option<PathBuf>,
    /// Page cap of a filter result
    #[serde(default = "default_max_total_results")]
    pub max_total_results: usize,
    /// Number of fully hydrated results per filter
    #[serde(default = "default_max_thick_results")]
    pub max_thick_results: usize,
}
impl CatalogConfig {
    #[must_use]
    pub fn new<P: AsRef<Path>>(index_dir: P, tier: Tier) -> Self {
        Self {
            index_dir: index_dir.as_ref().to_path_buf(),
            catalog_tag: default_catalog_tag(),
            tier,
            archive: None,
            max_total_results: default_max_total_results(),
            max_thick_results: default_max_thick_results(),
        }
    }

    #[must_use]
    pub fn catalog_tag(mut self, tag: &str) -> Self {
        self.catalog_tag = tag.to_string();
        self
    }

    #[must_use]
    pub fn archive<P: AsRef<Path>>(mut self, archive: P) -> Self {
        self.archive = Some(archive.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn max_total_results(mut self, max: usize) -> Self {
        self.max_total_results = max;
        self
    }

    #[must_use]
    pub fn max_thick_results(mut self, max: usize) -> Self {
        self.max_thick_results = max;
        self
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text).map_err(ConfigError::from)?)
    }

    #[must_use]
    pub fn paths(&self) -> ArtifactPaths {
        ArtifactPaths::new(&self.index_dir, &self.catalog_tag, self.tier)
    }
}

/// File names of every artifact of one `(catalog_tag, tier)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    index_dir: PathBuf,
    catalog_tag: String,
    tier: Tier,
}
impl ArtifactPaths {
    #[must_use]
    pub fn new<P: AsRef<Path>>(index_dir: P, catalog_tag: &str, tier: Tier) -> Self {
        Self {
            index_dir: index_dir.as_ref().to_path_buf(),
            catalog_tag: catalog_tag.to_string(),
            tier,
        }
    }

    fn tier_file(&self, suffix: &str) -> PathBuf {
        self.index_dir
            .join(format!("{}.{}.{suffix}", self.catalog_tag, self.tier))
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[must_use]
    pub fn archive(&self) -> PathBuf {
        self.tier_file("fna")
    }

    #[must_use]
    pub fn offsets(&self) -> PathBuf {
        self.tier_file("starts.idx")
    }

    #[must_use]
    pub fn dictionary(&self, attribute: Attribute) -> PathBuf {
        self.tier_file(&format!("{}.dict", attribute.as_str()))
    }

    #[must_use]
    pub fn codes(&self, attribute: Attribute) -> PathBuf {
        self.tier_file(&format!("{}.codes", attribute.as_str()))
    }

    #[must_use]
    pub fn quality(&self) -> QualityPaths {
        QualityPaths::with_prefix(&self.tier_file("quality"))
    }

    #[must_use]
    pub fn high_quality_bitmap(&self) -> PathBuf {
        self.tier_file("high_quality.bitmap")
    }

    /// The cluster index is shared by both tiers of a catalog
    #[must_use]
    pub fn cluster_offsets(&self) -> PathBuf {
        self.index_dir
            .join(format!("{}.cluster.offsets", self.catalog_tag))
    }

    #[must_use]
    pub fn cluster_members(&self) -> PathBuf {
        self.index_dir
            .join(format!("{}.cluster.members", self.catalog_tag))
    }
}
