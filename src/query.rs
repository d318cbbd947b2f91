//! Query Engine
//!
//! A [`Catalog`] is the context object of a serving process: it is opened once
//! from a [`CatalogConfig`], maps every artifact of one tier read-only, and is
//! shared by all concurrent callers without locking.
//!
//! Filters are evaluated as a fixed sequence of per-record boolean masks
//! (attribute code sets, high-quality bitmap, quality thresholds) combined by
//! elementwise AND. Matches are ranked by descending ordinal; only the first
//! few are fully hydrated, the rest are returned as identifiers.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use rayon::prelude::*;

use crate::attribute::{Attribute, AttributeIndex};
use crate::cluster::ClusterIndex;
use crate::config::CatalogConfig;
use crate::error::{ArtifactError, QueryError, Result};
use crate::id::{SeqId, Tier};
use crate::quality::{HighQualityBitmap, QualityMetrics, QualityPredicate, QualityTable};
use crate::sequence::SequenceStore;
use crate::translate::translate;
use crate::MAX_MULTI_LOOKUP;

/// A fully hydrated record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub seq_id: SeqId,
    pub nucleotide: String,
    pub aminoacid: String,
    pub habitat: String,
    pub taxonomy: String,
    pub quality: Option<QualityMetrics>,
}

/// One entry of a filter result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Hit {
    /// Fully hydrated record
    Thick(Record),
    /// Identifier-only stub
    Thin { seq_id: SeqId },
}
impl Hit {
    #[must_use]
    pub fn seq_id(&self) -> &SeqId {
        match self {
            Self::Thick(record) => &record.seq_id,
            Self::Thin { seq_id } => seq_id,
        }
    }

    #[must_use]
    pub fn is_thick(&self) -> bool {
        matches!(self, Self::Thick(_))
    }
}

/// Result of a filter query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResults {
    /// Number of matching records before page-capping
    pub total_matches: u64,
    /// Matches in descending ordinal order
    pub hits: Vec<Hit>,
}

/// Predicates of a filter query; every field is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterRequest {
    /// Every substring must occur in the habitat label
    pub habitat_substrings: Vec<String>,
    pub taxonomy_substring: Option<String>,
    pub high_quality_only: bool,
    pub antifam: Option<bool>,
    pub terminal: Option<bool>,
    pub rnacode_max: Option<f32>,
    pub metat_min: Option<i32>,
    pub metap_min: Option<f32>,
    pub riboseq_min: Option<f32>,
}
impl FilterRequest {
    /// The quality-table part of the request
    #[must_use]
    pub fn quality_predicate(&self) -> QualityPredicate {
        QualityPredicate {
            antifam: self.antifam,
            terminal: self.terminal,
            rnacode_max: self.rnacode_max,
            metat_min: self.metat_min,
            metap_min: self.metap_min,
            riboseq_min: self.riboseq_min,
        }
    }
}

/// Counts of the opened artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub catalog_tag: String,
    pub tier: Tier,
    pub records: u64,
    pub habitat_labels: usize,
    pub taxonomy_labels: usize,
    pub quality_rows: Option<u64>,
    pub high_quality: Option<u64>,
    pub clusters: Option<u64>,
    pub cluster_members: Option<u64>,
}

/// Read-only query context over the artifacts of one tier
pub struct Catalog {
    config: CatalogConfig,
    sequences: SequenceStore,
    habitat: AttributeIndex,
    taxonomy: AttributeIndex,
    quality: Option<QualityTable>,
    high_quality: Option<HighQualityBitmap>,
    clusters: Option<ClusterIndex>,
}

fn check_rows(artifact: &'static str, expected: u64, found: u64) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(ArtifactError::LengthMismatch {
            artifact,
            expected,
            found,
        }
        .into())
    }
}

impl Catalog {
    /// Opens and maps every artifact of the configured tier
    ///
    /// The sequence store and both attribute indices are required. The
    /// quality table, the high-quality bitmap and (on the `90AA` tier) the
    /// cluster index are loaded when present.
    ///
    /// # Errors
    ///
    /// Fails if a required artifact is missing, or if any artifact fails its
    /// shape check or disagrees with the record count of the sequence store.
    pub fn open(config: &CatalogConfig) -> Result<Self> {
        let paths = config.paths();
        let archive = config.archive.clone().unwrap_or_else(|| paths.archive());
        let sequences = SequenceStore::open(&archive, paths.offsets())?;
        let records = sequences.num_records();

        let habitat = AttributeIndex::open(
            paths.dictionary(Attribute::Habitat),
            paths.codes(Attribute::Habitat),
        )?;
        check_rows("habitat codes", records, habitat.num_records())?;
        let taxonomy = AttributeIndex::open(
            paths.dictionary(Attribute::Taxonomy),
            paths.codes(Attribute::Taxonomy),
        )?;
        check_rows("taxonomy codes", records, taxonomy.num_records())?;

        let quality_paths = paths.quality();
        let missing = quality_paths.missing();
        let quality = if missing.is_empty() {
            let table = QualityTable::open(&quality_paths)?;
            check_rows("quality table", records, table.num_rows())?;
            Some(table)
        } else if missing.len() < quality_paths.all().len() {
            return Err(ArtifactError::Incomplete {
                artifact: "quality table",
                path: missing[0].to_path_buf(),
            }
            .into());
        } else {
            warn!("Quality table not found for {} {}", config.catalog_tag, config.tier);
            None
        };

        let bitmap_path = paths.high_quality_bitmap();
        let high_quality = if bitmap_path.exists() {
            let bitmap = HighQualityBitmap::open(&bitmap_path)?;
            check_rows("high-quality bitmap", records, bitmap.len())?;
            Some(bitmap)
        } else {
            warn!("High-quality bitmap not found: {}", bitmap_path.display());
            None
        };

        let clusters = match config.tier {
            Tier::Aa90 if paths.cluster_offsets().exists() => {
                let index = ClusterIndex::open(paths.cluster_offsets(), paths.cluster_members())?;
                check_rows("cluster offsets", records, index.num_clusters())?;
                Some(index)
            }
            Tier::Aa90 => {
                warn!("Cluster index not found: {}", paths.cluster_offsets().display());
                None
            }
            Tier::Aa100 => None,
        };

        info!(
            "Opened {} {} catalog with {} records",
            config.catalog_tag, config.tier, records
        );
        Ok(Self {
            config: config.clone(),
            sequences,
            habitat,
            taxonomy,
            quality,
            high_quality,
            clusters,
        })
    }

    #[must_use]
    pub fn tier(&self) -> Tier {
        self.config.tier
    }

    #[must_use]
    pub fn catalog_tag(&self) -> &str {
        &self.config.catalog_tag
    }

    /// Number of records (`N`) of the opened tier
    #[must_use]
    pub fn num_records(&self) -> u64 {
        self.sequences.num_records()
    }

    #[must_use]
    pub fn sequences(&self) -> &SequenceStore {
        &self.sequences
    }

    #[must_use]
    pub fn attribute(&self, attribute: Attribute) -> &AttributeIndex {
        match attribute {
            Attribute::Habitat => &self.habitat,
            Attribute::Taxonomy => &self.taxonomy,
        }
    }

    #[must_use]
    pub fn quality(&self) -> Option<&QualityTable> {
        self.quality.as_ref()
    }

    #[must_use]
    pub fn high_quality(&self) -> Option<&HighQualityBitmap> {
        self.high_quality.as_ref()
    }

    #[must_use]
    pub fn clusters(&self) -> Option<&ClusterIndex> {
        self.clusters.as_ref()
    }

    /// Counts of every opened artifact
    #[must_use]
    pub fn summary(&self) -> CatalogSummary {
        CatalogSummary {
            catalog_tag: self.config.catalog_tag.clone(),
            tier: self.config.tier,
            records: self.num_records(),
            habitat_labels: self.habitat.labels().len(),
            taxonomy_labels: self.taxonomy.labels().len(),
            quality_rows: self.quality.as_ref().map(QualityTable::num_rows),
            high_quality: self.high_quality.as_ref().map(HighQualityBitmap::count),
            clusters: self.clusters.as_ref().map(ClusterIndex::num_clusters),
            cluster_members: self.clusters.as_ref().map(ClusterIndex::num_members),
        }
    }

    fn seq_id(&self, ordinal: u64) -> SeqId {
        SeqId::new(&self.config.catalog_tag, self.config.tier, ordinal)
    }

    /// Assembles the full record of an ordinal of the opened tier
    fn hydrate(&self, ordinal: u64) -> Result<Record> {
        let payload = self.sequences.get(ordinal)?;
        let nucleotide = std::str::from_utf8(payload)?.to_string();
        let quality = self
            .quality
            .as_ref()
            .map(|table| table.row(ordinal))
            .transpose()?;
        Ok(Record {
            seq_id: self.seq_id(ordinal),
            aminoacid: translate(payload),
            nucleotide,
            habitat: self.habitat.resolve(ordinal)?.to_string(),
            taxonomy: self.taxonomy.resolve(ordinal)?.to_string(),
            quality,
        })
    }

    /// Hydrates one record
    ///
    /// # Errors
    ///
    /// Fails with `UnknownTier` if `tier` is not the opened tier, and with
    /// `InvalidOrdinal` if `ordinal` is outside `[0, N)`.
    pub fn lookup(&self, tier: Tier, ordinal: u64) -> Result<Record> {
        if tier != self.config.tier {
            return Err(QueryError::UnknownTier {
                requested: tier.to_string(),
                opened: self.config.tier,
            }
            .into());
        }
        self.hydrate(ordinal)
    }

    /// Hydrates one record, naming the tier as a string
    pub fn lookup_str(&self, tier: &str, ordinal: u64) -> Result<Record> {
        let parsed = tier.parse::<Tier>().map_err(|_| QueryError::UnknownTier {
            requested: tier.to_string(),
            opened: self.config.tier,
        })?;
        self.lookup(parsed, ordinal)
    }

    /// Hydrates a record from its identifier, e.g. `GMSC10.90AA.000_000_001`
    pub fn lookup_id(&self, id: &str) -> Result<Record> {
        let seq_id = SeqId::parse(id)?;
        if seq_id.catalog_tag != self.config.catalog_tag {
            return Err(QueryError::InvalidSequenceId(id.to_string()).into());
        }
        self.lookup(seq_id.tier, seq_id.ordinal)
    }

    /// Hydrates up to [`MAX_MULTI_LOOKUP`] records by identifier, in request order
    pub fn lookup_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Record>> {
        if ids.len() > MAX_MULTI_LOOKUP {
            return Err(QueryError::TooManyIds {
                requested: ids.len(),
                max: MAX_MULTI_LOOKUP,
            }
            .into());
        }
        ids.iter().map(|id| self.lookup_id(id.as_ref())).collect()
    }

    /// Computes the combined per-record mask of a request
    fn mask(&self, request: &FilterRequest) -> Result<Vec<bool>> {
        let predicate = request.quality_predicate();
        if request.high_quality_only && self.high_quality.is_none() {
            return Err(QueryError::MissingIndex("high-quality bitmap").into());
        }
        if predicate.is_active() && self.quality.is_none() {
            return Err(QueryError::MissingIndex("quality table").into());
        }

        let mut mask = vec![true; self.num_records() as usize];
        if !request.habitat_substrings.is_empty() {
            let codes = self.habitat.match_substrings(&request.habitat_substrings);
            debug!("Habitat filter matches {} labels", codes.len());
            self.habitat.and_mask(&codes, &mut mask);
        }
        if let Some(substring) = &request.taxonomy_substring {
            let codes = self.taxonomy.match_substrings(&[substring]);
            debug!("Taxonomy filter matches {} labels", codes.len());
            self.taxonomy.and_mask(&codes, &mut mask);
        }
        if request.high_quality_only {
            if let Some(bitmap) = &self.high_quality {
                bitmap.and_mask(&mut mask);
            }
        }
        if predicate.is_active() {
            if let Some(table) = &self.quality {
                table.and_mask(&predicate, &mut mask);
            }
        }
        Ok(mask)
    }

    /// Runs a filter query
    ///
    /// Matches are ranked by descending ordinal and capped at
    /// `max_total_results`; the first `max_thick_results` are hydrated.
    ///
    /// # Errors
    ///
    /// Fails with `MissingIndex` if the request needs the quality table or
    /// the high-quality bitmap and it was not loaded.
    pub fn filter(&self, request: &FilterRequest) -> Result<RankedResults> {
        let mask = self.mask(request)?;
        let total_matches = mask.par_iter().filter(|&&m| m).count() as u64;

        let hits = mask
            .iter()
            .enumerate()
            .rev()
            .filter(|&(_, &m)| m)
            .take(self.config.max_total_results)
            .enumerate()
            .map(|(rank, (ordinal, _))| {
                let ordinal = ordinal as u64;
                if rank < self.config.max_thick_results {
                    self.hydrate(ordinal).map(Hit::Thick)
                } else {
                    Ok(Hit::Thin {
                        seq_id: self.seq_id(ordinal),
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RankedResults {
            total_matches,
            hits,
        })
    }

    /// Identifiers of the `100AA` members of the `90AA` cluster `k`
    ///
    /// # Errors
    ///
    /// Fails with `UnknownTier` unless the catalog was opened on `90AA`, with
    /// `MissingIndex` if no cluster index was loaded, and with
    /// `InvalidOrdinal` if `k` is out of range.
    pub fn cluster_members(&self, k: u64) -> Result<Vec<SeqId>> {
        if self.config.tier != Tier::Aa90 {
            return Err(QueryError::UnknownTier {
                requested: Tier::Aa90.to_string(),
                opened: self.config.tier,
            }
            .into());
        }
        let Some(clusters) = &self.clusters else {
            return Err(QueryError::MissingIndex("cluster index").into());
        };
        Ok(clusters
            .members_of(k)?
            .iter()
            .map(|&fine| SeqId::new(&self.config.catalog_tag, Tier::Aa100, fine))
            .collect())
    }
}
