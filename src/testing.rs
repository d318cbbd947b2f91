//! Shared fixtures for builder and query tests

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::TempDir;

use crate::config::{BuildConfig, CatalogConfig, ClusterInputs, TierInputs};
use crate::error::Result;
use crate::id::{SeqId, Tier};
use crate::quality::QualityMetrics;
use crate::{BuildReport, IndexBuilder, UNKNOWN_LABEL};

/// Input row of one fixture record
#[derive(Debug, Clone)]
pub(crate) struct FixtureRecord {
    pub sequence: String,
    pub habitat: Option<String>,
    pub taxonomy: Option<String>,
    pub quality: QualityMetrics,
}
impl FixtureRecord {
    pub fn habitat_label(&self) -> &str {
        self.habitat.as_deref().unwrap_or(UNKNOWN_LABEL)
    }

    pub fn taxonomy_label(&self) -> &str {
        self.taxonomy.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Deterministic records with a spread of labels and quality values
pub(crate) fn numbered_records(n: usize) -> Vec<FixtureRecord> {
    const CODONS: [&str; 4] = ["AAA", "CCC", "GGG", "TTT"];
    (0..n)
        .map(|i| {
            let mut sequence = "ATG".to_string();
            for _ in 0..=(i % 3) {
                sequence.push_str(CODONS[i % 4]);
            }
            sequence.push_str("TAA");
            let habitat = match i % 4 {
                0 => Some("human gut"),
                1 => Some("marine"),
                2 => Some("human gut,soil"),
                _ => None,
            };
            let taxonomy = if i % 2 == 0 {
                "d__Bacteria;p__Firmicutes"
            } else {
                "d__Archaea"
            };
            FixtureRecord {
                sequence,
                habitat: habitat.map(str::to_string),
                taxonomy: Some(taxonomy.to_string()),
                quality: QualityMetrics {
                    antifam: true,
                    terminal: i % 5 != 0,
                    rnacode: Some(if i % 3 == 0 { 0.01 } else { 0.2 }),
                    metat: Some((i % 4) as i32),
                    riboseq: (i % 7 != 6).then_some(0),
                    metap: Some(if i % 2 == 0 { 0.6 } else { 0.1 }),
                },
            }
        })
        .collect()
}

fn format_float(value: Option<f32>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| v.to_string())
}

fn format_int(value: Option<i32>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| v.to_string())
}

/// One line of a quality input file
fn quality_line(row: &QualityMetrics) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\n",
        if row.antifam { "T" } else { "F" },
        if row.terminal { "T" } else { "F" },
        format_float(row.rnacode),
        format_int(row.metat),
        format_int(row.riboseq),
        format_float(row.metap),
    )
}

/// Writes the FASTA, annotation (gzip) and optional quality inputs of a tier
pub(crate) fn write_tier_inputs(
    dir: &Path,
    tier: Tier,
    records: &[FixtureRecord],
    with_quality: bool,
) -> Result<TierInputs> {
    let mut fasta = String::new();
    let mut annotation = String::new();
    let mut quality = String::new();
    for (ordinal, record) in records.iter().enumerate() {
        let id = SeqId::new("GMSC10", tier, ordinal as u64);
        let _ = write!(fasta, ">{id}\n{}\n", record.sequence);
        let _ = writeln!(
            annotation,
            "{}\t{}",
            record.habitat.as_deref().unwrap_or("NA"),
            record.taxonomy.as_deref().unwrap_or("")
        );
        quality.push_str(&quality_line(&record.quality));
    }

    let sequences = dir.join(format!("GMSC10.{tier}.fna"));
    fs::write(&sequences, fasta)?;

    let annotation_path = dir.join(format!("GMSC10.{tier}.annotation.tsv.gz"));
    {
        let mut writer =
            niffler::to_path(&annotation_path, niffler::Format::Gzip, niffler::Level::One)?;
        writer.write_all(annotation.as_bytes())?;
    }

    let quality = if with_quality {
        let path = dir.join(format!("GMSC10.{tier}.quality_test.tsv"));
        fs::write(&path, quality)?;
        Some(path)
    } else {
        None
    };

    Ok(TierInputs {
        tier,
        sequences,
        annotation: annotation_path,
        quality,
        copy_archive: true,
    })
}

/// A built two-tier catalog in a temporary directory
pub(crate) struct Fixture {
    /// Holds the inputs and the index directory until the fixture drops
    #[allow(dead_code)]
    pub dir: TempDir,
    pub config: BuildConfig,
    pub report: BuildReport,
}
impl Fixture {
    pub fn catalog_config(&self, tier: Tier) -> CatalogConfig {
        CatalogConfig::new(&self.config.index_dir, tier)
    }

    /// `100AA` ordinals of a `90AA` cluster
    pub fn cluster_members(&self, k: u64) -> Vec<u64> {
        vec![2 * k, 2 * k + 1]
    }
}

/// Builds a `90AA` tier from `records` and a `100AA` tier twice its size,
/// where `100AA` records `2k` and `2k + 1` form `90AA` cluster `k`
pub(crate) fn build_fixture(
    records: &[FixtureRecord],
    with_quality: bool,
    with_clusters: bool,
) -> Result<Fixture> {
    let dir = tempfile::tempdir()?;
    let mut config = BuildConfig::new(dir.path().join("index"));
    config.threads = 2;
    config.chunk_size = 64;
    config.tiers.push(write_tier_inputs(
        dir.path(),
        Tier::Aa90,
        records,
        with_quality,
    )?);
    config.tiers.push(write_tier_inputs(
        dir.path(),
        Tier::Aa100,
        &numbered_records(2 * records.len()),
        with_quality,
    )?);

    if with_clusters {
        let mut mapping = String::new();
        for fine in 0..2 * records.len() as u64 {
            let _ = writeln!(
                mapping,
                "{}\t{}",
                SeqId::new("GMSC10", Tier::Aa100, fine),
                SeqId::new("GMSC10", Tier::Aa90, fine / 2)
            );
        }
        let path = dir.path().join("GMSC10.cluster.tsv");
        fs::write(&path, mapping)?;
        config.clusters = Some(ClusterInputs { mapping: path });
    }

    let report = IndexBuilder::new(config.clone()).run()?;
    for failure in report.failures() {
        if let Err(e) = &failure.result {
            panic!("fixture step {} failed: {e}", failure.step);
        }
    }
    Ok(Fixture {
        dir,
        config,
        report,
    })
}
