//! # seqcat
//!
//! Build-once, read-many binary indices over a very large, immutable catalog
//! of biological sequences.
//!
//! ## Overview
//!
//! Every record of a catalog has a raw nucleotide payload, a habitat label, a
//! taxonomy label, optional quality metrics, and a membership in a many-to-one
//! clustering between two tiers (`100AA` members, `90AA` representatives).
//! Records are addressed by a dense zero-based ordinal, the join key across
//! every artifact of a tier.
//!
//! The [`IndexBuilder`] streams the compressed flat-file inputs once and
//! writes a set of compact artifacts:
//!
//! 1. A byte-offset index over the sequence archive ([`sequence`])
//! 2. A dictionary-encoded index per categorical attribute ([`attribute`])
//! 3. A CSR index from each representative to its members ([`cluster`])
//! 4. A columnar quality table and a high-quality bitmap ([`quality`])
//!
//! A [`Catalog`] maps those artifacts read-only and answers point lookups and
//! predicate-filtered scans without loading the dataset into memory.
//!
//! ## Artifact Layout
//!
//! All artifacts except the sequence archive start with an
//! [`ArtifactHeader`](core::ArtifactHeader):
//!
//! ```text
//! {tag}.{tier}.fna                 raw FASTA archive
//! {tag}.{tier}.starts.idx          u64 record offsets, N + 1 entries
//! {tag}.{tier}.habitat.dict        sorted labels (ZSTD)
//! {tag}.{tier}.habitat.codes       u32 code per record
//! {tag}.{tier}.taxonomy.dict
//! {tag}.{tier}.taxonomy.codes
//! {tag}.{tier}.quality.{column}    one array per quality column
//! {tag}.{tier}.high_quality.bitmap u8 flag per record
//! {tag}.cluster.offsets            u64 CSR offsets, M + 1 entries
//! {tag}.cluster.members            u64 member ordinals, T entries
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use seqcat::{Catalog, CatalogConfig, FilterRequest, Tier};
//!
//! let catalog = Catalog::open(&CatalogConfig::new("gmsc-db-index", Tier::Aa90)).unwrap();
//! let record = catalog.lookup(Tier::Aa90, 1234).unwrap();
//! println!("{} {}", record.seq_id, record.aminoacid);
//!
//! let request = FilterRequest {
//!     habitat_substrings: vec!["human gut".to_string()],
//!     high_quality_only: true,
//!     ..Default::default()
//! };
//! let results = catalog.filter(&request).unwrap();
//! println!("{} matches", results.total_matches);
//! ```

pub mod attribute;
pub mod builder;
pub mod cluster;
pub mod config;
pub mod core;
pub mod error;
pub mod id;
pub mod quality;
pub mod query;
pub mod sequence;
pub mod translate;

#[cfg(test)]
mod testing;

pub use builder::{BuildReport, IndexBuilder};
pub use config::{ArtifactPaths, BuildConfig, CatalogConfig};
pub use error::{Error, ErrorKind, Result};
pub use id::{SeqId, Tier};
pub use query::{Catalog, FilterRequest, Hit, RankedResults, Record};

/// Number of bytes (or lines) read per chunk while building
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Label substituted for missing categorical values
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Page cap of a filter result
pub const MAX_TOTAL_RESULTS: usize = 1000;

/// Number of fully hydrated records in a filter result
pub const MAX_THICK_RESULTS: usize = 20;

/// Maximum number of identifiers in one batch lookup
pub const MAX_MULTI_LOOKUP: usize = 100;
