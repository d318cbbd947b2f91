//! Index Builder
//!
//! Runs every build step of a [`BuildConfig`] on a dedicated thread pool.
//! Steps read disjoint inputs and write disjoint artifacts, so they run
//! concurrently with no ordering between them. A failed step never touches
//! the artifacts of other steps, and every artifact is published atomically,
//! so a build can be re-run as often as needed.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::time::{Duration, Instant};

use niffler::send::compression::Format;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::attribute::{Attribute, AttributeIndexBuilder, AttributeSummary};
use crate::cluster::{self, ClusterSizes};
use crate::config::{BuildConfig, TierInputs};
use crate::core::input::open_input;
use crate::error::{ConfigError, Result};
use crate::id::Tier;
use crate::quality::{self, QualitySummary};
use crate::sequence::{SequenceIndexBuilder, SequenceIndexSummary};

/// One independent unit of work of a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    /// Offset index (and archive copy) of a tier
    Sequences(Tier),
    /// Dictionary and codes of one attribute of a tier
    Attribute(Tier, Attribute),
    /// Quality columns and high-quality bitmap of a tier
    Quality(Tier),
    /// Sizing pre-pass and CSR build of the cluster mapping
    Clusters,
}
impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequences(tier) => write!(f, "sequences ({tier})"),
            Self::Attribute(tier, attribute) => write!(f, "{} ({tier})", attribute.as_str()),
            Self::Quality(tier) => write!(f, "quality ({tier})"),
            Self::Clusters => write!(f, "clusters"),
        }
    }
}

/// What a successful step produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutput {
    Sequences(SequenceIndexSummary),
    Attribute(AttributeSummary),
    Quality(QualitySummary),
    Clusters(ClusterSizes),
}

/// Outcome of one build step
#[derive(Debug)]
pub struct StepOutcome {
    pub step: BuildStep,
    pub result: Result<StepOutput>,
    pub elapsed: Duration,
}

/// Outcomes of every step of a build, in configuration order
#[derive(Debug, Default)]
pub struct BuildReport {
    pub steps: Vec<StepOutcome>,
}
impl BuildReport {
    /// True if every step succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|outcome| outcome.result.is_ok())
    }

    /// The steps that failed
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|outcome| outcome.result.is_err())
    }

    /// The outcome of a given step
    #[must_use]
    pub fn outcome(&self, step: BuildStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|outcome| outcome.step == step)
    }
}

/// Offline index builder
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    config: BuildConfig,
}
impl IndexBuilder {
    #[must_use]
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Every step implied by the configuration
    #[must_use]
    pub fn steps(&self) -> Vec<BuildStep> {
        let mut steps = Vec::new();
        for inputs in &self.config.tiers {
            steps.push(BuildStep::Sequences(inputs.tier));
            steps.push(BuildStep::Attribute(inputs.tier, Attribute::Habitat));
            steps.push(BuildStep::Attribute(inputs.tier, Attribute::Taxonomy));
            if inputs.quality.is_some() {
                steps.push(BuildStep::Quality(inputs.tier));
            }
        }
        if self.config.clusters.is_some() {
            steps.push(BuildStep::Clusters);
        }
        steps
    }

    fn tier_inputs(&self, tier: Tier) -> Option<&TierInputs> {
        self.config.tiers.iter().find(|inputs| inputs.tier == tier)
    }

    fn build_sequences(&self, inputs: &TierInputs) -> Result<SequenceIndexSummary> {
        let paths = self.config.paths(inputs.tier);
        let (reader, format) = open_input(&inputs.sequences)?;
        let archive = (format != Format::No || inputs.copy_archive).then(|| paths.archive());
        if archive.is_none() {
            warn!(
                "Not copying {}: serve it as the archive of the {} catalog",
                inputs.sequences.display(),
                inputs.tier
            );
        }
        SequenceIndexBuilder::new(self.config.chunk_size).build(
            reader,
            &paths.offsets(),
            archive.as_deref(),
        )
    }

    fn build_attribute(&self, inputs: &TierInputs, attribute: Attribute) -> Result<AttributeSummary> {
        let paths = self.config.paths(inputs.tier);
        let column = match attribute {
            Attribute::Habitat => self.config.habitat_column,
            Attribute::Taxonomy => self.config.taxonomy_column,
        };
        AttributeIndexBuilder::new(column)
            .capacity(self.config.chunk_size)
            .build_from_path(
                &inputs.annotation,
                &paths.dictionary(attribute),
                &paths.codes(attribute),
            )
    }

    fn run_step(&self, step: BuildStep) -> Result<StepOutput> {
        let inputs = |tier| {
            self.tier_inputs(tier)
                .ok_or_else(|| ConfigError::MissingInput(format!("tier {tier}")))
        };
        match step {
            BuildStep::Sequences(tier) => self.build_sequences(inputs(tier)?).map(StepOutput::Sequences),
            BuildStep::Attribute(tier, attribute) => self
                .build_attribute(inputs(tier)?, attribute)
                .map(StepOutput::Attribute),
            BuildStep::Quality(tier) => {
                let inputs = inputs(tier)?;
                let Some(input) = &inputs.quality else {
                    return Err(ConfigError::MissingInput(step.to_string()).into());
                };
                let paths = self.config.paths(tier);
                quality::build_from_path(
                    input,
                    self.config.quality_has_header,
                    &paths.quality(),
                    &paths.high_quality_bitmap(),
                )
                .map(StepOutput::Quality)
            }
            BuildStep::Clusters => {
                let Some(clusters) = &self.config.clusters else {
                    return Err(ConfigError::MissingInput(step.to_string()).into());
                };
                let paths = self.config.paths(Tier::Aa90);
                cluster::build_from_path(
                    &clusters.mapping,
                    &paths.cluster_offsets(),
                    &paths.cluster_members(),
                )
                .map(StepOutput::Clusters)
            }
        }
    }

    fn timed_step(&self, step: BuildStep) -> StepOutcome {
        info!("Starting step: {step}");
        let start = Instant::now();
        let result = self.run_step(step);
        let elapsed = start.elapsed();
        match &result {
            Ok(_) => info!("Finished step: {step} in {:.2}s", elapsed.as_secs_f64()),
            Err(e) => error!("Step {step} failed: {e}"),
        }
        StepOutcome {
            step,
            result,
            elapsed,
        }
    }

    /// Runs every step and reports each outcome
    ///
    /// # Errors
    ///
    /// Fails before any step runs if the configuration lists a tier twice,
    /// the index directory cannot be created, or the thread pool cannot be
    /// built. Failures of individual steps are reported in the
    /// [`BuildReport`].
    pub fn run(&self) -> Result<BuildReport> {
        let mut seen = HashSet::new();
        for inputs in &self.config.tiers {
            if !seen.insert(inputs.tier) {
                return Err(ConfigError::DuplicateTier(inputs.tier).into());
            }
        }
        fs::create_dir_all(&self.config.index_dir)?;

        let steps = self.steps();
        let num_threads = self.config.num_threads().min(steps.len().max(1));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        info!(
            "Running {} build steps on {} threads into {}",
            steps.len(),
            num_threads,
            self.config.index_dir.display()
        );

        let outcomes = pool.install(|| {
            steps
                .into_par_iter()
                .map(|step| self.timed_step(step))
                .collect::<Vec<_>>()
        });
        let report = BuildReport { steps: outcomes };
        if report.is_success() {
            info!("Build finished");
        } else {
            warn!("Build finished with {} failed steps", report.failures().count());
        }
        Ok(report)
    }
}
