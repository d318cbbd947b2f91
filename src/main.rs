use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use seqcat::{BuildConfig, Catalog, CatalogConfig, FilterRequest, IndexBuilder, Tier};

#[derive(Parser)]
#[clap(version, about = "Build and query binary indices over a sequence catalog")]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build every artifact named in a TOML build configuration
    Build {
        /// Path to the build configuration
        #[clap(required = true)]
        config: PathBuf,
    },
    /// Print fully hydrated records by ordinal or identifier
    Lookup {
        #[clap(flatten)]
        catalog: CatalogArgs,

        /// Record ordinals or `tag.tier.ddd_ddd_ddd` identifiers
        #[clap(required = true)]
        ids: Vec<String>,
    },
    /// Run a predicate-filtered scan
    Filter {
        #[clap(flatten)]
        catalog: CatalogArgs,

        /// JSON filter request (flags below are merged into it)
        #[clap(long)]
        request: Option<String>,

        /// Substring required in the habitat label (repeatable)
        #[clap(long = "habitat")]
        habitat: Vec<String>,

        /// Substring required in the taxonomy label
        #[clap(long)]
        taxonomy: Option<String>,

        /// Only keep high-quality records
        #[clap(long)]
        high_quality: bool,
    },
    /// Print the `100AA` members of a `90AA` cluster
    Members {
        #[clap(flatten)]
        catalog: CatalogArgs,

        /// Cluster ordinal
        cluster: u64,
    },
    /// Print a summary of the opened artifacts
    Inspect {
        #[clap(flatten)]
        catalog: CatalogArgs,
    },
}

#[derive(Args)]
struct CatalogArgs {
    /// Directory holding the built artifacts
    #[clap(short = 'i', long, env = "SEQCAT_INDEX_DIR")]
    index_dir: PathBuf,

    /// Tier to open [90AA, 100AA]
    #[clap(short = 't', long, default_value = "90AA")]
    tier: String,

    /// Catalog tag used in artifact names and identifiers
    #[clap(long, default_value = "GMSC10")]
    tag: String,

    /// Serve records from this archive instead of the built copy
    #[clap(long)]
    archive: Option<PathBuf>,
}
impl CatalogArgs {
    fn open(&self) -> Result<Catalog> {
        let tier: Tier = self.tier.parse()?;
        let mut config = CatalogConfig::new(&self.index_dir, tier).catalog_tag(&self.tag);
        if let Some(archive) = &self.archive {
            config = config.archive(archive);
        }
        let catalog = Catalog::open(&config)
            .with_context(|| format!("opening {tier} catalog in {}", self.index_dir.display()))?;
        Ok(catalog)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn build(path: &Path) -> Result<()> {
    let config = BuildConfig::from_path(path)
        .with_context(|| format!("reading build configuration {}", path.display()))?;
    let report = IndexBuilder::new(config).run()?;
    for outcome in &report.steps {
        match &outcome.result {
            Ok(_) => info!("{} finished in {:.2?}", outcome.step, outcome.elapsed),
            Err(e) => error!("{} failed: {e}", outcome.step),
        }
    }
    if !report.is_success() {
        bail!("{} build step(s) failed", report.failures().count());
    }
    Ok(())
}

fn lookup(catalog: &Catalog, ids: &[String]) -> Result<()> {
    let records = ids
        .iter()
        .map(|id| match id.parse::<u64>() {
            Ok(ordinal) => catalog.lookup(catalog.tier(), ordinal),
            Err(_) => catalog.lookup_id(id),
        })
        .collect::<seqcat::Result<Vec<_>>>()?;
    print_json(&records)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build { config } => build(&config),
        Command::Lookup { catalog, ids } => lookup(&catalog.open()?, &ids),
        Command::Filter {
            catalog,
            request,
            habitat,
            taxonomy,
            high_quality,
        } => {
            let mut request: FilterRequest = match request {
                Some(json) => serde_json::from_str(&json).context("parsing filter request")?,
                None => FilterRequest::default(),
            };
            request.habitat_substrings.extend(habitat);
            if taxonomy.is_some() {
                request.taxonomy_substring = taxonomy;
            }
            request.high_quality_only |= high_quality;
            print_json(&catalog.open()?.filter(&request)?)
        }
        Command::Members { catalog, cluster } => {
            let members: Vec<String> = catalog
                .open()?
                .cluster_members(cluster)?
                .iter()
                .map(ToString::to_string)
                .collect();
            print_json(&members)
        }
        Command::Inspect { catalog } => print_json(&catalog.open()?.summary()),
    }
}

fn main() {
    let log_level = std::env::var("SEQCAT_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        let code = match e.downcast_ref::<seqcat::Error>() {
            Some(err) if err.is_recoverable() => 2,
            _ => 1,
        };
        process::exit(code);
    }
}
