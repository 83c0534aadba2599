use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use sifter_io::{
    DEFAULT_ID_COLUMN, FeatureTableReader, Filters, OutputName, ResultWriter, StructureReader,
};
use sifter_sankey::AggregatorConfig;
use sifter_tree::presets::{LegacyThresholds, legacy_three_stage};
use sifter_tree::{
    ClassificationSummary, Classifier, ClassifierConfig, FeatureId, FeatureRecord,
    MissingValuePolicy, NodeId, ThresholdStructure,
};

#[derive(Parser)]
#[command(name = "sifter")]
#[command(about = "Threshold-tree feature classification and Sankey flow aggregation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Range rules with a missing metric: "stall" at the node or treat as "zero"
    #[arg(long, default_value_t = MissingValuePolicy::Stall, global = true)]
    missing: MissingValuePolicy,
}

/// Input files and row selection shared by classification commands.
#[derive(Args, Debug, Clone)]
struct InputArgs {
    /// Path to the feature table CSV
    #[arg(long)]
    features: PathBuf,

    /// Path to the threshold structure JSON (flat or legacy nested)
    #[arg(long)]
    structure: PathBuf,

    /// Name of the feature id column
    #[arg(long, default_value = DEFAULT_ID_COLUMN)]
    id_column: String,

    /// Keep rows whose column matches one of the values: column=v1,v2 (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Classify features and print a per-leaf summary, or the ids reaching one node
    Classify {
        #[command(flatten)]
        input: InputArgs,

        /// Print the ids of features whose path passes through this node
        #[arg(long)]
        node: Option<String>,

        /// Output directory for the classification artifact
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output name for artifact files (must match [a-zA-Z0-9_-]+)
        #[arg(long, default_value = "sifter")]
        name: String,
    },

    /// Classify features and aggregate them into a Sankey diagram
    Sankey {
        #[command(flatten)]
        input: InputArgs,

        /// Emit links out of nodes with a single populated target
        #[arg(long, default_value_t = false)]
        pass_through_links: bool,

        /// Output directory for the diagram artifact (prints to stdout if absent)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Output name for artifact files (must match [a-zA-Z0-9_-]+)
        #[arg(long, default_value = "sifter")]
        name: String,
    },

    /// Print the legacy three-stage structure as flat JSON
    Preset {
        /// Root cut on feature_splitting
        #[arg(long, default_value_t = LegacyThresholds::default().feature_splitting)]
        feature_splitting: f64,

        /// Stage-1 cut on semdist_mean
        #[arg(long, default_value_t = LegacyThresholds::default().semdist_mean)]
        semdist_mean: f64,

        /// High cut for score_fuzz
        #[arg(long, default_value_t = LegacyThresholds::default().score_fuzz)]
        score_fuzz: f64,

        /// High cut for score_simulation
        #[arg(long, default_value_t = LegacyThresholds::default().score_simulation)]
        score_simulation: f64,

        /// High cut for score_detection
        #[arg(long, default_value_t = LegacyThresholds::default().score_detection)]
        score_detection: f64,
    },
}

// --- stdout summaries ---

#[derive(Serialize)]
struct ClassifyOutput {
    n_rows: usize,
    n_unique: usize,
    stalled: usize,
    final_node_counts: Vec<(NodeId, usize)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
}

#[derive(Serialize)]
struct NodeOutput {
    node_id: String,
    n_features: usize,
    feature_ids: Vec<FeatureId>,
}

#[derive(Serialize)]
struct SankeyOutput {
    n_nodes: usize,
    n_links: usize,
    total_features: usize,
    stalled_features: usize,
    artifact: PathBuf,
}

/// Loaded inputs for one run.
struct Inputs {
    records: Vec<FeatureRecord>,
    n_unique: usize,
    structure: ThresholdStructure,
    filters: Filters,
}

fn load_inputs(input: &InputArgs) -> Result<Inputs> {
    let filters = input
        .filters
        .iter()
        .try_fold(Filters::new(), |acc, raw| acc.parse_arg(raw))?;

    let table = FeatureTableReader::new(&input.features)
        .with_id_column(input.id_column.as_str())
        .read()
        .context("failed to read feature table")?;
    let structure = StructureReader::new(&input.structure)
        .read()
        .context("failed to read threshold structure")?;

    let records = filters.apply(table.records)?;
    let n_unique = records
        .iter()
        .map(|r| &r.id)
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    info!(n_rows = records.len(), n_unique, "inputs ready");
    Ok(Inputs {
        records,
        n_unique,
        structure,
        filters,
    })
}

fn writer_for(output_dir: &Path, name: String) -> Result<ResultWriter> {
    let name = OutputName::new(name)?;
    Ok(ResultWriter::new(output_dir, name)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    let classifier_config = ClassifierConfig::new().with_missing_values(cli.missing);

    match cli.command {
        Command::Classify {
            input,
            node,
            output_dir,
            name,
        } => {
            let inputs = load_inputs(&input)?;
            let classifier = Classifier::new(&inputs.structure, &classifier_config);

            if let Some(node_id) = node {
                let feature_ids = classifier
                    .features_at_node(&inputs.records, &node_id)
                    .with_context(|| format!("no features for node {node_id}"))?;
                let output = NodeOutput {
                    node_id,
                    n_features: feature_ids.len(),
                    feature_ids,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }

            let results = classifier.classify(&inputs.records);
            let artifact = match output_dir {
                Some(dir) => Some(writer_for(&dir, name)?.write_classification(&results)?),
                None => None,
            };

            let summary = ClassificationSummary::from_results(&results);
            let output = ClassifyOutput {
                n_rows: summary.total,
                n_unique: inputs.n_unique,
                stalled: summary.stalled,
                final_node_counts: summary.final_node_counts,
                artifact,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Command::Sankey {
            input,
            pass_through_links,
            output_dir,
            name,
        } => {
            let inputs = load_inputs(&input)?;
            let results = classifier_config.classify(&inputs.structure, &inputs.records);

            let applied_filters: BTreeMap<String, Vec<String>> = inputs.filters.as_map().clone();
            let diagram = AggregatorConfig::new()
                .with_applied_filters(applied_filters)
                .with_pass_through_links(pass_through_links)
                .aggregator(&inputs.structure)
                .aggregate(&results)
                .context("sankey aggregation failed")?;

            match output_dir {
                Some(dir) => {
                    let artifact = writer_for(&dir, name)?.write_sankey(&diagram)?;
                    let output = SankeyOutput {
                        n_nodes: diagram.nodes.len(),
                        n_links: diagram.links.len(),
                        total_features: diagram.metadata.total_features,
                        stalled_features: diagram.metadata.stalled_features,
                        artifact,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                None => println!("{}", serde_json::to_string_pretty(&diagram)?),
            }
        }

        Command::Preset {
            feature_splitting,
            semdist_mean,
            score_fuzz,
            score_simulation,
            score_detection,
        } => {
            let thresholds = LegacyThresholds {
                feature_splitting,
                semdist_mean,
                score_fuzz,
                score_simulation,
                score_detection,
            };
            let structure =
                legacy_three_stage(&thresholds).context("invalid preset thresholds")?;
            info!(n_nodes = structure.len(), "legacy preset built");
            println!("{}", structure.to_json_pretty()?);
        }
    }

    Ok(())
}
