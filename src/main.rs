//! reversal-lab CLI
//!
//! ```bash
//! # Run one experiment: base config, optional overlay, dotted overrides
//! reversal-lab run configs/base.toml --overlay configs/t21.toml --set seed=7
//!
//! # Browse the registry
//! reversal-lab list --tag sweep --status completed --sort f1_macro --desc --top 5
//! reversal-lab show reversal-t21_20250101_120000_a1b2c3
//! reversal-lab best f1_macro
//!
//! # Housekeeping
//! reversal-lab delete reversal-t21_20250101_120000_a1b2c3
//! reversal-lab cleanup
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use reversal_lab::config::ConfigResolver;
use reversal_lab::experiment::{
    ExperimentRunner, Registry, RegistryEntry, RegistryFilter, RunStatus, RunnerOptions,
};
use reversal_lab::strategy::StrategyCatalog;

/// Walk-forward reversal experiment runner.
#[derive(Parser)]
#[command(name = "reversal-lab")]
#[command(about = "Reproducible walk-forward experiments for price-reversal classifiers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Experiment root (workspaces and registry)
    #[arg(long, global = true, default_value = "experiments")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a config and run it
    Run {
        /// Base config (.toml or .json)
        base: PathBuf,

        /// Experiment overlay merged onto the base
        #[arg(long)]
        overlay: Option<PathBuf>,

        /// Dotted override, e.g. label.T=21 (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Execute folds on all cores
        #[arg(long)]
        parallel: bool,
    },

    /// List registered experiments
    List {
        /// Required tag (repeatable, all must match)
        #[arg(long)]
        tag: Vec<String>,

        /// Category
        #[arg(long)]
        category: Option<String>,

        /// Name prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Status (running, completed, failed)
        #[arg(long)]
        status: Option<RunStatus>,

        /// Sort by a summary metric or numeric field
        #[arg(long)]
        sort: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Show at most N experiments
        #[arg(long)]
        top: Option<usize>,
    },

    /// Show one experiment
    Show {
        /// Experiment id
        id: String,
    },

    /// Best completed experiment by a metric
    Best {
        /// Summary metric name
        metric: String,

        /// Treat lower values as better
        #[arg(long)]
        lower_is_better: bool,
    },

    /// Remove an experiment from the registry and delete its workspace
    Delete {
        /// Experiment id
        id: String,

        /// Keep the workspace directory
        #[arg(long)]
        keep_files: bool,
    },

    /// Remove all failed experiments
    Cleanup {
        /// Keep the workspace directories
        #[arg(long)]
        keep_files: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let catalog = StrategyCatalog::default();

    match cli.command {
        Commands::Run {
            base,
            overlay,
            overrides,
            parallel,
        } => {
            let config = ConfigResolver::new(&catalog)
                .resolve_files(&base, overlay.as_deref(), &overrides)
                .with_context(|| format!("resolving {}", base.display()))?;
            let outcome = ExperimentRunner::new(&cli.root, &catalog)?
                .with_options(RunnerOptions {
                    parallel_folds: parallel,
                })
                .run(&config)?;

            println!("experiment  {}", outcome.experiment_id);
            println!("workspace   {}", outcome.workspace.display());
            println!(
                "folds       {} ({} failed)",
                outcome.aggregate.n_folds, outcome.aggregate.n_failed_folds
            );
            for (metric, stats) in &outcome.aggregate.per_metric_stats {
                println!(
                    "{metric:<16} {:.4} ± {:.4}  [{:.4}, {:.4}]",
                    stats.mean, stats.std, stats.min, stats.max
                );
            }
        }
        Commands::List {
            tag,
            category,
            prefix,
            status,
            sort,
            desc,
            top,
        } => {
            let mut filter = RegistryFilter::new();
            for t in tag {
                filter = filter.tag(t);
            }
            if let Some(c) = category {
                filter = filter.category(c);
            }
            if let Some(p) = prefix {
                filter = filter.name_prefix(p);
            }
            if let Some(s) = status {
                filter = filter.status(s);
            }
            if let Some(key) = sort {
                filter = filter.sort_by(key, desc);
            }
            if let Some(n) = top {
                filter = filter.top_n(n);
            }
            let entries = Registry::open(&cli.root)?.query(&filter)?;
            for entry in &entries {
                print_row(entry);
            }
            info!(count = entries.len(), "experiments listed");
        }
        Commands::Show { id } => {
            let Some(entry) = Registry::open(&cli.root)?.get(&id)? else {
                bail!("experiment '{id}' is not registered");
            };
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Best {
            metric,
            lower_is_better,
        } => match Registry::open(&cli.root)?.best_by(&metric, !lower_is_better)? {
            Some(entry) => print_row(&entry),
            None => println!("no completed experiment reports '{metric}'"),
        },
        Commands::Delete { id, keep_files } => {
            if !Registry::open(&cli.root)?.remove(&id, !keep_files)? {
                bail!("experiment '{id}' is not registered");
            }
            println!("removed {id}");
        }
        Commands::Cleanup { keep_files } => {
            let removed = Registry::open(&cli.root)?.cleanup_failed(!keep_files)?;
            println!("removed {} failed experiment(s)", removed.len());
        }
    }

    Ok(())
}

fn print_row(entry: &RegistryEntry) {
    let metrics: Vec<String> = entry
        .summary_metrics()
        .iter()
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect();
    println!(
        "{:<48} {:<10} {:<12} {}",
        entry.experiment_id(),
        entry.status(),
        entry.category(),
        metrics.join(" ")
    );
}
