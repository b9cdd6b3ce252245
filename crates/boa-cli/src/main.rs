//! BOA command line: spec validation, campaign export/import and
//! benchmark runs against the same database the server uses.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use boa::benchmarks::{
    Benchmark, BenchmarkRunner, Dtlz1, Dtlz2, Dtlz3, Dtlz4, RunConfig, Zdt1, Zdt2, Zdt3,
};
use boa::bundle::{CampaignExporter, CampaignImporter};
use boa::db::repository::Repositories;
use boa::db::Db;
use boa::spec::loader::load_process_spec_from_file;
use boa::spec::models::StrategySpec;
use boa::BoaConfig;

/// BOA command line tools
#[derive(Parser)]
#[command(name = "boa")]
#[command(about = "Bayesian optimization campaign tools")]
struct Cli {
    /// Database URL (overrides BOA_DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a process specification file
    Validate {
        /// Path to the YAML specification
        spec: PathBuf,
    },
    /// Export a campaign to a bundle file
    Export {
        /// Campaign id to export
        #[arg(long)]
        campaign: String,
        /// Output path (stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import a campaign bundle
    Import {
        /// Path to the bundle JSON
        bundle: PathBuf,
    },
    /// Run a synthetic benchmark
    Bench {
        /// Problem name: zdt1..zdt3, dtlz1..dtlz4
        #[arg(long, default_value = "zdt1")]
        problem: String,
        /// Number of input variables
        #[arg(long, default_value_t = 6)]
        n_var: usize,
        /// Initial design size
        #[arg(long, default_value_t = 10)]
        n_initial: usize,
        /// Optimization iterations
        #[arg(long, default_value_t = 10)]
        iterations: usize,
        /// Sampler plugin name
        #[arg(long, default_value = "lhs_maximin")]
        sampler: String,
        /// Surrogate model plugin name
        #[arg(long, default_value = "gp_matern")]
        model: String,
        /// Acquisition plugin name
        #[arg(long, default_value = "parego")]
        acquisition: String,
        /// Random seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boa=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = BoaConfig::from_env()?;
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }

    match cli.command {
        Commands::Validate { spec } => validate(&spec),
        Commands::Export { campaign, out } => export(&config, &campaign, out.as_deref()).await,
        Commands::Import { bundle } => import(&config, &bundle).await,
        Commands::Bench {
            problem,
            n_var,
            n_initial,
            iterations,
            sampler,
            model,
            acquisition,
            seed,
        } => bench(
            &problem,
            n_var,
            RunConfig {
                n_initial,
                n_iterations: iterations,
                n_candidates: 1,
                seed,
            },
            sampler,
            model,
            acquisition,
        ),
    }
}

fn validate(spec_path: &std::path::Path) -> Result<()> {
    match load_process_spec_from_file(spec_path, true) {
        Ok(spec) => {
            println!(
                "OK: {} v{} ({} inputs, {} objectives, {} strategies)",
                spec.name,
                spec.version,
                spec.inputs.len(),
                spec.objectives.len(),
                spec.effective_strategies().len()
            );
            Ok(())
        }
        Err(boa::BoaError::SpecValidation { errors }) => {
            eprintln!("Specification is invalid:");
            for error in &errors {
                eprintln!("  - {}", error);
            }
            bail!("{} validation errors", errors.len());
        }
        Err(e) => Err(e).context("Failed to load specification"),
    }
}

async fn open_repos(config: &BoaConfig) -> Result<Repositories> {
    let db = Db::connect(&config.database_url, config.max_connections).await?;
    Ok(Repositories::new(db.pool().clone()))
}

async fn export(
    config: &BoaConfig,
    campaign_id: &str,
    out: Option<&std::path::Path>,
) -> Result<()> {
    let repos = open_repos(config).await?;
    let exporter = CampaignExporter::new(repos);

    match out {
        Some(path) => {
            exporter.export_to_file(campaign_id, path).await?;
            println!("Exported campaign {} to {}", campaign_id, path.display());
        }
        None => {
            let bundle = exporter.export(campaign_id).await?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
    }
    Ok(())
}

async fn import(config: &BoaConfig, bundle_path: &std::path::Path) -> Result<()> {
    let repos = open_repos(config).await?;
    let campaign_id = CampaignImporter::new(repos)
        .import_from_file(bundle_path)
        .await?;
    println!("Imported campaign {}", campaign_id);
    Ok(())
}

fn bench(
    problem: &str,
    n_var: usize,
    config: RunConfig,
    sampler: String,
    model: String,
    acquisition: String,
) -> Result<()> {
    let benchmark: Box<dyn Benchmark> = match problem {
        "zdt1" => Box::new(Zdt1::new(n_var)),
        "zdt2" => Box::new(Zdt2::new(n_var)),
        "zdt3" => Box::new(Zdt3::new(n_var)),
        "dtlz1" => Box::new(Dtlz1::new(n_var, 3)),
        "dtlz2" => Box::new(Dtlz2::new(n_var, 3)),
        "dtlz3" => Box::new(Dtlz3::new(n_var, 3)),
        "dtlz4" => Box::new(Dtlz4::new(n_var, 3)),
        other => bail!("Unknown benchmark problem: {}", other),
    };

    let mut strategy = StrategySpec::default_strategy();
    strategy.name = format!("{}+{}+{}", sampler, model, acquisition);
    strategy.sampler = sampler;
    strategy.model = model;
    strategy.acquisition = acquisition;

    let runner = BenchmarkRunner::new(benchmark.as_ref())?;
    let result = runner.run(Some(strategy), &config)?;

    println!("{}", result.summary());
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
