use afore_pipeline::config::PipelineConfig;
use afore_pipeline::fx_fetch::BanxicoClient;
use afore_pipeline::normalizer::RecordSetStats;
use afore_pipeline::pipeline::{Pipeline, RunOptions};
use afore_pipeline::report::coverage_rows;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Afore/Siefore holdings ETL: extract, normalize, convert to USD
#[derive(Parser)]
#[command(name = "afore-pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Siefore holdings reports → canonical records → USD-enriched records", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base data directory (overrides paths.base_dir)
    #[arg(short, long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all three steps: rebuild, fetch FX, enrich
    Run {
        /// Reuse the existing canonical set
        #[arg(long)]
        skip_rebuild: bool,

        /// Reuse the cached FX series regardless of age
        #[arg(long, conflicts_with = "force_fx")]
        skip_fx: bool,

        /// Refresh the FX series regardless of age
        #[arg(long)]
        force_fx: bool,
    },

    /// Rebuild the canonical record set from the reports
    Extract,

    /// Refresh the FX cache for the periods in the canonical set
    FetchFx {
        /// Refresh even if the cache is fresh
        #[arg(long)]
        force: bool,
    },

    /// Enrich the canonical set with the cached FX series
    Enrich,

    /// Print statistics for the canonical set
    Summary,
}

fn main() -> Result<()> {
    // ─── logging ─────────────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())
        .with_context(|| format!("Failed to load configuration {:?}", cli.config))?;
    if let Some(base_dir) = cli.base_dir {
        config.paths.base_dir = base_dir;
    }

    let pipeline = Pipeline::new(config);

    match cli.command {
        Commands::Run {
            skip_rebuild,
            skip_fx,
            force_fx,
        } => {
            let client = BanxicoClient::from_config(&pipeline.config().fx)?;
            let options = RunOptions {
                skip_rebuild,
                skip_fx,
                force_fx,
            };
            let summary = pipeline.run(&client, options)?;

            println!("✅ Run {} finished in {:.1}s", summary.run_id, summary.duration.as_secs_f64());
            println!("   Records:     {}", summary.records);
            println!("   Fingerprint: {}", summary.fingerprint);
            println!("   {}", summary.enrichment.summary());
            if !summary.fx_gaps.is_empty() {
                let gaps: Vec<String> = summary.fx_gaps.iter().map(|p| p.to_string()).collect();
                println!("⚠️  No FX rate for: {}", gaps.join(", "));
            }
            for output in &summary.outputs {
                println!("   {} ({} bytes)", output.path.display(), output.bytes.unwrap_or(0));
            }
        }

        Commands::Extract => {
            let outcome = pipeline.rebuild()?;
            for row in &outcome.rows {
                println!(
                    "   Reporte-{:<3} {:<10} {:<40} {}",
                    row.report.number(),
                    row.report.category().as_str(),
                    row.status.to_string(),
                    row.records_extracted
                );
            }
            println!("✅ {}", outcome.normalization.stats.summary());
            println!("   Collisions resolved: {}", outcome.normalization.collisions.len());
            println!("   Warnings: {}", outcome.normalization.warnings.len());
            println!("   Fingerprint: {}", outcome.fingerprint);
        }

        Commands::FetchFx { force } => {
            let client = BanxicoClient::from_config(&pipeline.config().fx)?;
            let records = pipeline.load_canonical()?;
            let options = RunOptions {
                force_fx: force,
                ..RunOptions::default()
            };
            let store = pipeline.prepare_fx(&records, &client, options)?;
            println!(
                "✅ {} months cached ({} to {})",
                store.len(),
                store.first_period().map(|p| p.to_string()).unwrap_or_default(),
                store.last_period().map(|p| p.to_string()).unwrap_or_default()
            );
        }

        Commands::Enrich => {
            let client = BanxicoClient::from_config(&pipeline.config().fx)?;
            let records = pipeline.load_canonical()?;
            let options = RunOptions {
                skip_fx: true,
                ..RunOptions::default()
            };
            let store = pipeline.prepare_fx(&records, &client, options)?;
            let summary = pipeline.enrich(&records, &store)?;
            println!("✅ {}", summary.summary());
            if let (Some(min), Some(max), Some(mean), Some(median)) =
                (summary.fx_min, summary.fx_max, summary.fx_mean, summary.fx_median)
            {
                println!("   FX min {:.4}  max {:.4}  mean {:.4}  median {:.4}", min, max, mean, median);
            }
            println!("   Total MXN {:.0}  Total USD {:.0}", summary.total_local, summary.total_foreign);
        }

        Commands::Summary => {
            let records = pipeline.load_canonical()?;
            let stats = RecordSetStats::from_records(&records);
            info!(records = stats.total_records, "canonical set loaded");

            println!("📊 {}", stats.summary());
            println!("   Negative values: {}", stats.negative_values);
            for row in coverage_rows(&records) {
                println!(
                    "   {:<8} {:<36} {:>7} records  {:>3} afores  {} → {}",
                    row.dimension, row.value, row.records, row.entities, row.first_period, row.last_period
                );
            }
        }
    }

    Ok(())
}
