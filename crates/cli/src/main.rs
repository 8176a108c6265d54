//! evoloop CLI - closed-loop model self-evolution.

mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evoloop_core::{ControllerConfig, ModelArtifact, VersionId};
use evoloop_drift::DriftDetector;
use evoloop_evolution::EvolutionController;
use evoloop_governance::RollbackOutcome;
use evoloop_registry::ModelRegistry;
use evoloop_storage::{JsonStorage, Storage};
use evoloop_telemetry::{InMemoryTelemetryStore, TelemetrySource};
use evoloop_validation::{EvaluationSet, SimulatedRunner, ValidationSandbox, Validator};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::seed::SeedPlan;

#[derive(Parser)]
#[command(name = "evoloop")]
#[command(about = "Closed-loop model self-evolution controller", long_about = None)]
struct Cli {
    /// Data directory
    #[arg(long, global = true, default_value = ".evoloop")]
    root: PathBuf,

    /// Controller configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write synthetic telemetry and register the base model
    Seed {
        /// Number of requests
        #[arg(long, default_value = "50")]
        requests: usize,
        /// Share of non-protected heads left dormant
        #[arg(long, default_value = "0.3")]
        dormant_share: f64,
        /// Shift outputs over the last third of requests
        #[arg(long)]
        drift: bool,
        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Profile telemetry and print the structural analysis
    Analyze {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one evolution cycle
    Evolve {
        /// Trigger reason recorded in the audit log
        #[arg(long, default_value = "manual")]
        reason: String,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Show registry and governance status
    Status,
    /// Show the ancestry of a version
    Lineage {
        /// Version id (e.g. v3); defaults to the active version
        id: Option<String>,
    },
    /// Show recent audit entries
    Audit {
        /// Number of entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Roll the active pointer back
    Rollback {
        /// Reason recorded in the audit log
        #[arg(long)]
        reason: String,
        /// Target version; defaults to the parent of the active version
        #[arg(long)]
        to: Option<String>,
    },
    /// Score drift of recent telemetry against the oldest window
    Drift,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ControllerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ControllerConfig::default(),
    };
    let storage: Arc<dyn Storage> = Arc::new(JsonStorage::new(&cli.root).await?);

    match cli.command {
        Commands::Seed { requests, dormant_share, drift, seed } => {
            let model = base_model();
            let registry = ModelRegistry::bootstrap(Arc::clone(&storage), &model).await?;
            let seeded = seed::generate(
                &model,
                &SeedPlan { requests, dormant_share, drift, seed },
            );
            storage.append_telemetry(&seeded.records).await?;
            storage.save_snapshot(&seeded.snapshot).await?;

            println!("Seeded {} requests into {}", seeded.records.len(), cli.root.display());
            println!("  Dormant heads: {}", seeded.dormant.len());
            println!("  Active version: {}", registry.active().id);
        }
        Commands::Analyze { json } => {
            let controller = open_controller(config, storage).await?;
            let analysis = controller.profile_and_analyze().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
                return Ok(());
            }
            println!("Structural analysis");
            println!("  Pruning risk: {:.3}", analysis.pruning_risk_score);
            println!(
                "  Prunable heads ({}): {}",
                analysis.prunable_heads.len(),
                join(analysis.prunable_heads.iter())
            );
            println!("  Prunable layers: {}", join(analysis.prunable_layers.iter()));
            for pair in &analysis.redundant_pairs {
                println!(
                    "  Redundant FFN: L{} ~ L{} ({:.3})",
                    pair.keep, pair.redundant, pair.similarity
                );
            }
            for rec in &analysis.recommendations {
                let tag = if rec.advisory { " [advisory]" } else { "" };
                println!("  - {:?}{}: {}", rec.kind, tag, rec.description);
            }
        }
        Commands::Evolve { reason, json } => {
            let controller = open_controller(config, storage).await?;
            let result = controller.run_evolution_cycle(&reason).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }
            println!("Cycle {}: {}", result.cycle_id, result.status);
            if let Some(rejection) = &result.rejection {
                println!("  Reason: {}", rejection);
            }
            if let Some(error) = &result.error {
                println!("  Error: {}", error);
            }
            if let Some(diff) = &result.diff {
                println!("  Plan: {}", join(diff.plan.iter()));
                println!(
                    "  Parameters: {} -> {} ({:.1}% smaller, ratio {:.3})",
                    diff.parameters_before,
                    diff.parameters_after,
                    diff.reduction_pct,
                    diff.compression_ratio
                );
            }
            if let Some(report) = &result.report {
                println!(
                    "  Validation: {} (accuracy drop {:.2}%, hallucination {:.3}, latency {:+.1}%)",
                    report.verdict,
                    report.accuracy_drop_pct,
                    report.hallucination_rate,
                    report.latency_delta_pct
                );
            }
            if let Some(version) = result.new_version {
                println!("  Promoted: {}", version);
            }
        }
        Commands::Status => {
            let controller = open_controller(config, storage).await?;
            let summary = controller.governance().summary().await?;

            println!("evoloop status");
            println!("  Active: {}", summary.registry.active);
            println!("  Versions: {}", summary.registry.total_versions);
            println!(
                "  Latest: {} (ratio {:.3}, accuracy drop {:.2}%)",
                summary.registry.latest,
                summary.registry.latest_compression_ratio,
                summary.registry.latest_accuracy_drop_pct
            );
            println!("  Audit entries: {}", summary.audit_entries);
            if let Some(last) = &summary.last_audit {
                println!("  Last audit: {} {} {}", last.action, last.status, last.reason);
            }
            if let Some(sample) = &summary.latest_drift {
                println!("  Drift: {:.3} (flag {})", sample.score, sample.flag);
            }
        }
        Commands::Lineage { id } => {
            let registry = ModelRegistry::open(storage).await?;
            let id = match id {
                Some(raw) => parse_version(&raw)?,
                None => registry.active().id,
            };

            println!("Lineage of {}", id);
            for version in registry.lineage(id)? {
                println!(
                    "  {} | {} | ratio {:.3} | drop {:.2}% | {}",
                    version.id,
                    version.status(),
                    version.compression_ratio,
                    version.accuracy_drop_pct,
                    join(version.optimizations.iter())
                );
            }
        }
        Commands::Audit { limit } => {
            let limit = limit.unwrap_or(config.governance.audit_limit);
            let controller = open_controller(config, storage).await?;
            let entries = controller.governance().audit(limit).await?;

            println!("Audit ({})", entries.len());
            for entry in entries {
                let version = entry.version.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "  #{} {} | {} | {} | {} | {}",
                    entry.seq, entry.timestamp, entry.action, version, entry.status, entry.reason
                );
            }
        }
        Commands::Rollback { reason, to } => {
            let controller = open_controller(config, storage).await?;
            let governance = controller.governance();
            let outcome = match to {
                Some(raw) => governance.rollback_to(parse_version(&raw)?, &reason, "cli").await?,
                None => governance.rollback(&reason, "cli").await?,
            };

            match outcome {
                RollbackOutcome::Ok { from, to } => println!("Rolled back {} -> {}", from, to),
                RollbackOutcome::NoBackup => println!("No backup: active version is the root"),
            }
        }
        Commands::Drift => {
            let records = storage.load_telemetry().await?;
            let detector = DriftDetector::with_config(config.drift.clone());
            let (reference, recent) = records.split_at(config.drift.window_size.min(records.len()));
            for record in reference {
                detector.observe(record);
            }
            if !detector.freeze_reference() {
                println!("No telemetry to score");
                return Ok(());
            }
            for record in recent {
                detector.observe(record);
            }
            let sample = detector.score();

            println!("Drift over {} records", records.len());
            println!("  Score: {:.3} (threshold {:.3})", sample.score, sample.threshold);
            println!("  Embedding shift: {:.3}", sample.components.embedding_shift);
            println!("  Vocabulary shift: {:.3}", sample.components.vocabulary_shift);
            println!("  Intent variance: {:.3}", sample.components.intent_variance);
            println!("  Flag: {}", if sample.flag { "DRIFTING" } else { "stable" });
        }
    }

    Ok(())
}

/// Shape of the model served by the local setup.
fn base_model() -> ModelArtifact {
    ModelArtifact::synthetic("base", 6, 8, 64, 256)
}

async fn open_controller(config: ControllerConfig, storage: Arc<dyn Storage>) -> Result<EvolutionController> {
    let model = base_model();
    let telemetry: Arc<dyn TelemetrySource> =
        Arc::new(InMemoryTelemetryStore::from_storage(storage.as_ref()).await?);

    let eval_set = EvaluationSet::standard();
    let runner = SimulatedRunner::for_model(&model).with_facts(eval_set.factual_checks.iter());
    let validator: Arc<dyn Validator> = Arc::new(
        ValidationSandbox::new(Arc::new(runner))
            .with_config(config.validation.clone())
            .with_eval_set(eval_set),
    );

    let controller = EvolutionController::open(config, storage, telemetry, &model, validator).await?;
    info!("Active version {}", controller.registry().active().id);
    Ok(controller)
}

fn parse_version(raw: &str) -> Result<VersionId> {
    raw.parse()
        .with_context(|| format!("invalid version id '{}'", raw))
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    let parts: Vec<String> = items.map(|i| i.to_string()).collect();
    if parts.is_empty() {
        "-".to_string()
    } else {
        parts.join(", ")
    }
}
