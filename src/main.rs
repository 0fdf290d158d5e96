use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use cadence::agents::register_default_agents;
use cadence::alert::{Alerter, LogAlerter, WebhookAlerter};
use cadence::anthropic::AnthropicClient;
use cadence::cli::{Cli, Command};
use cadence::config::CadenceConfig;
use cadence::decision::{DecisionEngine, LlmDecisionEngine, StaticDecisionEngine};
use cadence::lead::Lead;
use cadence::orchestrator::{CycleKind, CycleOrchestrator};
use cadence::recovery::RecoveryPolicy;
use cadence::registry::HandlerRegistry;
use cadence::scheduler::PeriodicScheduler;
use cadence::scoring::LeadScorer;
use cadence::storage::SqliteStore;
use cadence::ui::{CycleProgress, Printer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "cadence=debug" } else { "cadence=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let mut config = CadenceConfig::load(&cli.config)?;
    if let Some(max_retries) = cli.max_retries {
        config.max_recovery_attempts = max_retries;
    }
    let printer = Printer::default();

    match cli.command {
        Command::Run => run(&config).await,
        Command::Cycle { name } => {
            let orchestrator = build_orchestrator(&config).await?;
            let progress = CycleProgress::start(&format!("running {name}"));
            let outcome = orchestrator.run_cycle(name).await;
            progress.finish();
            match outcome {
                Ok(report) => {
                    printer.report(&report);
                    Ok(())
                }
                Err(e) => {
                    printer.failure(name, &e.to_string());
                    Err(e.into())
                }
            }
        }
        Command::All => {
            let orchestrator = build_orchestrator(&config).await?;
            let progress = CycleProgress::start("running all cycles");
            let all = orchestrator.run_all_cycles().await;
            progress.finish();
            printer.all(&all);
            if all.is_clean() {
                Ok(())
            } else {
                anyhow::bail!("{} cycle(s) failed", all.failed.len())
            }
        }
        Command::Score { file, threshold } => {
            let threshold = threshold.unwrap_or(config.qualification_threshold);
            let mut leads = read_leads(&file)?;
            LeadScorer::default().qualify(&mut leads, threshold);
            leads.sort_by(|a, b| {
                b.score
                    .unwrap_or_default()
                    .total_cmp(&a.score.unwrap_or_default())
            });
            printer.scores(&leads, threshold);
            Ok(())
        }
        Command::Status => {
            let orchestrator = build_orchestrator(&config).await?;
            let intervals: Vec<_> = CycleKind::ALL
                .into_iter()
                .map(|kind| (kind, config.intervals.for_cycle(kind)))
                .collect();
            let reports = orchestrator.last_reports().await?;
            printer.status(&intervals, &reports);
            Ok(())
        }
    }
}

async fn build_orchestrator(config: &CadenceConfig) -> Result<Arc<CycleOrchestrator>> {
    let store = SqliteStore::open(&config.data_dir).await?;

    let registry = HandlerRegistry::new();
    register_default_agents(&registry);

    let alerter: Arc<dyn Alerter> = match &config.alert_webhook_url {
        Some(url) => Arc::new(WebhookAlerter::new(url.clone(), config.call_timeout())?),
        None => Arc::new(LogAlerter),
    };

    let decisions: Arc<dyn DecisionEngine> = if config.has_api_key() {
        let client = AnthropicClient::new(config.api_key.clone(), config.call_timeout())?;
        Arc::new(LlmDecisionEngine::new(
            client,
            config.model.clone(),
            config.call_timeout(),
        ))
    } else {
        tracing::info!("no api key configured, using default decisions");
        Arc::new(StaticDecisionEngine)
    };

    let recovery = RecoveryPolicy::new(
        config.max_recovery_attempts,
        config.call_timeout(),
        alerter,
    );

    Ok(Arc::new(CycleOrchestrator::new(
        Arc::new(store),
        Arc::new(registry),
        Arc::new(recovery),
        decisions,
        config.orchestrator_settings(),
    )))
}

async fn run(config: &CadenceConfig) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let mut scheduler = PeriodicScheduler::new(config.tick(), config.shutdown_grace())?;

    let now = chrono::Local::now().naive_local();
    for kind in CycleKind::ALL {
        let interval = config.intervals.for_cycle(kind);
        let first_due = Instant::now() + kind.first_run_delay(now).unwrap_or(interval);
        let orchestrator = Arc::clone(&orchestrator);
        scheduler.add_job_from(kind.as_str(), first_due, interval, move |cancel| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.run_cycle_with(kind, &cancel).await?;
                Ok(())
            }
        })?;
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(e) => tracing::error!(error = %e, "cannot listen for ctrl-c, shutting down"),
        }
        on_signal.cancel();
    });

    scheduler.run(cancel).await;

    for (kind, status) in orchestrator.status() {
        if status.is_failing() {
            tracing::warn!(
                cycle = %kind,
                error = ?status.last_error,
                "cycle was failing at shutdown"
            );
        }
    }
    let escalated = orchestrator.recovery().escalated();
    if !escalated.is_empty() {
        tracing::warn!(?escalated, "unresolved escalations");
    }
    Ok(())
}

fn read_leads(path: &Path) -> Result<Vec<Lead>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing leads in {}", path.display()))
}
