//! Cycle orchestrator.
//!
//! Each business cycle fetches its working set from storage, decides what to
//! do (lead scorer or decision engine), dispatches tasks through the handler
//! registry wrapped by the recovery policy, and records the outcome. Cycles
//! touch disjoint data and may run concurrently; leads are additionally
//! claimed so two runs never process the same lead at once.

mod optimization;
mod report;

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Datelike, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use optimization::{
    LOOKBACK_HOURS, Optimization, OptimizationKind, TaskKindStats, identify_optimizations,
    task_stats,
};
pub use report::{
    AllCyclesReport, Briefing, CycleFailure, CycleKind, CycleReport, CycleStatus, MetricRecord,
};

use crate::decision::DecisionEngine;
use crate::error::{CadenceError, Result};
use crate::lead::{Lead, LeadChannel, QualificationStatus};
use crate::recovery::RecoveryPolicy;
use crate::registry::HandlerRegistry;
use crate::scoring::LeadScorer;
use crate::state_machine::{Payload, Task, TaskSpec};
use crate::storage::{EntityKind, Store};

pub const OPPORTUNITY_CATEGORIES: [&str; 7] = [
    "speaking",
    "board",
    "consulting",
    "media",
    "partnership",
    "grant",
    "investment",
];

/// Tunables for the cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub qualification_threshold: f64,
    pub daily_revenue_target: f64,
    pub opportunity_limit: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            qualification_threshold: 0.7,
            daily_revenue_target: 1000.0,
            opportunity_limit: 5,
        }
    }
}

/// An opportunity as returned by a `scan_opportunities` handler.
#[derive(Debug, Clone, Deserialize)]
struct Opportunity {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    value: f64,
}

pub struct CycleOrchestrator {
    store: Arc<dyn Store>,
    registry: Arc<HandlerRegistry>,
    recovery: Arc<RecoveryPolicy>,
    decisions: Arc<dyn DecisionEngine>,
    scorer: LeadScorer,
    settings: OrchestratorSettings,
    claims: Mutex<HashSet<String>>,
    statuses: Mutex<HashMap<CycleKind, CycleStatus>>,
}

/// Releases claimed lead ids when dropped.
struct LeadClaims<'a> {
    claims: &'a Mutex<HashSet<String>>,
    ids: Vec<String>,
}

impl Drop for LeadClaims<'_> {
    fn drop(&mut self) {
        let mut claims = self.claims.lock();
        for id in &self.ids {
            claims.remove(id);
        }
    }
}

impl CycleOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<HandlerRegistry>,
        recovery: Arc<RecoveryPolicy>,
        decisions: Arc<dyn DecisionEngine>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            registry,
            recovery,
            decisions,
            scorer: LeadScorer::default(),
            settings,
            claims: Mutex::new(HashSet::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn recovery(&self) -> &RecoveryPolicy {
        &self.recovery
    }

    /// Last known status of every cycle, in [`CycleKind::ALL`] order.
    pub fn status(&self) -> Vec<(CycleKind, CycleStatus)> {
        let statuses = self.statuses.lock();
        CycleKind::ALL
            .into_iter()
            .map(|kind| (kind, statuses.get(&kind).cloned().unwrap_or_default()))
            .collect()
    }

    /// Most recent stored report of each cycle that has one, in
    /// [`CycleKind::ALL`] order. Unlike [`status`](Self::status) this
    /// survives restarts.
    pub async fn last_reports(&self) -> Result<Vec<CycleReport>> {
        let metrics = self.metrics().await?;
        Ok(CycleKind::ALL
            .into_iter()
            .filter_map(|kind| {
                cycle_reports(&metrics, kind)
                    .max_by_key(|r| r.finished_at)
                    .cloned()
            })
            .collect())
    }

    pub async fn run_cycle(&self, kind: CycleKind) -> Result<CycleReport> {
        self.run_cycle_with(kind, &CancellationToken::new()).await
    }

    /// Run one cycle, stopping early with [`CadenceError::Cancelled`] if
    /// `cancel` fires between tasks. A panic in the cycle body is returned
    /// as [`CadenceError::Panicked`] and counted as a failed run.
    pub async fn run_cycle_with(
        &self,
        kind: CycleKind,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        tracing::info!(cycle = %kind, "cycle started");
        let mut report = CycleReport::start(kind);

        let body = async {
            match kind {
                CycleKind::LeadGeneration => self.lead_generation(&mut report, cancel).await,
                CycleKind::Revenue => self.revenue(&mut report, cancel).await,
                CycleKind::Content => self.content(&mut report, cancel).await,
                CycleKind::Opportunity => self.opportunity(&mut report, cancel).await,
                CycleKind::ClientCare => self.client_care(&mut report, cancel).await,
                CycleKind::SystemOptimization => self.system_optimization(&mut report).await,
                CycleKind::WeeklyBriefing => self.weekly_briefing(&mut report).await,
            }
        };
        let outcome = AssertUnwindSafe(body)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(CadenceError::Panicked(format!("cycle {kind}"))));
        report.finished_at = Utc::now();

        let outcome = match outcome {
            Ok(()) => self.save_metric(MetricRecord::CycleReport(report.clone())).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    cycle = %kind,
                    dispatched = report.dispatched,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "cycle finished"
                );
                self.record_success(kind);
                Ok(report)
            }
            Err(e) => {
                match &e {
                    CadenceError::ManualInterventionRequired(_) => {
                        tracing::error!(
                            cycle = %kind,
                            error = %e,
                            "cycle aborted, manual intervention required"
                        )
                    }
                    CadenceError::Cancelled => tracing::info!(cycle = %kind, "cycle cancelled"),
                    _ => tracing::error!(cycle = %kind, error = %e, "cycle failed"),
                }
                self.record_failure(kind, &e);
                Err(e)
            }
        }
    }

    /// Run every cycle concurrently.
    pub async fn run_all_cycles(self: &Arc<Self>) -> AllCyclesReport {
        self.run_cycles(&CycleKind::ALL).await
    }

    /// Run `kinds` concurrently. A failing or panicking cycle is reported in
    /// `failed` and never prevents the others from completing.
    pub async fn run_cycles(self: &Arc<Self>, kinds: &[CycleKind]) -> AllCyclesReport {
        let mut set = JoinSet::new();
        for &kind in kinds {
            let this = Arc::clone(self);
            set.spawn(async move {
                let outcome = this.run_cycle(kind).await.map_err(|e| e.to_string());
                (kind, outcome)
            });
        }

        let mut all = AllCyclesReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(report))) => all.completed.push(report),
                Ok((cycle, Err(error))) => all.failed.push(CycleFailure { cycle, error }),
                Err(e) => tracing::error!(error = %e, "cycle task did not complete"),
            }
        }
        all.completed.sort_by_key(|r| r.cycle);
        all.failed.sort_by_key(|f| f.cycle);
        all
    }

    fn record_success(&self, kind: CycleKind) {
        let mut statuses = self.statuses.lock();
        let status = statuses.entry(kind).or_default();
        status.runs += 1;
        status.last_success = Some(Utc::now());
    }

    fn record_failure(&self, kind: CycleKind, error: &CadenceError) {
        let mut statuses = self.statuses.lock();
        let status = statuses.entry(kind).or_default();
        status.runs += 1;
        status.last_failure = Some(Utc::now());
        status.last_error = Some(error.to_string());
    }

    /// Build, dispatch and persist one task.
    ///
    /// Returns `Ok(None)` when the handler failed in a way the cycle can
    /// absorb; errors that abort the cycle are returned.
    async fn dispatch(
        &self,
        report: &mut CycleReport,
        cancel: &CancellationToken,
        spec: TaskSpec,
    ) -> Result<Option<Payload>> {
        if cancel.is_cancelled() {
            return Err(CadenceError::Cancelled);
        }

        let kind = spec.kind();
        let mut task = Task::new(spec);
        task.start()?;
        report.dispatched += 1;
        tracing::debug!(cycle = %report.cycle, kind = %kind, task = %task.id, "dispatching task");

        let used_fallback = AtomicBool::new(false);
        let outcome = {
            let domain = report.cycle.as_str();
            let registry = &self.registry;
            let task = &task;
            if registry.has_fallback(kind) {
                self.recovery
                    .execute_with_fallback(
                        domain,
                        || registry.dispatch(kind, task),
                        || {
                            used_fallback.store(true, Ordering::Relaxed);
                            registry.fallback(kind, task)
                        },
                    )
                    .await
            } else {
                self.recovery
                    .execute(domain, || registry.dispatch(kind, task))
                    .await
            }
        };

        match outcome {
            Ok(result) => {
                task.complete(result.clone())?;
                report.succeeded += 1;
                if used_fallback.load(Ordering::Relaxed) {
                    report.recovered += 1;
                }
                self.save_task(&task).await?;
                self.record_revenue(&task, &result).await?;
                Ok(Some(result))
            }
            Err(e) if e.aborts_cycle() => {
                task.fail(e.to_string())?;
                report.failed += 1;
                if let Err(save_err) = self.save_task(&task).await {
                    tracing::warn!(
                        task = %task.id,
                        error = %save_err,
                        "could not persist aborted task"
                    );
                }
                Err(e)
            }
            Err(e) => {
                task.fail(e.to_string())?;
                report.failed += 1;
                report.errors.push(e.to_string());
                self.save_task(&task).await?;
                Ok(None)
            }
        }
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        self.store
            .save(EntityKind::Tasks, &task.id, serde_json::to_value(task)?)
            .await
    }

    async fn save_metric(&self, record: MetricRecord) -> Result<()> {
        let id = record.id().to_string();
        self.store
            .save(EntityKind::Metrics, &id, serde_json::to_value(&record)?)
            .await
    }

    /// Store any positive `revenue` a handler reported.
    async fn record_revenue(&self, task: &Task, result: &Payload) -> Result<()> {
        let Some(amount) = result.get("revenue").and_then(Value::as_f64) else {
            return Ok(());
        };
        if amount <= 0.0 {
            return Ok(());
        }
        self.save_metric(MetricRecord::Revenue {
            id: Uuid::new_v4().to_string(),
            amount,
            source: task.kind,
            at: Utc::now(),
        })
        .await
    }

    async fn metrics(&self) -> Result<Vec<MetricRecord>> {
        let raw = self.store.fetch(EntityKind::Metrics).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable metric record");
                    None
                }
            })
            .collect())
    }

    async fn stored_tasks(&self) -> Result<Vec<Task>> {
        let raw = self.store.fetch(EntityKind::Tasks).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(task) => Some(task),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable task record");
                    None
                }
            })
            .collect())
    }

    async fn stored_leads(&self) -> Result<Vec<Lead>> {
        let raw = self.store.fetch(EntityKind::Leads).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(lead) => Some(lead),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable lead record");
                    None
                }
            })
            .collect())
    }

    async fn save_lead(&self, lead: &Lead) -> Result<()> {
        self.store
            .save(EntityKind::Leads, &lead.id, serde_json::to_value(lead)?)
            .await
    }

    /// Claim every lead not already claimed by another run; the rest are
    /// dropped from `leads`.
    fn claim_leads<'a>(&'a self, leads: &mut Vec<Lead>) -> LeadClaims<'a> {
        let mut claims = self.claims.lock();
        let mut ids = Vec::new();
        leads.retain(|lead| {
            if claims.insert(lead.id.clone()) {
                ids.push(lead.id.clone());
                true
            } else {
                tracing::warn!(lead = %lead.id, "lead claimed by another run, skipping");
                false
            }
        });
        LeadClaims {
            claims: &self.claims,
            ids,
        }
    }

    async fn lead_generation(
        &self,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let patterns = conversion_patterns(&self.metrics().await?);
        let targets = self.decisions.lead_targets(&patterns).await;
        report.decision = Some(targets.source().to_string());
        let targets = targets.into_inner();

        let mut sourced = Vec::new();
        for channel in LeadChannel::ALL {
            let count = targets.for_channel(channel);
            if count == 0 {
                continue;
            }
            if let Some(out) = self
                .dispatch(report, cancel, TaskSpec::SourceLeads { channel, count })
                .await?
            {
                sourced.extend(sourced_leads(&out, channel));
            }
        }

        // A lead sourced again keeps its stored record and history.
        let stored = self.stored_leads().await?;
        let known: HashMap<&str, &Lead> = stored.iter().map(|l| (l.id.as_str(), l)).collect();
        let mut seen = HashSet::new();
        let mut leads = Vec::new();
        for lead in sourced {
            if !seen.insert(lead.id.clone()) {
                continue;
            }
            match known.get(lead.id.as_str()) {
                None => leads.push(lead),
                Some(existing) if existing.is_unprocessed() => leads.push((*existing).clone()),
                Some(_) => tracing::debug!(lead = %lead.id, "lead already processed, skipping"),
            }
        }
        for lead in &stored {
            if lead.is_unprocessed() && seen.insert(lead.id.clone()) {
                leads.push(lead.clone());
            }
        }

        let _claims = self.claim_leads(&mut leads);
        let threshold = self.settings.qualification_threshold;
        let qualified = self.scorer.qualify(&mut leads, threshold);
        report.scored = leads.len();
        report.qualified = qualified.len();

        for lead in &mut leads {
            lead.append_status(QualificationStatus::Scored);
            let passed = lead.score.unwrap_or(0.0) >= threshold;
            lead.append_status(if passed {
                QualificationStatus::Qualified
            } else {
                QualificationStatus::Disqualified
            });
            self.save_lead(lead).await?;
        }

        for best in &qualified {
            let spec = TaskSpec::StartContactSequence {
                lead_id: best.id.clone(),
                email: best.email.clone(),
                score: best.score.unwrap_or(0.0),
            };
            if self.dispatch(report, cancel, spec).await?.is_some() {
                if let Some(lead) = leads.iter_mut().find(|l| l.id == best.id) {
                    lead.append_status(QualificationStatus::Contacted);
                    self.save_lead(lead).await?;
                }
            }
        }

        tracing::info!(
            scored = report.scored,
            qualified = report.qualified,
            "leads qualified"
        );
        Ok(())
    }

    async fn revenue(&self, report: &mut CycleReport, cancel: &CancellationToken) -> Result<()> {
        let today = Utc::now().date_naive();
        let earned: f64 = self
            .metrics()
            .await?
            .iter()
            .filter_map(|m| match m {
                MetricRecord::Revenue { amount, at, .. } if at.date_naive() == today => {
                    Some(*amount)
                }
                _ => None,
            })
            .sum();

        let gap = self.settings.daily_revenue_target - earned;
        if gap <= 0.0 {
            tracing::info!(
                earned,
                target = self.settings.daily_revenue_target,
                "daily revenue target met"
            );
            return Ok(());
        }

        self.dispatch(report, cancel, TaskSpec::FollowUpProposals { revenue_gap: gap })
            .await?;
        self.dispatch(report, cancel, TaskSpec::NurtureWarmLeads { revenue_gap: gap })
            .await?;
        Ok(())
    }

    async fn content(&self, report: &mut CycleReport, cancel: &CancellationToken) -> Result<()> {
        let performance = content_performance(&self.metrics().await?);
        let plan = self.decisions.content_topics(&performance).await;
        report.decision = Some(plan.source().to_string());

        for (channel, topic) in plan.into_inner().topics {
            self.dispatch(report, cancel, TaskSpec::CreateContent { channel, topic })
                .await?;
        }
        Ok(())
    }

    async fn opportunity(
        &self,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut found: Vec<Opportunity> = Vec::new();
        for category in OPPORTUNITY_CATEGORIES {
            let spec = TaskSpec::ScanOpportunities {
                category: category.to_string(),
            };
            if let Some(out) = self.dispatch(report, cancel, spec).await? {
                found.extend(scanned_opportunities(&out));
            }
        }

        found.sort_by(|a, b| b.value.total_cmp(&a.value));
        found.truncate(self.settings.opportunity_limit);

        for opportunity in found {
            let spec = TaskSpec::ApplyOpportunity {
                opportunity_id: opportunity.id,
                title: opportunity.title,
                value: opportunity.value,
            };
            self.dispatch(report, cancel, spec).await?;
        }
        Ok(())
    }

    async fn client_care(
        &self,
        report: &mut CycleReport,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for spec in [
            TaskSpec::RespondInquiries,
            TaskSpec::ScheduleMeetings,
            TaskSpec::SendFollowUps,
        ] {
            self.dispatch(report, cancel, spec).await?;
        }
        Ok(())
    }

    async fn system_optimization(&self, report: &mut CycleReport) -> Result<()> {
        let since = Utc::now() - chrono::Duration::hours(LOOKBACK_HOURS);
        let stats = task_stats(&self.stored_tasks().await?, since);
        let items = identify_optimizations(&stats);
        report.flagged = items.len();

        for item in &items {
            tracing::info!(
                task_kind = %item.task_kind,
                kind = ?item.kind,
                current = item.current,
                target = item.target,
                method = %item.method,
                "optimization flagged"
            );
        }
        self.save_metric(MetricRecord::Optimizations {
            id: Uuid::new_v4().to_string(),
            at: Utc::now(),
            stats,
            items,
        })
        .await
    }

    async fn weekly_briefing(&self, report: &mut CycleReport) -> Result<()> {
        let key_metrics = weekly_metrics(&self.metrics().await?);
        let strategy = self.decisions.weekly_strategy(&key_metrics).await;
        report.decision = Some(strategy.source().to_string());

        let now = Utc::now();
        let today = now.date_naive();
        let week_of = today - chrono::Duration::days(today.weekday().num_days_from_monday().into());
        let briefing = Briefing {
            id: Uuid::new_v4().to_string(),
            week_of,
            generated_at: now,
            key_metrics,
            strategy_source: strategy.source().to_string(),
            strategy: strategy.into_inner(),
        };
        self.store
            .save(EntityKind::Briefings, &briefing.id, serde_json::to_value(&briefing)?)
            .await?;
        tracing::info!(week_of = %briefing.week_of, "weekly briefing ready for review");
        Ok(())
    }
}

/// Leads in a `source_leads` result. Unreadable entries are skipped.
fn sourced_leads(out: &Payload, channel: LeadChannel) -> Vec<Lead> {
    let Some(Value::Array(items)) = out.get("leads") else {
        tracing::warn!(channel = %channel, "source_leads result has no `leads` array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<Lead>(item.clone()).ok())
        .map(|mut lead| {
            lead.source.get_or_insert(channel);
            lead
        })
        .collect()
}

fn scanned_opportunities(out: &Payload) -> Vec<Opportunity> {
    match out.get("opportunities") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn cycle_reports(metrics: &[MetricRecord], cycle: CycleKind) -> impl Iterator<Item = &CycleReport> {
    metrics.iter().filter_map(move |m| match m {
        MetricRecord::CycleReport(r) if r.cycle == cycle => Some(r),
        _ => None,
    })
}

fn conversion_patterns(metrics: &[MetricRecord]) -> Value {
    let (runs, scored, qualified) = cycle_reports(metrics, CycleKind::LeadGeneration)
        .fold((0usize, 0usize, 0usize), |(n, s, q), r| (n + 1, s + r.scored, q + r.qualified));
    let rate = if scored == 0 { 0.0 } else { qualified as f64 / scored as f64 };
    json!({
        "runs": runs,
        "leads_scored": scored,
        "leads_qualified": qualified,
        "qualification_rate": rate,
    })
}

fn content_performance(metrics: &[MetricRecord]) -> Value {
    let (runs, published, failed) = cycle_reports(metrics, CycleKind::Content)
        .fold((0usize, 0usize, 0usize), |(n, p, f), r| (n + 1, p + r.succeeded, f + r.failed));
    json!({
        "runs": runs,
        "pieces_published": published,
        "pieces_failed": failed,
    })
}

fn weekly_metrics(metrics: &[MetricRecord]) -> Value {
    let since = Utc::now() - chrono::Duration::days(7);
    let mut per_cycle = serde_json::Map::new();
    for cycle in CycleKind::ALL {
        let recent: Vec<&CycleReport> = cycle_reports(metrics, cycle)
            .filter(|r| r.finished_at >= since)
            .collect();
        per_cycle.insert(
            cycle.as_str().to_string(),
            json!({
                "runs": recent.len(),
                "dispatched": recent.iter().map(|r| r.dispatched).sum::<usize>(),
                "failed": recent.iter().map(|r| r.failed).sum::<usize>(),
            }),
        );
    }
    let revenue: f64 = metrics
        .iter()
        .filter_map(|m| match m {
            MetricRecord::Revenue { amount, at, .. } if *at >= since => Some(*amount),
            _ => None,
        })
        .sum();
    json!({
        "revenue": revenue,
        "cycles": per_cycle,
    })
}
