use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::optimization::{Optimization, TaskKindStats};
use crate::decision::StrategyBrief;
use crate::state_machine::TaskKind;

/// One recurring unit of business logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    LeadGeneration,
    Revenue,
    Content,
    Opportunity,
    ClientCare,
    SystemOptimization,
    WeeklyBriefing,
}

impl CycleKind {
    pub const ALL: [CycleKind; 7] = [
        CycleKind::LeadGeneration,
        CycleKind::Revenue,
        CycleKind::Content,
        CycleKind::Opportunity,
        CycleKind::ClientCare,
        CycleKind::SystemOptimization,
        CycleKind::WeeklyBriefing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CycleKind::LeadGeneration => "lead_generation",
            CycleKind::Revenue => "revenue",
            CycleKind::Content => "content",
            CycleKind::Opportunity => "opportunity",
            CycleKind::ClientCare => "client_care",
            CycleKind::SystemOptimization => "system_optimization",
            CycleKind::WeeklyBriefing => "weekly_briefing",
        }
    }

    pub fn default_interval(self) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        Duration::from_secs(match self {
            CycleKind::LeadGeneration => HOUR,
            CycleKind::Revenue => 2 * HOUR,
            CycleKind::Content => 3 * HOUR,
            CycleKind::Opportunity => 4 * HOUR,
            CycleKind::ClientCare => 30 * MINUTE,
            CycleKind::SystemOptimization => 6 * HOUR,
            CycleKind::WeeklyBriefing => 7 * 24 * HOUR,
        })
    }

    /// Wait before the first run of a cycle pinned to the wall clock, or
    /// `None` if it starts one interval after launch. The weekly briefing
    /// is pinned to Monday 08:00.
    pub fn first_run_delay(self, now: NaiveDateTime) -> Option<Duration> {
        if self != CycleKind::WeeklyBriefing {
            return None;
        }
        let at = NaiveTime::from_hms_opt(8, 0, 0)?;
        let days_ahead = (7 - now.weekday().num_days_from_monday()) % 7;
        let mut next = (now.date() + chrono::Duration::days(days_ahead.into())).and_time(at);
        if next <= now {
            next += chrono::Duration::days(7);
        }
        (next - now).to_std().ok()
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        CycleKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = CycleKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown cycle `{s}` (expected one of: {})", names.join(", "))
            })
    }
}

/// Summary of one completed cycle run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub id: String,
    pub cycle: CycleKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dispatched: usize,
    pub succeeded: usize,
    /// Succeeded through a handler's fallback.
    pub recovered: usize,
    pub failed: usize,
    #[serde(default)]
    pub scored: usize,
    #[serde(default)]
    pub qualified: usize,
    /// Optimizations raised by the system optimization cycle.
    #[serde(default)]
    pub flagged: usize,
    /// `"model"` or `"default"` when the cycle consulted the decision engine.
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl CycleReport {
    pub(crate) fn start(cycle: CycleKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cycle,
            started_at: now,
            finished_at: now,
            dispatched: 0,
            succeeded: 0,
            recovered: 0,
            failed: 0,
            scored: 0,
            qualified: 0,
            flagged: 0,
            decision: None,
            errors: Vec::new(),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub cycle: CycleKind,
    pub error: String,
}

/// Outcome of running several cycles concurrently. Failed cycles never hide
/// the reports of the ones that completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllCyclesReport {
    pub completed: Vec<CycleReport>,
    pub failed: Vec<CycleFailure>,
}

impl AllCyclesReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Last known outcome of a cycle in this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStatus {
    pub runs: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CycleStatus {
    /// Whether the most recent run failed.
    pub fn is_failing(&self) -> bool {
        match (self.last_success, self.last_failure) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(ok), Some(failed)) => failed > ok,
        }
    }
}

/// Records kept under the `metrics` entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricRecord {
    CycleReport(CycleReport),
    /// Revenue a handler reported while completing a task.
    Revenue {
        id: String,
        amount: f64,
        source: TaskKind,
        at: DateTime<Utc>,
    },
    /// Task health and the optimizations it called for.
    Optimizations {
        id: String,
        at: DateTime<Utc>,
        stats: Vec<TaskKindStats>,
        items: Vec<Optimization>,
    },
}

impl MetricRecord {
    pub fn id(&self) -> &str {
        match self {
            MetricRecord::CycleReport(report) => &report.id,
            MetricRecord::Revenue { id, .. } | MetricRecord::Optimizations { id, .. } => id,
        }
    }
}

/// The weekly briefing left for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Briefing {
    pub id: String,
    pub week_of: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub key_metrics: serde_json::Value,
    pub strategy: StrategyBrief,
    /// `"model"` or `"default"`.
    pub strategy_source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_names_parse_back() {
        for kind in CycleKind::ALL {
            assert_eq!(kind.as_str().parse::<CycleKind>().unwrap(), kind);
        }
        assert_eq!("Client-Care".parse::<CycleKind>().unwrap(), CycleKind::ClientCare);
        let err = "payroll".parse::<CycleKind>().unwrap_err();
        assert!(err.contains("lead_generation"));
    }

    #[test]
    fn default_intervals() {
        assert_eq!(CycleKind::ClientCare.default_interval(), Duration::from_secs(1800));
        assert_eq!(CycleKind::Revenue.default_interval(), Duration::from_secs(7200));
        assert_eq!(
            CycleKind::SystemOptimization.default_interval(),
            Duration::from_secs(21_600)
        );
        assert_eq!(
            CycleKind::WeeklyBriefing.default_interval(),
            Duration::from_secs(604_800)
        );
    }

    #[test]
    fn weekly_briefing_first_runs_next_monday_morning() {
        let at = |date: &str| NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M").unwrap();
        let first = |now: &str| CycleKind::WeeklyBriefing.first_run_delay(at(now)).unwrap();

        // 2026-10-21 is a Wednesday
        assert_eq!(first("2026-10-21 10:00"), Duration::from_secs((4 * 24 + 22) * 3600));
        assert_eq!(first("2026-10-19 07:00"), Duration::from_secs(3600));
        assert_eq!(first("2026-10-19 09:00"), Duration::from_secs((6 * 24 + 23) * 3600));
        assert_eq!(first("2026-10-25 23:30"), Duration::from_secs(8 * 3600 + 1800));

        assert_eq!(CycleKind::Revenue.first_run_delay(at("2026-10-21 10:00")), None);
    }

    #[test]
    fn status_tracks_most_recent_outcome() {
        let mut status = CycleStatus::default();
        assert!(!status.is_failing());
        status.last_failure = Some(Utc::now());
        assert!(status.is_failing());
        status.last_success = Some(Utc::now() + chrono::Duration::seconds(1));
        assert!(!status.is_failing());
    }

    #[test]
    fn metric_records_are_tagged() {
        let report = CycleReport::start(CycleKind::Content);
        let json = serde_json::to_value(MetricRecord::CycleReport(report.clone())).unwrap();
        assert_eq!(json["type"], "cycle_report");
        assert_eq!(json["cycle"], "content");

        let back: MetricRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), report.id);
    }
}
