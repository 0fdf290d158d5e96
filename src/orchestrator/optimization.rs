//! Task health analysis behind the system optimization cycle.
//!
//! Stored tasks that reached a terminal status inside the lookback window
//! are grouped by kind. Kinds that fail too often or run too slowly are
//! flagged with a target and the method expected to reach it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::{Task, TaskKind, TaskStatus};

/// How far back finished tasks are considered.
pub const LOOKBACK_HOURS: i64 = 24;

/// Below this success rate a task kind is flagged.
pub const SUCCESS_RATE_FLOOR: f64 = 0.90;

/// Above this mean duration, in seconds, a task kind is flagged.
pub const SLOW_TASK_SECS: f64 = 3.0;

/// Health of one task kind over the lookback window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskKindStats {
    pub task_kind: TaskKind,
    pub finished: usize,
    pub success_rate: f64,
    /// Mean time from creation to terminal status.
    pub mean_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationKind {
    #[serde(rename = "success_rate_optimization")]
    SuccessRate,
    #[serde(rename = "performance_optimization")]
    Performance,
}

impl OptimizationKind {
    pub fn target(self) -> f64 {
        match self {
            OptimizationKind::SuccessRate => 0.95,
            OptimizationKind::Performance => 2.0,
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            OptimizationKind::SuccessRate => "error_pattern_analysis",
            OptimizationKind::Performance => "caching_and_batching",
        }
    }
}

/// A task kind that needs attention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Optimization {
    pub task_kind: TaskKind,
    pub kind: OptimizationKind,
    pub current: f64,
    pub target: f64,
    pub method: String,
}

impl Optimization {
    fn new(task_kind: TaskKind, kind: OptimizationKind, current: f64) -> Self {
        Self {
            task_kind,
            kind,
            current,
            target: kind.target(),
            method: kind.method().to_string(),
        }
    }
}

/// Per-kind stats for tasks that finished at or after `since`, in
/// [`TaskKind::ALL`] order. Kinds with no finished task are left out.
pub fn task_stats(tasks: &[Task], since: DateTime<Utc>) -> Vec<TaskKindStats> {
    TaskKind::ALL
        .into_iter()
        .filter_map(|task_kind| {
            let finished: Vec<&Task> = tasks
                .iter()
                .filter(|t| {
                    t.kind == task_kind && t.status().is_terminal() && t.updated_at >= since
                })
                .collect();
            if finished.is_empty() {
                return None;
            }
            let n = finished.len() as f64;
            let succeeded = finished
                .iter()
                .filter(|t| t.status() == TaskStatus::Completed)
                .count();
            let total_ms: i64 = finished
                .iter()
                .map(|t| (t.updated_at - t.created_at).num_milliseconds().max(0))
                .sum();
            Some(TaskKindStats {
                task_kind,
                finished: finished.len(),
                success_rate: succeeded as f64 / n,
                mean_secs: total_ms as f64 / 1000.0 / n,
            })
        })
        .collect()
}

pub fn identify_optimizations(stats: &[TaskKindStats]) -> Vec<Optimization> {
    let mut flagged = Vec::new();
    for s in stats {
        if s.success_rate < SUCCESS_RATE_FLOOR {
            flagged.push(Optimization::new(
                s.task_kind,
                OptimizationKind::SuccessRate,
                s.success_rate,
            ));
        }
        if s.mean_secs > SLOW_TASK_SECS {
            flagged.push(Optimization::new(
                s.task_kind,
                OptimizationKind::Performance,
                s.mean_secs,
            ));
        }
    }
    flagged
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::state_machine::{Payload, TaskSpec};

    fn finished(spec: TaskSpec, ok: bool, took_secs: i64, hours_ago: i64) -> Task {
        let mut task = Task::new(spec);
        task.start().unwrap();
        if ok {
            task.complete(Payload::new()).unwrap();
        } else {
            task.fail("upstream refused").unwrap();
        }
        task.updated_at = Utc::now() - Duration::hours(hours_ago);
        task.created_at = task.updated_at - Duration::seconds(took_secs);
        task
    }

    #[test]
    fn stats_cover_finished_tasks_inside_the_window() {
        let mut tasks: Vec<Task> = (0..8)
            .map(|_| finished(TaskSpec::RespondInquiries, true, 1, 1))
            .collect();
        tasks.push(finished(TaskSpec::RespondInquiries, false, 3, 1));
        tasks.push(finished(TaskSpec::RespondInquiries, false, 3, 1));
        // outside the window
        tasks.push(finished(TaskSpec::RespondInquiries, false, 60, 30));
        // never finished
        tasks.push(Task::new(TaskSpec::ScheduleMeetings));

        let stats = task_stats(&tasks, Utc::now() - Duration::hours(LOOKBACK_HOURS));

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].task_kind, TaskKind::RespondInquiries);
        assert_eq!(stats[0].finished, 10);
        assert!((stats[0].success_rate - 0.8).abs() < 1e-9);
        assert!((stats[0].mean_secs - 1.4).abs() < 1e-9);
    }

    #[test]
    fn failing_and_slow_kinds_are_flagged() {
        let stats = vec![
            TaskKindStats {
                task_kind: TaskKind::RespondInquiries,
                finished: 10,
                success_rate: 0.8,
                mean_secs: 1.0,
            },
            TaskKindStats {
                task_kind: TaskKind::CreateContent,
                finished: 4,
                success_rate: 1.0,
                mean_secs: 4.5,
            },
            TaskKindStats {
                task_kind: TaskKind::ScheduleMeetings,
                finished: 20,
                success_rate: 0.9,
                mean_secs: 3.0,
            },
        ];

        let flagged = identify_optimizations(&stats);

        assert_eq!(flagged.len(), 2);
        assert_eq!(flagged[0].task_kind, TaskKind::RespondInquiries);
        assert_eq!(flagged[0].kind, OptimizationKind::SuccessRate);
        assert_eq!(flagged[0].target, 0.95);
        assert_eq!(flagged[0].method, "error_pattern_analysis");
        assert_eq!(flagged[1].task_kind, TaskKind::CreateContent);
        assert_eq!(flagged[1].kind, OptimizationKind::Performance);
        assert_eq!(flagged[1].current, 4.5);
        assert_eq!(flagged[1].target, 2.0);
        assert_eq!(flagged[1].method, "caching_and_batching");
    }

    #[test]
    fn optimization_kinds_use_their_wire_names() {
        let json = serde_json::to_value(OptimizationKind::Performance).unwrap();
        assert_eq!(json, "performance_optimization");
    }
}
