use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::status::TaskStatus;
use crate::error::{CadenceError, Result};
use crate::lead::LeadChannel;

/// Open key/value map handed to handlers and returned by them.
pub type Payload = serde_json::Map<String, Value>;

/// Tag selecting which handler executes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SourceLeads,
    StartContactSequence,
    FollowUpProposals,
    NurtureWarmLeads,
    CreateContent,
    ScanOpportunities,
    ApplyOpportunity,
    RespondInquiries,
    ScheduleMeetings,
    SendFollowUps,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::SourceLeads,
        TaskKind::StartContactSequence,
        TaskKind::FollowUpProposals,
        TaskKind::NurtureWarmLeads,
        TaskKind::CreateContent,
        TaskKind::ScanOpportunities,
        TaskKind::ApplyOpportunity,
        TaskKind::RespondInquiries,
        TaskKind::ScheduleMeetings,
        TaskKind::SendFollowUps,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::SourceLeads => "source_leads",
            TaskKind::StartContactSequence => "start_contact_sequence",
            TaskKind::FollowUpProposals => "follow_up_proposals",
            TaskKind::NurtureWarmLeads => "nurture_warm_leads",
            TaskKind::CreateContent => "create_content",
            TaskKind::ScanOpportunities => "scan_opportunities",
            TaskKind::ApplyOpportunity => "apply_opportunity",
            TaskKind::RespondInquiries => "respond_inquiries",
            TaskKind::ScheduleMeetings => "schedule_meetings",
            TaskKind::SendFollowUps => "send_follow_ups",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed description of a unit of work, one variant per [`TaskKind`].
///
/// Cycles build these; the payload is flattened into an open [`Payload`]
/// only when the task crosses into the handler registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskSpec {
    SourceLeads {
        channel: LeadChannel,
        count: u32,
    },
    StartContactSequence {
        lead_id: String,
        email: String,
        score: f64,
    },
    FollowUpProposals {
        revenue_gap: f64,
    },
    NurtureWarmLeads {
        revenue_gap: f64,
    },
    CreateContent {
        channel: String,
        topic: String,
    },
    ScanOpportunities {
        category: String,
    },
    ApplyOpportunity {
        opportunity_id: String,
        title: String,
        value: f64,
    },
    RespondInquiries,
    ScheduleMeetings,
    SendFollowUps,
}

impl TaskSpec {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskSpec::SourceLeads { .. } => TaskKind::SourceLeads,
            TaskSpec::StartContactSequence { .. } => TaskKind::StartContactSequence,
            TaskSpec::FollowUpProposals { .. } => TaskKind::FollowUpProposals,
            TaskSpec::NurtureWarmLeads { .. } => TaskKind::NurtureWarmLeads,
            TaskSpec::CreateContent { .. } => TaskKind::CreateContent,
            TaskSpec::ScanOpportunities { .. } => TaskKind::ScanOpportunities,
            TaskSpec::ApplyOpportunity { .. } => TaskKind::ApplyOpportunity,
            TaskSpec::RespondInquiries => TaskKind::RespondInquiries,
            TaskSpec::ScheduleMeetings => TaskKind::ScheduleMeetings,
            TaskSpec::SendFollowUps => TaskKind::SendFollowUps,
        }
    }
}

/// A single unit of work dispatched to a handler.
///
/// Created `Pending`, consumed once by a handler, immutable after reaching
/// `Completed` or `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub payload: Payload,
    status: TaskStatus,
    status_history: Vec<TaskStatus>,
    pub result: Option<Payload>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(spec: TaskSpec) -> Self {
        let kind = spec.kind();
        let payload = match serde_json::to_value(&spec) {
            Ok(Value::Object(mut map)) => {
                map.remove("kind");
                map
            }
            _ => Payload::new(),
        };
        Self::with_payload(kind, payload)
    }

    /// Build a task from an already-open payload.
    pub fn with_payload(kind: TaskKind, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            payload,
            status: TaskStatus::Pending,
            status_history: Vec::new(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Statuses this task has left, oldest first.
    pub fn status_history(&self) -> &[TaskStatus] {
        &self.status_history
    }

    /// Recover the typed spec from the open payload.
    pub fn spec(&self) -> Result<TaskSpec, serde_json::Error> {
        let mut map = self.payload.clone();
        map.insert("kind".into(), Value::String(self.kind.as_str().into()));
        serde_json::from_value(Value::Object(map))
    }

    /// Read a single payload field as `T`.
    #[cfg(test)]
    pub(crate) fn field<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.payload
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Working)
    }

    pub fn complete(&mut self, result: Payload) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Error)?;
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CadenceError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status_history.push(self.status);
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
