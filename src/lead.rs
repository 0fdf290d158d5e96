//! Lead records and their qualification history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a lead was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadChannel {
    Apollo,
    Linkedin,
    Referrals,
    Inbound,
}

impl LeadChannel {
    pub const ALL: [LeadChannel; 4] = [
        LeadChannel::Apollo,
        LeadChannel::Linkedin,
        LeadChannel::Referrals,
        LeadChannel::Inbound,
    ];
}

impl fmt::Display for LeadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeadChannel::Apollo => write!(f, "apollo"),
            LeadChannel::Linkedin => write!(f, "linkedin"),
            LeadChannel::Referrals => write!(f, "referrals"),
            LeadChannel::Inbound => write!(f, "inbound"),
        }
    }
}

/// Qualification milestones appended to a lead as it moves through a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualificationStatus {
    Scored,
    Qualified,
    Disqualified,
    Contacted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub status: QualificationStatus,
    pub at: DateTime<Utc>,
}

/// A prospective customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    #[serde(default = "new_lead_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub industry: String,
    /// Headcount bucket such as `"50-200"`.
    #[serde(default)]
    pub company_size: String,
    #[serde(default)]
    pub recent_activity: bool,
    #[serde(default)]
    pub source: Option<LeadChannel>,
    /// Always within `[0.0, 1.0]`; `None` until scored.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    status_history: Vec<StatusEntry>,
}

fn new_lead_id() -> String {
    Uuid::new_v4().to_string()
}

impl Lead {
    pub fn new(name: &str, email: &str, company: &str, title: &str) -> Self {
        Self {
            id: new_lead_id(),
            name: name.to_string(),
            email: email.to_string(),
            company: company.to_string(),
            title: title.to_string(),
            industry: String::new(),
            company_size: String::new(),
            recent_activity: false,
            source: None,
            score: None,
            status_history: Vec::new(),
        }
    }

    pub fn with_industry(mut self, industry: &str) -> Self {
        self.industry = industry.to_string();
        self
    }

    pub fn with_company_size(mut self, size: &str) -> Self {
        self.company_size = size.to_string();
        self
    }

    pub fn with_recent_activity(mut self, active: bool) -> Self {
        self.recent_activity = active;
        self
    }

    /// Append a qualification milestone. History is never rewritten.
    pub fn append_status(&mut self, status: QualificationStatus) {
        self.status_history.push(StatusEntry {
            status,
            at: Utc::now(),
        });
    }

    pub fn status_history(&self) -> &[StatusEntry] {
        &self.status_history
    }

    pub fn current_status(&self) -> Option<QualificationStatus> {
        self.status_history.last().map(|e| e.status)
    }

    /// A lead no cycle has looked at yet.
    pub fn is_unprocessed(&self) -> bool {
        self.status_history.is_empty()
    }
}
