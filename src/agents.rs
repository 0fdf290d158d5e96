//! Simulated handler collaborators.
//!
//! Real integrations (lead providers, mail, CRM, publishing) live outside
//! this crate. These stand-ins let the loop run end to end and report what
//! they would have done.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::HandlerError;
use crate::lead::{Lead, LeadChannel};
use crate::registry::{HandlerRegistry, TaskHandler};
use crate::state_machine::{Payload, Task, TaskKind, TaskSpec};

/// Upper bound on leads a single sourcing task may return.
const MAX_BATCH: u32 = 100;

struct Archetype {
    first_name: &'static str,
    title: &'static str,
    company: &'static str,
    industry: &'static str,
    company_size: &'static str,
    recent_activity: bool,
}

const ROSTER: [Archetype; 6] = [
    Archetype {
        first_name: "avery",
        title: "Chief Technology Officer",
        company: "Northwind Health",
        industry: "Healthcare",
        company_size: "200-500",
        recent_activity: true,
    },
    Archetype {
        first_name: "blake",
        title: "Senior Engineer",
        company: "Bluefin Logistics",
        industry: "Logistics",
        company_size: "50-200",
        recent_activity: false,
    },
    Archetype {
        first_name: "carmen",
        title: "VP Product",
        company: "Ledgerly",
        industry: "Fintech",
        company_size: "11-50",
        recent_activity: true,
    },
    Archetype {
        first_name: "devon",
        title: "Office Manager",
        company: "Corner Bakery Co",
        industry: "Food",
        company_size: "1-10",
        recent_activity: false,
    },
    Archetype {
        first_name: "emery",
        title: "Head of Data",
        company: "Quanta Software",
        industry: "Software",
        company_size: "500-1000",
        recent_activity: false,
    },
    Archetype {
        first_name: "finley",
        title: "Director of Operations",
        company: "Brightpath SaaS",
        industry: "SaaS",
        company_size: "50-200",
        recent_activity: true,
    },
];

/// Produces sample leads for `source_leads` tasks.
#[derive(Debug, Default)]
pub struct SampleLeadSource {
    issued: AtomicU64,
}

impl SampleLeadSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn batch(&self, channel: LeadChannel, count: u32) -> Vec<Lead> {
        (0..count.min(MAX_BATCH))
            .map(|_| {
                let n = self.issued.fetch_add(1, Ordering::Relaxed);
                let a = &ROSTER[(n % ROSTER.len() as u64) as usize];
                let domain = a.company.to_lowercase().replace(' ', "");
                let mut lead = Lead::new(
                    &format!("{} {n}", capitalize(a.first_name)),
                    &format!("{}.{n}@{domain}.example", a.first_name),
                    a.company,
                    a.title,
                )
                .with_industry(a.industry)
                .with_company_size(a.company_size)
                .with_recent_activity(a.recent_activity);
                lead.source = Some(channel);
                lead
            })
            .collect()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl TaskHandler for SampleLeadSource {
    fn name(&self) -> &str {
        "sample_lead_source"
    }

    async fn execute(&self, task: &Task) -> Result<Payload, HandlerError> {
        let TaskSpec::SourceLeads { channel, count } = task.spec()? else {
            return Err(HandlerError::failed(format!(
                "sample lead source cannot handle `{}`",
                task.kind
            )));
        };
        let leads = self.batch(channel, count);
        tracing::debug!(channel = %channel, count = leads.len(), "sample leads issued");
        Ok(into_payload(json!({
            "channel": channel,
            "leads": leads,
        })))
    }
}

/// Acknowledges every other task kind with a summary of what a real agent
/// would have done.
#[derive(Debug, Default)]
pub struct SimulatedAgent;

#[async_trait]
impl TaskHandler for SimulatedAgent {
    fn name(&self) -> &str {
        "simulated_agent"
    }

    async fn execute(&self, task: &Task) -> Result<Payload, HandlerError> {
        let summary = match task.spec()? {
            TaskSpec::SourceLeads { channel, .. } => json!({ "channel": channel, "leads": [] }),
            TaskSpec::StartContactSequence { lead_id, email, .. } => json!({
                "lead_id": lead_id,
                "sequence": "intro-3-step",
                "first_email_to": email,
            }),
            TaskSpec::FollowUpProposals { revenue_gap } => json!({
                "proposals_followed_up": 0,
                "revenue_gap": revenue_gap,
            }),
            TaskSpec::NurtureWarmLeads { revenue_gap } => json!({
                "warm_leads_nurtured": 0,
                "revenue_gap": revenue_gap,
            }),
            TaskSpec::CreateContent { channel, topic } => json!({
                "channel": channel,
                "topic": topic,
                "state": "drafted",
            }),
            TaskSpec::ScanOpportunities { category } => json!({
                "category": category,
                "opportunities": [],
            }),
            TaskSpec::ApplyOpportunity { opportunity_id, .. } => json!({
                "opportunity_id": opportunity_id,
                "applied": true,
            }),
            TaskSpec::RespondInquiries => json!({ "inquiries_answered": 0 }),
            TaskSpec::ScheduleMeetings => json!({ "meetings_scheduled": 0 }),
            TaskSpec::SendFollowUps => json!({ "follow_ups_sent": 0 }),
        };
        Ok(into_payload(summary))
    }
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Register the sample lead source for `source_leads` and the simulated
/// agent for every other kind.
pub fn register_default_agents(registry: &HandlerRegistry) {
    let agent: Arc<dyn TaskHandler> = Arc::new(SimulatedAgent);
    for kind in TaskKind::ALL {
        registry.register(kind, agent.clone());
    }
    registry.register(TaskKind::SourceLeads, Arc::new(SampleLeadSource::new()));
}
