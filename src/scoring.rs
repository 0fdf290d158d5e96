use crate::lead::Lead;

/// Scores leads by weighted rule contributions.
///
/// Pure and deterministic: no I/O, no clock, no randomness.
#[derive(Debug, Clone)]
pub struct LeadScorer {
    seniority_keywords: Vec<String>,
    target_industries: Vec<String>,
}

const TITLE_WEIGHT: f64 = 0.35;
const LARGE_COMPANY_WEIGHT: f64 = 0.25;
const MID_COMPANY_WEIGHT: f64 = 0.15;
const INDUSTRY_WEIGHT: f64 = 0.20;
const ACTIVITY_WEIGHT: f64 = 0.20;

const LARGE_COMPANY_MIN: u64 = 200;
const MID_COMPANY_MIN: u64 = 50;

const SENIORITY_KEYWORDS: &[&str] = &[
    "CEO",
    "CTO",
    "VP",
    "Director",
    "Head of",
    "Chief",
    "President",
];

const TARGET_INDUSTRIES: &[&str] = &[
    "technology",
    "software",
    "ai",
    "healthcare",
    "fintech",
    "saas",
];

impl Default for LeadScorer {
    fn default() -> Self {
        Self::new(SENIORITY_KEYWORDS, TARGET_INDUSTRIES)
    }
}

impl LeadScorer {
    pub fn new(seniority_keywords: &[&str], target_industries: &[&str]) -> Self {
        Self {
            seniority_keywords: seniority_keywords.iter().map(|k| k.to_lowercase()).collect(),
            target_industries: target_industries.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Fitness score in `[0.0, 1.0]`.
    pub fn score(&self, lead: &Lead) -> f64 {
        let mut score = 0.0;

        let title = lead.title.to_lowercase();
        if self.seniority_keywords.iter().any(|k| title.contains(k.as_str())) {
            score += TITLE_WEIGHT;
        }

        score += match company_size_upper_bound(&lead.company_size) {
            Some(max) if max >= LARGE_COMPANY_MIN => LARGE_COMPANY_WEIGHT,
            Some(max) if max >= MID_COMPANY_MIN => MID_COMPANY_WEIGHT,
            _ => 0.0,
        };

        let industry = lead.industry.to_lowercase();
        if self.target_industries.iter().any(|k| industry.contains(k.as_str())) {
            score += INDUSTRY_WEIGHT;
        }

        if lead.recent_activity {
            score += ACTIVITY_WEIGHT;
        }

        f64::clamp(score, 0.0, 1.0)
    }

    /// Score every lead in place and return those at or above `threshold`,
    /// best first. Equal scores keep their input order.
    pub fn qualify(&self, leads: &mut [Lead], threshold: f64) -> Vec<Lead> {
        for lead in leads.iter_mut() {
            lead.score = Some(self.score(lead));
        }
        let mut qualified: Vec<Lead> = leads
            .iter()
            .filter(|l| l.score.unwrap_or(0.0) >= threshold)
            .cloned()
            .collect();
        qualified.sort_by(|a, b| {
            b.score
                .unwrap_or(0.0)
                .total_cmp(&a.score.unwrap_or(0.0))
        });
        qualified
    }
}

/// Upper bound of a `"min-max"` headcount bucket.
///
/// Anything that is not two integers around a `-` yields `None`.
fn company_size_upper_bound(bucket: &str) -> Option<u64> {
    let (min, max) = bucket.split_once('-')?;
    min.trim().parse::<u64>().ok()?;
    max.trim().parse::<u64>().ok()
}
