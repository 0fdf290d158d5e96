//! Interface de terminal do cadence: spinners e saída colorida.
//!
//! Usa `indicatif` para o spinner enquanto um ciclo executa e `console`
//! para as cores dos relatórios.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::lead::Lead;
use crate::orchestrator::{AllCyclesReport, CycleKind, CycleReport};

/// Spinner exibido enquanto ciclos executam.
pub struct CycleProgress {
    pb: ProgressBar,
}

impl CycleProgress {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(self) {
        self.pb.finish_and_clear();
    }
}

/// Formata relatórios de ciclo, pontuações e status.
pub struct Printer {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
    bold: Style,
}

impl Default for Printer {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
            bold: Style::new().bold(),
        }
    }
}

impl Printer {
    pub fn report(&self, report: &CycleReport) {
        let mark = if report.failed == 0 {
            self.green.apply_to("✓")
        } else {
            self.yellow.apply_to("!")
        };
        println!(
            "  {mark} {} {}",
            self.bold.apply_to(report.cycle),
            self.dim.apply_to(format!("{}ms", report.duration().num_milliseconds()))
        );
        println!(
            "      dispatched {}  succeeded {}  recovered {}  failed {}",
            report.dispatched, report.succeeded, report.recovered, report.failed
        );
        if report.cycle == CycleKind::LeadGeneration {
            println!("      scored {}  qualified {}", report.scored, report.qualified);
        }
        if report.cycle == CycleKind::SystemOptimization {
            println!("      flagged {}", report.flagged);
        }
        if let Some(source) = &report.decision {
            println!("      decision from {source}");
        }
        for error in &report.errors {
            println!("      {} {error}", self.yellow.apply_to("↳"));
        }
    }

    pub fn failure(&self, cycle: CycleKind, error: &str) {
        println!("  {} {} {error}", self.red.apply_to("✗"), self.bold.apply_to(cycle));
    }

    pub fn all(&self, all: &AllCyclesReport) {
        for report in &all.completed {
            self.report(report);
        }
        for failure in &all.failed {
            self.failure(failure.cycle, &failure.error);
        }
        let summary = format!(
            "{} completed, {} failed",
            all.completed.len(),
            all.failed.len()
        );
        if all.is_clean() {
            println!("\n{}", self.green.apply_to(summary));
        } else {
            println!("\n{}", self.red.apply_to(summary));
        }
    }

    /// `leads` already ordered by score.
    pub fn scores(&self, leads: &[Lead], threshold: f64) {
        for lead in leads {
            let score = lead.score.unwrap_or_default();
            let mark = if score >= threshold {
                self.green.apply_to("✓")
            } else {
                self.dim.apply_to("·")
            };
            println!(
                "  {mark} {score:.2}  {}  {}",
                self.bold.apply_to(&lead.name),
                self.dim.apply_to(format!("{} at {}", lead.title, lead.company))
            );
        }
        let qualified = leads
            .iter()
            .filter(|l| l.score.unwrap_or_default() >= threshold)
            .count();
        println!("\n{qualified} of {} qualify at {threshold:.2}", leads.len());
    }

    pub fn status(&self, intervals: &[(CycleKind, Duration)], reports: &[CycleReport]) {
        println!("{}", self.bold.apply_to("cycles"));
        for (cycle, every) in intervals {
            let last = reports.iter().find(|r| r.cycle == *cycle);
            let detail = match last {
                Some(r) => format!(
                    "last run {}  ({} ok, {} failed)",
                    r.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    r.succeeded,
                    r.failed
                ),
                None => "never run".to_string(),
            };
            println!(
                "  {:<20} every {:<8} {}",
                cycle.as_str(),
                humanize(*every),
                self.dim.apply_to(detail)
            );
        }
    }
}

fn humanize(every: Duration) -> String {
    let secs = every.as_secs();
    match secs {
        s if s % 86_400 == 0 => format!("{}d", s / 86_400),
        s if s % 3_600 == 0 => format!("{}h", s / 3_600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}
