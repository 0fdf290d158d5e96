//! Configuração do cadence carregada a partir de `cadence.toml`.
//!
//! Todo campo tem default; um arquivo ausente equivale a um arquivo vazio.
//! `ANTHROPIC_API_KEY` e `CADENCE_ALERT_WEBHOOK` têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CadenceError;
use crate::orchestrator::{CycleKind, OrchestratorSettings};

pub const DEFAULT_CONFIG_FILE: &str = "cadence.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Chave da API Anthropic. Vazia desliga o motor de decisão por LLM.
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Intervalo entre verificações do agendador.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Timeout de cada chamada externa (handler, LLM, alerta).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Quanto esperar por jobs em andamento no desligamento.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Falhas toleradas por classe de erro antes de escalar.
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,

    #[serde(default = "default_qualification_threshold")]
    pub qualification_threshold: f64,

    #[serde(default = "default_daily_revenue_target")]
    pub daily_revenue_target: f64,

    /// Quantas oportunidades aplicar por ciclo.
    #[serde(default = "default_opportunity_limit")]
    pub opportunity_limit: usize,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Webhook para alertas de intervenção manual; sem ele os alertas vão para o log.
    #[serde(default)]
    pub alert_webhook_url: Option<String>,

    #[serde(default)]
    pub intervals: IntervalConfig,
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_tick_secs() -> u64 {
    1
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_qualification_threshold() -> f64 {
    0.7
}

fn default_daily_revenue_target() -> f64 {
    1000.0
}

fn default_opportunity_limit() -> usize {
    5
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".cadence")
}

/// Intervalo de cada ciclo, em segundos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub lead_generation_secs: u64,
    pub revenue_secs: u64,
    pub content_secs: u64,
    pub opportunity_secs: u64,
    pub client_care_secs: u64,
    pub system_optimization_secs: u64,
    pub weekly_briefing_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        let secs = |kind: CycleKind| kind.default_interval().as_secs();
        Self {
            lead_generation_secs: secs(CycleKind::LeadGeneration),
            revenue_secs: secs(CycleKind::Revenue),
            content_secs: secs(CycleKind::Content),
            opportunity_secs: secs(CycleKind::Opportunity),
            client_care_secs: secs(CycleKind::ClientCare),
            system_optimization_secs: secs(CycleKind::SystemOptimization),
            weekly_briefing_secs: secs(CycleKind::WeeklyBriefing),
        }
    }
}

impl IntervalConfig {
    pub fn for_cycle(&self, kind: CycleKind) -> Duration {
        Duration::from_secs(match kind {
            CycleKind::LeadGeneration => self.lead_generation_secs,
            CycleKind::Revenue => self.revenue_secs,
            CycleKind::Content => self.content_secs,
            CycleKind::Opportunity => self.opportunity_secs,
            CycleKind::ClientCare => self.client_care_secs,
            CycleKind::SystemOptimization => self.system_optimization_secs,
            CycleKind::WeeklyBriefing => self.weekly_briefing_secs,
        })
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            tick_secs: default_tick_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            max_recovery_attempts: default_max_recovery_attempts(),
            qualification_threshold: default_qualification_threshold(),
            daily_revenue_target: default_daily_revenue_target(),
            opportunity_limit: default_opportunity_limit(),
            data_dir: default_data_dir(),
            alert_webhook_url: None,
            intervals: IntervalConfig::default(),
        }
    }
}

impl CadenceConfig {
    /// Carrega a configuração de `path`, aplica as variáveis de ambiente e valida.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<CadenceConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            self.api_key = key;
        }
        if let Some(url) = lookup("CADENCE_ALERT_WEBHOOK")
            && !url.is_empty()
        {
            self.alert_webhook_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), CadenceError> {
        if self.tick_secs == 0 {
            return Err(CadenceError::Config("tick_secs must be greater than zero".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(CadenceError::Config(
                "call_timeout_secs must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.qualification_threshold) {
            return Err(CadenceError::Config(format!(
                "qualification_threshold must be within [0, 1], got {}",
                self.qualification_threshold
            )));
        }
        for kind in CycleKind::ALL {
            if self.intervals.for_cycle(kind).is_zero() {
                return Err(CadenceError::Config(format!(
                    "interval for `{kind}` must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            qualification_threshold: self.qualification_threshold,
            daily_revenue_target: self.daily_revenue_target,
            opportunity_limit: self.opportunity_limit,
        }
    }
}
