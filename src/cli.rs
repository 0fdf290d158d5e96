//! Interface de linha de comando do cadence baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, cycle, all,
//! score, status) e flags globais (--config, --max-retries, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_FILE;
use crate::orchestrator::CycleKind;

/// cadence: agenda e executa os ciclos recorrentes do negócio.
#[derive(Debug, Parser)]
#[command(name = "cadence", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Falhas toleradas por classe de erro antes de escalar.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Agenda todos os ciclos e executa até Ctrl-C.
    Run,

    /// Executa um único ciclo uma vez.
    Cycle {
        /// Nome do ciclo (lead_generation, revenue, content, opportunity,
        /// client_care, weekly_briefing).
        name: CycleKind,
    },

    /// Executa todos os ciclos uma vez, em paralelo.
    All,

    /// Pontua os leads de um arquivo JSON.
    Score {
        /// Arquivo com um array JSON de leads.
        file: PathBuf,

        /// Pontuação mínima para qualificar; padrão vem da configuração.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Mostra os ciclos configurados e os últimos relatórios salvos.
    Status,
}
