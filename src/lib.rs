//! cadence: schedules recurring business cycles, qualifies leads, and
//! escalates failures that automatic recovery cannot fix.

pub mod agents;
pub mod alert;
pub mod anthropic;
pub mod cli;
pub mod config;
pub mod decision;
pub mod error;
pub mod lead;
pub mod orchestrator;
pub mod recovery;
pub mod registry;
pub mod scheduler;
pub mod scoring;
pub mod state_machine;
pub mod storage;
pub mod ui;

pub use error::{CadenceError, Result};
