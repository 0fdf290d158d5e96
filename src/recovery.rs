//! Bounded-retry recovery with escalation.
//!
//! Every failure is counted against an error class, a fingerprint of the
//! failing domain and the error text. While a class stays within the ceiling
//! the caller's fallback gets one shot and the cycle keeps going. Past the
//! ceiling the class is escalated: the alerter is told and
//! [`CadenceError::ManualInterventionRequired`] is returned for that and all
//! later failures of the class until [`RecoveryPolicy::reset`].

use std::collections::HashMap;
use std::future::{Future, Ready};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use crate::alert::Alerter;
use crate::error::{CadenceError, Escalation, Result};

/// Characters of error text that participate in the fingerprint.
const FINGERPRINT_MESSAGE_CHARS: usize = 50;

/// Retry bookkeeping for one error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryState {
    pub attempts: u32,
    pub ceiling: u32,
}

impl RecoveryState {
    pub fn is_escalated(&self) -> bool {
        self.attempts > self.ceiling
    }
}

pub struct RecoveryPolicy {
    ceiling: u32,
    call_timeout: Duration,
    alerter: Arc<dyn Alerter>,
    states: Mutex<HashMap<String, RecoveryState>>,
}

type NoFallback<T> = fn() -> Ready<Result<T>>;

impl RecoveryPolicy {
    pub fn new(ceiling: u32, call_timeout: Duration, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            ceiling,
            call_timeout,
            alerter,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Run `op` under the call timeout; on failure count it and re-raise.
    pub async fn execute<T, F, Fut>(&self, domain: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(domain, op, None::<NoFallback<T>>).await
    }

    /// Like [`RecoveryPolicy::execute`], but a counted failure within the
    /// ceiling tries `fallback` before giving up.
    pub async fn execute_with_fallback<T, F, Fut, G, GFut>(
        &self,
        domain: &str,
        op: F,
        fallback: G,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        self.run(domain, op, Some(fallback)).await
    }

    async fn run<T, F, Fut, G, GFut>(&self, domain: &str, op: F, fallback: Option<G>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T>>,
    {
        let err = match self.timed(domain, op()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_recoverable() {
            return Err(err);
        }

        let message = err.to_string();
        let key = fingerprint(domain, &message);
        let attempt = self.record_failure(&key);

        if attempt > self.ceiling {
            return Err(self.escalate(key, message, attempt).await);
        }

        tracing::warn!(
            error_class = %key,
            attempt,
            ceiling = self.ceiling,
            error = %message,
            "recoverable failure"
        );

        if let Some(fallback) = fallback {
            match self.timed(domain, fallback()).await {
                Ok(value) => {
                    tracing::info!(error_class = %key, "recovered via fallback");
                    return Ok(value);
                }
                Err(fallback_err) => {
                    tracing::warn!(error_class = %key, error = %fallback_err, "fallback failed");
                }
            }
        }

        Err(CadenceError::TransientHandlerFailure {
            key,
            attempt,
            ceiling: self.ceiling,
            message,
        })
    }

    async fn timed<T, Fut>(&self, domain: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CadenceError::Timeout {
                operation: domain.to_string(),
                after: self.call_timeout,
            }),
        }
    }

    fn record_failure(&self, key: &str) -> u32 {
        let mut states = self.states.lock();
        let state = states.entry(key.to_string()).or_insert(RecoveryState {
            attempts: 0,
            ceiling: self.ceiling,
        });
        state.attempts = state.attempts.saturating_add(1);
        state.attempts
    }

    async fn escalate(&self, key: String, message: String, attempts: u32) -> CadenceError {
        let escalation = Escalation {
            error_class: key,
            error: message,
            attempts,
            at: Utc::now(),
        };
        tracing::error!(
            error_class = %escalation.error_class,
            attempts,
            "retry ceiling exceeded, escalating for manual intervention"
        );

        let delivery = tokio::time::timeout(
            self.call_timeout,
            self.alerter.notify(&escalation.alert_message()),
        )
        .await;
        match delivery {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "failed to deliver escalation alert"),
            Err(_) => tracing::error!("escalation alert timed out"),
        }

        CadenceError::ManualInterventionRequired(Box::new(escalation))
    }

    pub fn state(&self, key: &str) -> Option<RecoveryState> {
        self.states.lock().get(key).copied()
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.state(key).map(|s| s.attempts).unwrap_or(0)
    }

    pub fn is_escalated(&self, key: &str) -> bool {
        self.state(key).is_some_and(|s| s.is_escalated())
    }

    /// Every escalated error class.
    pub fn escalated(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .states
            .lock()
            .iter()
            .filter(|(_, s)| s.is_escalated())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Forget an error class. Returns whether it was tracked.
    pub fn reset(&self, key: &str) -> bool {
        self.states.lock().remove(key).is_some()
    }
}

/// Error-class key for a failure in `domain`.
///
/// Digit runs collapse to `#` and only the first
/// [`FINGERPRINT_MESSAGE_CHARS`] characters of the message count, so retries
/// of the same failure share a key while unrelated failures do not.
pub fn fingerprint(domain: &str, message: &str) -> String {
    let mut normalized = String::with_capacity(message.len());
    let mut in_digits = false;
    for c in message.trim().chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                normalized.push('#');
            }
            in_digits = true;
        } else {
            normalized.push(c);
            in_digits = false;
        }
    }
    let truncated: String = normalized.chars().take(FINGERPRINT_MESSAGE_CHARS).collect();
    format!("{domain}:{truncated}")
}
