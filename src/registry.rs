//! Task handler registry.
//!
//! Maps a [`TaskKind`] to the collaborator that performs it. Dispatching a
//! kind nobody registered is a configuration error and is always surfaced as
//! [`CadenceError::HandlerNotFound`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{CadenceError, HandlerError, Result};
use crate::state_machine::{Payload, Task, TaskKind};

/// A collaborator that performs one or more task kinds.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn execute(&self, task: &Task) -> Result<Payload, HandlerError>;

    /// Whether [`TaskHandler::fallback`] is implemented.
    fn has_fallback(&self) -> bool {
        false
    }

    /// Alternative strategy tried by the recovery policy after a failure.
    async fn fallback(&self, _task: &Task) -> Result<Payload, HandlerError> {
        Err(HandlerError::NoFallback)
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<TaskKind, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous registration.
    pub fn register(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        tracing::debug!(kind = %kind, handler = handler.name(), "handler registered");
        self.handlers.write().insert(kind, handler);
    }

    pub fn unregister(&self, kind: TaskKind) -> bool {
        self.handlers.write().remove(&kind).is_some()
    }

    pub fn contains(&self, kind: TaskKind) -> bool {
        self.handlers.read().contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.read().keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    fn lookup(&self, kind: TaskKind) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .read()
            .get(&kind)
            .cloned()
            .ok_or(CadenceError::HandlerNotFound(kind))
    }

    /// Run the handler registered for `kind` against `task`.
    ///
    /// No timeout is applied here; the recovery policy owns that.
    pub async fn dispatch(&self, kind: TaskKind, task: &Task) -> Result<Payload> {
        let handler = self.lookup(kind)?;
        tracing::debug!(kind = %kind, task = %task.id, handler = handler.name(), "dispatching");
        handler
            .execute(task)
            .await
            .map_err(|source| CadenceError::Handler { kind, source })
    }

    /// Whether the handler for `kind` offers a fallback strategy.
    pub fn has_fallback(&self, kind: TaskKind) -> bool {
        self.lookup(kind).map(|h| h.has_fallback()).unwrap_or(false)
    }

    pub async fn fallback(&self, kind: TaskKind, task: &Task) -> Result<Payload> {
        let handler = self.lookup(kind)?;
        handler
            .fallback(task)
            .await
            .map_err(|source| CadenceError::Handler { kind, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::TaskSpec;
    use serde_json::Value;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, task: &Task) -> Result<Payload, HandlerError> {
            let mut out = task.payload.clone();
            out.insert("echoed".into(), Value::Bool(true));
            Ok(out)
        }
    }

    struct Broken;

    #[async_trait]
    impl TaskHandler for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn execute(&self, _task: &Task) -> Result<Payload, HandlerError> {
            Err(HandlerError::failed("upstream refused"))
        }

        fn has_fallback(&self) -> bool {
            true
        }

        async fn fallback(&self, _task: &Task) -> Result<Payload, HandlerError> {
            let mut out = Payload::new();
            out.insert("via".into(), Value::from("fallback"));
            Ok(out)
        }
    }

    #[tokio::test]
    async fn dispatch_unregistered_kind_is_handler_not_found() {
        let registry = HandlerRegistry::new();
        let task = Task::new(TaskSpec::RespondInquiries);
        for kind in TaskKind::ALL {
            let err = registry.dispatch(kind, &task).await.unwrap_err();
            assert!(matches!(err, CadenceError::HandlerNotFound(k) if k == kind));
        }
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let registry = HandlerRegistry::new();
        registry.register(TaskKind::CreateContent, Arc::new(Echo));
        let task = Task::new(TaskSpec::CreateContent {
            channel: "linkedin".into(),
            topic: "inclusive design".into(),
        });

        let out = registry.dispatch(TaskKind::CreateContent, &task).await.unwrap();
        assert_eq!(out["echoed"], true);
        assert_eq!(out["topic"], "inclusive design");
    }

    #[tokio::test]
    async fn handler_errors_are_typed() {
        let registry = HandlerRegistry::new();
        registry.register(TaskKind::SendFollowUps, Arc::new(Broken));
        let task = Task::new(TaskSpec::SendFollowUps);

        let err = registry.dispatch(TaskKind::SendFollowUps, &task).await.unwrap_err();
        match err {
            CadenceError::Handler { kind, source } => {
                assert_eq!(kind, TaskKind::SendFollowUps);
                assert_eq!(source.to_string(), "upstream refused");
            }
            other => panic!("expected handler error, got {other:?}"),
        }

        assert!(registry.has_fallback(TaskKind::SendFollowUps));
        let out = registry.fallback(TaskKind::SendFollowUps, &task).await.unwrap();
        assert_eq!(out["via"], "fallback");
    }

    #[tokio::test]
    async fn default_fallback_is_absent() {
        let registry = HandlerRegistry::new();
        registry.register(TaskKind::ScheduleMeetings, Arc::new(Echo));
        let task = Task::new(TaskSpec::ScheduleMeetings);

        assert!(!registry.has_fallback(TaskKind::ScheduleMeetings));
        assert!(!registry.has_fallback(TaskKind::ApplyOpportunity));
        let err = registry.fallback(TaskKind::ScheduleMeetings, &task).await.unwrap_err();
        assert!(matches!(
            err,
            CadenceError::Handler { source: HandlerError::NoFallback, .. }
        ));
    }

    #[test]
    fn register_replace_and_unregister() {
        let registry = HandlerRegistry::new();
        registry.register(TaskKind::ScanOpportunities, Arc::new(Echo));
        registry.register(TaskKind::ScanOpportunities, Arc::new(Broken));
        registry.register(TaskKind::ApplyOpportunity, Arc::new(Echo));
        assert_eq!(
            registry.kinds(),
            vec![TaskKind::ApplyOpportunity, TaskKind::ScanOpportunities]
        );
        assert!(registry.has_fallback(TaskKind::ScanOpportunities));

        assert!(registry.unregister(TaskKind::ScanOpportunities));
        assert!(!registry.unregister(TaskKind::ScanOpportunities));
        assert!(!registry.contains(TaskKind::ScanOpportunities));
    }
}
