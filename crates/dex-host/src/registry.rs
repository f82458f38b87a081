use crate::error::HostError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A registered callable: takes JSON args, returns a JSON result or an
/// error string (the action's own failure, distinct from a `HostError`).
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>;
pub type Handler = Arc<dyn Fn(serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Process-wide map from stable string names ("function handles" in the
/// source system) to typed dispatch closures.
///
/// The scheduler persists only the handle string, never a pointer or
/// index, so work enqueued before a restart still resolves once the
/// process comes back up and re-registers the same names at startup. This
/// mirrors the teacher's treatment of component digests in
/// `dex_types::PromiseId::promise_root`: identity is a stable content
/// string, not anything tied to process memory layout.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: Arc<parking_lot::RwLock<HashMap<String, Handler>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let name = name.into();
        let wrapped: Handler = Arc::new(move |args| Box::pin(f(args)));
        self.handlers.write().insert(name, wrapped);
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.read().get(name).cloned()
    }

    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<Result<serde_json::Value, String>, HostError> {
        let handler = self
            .get(name)
            .ok_or_else(|| HostError::UnknownHandle(name.to_string()))?;
        Ok(handler(args).await)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn register_and_dispatch_roundtrips_json() {
        let registry = FunctionRegistry::new();
        registry.register("add", |args: serde_json::Value| async move {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(serde_json::json!(a + b))
        });

        let result = registry
            .dispatch("add", serde_json::json!({"a": 1, "b": 2}))
            .await
            .unwrap();
        similar_asserts::assert_eq!(result.unwrap(), serde_json::json!(3));
    }

    #[test_log::test(tokio::test)]
    async fn dispatch_unknown_handle_errors() {
        let registry = FunctionRegistry::new();
        let err = registry.dispatch("missing", serde_json::json!({})).await;
        assert!(matches!(err, Err(HostError::UnknownHandle(_))));
    }

    #[test_log::test(tokio::test)]
    async fn handler_errors_are_carried_not_raised() {
        let registry = FunctionRegistry::new();
        registry.register("fails", |_args: serde_json::Value| async move {
            Err("boom".to_string())
        });
        let outcome = registry.dispatch("fails", serde_json::json!({})).await.unwrap();
        assert_eq!(outcome.unwrap_err(), "boom");
    }
}
