use crate::executor::StepContext;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>;
pub type WorkflowHandler = Arc<dyn Fn(StepContext, serde_json::Value) -> HandlerFuture + Send + Sync>;

/// Process-wide map from `workflow_handle` strings to the user code that
/// implements them. Kept separate from `dex_host::FunctionRegistry`
/// because workflow handlers need a [`StepContext`], not just their args.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    handlers: Arc<RwLock<HashMap<String, WorkflowHandler>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, workflow_handle: impl Into<String>, f: F)
    where
        F: Fn(StepContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        let wrapped: WorkflowHandler = Arc::new(move |ctx, args| Box::pin(f(ctx, args)));
        self.handlers.write().insert(workflow_handle.into(), wrapped);
    }

    pub fn get(&self, workflow_handle: &str) -> Option<WorkflowHandler> {
        self.handlers.read().get(workflow_handle).cloned()
    }
}
