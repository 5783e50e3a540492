//! Extension points around each sequencer phase.
//!
//! Hooks let an embedder observe or extend the test/rule/RCI/action
//! cycle without touching engine internals: register a closure against
//! a [`HookType`] and it runs every time the sequencer passes that
//! point, with a small bag of context data to read or annotate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use swdiag_core::hooks::{HookRegistry, HookType, HookContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut registry = HookRegistry::new();
//!
//! registry.register(HookType::PostRci, |ctx| {
//!     async move {
//!         println!("RCI pass complete: {:?}", ctx);
//!         Ok(())
//!     }
//! }).await;
//!
//! let ctx = HookContext::default();
//! registry.execute(HookType::PostRci, &ctx).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Hook execution point in the test/rule/RCI/action cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    /// Before a test is invoked.
    PreTest,
    /// After a test result has been recorded.
    PostTest,
    /// Before a rule is evaluated.
    PreRuleEval,
    /// After a rule's outcome has been applied to health.
    PostRuleEval,
    /// Before an RCI pass runs.
    PreRci,
    /// After an RCI pass completes.
    PostRci,
    /// Before an action runs.
    PreAction,
    /// After an action completes.
    PostAction,
}

/// Context passed to hook functions.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// Arbitrary data for hooks.
    pub data: HashMap<String, serde_json::Value>,
}

impl HookContext {
    /// Create a new, empty hook context.
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    /// Set a value in the context.
    pub fn set(&mut self, key: impl Into<String>, value: impl serde::Serialize) -> Result<()> {
        self.data.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Get a value from the context.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(value) = self.data.get(key) {
            Ok(Some(serde_json::from_value(value.clone())?))
        } else {
            Ok(None)
        }
    }
}

/// Hook function type.
pub type HookFn =
    Arc<dyn Fn(HookContext) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Registry for engine hooks.
#[derive(Clone)]
pub struct HookRegistry {
    hooks: Arc<RwLock<HashMap<HookType, Vec<HookFn>>>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Create a new hook registry.
    pub fn new() -> Self {
        Self {
            hooks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a hook.
    #[instrument(skip(self, hook))]
    pub async fn register<F, Fut>(&self, hook_type: HookType, hook: F)
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook_fn: HookFn = Arc::new(move |ctx| Box::pin(hook(ctx)));

        let mut hooks = self.hooks.write().await;
        hooks.entry(hook_type).or_insert_with(Vec::new).push(hook_fn);

        debug!("registered hook for {:?}", hook_type);
    }

    /// Execute all hooks of a given type, in registration order.
    #[instrument(skip(self, context))]
    pub async fn execute(&self, hook_type: HookType, context: &HookContext) -> Result<()> {
        let hooks = self.hooks.read().await;

        if let Some(hook_fns) = hooks.get(&hook_type) {
            debug!("executing {} hooks for {:?}", hook_fns.len(), hook_type);

            for hook_fn in hook_fns {
                hook_fn(context.clone()).await?;
            }
        }

        Ok(())
    }

    /// Whether any hooks are registered for a type.
    pub async fn has_hooks(&self, hook_type: HookType) -> bool {
        let hooks = self.hooks.read().await;
        hooks.get(&hook_type).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Count of hooks registered for a type.
    pub async fn hook_count(&self, hook_type: HookType) -> usize {
        let hooks = self.hooks.read().await;
        hooks.get(&hook_type).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_execute_hook() {
        let mut registry = HookRegistry::new();

        registry
            .register(HookType::PostRuleEval, |_ctx| async { Ok(()) })
            .await;

        assert!(registry.has_hooks(HookType::PostRuleEval).await);
        assert_eq!(registry.hook_count(HookType::PostRuleEval).await, 1);

        let ctx = HookContext::new();
        registry.execute(HookType::PostRuleEval, &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn unregistered_hook_type_is_a_no_op() {
        let registry = HookRegistry::new();
        let ctx = HookContext::new();
        registry.execute(HookType::PreRci, &ctx).await.unwrap();
        assert_eq!(registry.hook_count(HookType::PreRci).await, 0);
    }

    #[tokio::test]
    async fn hook_context_round_trips_values() {
        let mut ctx = HookContext::new();
        ctx.set("test_key", "test_value").unwrap();

        let value: Option<String> = ctx.get("test_key").unwrap();
        assert_eq!(value, Some("test_value".to_string()));

        let missing: Option<String> = ctx.get("absent").unwrap();
        assert_eq!(missing, None);
    }
}
