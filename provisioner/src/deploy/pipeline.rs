//! Rollback-capable action pipeline
//!
//! A [`Pipeline`] runs its actions in order against a shared context. When an
//! action fails, the actions that already completed are undone in reverse
//! order and the original error is returned. Undo failures are logged and
//! otherwise ignored.

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::errors::Result;

/// One reversible step of a pipeline
#[async_trait]
pub trait Action<C: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn forward(&self, ctx: &mut C) -> Result<()>;

    /// Undo a completed `forward`
    async fn backward(&self, _ctx: &mut C) -> Result<()> {
        Ok(())
    }
}

/// Ordered list of actions
pub struct Pipeline<C> {
    actions: Vec<Box<dyn Action<C>>>,
}

impl<C: Send> Pipeline<C> {
    pub fn new(actions: Vec<Box<dyn Action<C>>>) -> Self {
        Self { actions }
    }

    /// Names of the actions, in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.actions.iter().map(|a| a.name()).collect()
    }

    pub async fn execute(&self, ctx: &mut C) -> Result<()> {
        for (done, action) in self.actions.iter().enumerate() {
            debug!("Running action {}", action.name());
            if let Err(e) = action.forward(ctx).await {
                error!("Action {} failed: {}", action.name(), e);
                self.rollback(done, ctx).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Undo the first `done` actions, last one first
    async fn rollback(&self, done: usize, ctx: &mut C) {
        for action in self.actions[..done].iter().rev() {
            debug!("Rolling back action {}", action.name());
            if let Err(e) = action.backward(ctx).await {
                warn!("Failed to roll back action {}: {}", action.name(), e);
            }
        }
    }
}
