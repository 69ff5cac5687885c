//! Generic plugin handler
//!
//! Admission gate plus an ordered transition table. Kind-specific handlers
//! only supply the rejection rules and the rows of the table.

use super::operation::ResourceOperation;
use crate::context::Context;
use crate::domain::{PluginHandler, Stateful};
use crate::error::{Error, Result, Violation};
use async_trait::async_trait;
use tracing::{debug, info};

/// Pure admission predicate
pub type RejectionCondition<T> =
    Box<dyn Fn(&Context, &T) -> std::result::Result<(), Violation> + Send + Sync>;

/// Rejection rules and transition table for one resource kind
pub struct GenericPluginHandler<T> {
    rejection_conditions: Vec<RejectionCondition<T>>,
    operations: Vec<ResourceOperation<T>>,
}

impl<T: Stateful> Default for GenericPluginHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Stateful> GenericPluginHandler<T> {
    pub fn new() -> Self {
        Self {
            rejection_conditions: Vec::new(),
            operations: Vec::new(),
        }
    }

    pub fn add_rejection_condition<F>(&mut self, condition: F) -> &mut Self
    where
        F: Fn(&Context, &T) -> std::result::Result<(), Violation> + Send + Sync + 'static,
    {
        self.rejection_conditions.push(Box::new(condition));
        self
    }

    /// Replace every rejection rule
    pub fn set_rejection_conditions(&mut self, conditions: Vec<RejectionCondition<T>>) {
        self.rejection_conditions = conditions;
    }

    /// Append a row to the transition table; rows are tried in order
    pub fn add_operation(&mut self, operation: ResourceOperation<T>) -> &mut Self {
        self.operations.push(operation);
        self
    }

    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.operations.iter().map(ResourceOperation::name)
    }

    /// Evaluate every rule and report all violations at once
    pub fn admit(&self, ctx: &Context, resource: &T) -> Result<()> {
        let violations: Vec<String> = self
            .rejection_conditions
            .iter()
            .filter_map(|condition| condition(ctx, resource).err())
            .map(|violation| violation.to_string())
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            debug!(kind = T::KIND, name = %resource.name(), ?violations, "Admission rejected");
            Err(Error::Admission { violations })
        }
    }

    /// Apply the first operation whose condition holds
    pub async fn reconcile(&self, ctx: &Context, resource: &mut T) -> Result<bool> {
        ctx.check()?;
        let Some(operation) = self.operations.iter().find(|op| op.applies_to(resource)) else {
            debug!(
                kind = T::KIND,
                name = %resource.name(),
                state = %resource.current_state(),
                "Nothing to do"
            );
            return Ok(false);
        };

        info!(
            kind = T::KIND,
            name = %resource.name(),
            state = %resource.current_state(),
            operation = operation.name(),
            "Reconciling"
        );
        operation.execute(ctx, resource).await
    }
}

#[async_trait]
impl<T: Stateful> PluginHandler<T> for GenericPluginHandler<T> {
    async fn handle_admission(&self, ctx: &Context, resource: &T) -> Result<()> {
        self.admit(ctx, resource)
    }

    async fn handle_reconcile(&self, ctx: &Context, resource: &mut T) -> Result<bool> {
        self.reconcile(ctx, resource).await
    }
}
