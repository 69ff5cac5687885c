//! State transitions and condition history

use crate::domain::{ResourceState, StatusCondition, Stateful};
use crate::error::PluginError;
use chrono::Utc;

/// Reason recorded on every failure condition
pub const RECONCILE_ERROR_REASON: &str = "ReconcileError";

fn message_for(state: ResourceState) -> &'static str {
    match state {
        ResourceState::Pending => "Resource is pending initialization.",
        ResourceState::Creating => "Resource is being created.",
        ResourceState::Active => "Resource is active and ready.",
        ResourceState::Updating => "Resource is being updated.",
        ResourceState::Deleting => "Resource is being deleted.",
        ResourceState::Suspended => "Resource is suspended.",
        ResourceState::Error => "Resource reconciliation failed.",
    }
}

/// Condition recorded when entering `state`
pub fn condition_for(state: ResourceState) -> StatusCondition {
    StatusCondition {
        state,
        reason: state.as_str().to_string(),
        message: message_for(state).to_string(),
        last_transition_at: Utc::now(),
    }
}

/// Set the state and append the matching condition
pub fn transition<T: Stateful>(resource: &mut T, state: ResourceState) {
    let lifecycle = resource.lifecycle_mut();
    lifecycle.state = Some(state);
    lifecycle.conditions.push(condition_for(state));
}

/// Move to `Error`, keeping the plugin's message verbatim
pub fn fail<T: Stateful>(resource: &mut T, err: &PluginError) {
    let lifecycle = resource.lifecycle_mut();
    lifecycle.state = Some(ResourceState::Error);
    lifecycle.conditions.push(StatusCondition {
        state: ResourceState::Error,
        reason: RECONCILE_ERROR_REASON.to_string(),
        message: err.to_string(),
        last_transition_at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metadata, Workspace};

    #[test]
    fn test_transition_appends_condition() {
        let mut ws = Workspace::new(Metadata::new("ws-1", "acme"));
        transition(&mut ws, ResourceState::Creating);
        transition(&mut ws, ResourceState::Active);

        assert_eq!(ws.current_state(), ResourceState::Active);
        let conditions = ws.conditions();
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].state, ResourceState::Creating);
        assert_eq!(conditions[1].message, "Resource is active and ready.");
        assert_eq!(ws.previous_state(), Some(ResourceState::Creating));
    }

    #[test]
    fn test_fail_keeps_message() {
        let mut ws = Workspace::new(Metadata::new("ws-1", "acme"));
        fail(&mut ws, &PluginError::failed("aruba", "create", "quota exceeded"));

        let last = ws.conditions().last().unwrap();
        assert_eq!(ws.current_state(), ResourceState::Error);
        assert_eq!(last.reason, RECONCILE_ERROR_REASON);
        assert_eq!(last.message, "aruba create failed: quota exceeded");
    }
}
