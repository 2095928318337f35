//! Per-resource lifecycle states.
//!
//! ```text
//! NotExists --Create--> Provisioning --Succeeded--> Active
//!                       Provisioning --Failed-----> CreateFailed
//! Active --Update--> Updating --Succeeded--> Active
//!                    Updating --Failed-----> UpdateFailed
//! Active --Replace--> Provisioning
//! Active --Delete--> Deleting --Succeeded--> NotExists
//!                    Deleting --Failed-----> DeleteFailed
//! ```
//!
//! A replacement provisions the new resource under the desired name. The
//! previous resource then walks `Active --Delete--> Deleting` on its own.
//!
//! The failed states are terminal for a single invocation.
use snafu::prelude::*;

use crate::{descriptor::ResourceFamily, Error, InvalidTransitionSnafu};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LifecycleState {
    NotExists,
    Provisioning,
    Active,
    Updating,
    Deleting,
    CreateFailed,
    UpdateFailed,
    DeleteFailed,
}

impl core::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LifecycleState::NotExists => "not-exists",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Active => "active",
            LifecycleState::Updating => "updating",
            LifecycleState::Deleting => "deleting",
            LifecycleState::CreateFailed => "create-failed",
            LifecycleState::UpdateFailed => "update-failed",
            LifecycleState::DeleteFailed => "delete-failed",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum LifecycleEvent {
    Create,
    Update,
    Replace,
    Delete,
    Succeeded,
    Failed,
}

impl core::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LifecycleEvent::Create => "create",
            LifecycleEvent::Update => "update",
            LifecycleEvent::Replace => "replace",
            LifecycleEvent::Delete => "delete",
            LifecycleEvent::Succeeded => "succeeded",
            LifecycleEvent::Failed => "failed",
        })
    }
}

impl LifecycleState {
    /// The state reached from `self` on `event`, if that transition exists.
    pub fn on(self, event: LifecycleEvent) -> Option<LifecycleState> {
        use LifecycleEvent as E;
        use LifecycleState as S;
        Some(match (self, event) {
            (S::NotExists, E::Create) => S::Provisioning,
            (S::Provisioning, E::Succeeded) => S::Active,
            (S::Provisioning, E::Failed) => S::CreateFailed,
            (S::Active, E::Update) => S::Updating,
            (S::Active, E::Replace) => S::Provisioning,
            (S::Updating, E::Succeeded) => S::Active,
            (S::Updating, E::Failed) => S::UpdateFailed,
            (S::Active, E::Delete) => S::Deleting,
            (S::Deleting, E::Succeeded) => S::NotExists,
            (S::Deleting, E::Failed) => S::DeleteFailed,
            _ => return None,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::CreateFailed
                | LifecycleState::UpdateFailed
                | LifecycleState::DeleteFailed
        )
    }
}

/// Walks one resource through its lifecycle for the length of a single
/// controller invocation, logging each transition.
#[derive(Debug)]
pub struct Tracker {
    family: ResourceFamily,
    name: String,
    state: LifecycleState,
}

impl Tracker {
    pub fn new(family: ResourceFamily, name: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            family,
            name: name.into(),
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn advance(&mut self, event: LifecycleEvent) -> Result<LifecycleState, Error> {
        let next = self.state.on(event).context(InvalidTransitionSnafu {
            family: self.family,
            name: self.name.clone(),
            from: self.state,
            event,
        })?;
        log::debug!(
            "{} '{}': {} --{event}--> {next}",
            self.family,
            self.name,
            self.state
        );
        self.state = next;
        Ok(next)
    }
}
