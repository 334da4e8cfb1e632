//! Unit lifecycle states and the transitions allowed between them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    Loading,
    Active,
    Suspended,
    Unloading,
    Unloaded,
    Failed,
}

impl LifecycleState {
    /// Whether the state machine permits `self -> next`.
    ///
    /// `Loading` may fall back to the state the load started from when the
    /// load is abandoned before the instance becomes active.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Discovered | Unloaded | Failed, Loading)
                | (Loading, Active | Failed | Discovered | Unloaded)
                | (Active, Suspended | Unloading)
                | (Suspended, Active | Failed)
                | (Unloading, Unloaded | Active)
        )
    }

    /// An instance exists (or is being created) in this state.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Loading | Self::Active | Self::Suspended | Self::Unloading)
    }

    /// A load may start from this state.
    pub fn is_loadable(self) -> bool {
        self.can_transition_to(Self::Loading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Loading => "loading",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Unloading => "unloading",
            Self::Unloaded => "unloaded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit hooks the runtime invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Init,
    Cleanup,
    Suspend,
    Resume,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Cleanup => "cleanup",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub unit: String,
    pub from: LifecycleState,
    pub to: LifecycleState,
    /// Version of the live instance after the transition, if any.
    pub version: Option<Version>,
    pub at: DateTime<Utc>,
}
