//! Removal mode: how a resolved dependency propagates to the parent.
//!
//! | mode               | parent namespace | action                     | event |
//! |--------------------|------------------|----------------------------|-------|
//! | `SoftResolve`      | any              | promote to wait/paused     | yes   |
//! | `HardDeleteCascade`| same as origin   | delete parent, continue up | no    |
//! | `HardDeleteCascade`| other            | promote to wait/paused     | no    |

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMode {
    /// A child finished normally. The parent becomes runnable.
    SoftResolve,
    /// A child was explicitly deleted. Empty ancestors in the origin
    /// namespace are deleted as well.
    HardDeleteCascade,
}

/// What to do with a parent whose last dependency was just resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentAction {
    /// Move the parent to `wait` (or `paused`) and stop.
    Promote { emit_event: bool },
    /// Delete the parent's keys and resolve its own parent next.
    DeleteAndContinue,
}

impl RemovalMode {
    pub fn action_for(self, same_namespace: bool) -> ParentAction {
        match (self, same_namespace) {
            (RemovalMode::SoftResolve, _) => ParentAction::Promote { emit_event: true },
            (RemovalMode::HardDeleteCascade, true) => ParentAction::DeleteAndContinue,
            (RemovalMode::HardDeleteCascade, false) => ParentAction::Promote { emit_event: false },
        }
    }
}
