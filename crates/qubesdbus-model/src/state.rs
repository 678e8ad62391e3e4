use crate::ModelError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User-facing domain state as published on the bus.
///
/// These states do not map one-to-one onto the power states reported by
/// qubesd; they are the coarser set a desktop client can act on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DomainState {
    Unknown,
    Failed,
    Halted,
    Starting,
    Started,
    Halting,
}

impl DomainState {
    /// Map a qubesd power state (`admin.vm.CurrentState` / `admin.vm.List`)
    /// onto the published state set.
    pub fn from_power_state(power_state: &str) -> Self {
        match power_state.to_ascii_lowercase().as_str() {
            "running" => DomainState::Started,
            "halted" => DomainState::Halted,
            "crashed" => DomainState::Failed,
            "halting" | "dying" => DomainState::Halting,
            _ => DomainState::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DomainState::Unknown => "Unknown",
            DomainState::Failed => "Failed",
            DomainState::Halted => "Halted",
            DomainState::Starting => "Starting",
            DomainState::Started => "Started",
            DomainState::Halting => "Halting",
        }
    }
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unknown" => Ok(DomainState::Unknown),
            "Failed" => Ok(DomainState::Failed),
            "Halted" => Ok(DomainState::Halted),
            "Starting" => Ok(DomainState::Starting),
            "Started" => Ok(DomainState::Started),
            "Halting" => Ok(DomainState::Halting),
            other => Err(ModelError::UnknownState(other.to_owned())),
        }
    }
}

/// Validate a domain state change.
///
/// `Unknown` and `Failed` are reachable from everywhere: `Unknown` covers a
/// transient read of the underlying power state, `Failed` covers a crash at
/// any point of the lifecycle. A no-op change is rejected so that callers
/// never emit spurious change signals.
pub fn validate_transition(from: DomainState, to: DomainState) -> Result<(), ModelError> {
    use DomainState::{Failed, Halted, Halting, Started, Starting, Unknown};

    if from == to {
        return Err(ModelError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    let valid = matches!(
        (from, to),
        (_, Unknown | Failed)
            | (Unknown, Started | Halting)
            | (Failed | Halted, Starting)
            | (Starting, Started | Halted)
            | (Started, Halting)
            | (Halting, Halted)
    );

    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
