//! Service state definitions.

use serde::{Deserialize, Serialize};

/// Service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Service is constructed but not yet accepting requests.
    Starting,
    /// Service is running and accepting requests.
    Running,
    /// Service is draining in-flight operations, not accepting new requests.
    ShuttingDown,
    /// Service is stopped and its backend closed.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[ServiceState] {
        match self {
            ServiceState::Starting => &[ServiceState::Running, ServiceState::ShuttingDown],
            ServiceState::Running => &[ServiceState::ShuttingDown],
            ServiceState::ShuttingDown => &[ServiceState::Stopped],
            ServiceState::Stopped => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(ServiceState::Starting.can_transition_to(ServiceState::Running));
        assert!(ServiceState::Running.can_transition_to(ServiceState::ShuttingDown));
        assert!(ServiceState::ShuttingDown.can_transition_to(ServiceState::Stopped));
        assert!(!ServiceState::Stopped.can_transition_to(ServiceState::Running));
        assert!(!ServiceState::Running.can_transition_to(ServiceState::Starting));

        assert!(ServiceState::Running.accepts_requests());
        assert!(!ServiceState::ShuttingDown.accepts_requests());
        assert!(ServiceState::Stopped.is_terminal());
    }
}
