//! State machine for the firmware update flow.

use std::fmt;

/// Phase of an update flow.
///
/// Phases only move forward. `Failed` is reachable from every non-terminal
/// phase; `Complete` and `Failed` end the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum UpdateState {
    /// No flow running.
    #[default]
    Idle,
    /// Asking the tracker to reboot into its bootloader.
    AwaitingModeSwitch,
    /// Waiting for the tracker to come back in update mode.
    Reconnecting,
    /// Asking for the update-mode device.
    AwaitingDeviceSelection,
    /// Fetching the firmware package.
    Downloading,
    /// Transferring the softdevice/bootloader image.
    TransferringBase,
    /// Transferring the application image.
    TransferringApp,
    Complete,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => write!(f, "IDLE"),
            UpdateState::AwaitingModeSwitch => write!(f, "AWAITING_MODE_SWITCH"),
            UpdateState::Reconnecting => write!(f, "RECONNECTING"),
            UpdateState::AwaitingDeviceSelection => write!(f, "AWAITING_DEVICE_SELECTION"),
            UpdateState::Downloading => write!(f, "DOWNLOADING"),
            UpdateState::TransferringBase => write!(f, "TRANSFERRING_BASE"),
            UpdateState::TransferringApp => write!(f, "TRANSFERRING_APP"),
            UpdateState::Complete => write!(f, "COMPLETE"),
            UpdateState::Failed => write!(f, "FAILED"),
        }
    }
}

impl UpdateState {
    /// Check if the flow has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Complete | UpdateState::Failed)
    }

    /// Check if an image is on the wire.
    pub fn is_transferring(&self) -> bool {
        matches!(
            self,
            UpdateState::TransferringBase | UpdateState::TransferringApp
        )
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: UpdateState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            UpdateState::Idle => false,
            UpdateState::Failed => true,
            next => next > *self,
        }
    }
}

/// Runtime state of one update flow.
#[derive(Debug, Default)]
pub struct StateMachineContext {
    /// Current phase.
    pub state: UpdateState,
    /// Number of images transferred in this flow.
    pub images_done: usize,
}

impl StateMachineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new state.
    ///
    /// Returns `false` and leaves the state untouched when the move would go
    /// backwards or leave a terminal state.
    pub fn goto_state(&mut self, new_state: UpdateState) -> bool {
        if !self.state.can_advance_to(new_state) {
            tracing::warn!(from = %self.state, to = %new_state, "Rejected state transition");
            return false;
        }
        tracing::info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
        true
    }

    /// Start a fresh flow.
    pub fn reset(&mut self) {
        if self.state != UpdateState::Idle {
            tracing::debug!(from = %self.state, "Resetting update state");
        }
        *self = Self::default();
    }

    pub fn is_complete(&self) -> bool {
        self.state == UpdateState::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut ctx = StateMachineContext::new();
        assert!(ctx.goto_state(UpdateState::AwaitingModeSwitch));
        assert!(ctx.goto_state(UpdateState::Downloading));
        assert!(ctx.goto_state(UpdateState::TransferringApp));
        assert!(ctx.goto_state(UpdateState::Complete));
        assert!(ctx.is_complete());
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut ctx = StateMachineContext::new();
        ctx.goto_state(UpdateState::Downloading);
        assert!(!ctx.goto_state(UpdateState::Reconnecting));
        assert_eq!(ctx.state, UpdateState::Downloading);
    }

    #[test]
    fn test_failed_from_any_non_terminal() {
        for state in [
            UpdateState::Idle,
            UpdateState::AwaitingModeSwitch,
            UpdateState::Reconnecting,
            UpdateState::AwaitingDeviceSelection,
            UpdateState::Downloading,
            UpdateState::TransferringBase,
            UpdateState::TransferringApp,
        ] {
            assert!(state.can_advance_to(UpdateState::Failed), "{state}");
        }
        assert!(!UpdateState::Complete.can_advance_to(UpdateState::Failed));
        assert!(!UpdateState::Failed.can_advance_to(UpdateState::Complete));
    }

    #[test]
    fn test_reset() {
        let mut ctx = StateMachineContext::new();
        ctx.goto_state(UpdateState::Failed);
        ctx.reset();
        assert_eq!(ctx.state, UpdateState::Idle);
        assert!(ctx.goto_state(UpdateState::AwaitingDeviceSelection));
    }

    #[test]
    fn test_display() {
        assert_eq!(UpdateState::TransferringBase.to_string(), "TRANSFERRING_BASE");
        assert_eq!(UpdateState::default().to_string(), "IDLE");
    }
}
