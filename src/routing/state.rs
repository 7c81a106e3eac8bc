//! Per-message session state machine.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// State of one inbound message in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Envelope accepted from the client.
    Received,
    /// Content parsed into a structured message.
    Extracted,
    /// Classifier returned a result.
    Classified,
    /// Routing action fixed, relay in progress.
    Routed,
    /// Original forwarded to its recipients.
    Delivered,
    /// Original forwarded to the quarantine mailbox.
    Quarantined,
    /// Original dropped, alert sent.
    Discarded,
    /// Pipeline stopped before completing delivery.
    Failed,
}

impl SessionState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        if target == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, target),
            (Received, Extracted) |
            (Extracted, Classified) |
            // Classifier failure routes with the configured fallback action.
            (Extracted, Routed) |
            (Classified, Routed) |
            (Routed, Delivered) | (Routed, Quarantined) | (Routed, Discarded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Quarantined | Self::Discarded | Self::Failed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Extracted => "extracted",
            Self::Classified => "classified",
            Self::Routed => "routed",
            Self::Delivered => "delivered",
            Self::Quarantined => "quarantined",
            Self::Discarded => "discarded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A state transition event.
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Transition history for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTrace {
    state: SessionState,
    transitions: Vec<StateTransition>,
}

impl SessionTrace {
    pub fn new() -> Self {
        Self {
            state: SessionState::Received,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// States visited so far, starting with `Received`.
    pub fn path(&self) -> Vec<SessionState> {
        std::iter::once(SessionState::Received)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Transition to a new state.
    pub fn transition_to(
        &mut self,
        new_state: SessionState,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }

        self.transitions.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Utc::now(),
            reason,
        });
        self.state = new_state;
        Ok(())
    }
}

impl Default for SessionTrace {
    fn default() -> Self {
        Self::new()
    }
}
