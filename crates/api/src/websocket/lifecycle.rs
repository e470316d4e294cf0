//! Upgrade lifecycle of a single connection attempt
//!
//! `Pending → Authenticated → Upgraded → Registered → Reading → Closing → Closed`,
//! with `Pending → Rejected` when the credential does not check out.

use std::fmt;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Authenticated,
    Rejected,
    Upgraded,
    Registered,
    Reading,
    Closing,
    Closed,
}

impl Phase {
    /// Whether `self → next` is a legal step
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;

        matches!(
            (self, next),
            (Pending, Authenticated)
                | (Pending, Rejected)
                | (Authenticated, Upgraded)
                | (Upgraded, Registered)
                | (Registered, Reading)
                | (Reading, Closing)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Rejected | Phase::Closed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Pending => "pending",
            Phase::Authenticated => "authenticated",
            Phase::Rejected => "rejected",
            Phase::Upgraded => "upgraded",
            Phase::Registered => "registered",
            Phase::Reading => "reading",
            Phase::Closing => "closing",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the phase of one connection attempt
#[derive(Debug)]
pub struct Lifecycle {
    attempt_id: Uuid,
    session_id: Option<Uuid>,
    phase: Phase,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            session_id: None,
            phase: Phase::Pending,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Attach the registry session once the connection is registered
    pub fn bind_session(&mut self, session_id: Uuid) {
        self.session_id = Some(session_id);
    }

    /// Move to `next`. Illegal steps are logged and ignored.
    pub fn advance(&mut self, next: Phase) -> bool {
        if !self.phase.can_advance_to(next) {
            tracing::error!(
                attempt_id = %self.attempt_id,
                from = %self.phase,
                to = %next,
                "Illegal connection lifecycle transition"
            );
            debug_assert!(false, "illegal transition {} -> {}", self.phase, next);
            return false;
        }

        tracing::debug!(
            attempt_id = %self.attempt_id,
            session_id = ?self.session_id,
            from = %self.phase,
            to = %next,
            "Connection lifecycle"
        );
        self.phase = next;
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
