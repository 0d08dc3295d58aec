//! Transaction Lifecycle States
//!
//! State IDs are stable for PostgreSQL storage as SMALLINT.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction lifecycle states
///
/// Only forward transitions exist: DRAFT → ACTIVE → CLOSED.
/// Terminal state: CLOSED (30)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransactionState {
    /// Initial state - reference assigned, links may be added freely
    Draft = 10,

    /// Originating sale confirmed
    Active = 20,

    /// Terminal: financial outcome frozen
    Closed = 30,
}

impl TransactionState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Closed)
    }

    /// Links and commission configuration may still change in this state
    #[inline]
    pub fn is_mutable(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `self -> next` is a legal lifecycle edge
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        matches!(
            (self, next),
            (TransactionState::Draft, TransactionState::Active)
                | (TransactionState::Active, TransactionState::Closed)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            10 => Some(TransactionState::Draft),
            20 => Some(TransactionState::Active),
            30 => Some(TransactionState::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Draft => "DRAFT",
            TransactionState::Active => "ACTIVE",
            TransactionState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TransactionState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TransactionState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TransactionState::Closed.is_terminal());
        assert!(!TransactionState::Draft.is_terminal());
        assert!(!TransactionState::Active.is_terminal());
    }

    #[test]
    fn test_forward_only_transitions() {
        use TransactionState::*;

        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Closed));

        assert!(!Draft.can_transition_to(Closed));
        assert!(!Active.can_transition_to(Draft));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Draft));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn test_invalid_state_id() {
        assert_eq!(TransactionState::from_id(20), Some(TransactionState::Active));
        assert!(TransactionState::from_id(0).is_none());
        assert!(TransactionState::try_from(-1).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(TransactionState::Draft.to_string(), "DRAFT");
        assert_eq!(TransactionState::Closed.to_string(), "CLOSED");
    }
}
