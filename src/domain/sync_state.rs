use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Chain;

/// Persisted per-chain cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub chain: Chain,
    /// Last fully committed block number (EVM) or height (BTC)
    pub cursor: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            cursor: None,
            updated_at: Utc::now(),
        }
    }
}

/// Sync engine state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncPhase {
    /// No cursor persisted yet; the next pass cold-starts
    NoCursor,
    /// Cursor is at or beyond the chain tip
    CaughtUp,
    /// Working on the given unit
    Processing(u64),
    /// The given unit failed; cursor stays at the unit before it
    Failed(u64),
}

impl SyncPhase {
    pub fn from_cursor(cursor: Option<u64>) -> Self {
        match cursor {
            None => SyncPhase::NoCursor,
            Some(_) => SyncPhase::CaughtUp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::NoCursor => "NO_CURSOR",
            SyncPhase::CaughtUp => "CAUGHT_UP",
            SyncPhase::Processing(_) => "PROCESSING",
            SyncPhase::Failed(_) => "FAILED",
        }
    }

    /// Check if this phase can move to another one
    pub fn can_transition_to(&self, target: SyncPhase) -> bool {
        use SyncPhase::*;

        match (self, target) {
            (NoCursor, Processing(_)) => true,
            (NoCursor, CaughtUp) => true,

            (CaughtUp, Processing(_)) => true,

            // Units are strictly ascending, one step at a time
            (Processing(current), Processing(next)) => next == current + 1,
            (Processing(_), CaughtUp) => true,
            (Processing(current), Failed(unit)) => unit == *current,

            // A failed pass ends the call; the next call starts from the cursor
            (Failed(_), CaughtUp) => true,
            (Failed(_), Processing(_)) => true,

            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncPhase::Failed(_))
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Processing(unit) | SyncPhase::Failed(unit) => {
                write!(f, "{}({})", self.as_str(), unit)
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_only_advances_one_unit_at_a_time() {
        let p = SyncPhase::Processing(100);
        assert!(p.can_transition_to(SyncPhase::Processing(101)));
        assert!(!p.can_transition_to(SyncPhase::Processing(102)));
        assert!(!p.can_transition_to(SyncPhase::Processing(99)));
    }

    #[test]
    fn failure_is_pinned_to_the_current_unit() {
        let p = SyncPhase::Processing(7);
        assert!(p.can_transition_to(SyncPhase::Failed(7)));
        assert!(!p.can_transition_to(SyncPhase::Failed(8)));
        assert!(!SyncPhase::NoCursor.can_transition_to(SyncPhase::Failed(1)));
    }

    #[test]
    fn phase_from_cursor() {
        assert_eq!(SyncPhase::from_cursor(None), SyncPhase::NoCursor);
        assert_eq!(SyncPhase::from_cursor(Some(0)), SyncPhase::CaughtUp);
        assert_eq!(SyncPhase::Failed(12).to_string(), "FAILED(12)");
    }
}
