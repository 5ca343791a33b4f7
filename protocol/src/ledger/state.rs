//! # Vault Lifecycle
//!
//! ```text
//!                 deposit / mint
//!                   ┌──────┐
//!                   ▼      │
//!  (none) ──create──► Active ──liquidate──► Liquidating ──close──► Closed
//! ```
//!
//! `Closed` is terminal. The only way out of `Active` is liquidation, and
//! the only way out of `Liquidating` is an attested settlement. Every edge
//! goes through [`VaultState::apply`]; anything else is an
//! `InvalidTransition`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::types::VaultStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultState {
    Active,
    Liquidating { since: DateTime<Utc> },
    Closed { closed_at: DateTime<Utc> },
}

/// The edges of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Deposit,
    Mint,
    Liquidate { at: DateTime<Utc> },
    Close { at: DateTime<Utc> },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Mint => "mint",
            Self::Liquidate { .. } => "liquidate",
            Self::Close { .. } => "close",
        }
    }
}

impl VaultState {
    pub fn status(&self) -> VaultStatus {
        match self {
            Self::Active => VaultStatus::Active,
            Self::Liquidating { .. } => VaultStatus::Liquidating,
            Self::Closed { .. } => VaultStatus::Closed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// The state after `transition`, or `InvalidTransition`.
    pub fn apply(&self, transition: Transition) -> Result<VaultState, StateError> {
        match (self, transition) {
            (Self::Active, Transition::Deposit | Transition::Mint) => Ok(Self::Active),
            (Self::Active, Transition::Liquidate { at }) => Ok(Self::Liquidating { since: at }),
            (Self::Liquidating { .. }, Transition::Close { at }) => Ok(Self::Closed { closed_at: at }),
            (from, via) => Err(StateError::InvalidTransition {
                from: from.status(),
                via: via.name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let now = Utc::now();
        let s = VaultState::Active;
        assert_eq!(s.apply(Transition::Deposit).unwrap(), VaultState::Active);
        let s = s.apply(Transition::Liquidate { at: now }).unwrap();
        assert_eq!(s, VaultState::Liquidating { since: now });
        let s = s.apply(Transition::Close { at: now }).unwrap();
        assert_eq!(s.status(), VaultStatus::Closed);
    }

    #[test]
    fn closed_is_terminal() {
        let now = Utc::now();
        let closed = VaultState::Closed { closed_at: now };
        for t in [
            Transition::Deposit,
            Transition::Mint,
            Transition::Liquidate { at: now },
            Transition::Close { at: now },
        ] {
            assert!(matches!(closed.apply(t), Err(StateError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn active_cannot_close_directly() {
        let err = VaultState::Active.apply(Transition::Close { at: Utc::now() }).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition { from: VaultStatus::Active, via: "close" }
        );
    }

    #[test]
    fn liquidating_rejects_mutations() {
        let s = VaultState::Liquidating { since: Utc::now() };
        assert!(s.apply(Transition::Mint).is_err());
        assert!(s.apply(Transition::Deposit).is_err());
        assert!(s.apply(Transition::Liquidate { at: Utc::now() }).is_err());
    }
}
