//! Exchange state machine.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of one key exchange.
///
/// `AwaitingPeer` is the only non-terminal state. Nothing leaves a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// Parameters issued, waiting for the peer's public key
    AwaitingPeer,
    /// Peer key accepted and session key derived
    Completed,
    /// Peer key rejected
    Failed,
    /// Timed out before completion
    Expired,
}

impl ExchangeState {
    /// Whether this state is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExchangeState::AwaitingPeer)
    }

    /// The error a completion attempt gets when the session is in this state.
    ///
    /// `None` only for `AwaitingPeer`.
    pub fn completion_error(self) -> Option<Error> {
        match self {
            ExchangeState::AwaitingPeer => None,
            ExchangeState::Expired => Some(Error::Expired),
            ExchangeState::Completed | ExchangeState::Failed => Some(Error::AlreadyCompleted),
        }
    }

    /// Move to `next`, enforcing the transition table.
    pub fn advance(&mut self, next: ExchangeState) -> Result<()> {
        if let Some(err) = self.completion_error() {
            return Err(err);
        }
        if !next.is_terminal() {
            return Err(Error::AlreadyCompleted);
        }
        *self = next;
        Ok(())
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ExchangeState::AwaitingPeer => "awaiting_peer",
            ExchangeState::Completed => "completed",
            ExchangeState::Failed => "failed",
            ExchangeState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_awaiting_peer_moves_to_any_terminal() {
        for next in [
            ExchangeState::Completed,
            ExchangeState::Failed,
            ExchangeState::Expired,
        ] {
            let mut state = ExchangeState::AwaitingPeer;
            state.advance(next).unwrap();
            assert_eq!(state, next);
            assert!(state.is_terminal());
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut completed = ExchangeState::Completed;
        assert!(matches!(
            completed.advance(ExchangeState::Failed),
            Err(Error::AlreadyCompleted)
        ));
        assert_eq!(completed, ExchangeState::Completed);

        let mut expired = ExchangeState::Expired;
        assert!(matches!(
            expired.advance(ExchangeState::Completed),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn test_cannot_reenter_awaiting_peer() {
        let mut state = ExchangeState::AwaitingPeer;
        assert!(state.advance(ExchangeState::AwaitingPeer).is_err());
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(
            serde_json::to_string(&ExchangeState::AwaitingPeer).unwrap(),
            "\"awaiting_peer\""
        );
        assert_eq!(ExchangeState::Expired.to_string(), "expired");
    }
}
