//! Connection state machine

use avl_core::{AvlError, AvlResult};

/// Lifecycle of one device connection
///
/// ```text
/// AwaitingImei -> Active -> Closed
/// AwaitingImei -> Closed
/// ```
///
/// The machine never moves backwards; a device that reconnects gets a new
/// connection in `AwaitingImei`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Waiting for the `[len][IMEI]` handshake
    #[default]
    AwaitingImei,
    /// Handshake accepted, AVL frames are decoded and acknowledged
    Active,
    /// Connection released
    Closed,
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Validate state transition
    pub fn validate_transition(&self, new_state: ConnectionState) -> AvlResult<()> {
        let valid = matches!(
            (*self, new_state),
            (ConnectionState::AwaitingImei, ConnectionState::Active)
                | (ConnectionState::AwaitingImei, ConnectionState::Closed)
                | (ConnectionState::Active, ConnectionState::Closed)
                | (ConnectionState::Closed, ConnectionState::Closed)
        );

        if valid {
            Ok(())
        } else {
            Err(AvlError::InvalidData(format!(
                "Invalid state transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }

    /// Move to `new_state` if the transition is allowed
    pub fn transition(&mut self, new_state: ConnectionState) -> AvlResult<()> {
        self.validate_transition(new_state)?;
        *self = new_state;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::AwaitingImei => "AwaitingImei",
            ConnectionState::Active => "Active",
            ConnectionState::Closed => "Closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_lifecycle() {
        let mut state = ConnectionState::default();
        assert_eq!(state, ConnectionState::AwaitingImei);
        state.transition(ConnectionState::Active).unwrap();
        assert_eq!(state, ConnectionState::Active);
        state.transition(ConnectionState::Closed).unwrap();
        assert!(state.is_closed());
    }

    #[test]
    fn test_no_cycles_back() {
        assert!(
            ConnectionState::Active
                .validate_transition(ConnectionState::AwaitingImei)
                .is_err()
        );
        assert!(
            ConnectionState::Closed
                .validate_transition(ConnectionState::Active)
                .is_err()
        );
        let mut state = ConnectionState::Closed;
        assert!(state.transition(ConnectionState::AwaitingImei).is_err());
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn test_handshake_failure_closes() {
        let mut state = ConnectionState::AwaitingImei;
        state.transition(ConnectionState::Closed).unwrap();
        assert_eq!(state.as_str(), "Closed");
    }
}
