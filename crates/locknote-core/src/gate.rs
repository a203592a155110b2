use std::fmt;
use std::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    /// Security is off; the gate always passes.
    Disabled,
    Locked,
    Unlocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateError {
    AuthenticationFailed,
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateError::AuthenticationFailed => write!(f, "authentication failed"),
        }
    }
}

impl std::error::Error for GateError {}

/// "Is the user currently authenticated" capability. Biometric prompts and
/// passcode checks both reduce to this.
pub trait AuthOracle {
    fn is_authenticated(&self) -> bool;
}

impl<F> AuthOracle for F
where
    F: Fn() -> bool,
{
    fn is_authenticated(&self) -> bool {
        self()
    }
}

pub struct SecurityGate {
    state: RwLock<GateState>,
}

impl SecurityGate {
    pub fn new(security_enabled: bool) -> Self {
        let state = if security_enabled {
            GateState::Locked
        } else {
            GateState::Disabled
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.read().unwrap_or_else(|err| err.into_inner())
    }

    /// True when note content may be exposed.
    pub fn is_open(&self) -> bool {
        !matches!(self.state(), GateState::Locked)
    }

    pub fn authenticate(&self, oracle: &dyn AuthOracle) -> Result<GateState, GateError> {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        if *state != GateState::Locked {
            return Ok(*state);
        }
        if !oracle.is_authenticated() {
            return Err(GateError::AuthenticationFailed);
        }
        *state = GateState::Unlocked;
        tracing::debug!("security gate unlocked");
        Ok(*state)
    }

    pub fn lock(&self) -> GateState {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        if *state == GateState::Unlocked {
            *state = GateState::Locked;
            tracing::debug!("security gate locked");
        }
        *state
    }

    /// The enabling flow counts as authentication.
    pub fn security_enabled(&self) {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        *state = GateState::Unlocked;
    }

    pub fn security_disabled(&self) {
        let mut state = self.state.write().unwrap_or_else(|err| err.into_inner());
        *state = GateState::Disabled;
    }
}

#[cfg(test)]
mod tests {
    use super::{GateError, GateState, SecurityGate};

    #[test]
    fn starts_according_to_security_flag() {
        assert_eq!(SecurityGate::new(false).state(), GateState::Disabled);
        assert_eq!(SecurityGate::new(true).state(), GateState::Locked);
        assert!(SecurityGate::new(false).is_open());
        assert!(!SecurityGate::new(true).is_open());
    }

    #[test]
    fn authenticate_unlocks_only_on_success() {
        let gate = SecurityGate::new(true);
        let denied = gate.authenticate(&|| false);
        assert_eq!(denied, Err(GateError::AuthenticationFailed));
        assert_eq!(gate.state(), GateState::Locked);

        let granted = gate.authenticate(&|| true).expect("unlock");
        assert_eq!(granted, GateState::Unlocked);
        assert!(gate.is_open());
    }

    #[test]
    fn lock_returns_to_locked_but_not_from_disabled() {
        let gate = SecurityGate::new(true);
        gate.authenticate(&|| true).expect("unlock");
        assert_eq!(gate.lock(), GateState::Locked);

        let disabled = SecurityGate::new(false);
        assert_eq!(disabled.lock(), GateState::Disabled);
    }

    #[test]
    fn authenticate_is_noop_when_disabled() {
        let gate = SecurityGate::new(false);
        assert_eq!(gate.authenticate(&|| false), Ok(GateState::Disabled));
    }

    #[test]
    fn enable_and_disable_transitions() {
        let gate = SecurityGate::new(false);
        gate.security_enabled();
        assert_eq!(gate.state(), GateState::Unlocked);
        gate.lock();
        gate.security_disabled();
        assert_eq!(gate.state(), GateState::Disabled);
    }
}
