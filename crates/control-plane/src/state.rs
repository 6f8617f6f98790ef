//! Application lifecycle states and the legal-transition table.
//!
//! The states are stored as fixed numeric codes (`desired_state` on the app
//! row, `state_id` on history rows). The table below is the single source of
//! truth for which transitions are legal; everything not matched is rejected.
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Provisioning,
    Live,
    Updating,
    Pausing,
    Paused,
    Unpausing,
    Errored,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 8] = [
        Self::Uninitialized,
        Self::Provisioning,
        Self::Live,
        Self::Updating,
        Self::Pausing,
        Self::Paused,
        Self::Unpausing,
        Self::Errored,
    ];

    pub fn code(self) -> i32 {
        match self {
            Self::Uninitialized => 0,
            Self::Provisioning => 1,
            Self::Live => 2,
            Self::Updating => 3,
            Self::Pausing => 4,
            Self::Paused => 5,
            Self::Unpausing => 6,
            Self::Errored => 7,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Provisioning => "provisioning",
            Self::Live => "live",
            Self::Updating => "updating",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Unpausing => "unpausing",
            Self::Errored => "errored",
        }
    }

    /// Whether `self -> target` is a legal transition.
    ///
    /// Errored is reachable from every other state but is not
    /// terminal-permanent: a retry re-enters the state the failed operation
    /// originated in (Provisioning, Updating, Pausing or Unpausing).
    pub fn can_transition(self, target: LifecycleState) -> bool {
        use LifecycleState::*;
        if target == Errored {
            return self != Errored;
        }
        matches!(
            (self, target),
            (Uninitialized, Provisioning)
                | (Provisioning, Live)
                | (Live, Updating)
                | (Live, Pausing)
                | (Updating, Live)
                | (Pausing, Paused)
                | (Paused, Unpausing)
                | (Unpausing, Live)
                | (Errored, Provisioning)
                | (Errored, Updating)
                | (Errored, Pausing)
                | (Errored, Unpausing)
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    #[test]
    fn codes_round_trip() {
        for state in LifecycleState::ALL {
            assert_eq!(LifecycleState::from_code(state.code()), Some(state));
        }
        assert_eq!(LifecycleState::from_code(99), None);
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [Uninitialized, Provisioning, Live, Pausing, Paused, Unpausing, Live];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn paused_not_reachable_from_uninitialized() {
        assert!(!Uninitialized.can_transition(Paused));
        assert!(!Uninitialized.can_transition(Live));
    }

    #[test]
    fn errored_reachable_from_all_but_itself() {
        for state in LifecycleState::ALL {
            assert_eq!(state.can_transition(Errored), state != Errored);
        }
    }

    #[test]
    fn errored_retry_reenters_originating_states() {
        assert!(Errored.can_transition(Provisioning));
        assert!(Errored.can_transition(Pausing));
        assert!(Errored.can_transition(Unpausing));
        assert!(Errored.can_transition(Updating));
        assert!(!Errored.can_transition(Live));
        assert!(!Errored.can_transition(Paused));
    }

    #[test]
    fn no_self_transitions() {
        for state in LifecycleState::ALL {
            assert!(!state.can_transition(state));
        }
    }
}
