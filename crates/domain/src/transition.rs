//! Outcome of applying a state transition.

/// Result of a transition function.
///
/// Saga messages are delivered at least once, so most transitions accept being
/// re-applied to a row that already reached the target state. `Unchanged`
/// tells the caller not to persist anything or emit side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Transition {
    /// The state changed.
    Applied,
    /// The row was already in the target state.
    Unchanged,
}

impl Transition {
    /// Returns true if the state changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied)
    }

    /// Combines two outcomes; applied if either was applied.
    pub fn or(self, other: Transition) -> Transition {
        if self.is_applied() || other.is_applied() {
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }
}
