//! Explicit state machines for entity statuses.

use crate::error::{DomainError, DomainResult};

/// A status enum with an explicit legal-transition table.
///
/// Every entity status in the workflow implements this; the table is the only
/// source of truth for which edges are allowed, and `ensure_transition` is the
/// only way aggregates check a requested status change.
pub trait Lifecycle: Copy + Eq + core::fmt::Display + core::fmt::Debug + 'static {
    /// Entity name used in error messages (e.g. "appointment").
    const ENTITY: &'static str;

    /// Every status value, in declaration order.
    const ALL: &'static [Self];

    /// Statuses reachable from `self` in one step.
    fn next_states(self) -> &'static [Self];

    fn can_transition_to(self, next: Self) -> bool {
        self.next_states().contains(&next)
    }

    /// Terminal statuses have no outgoing edges.
    fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    fn ensure_transition(self, next: Self) -> DomainResult<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(Self::ENTITY, self, next))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Off,
    }

    impl core::fmt::Display for Light {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Lifecycle for Light {
        const ENTITY: &'static str = "light";
        const ALL: &'static [Self] = &[Light::Red, Light::Green, Light::Off];

        fn next_states(self) -> &'static [Self] {
            match self {
                Light::Red => &[Light::Green, Light::Off],
                Light::Green => &[Light::Red, Light::Off],
                Light::Off => &[],
            }
        }
    }

    #[test]
    fn table_drives_transitions() {
        assert!(Light::Red.ensure_transition(Light::Green).is_ok());
        assert!(Light::Off.is_terminal());
        match Light::Off.ensure_transition(Light::Red) {
            Err(DomainError::InvalidTransition { entity, from, to }) => {
                assert_eq!(entity, "light");
                assert_eq!(from, "Off");
                assert_eq!(to, "Red");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn self_loops_are_rejected_unless_listed() {
        for s in Light::ALL {
            assert!(s.ensure_transition(*s).is_err());
        }
    }
}
