//! Deterministic event ordering for the simulation.

use palisade_core::EventPriority;
use std::time::Duration;

/// Total order over queued events.
///
/// Ordered by delivery time, then priority (internal before timers
/// before network before client), then an insertion sequence as the
/// final tie-break. The sequence makes the order total, so two runs
/// with the same seed pop events identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Simulated delivery time.
    pub time: Duration,
    /// Priority within the same time.
    pub priority: EventPriority,
    /// Insertion sequence, strictly increasing.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_time_then_priority_then_sequence() {
        let early = EventKey {
            time: Duration::from_millis(1),
            priority: EventPriority::Network,
            sequence: 9,
        };
        let later_internal = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Internal,
            sequence: 1,
        };
        let later_network = EventKey {
            time: Duration::from_millis(2),
            priority: EventPriority::Network,
            sequence: 0,
        };
        assert!(early < later_internal);
        assert!(later_internal < later_network);

        let same_a = EventKey { sequence: 2, ..later_network };
        assert!(later_network < same_a);
    }
}
