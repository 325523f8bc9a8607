//! Facts emitted by a round for the notification layer.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::*;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DecisionEvent {
    VoterStatusChanged {
        voter: VoterId,
        from: VoterStatus,
        to: VoterStatus,
    },
    LifecycleChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    WinnerCommitted(WinnerCommit),
    /// All ballots were cleared and the round reopened.
    RoundReset,
}

/// Receives the events of every round managed by a service.
///
/// Called after the round lock has been released, in the order the events
/// happened for a given round. The call may come from the thread of another
/// writer of the same round.
pub trait DecisionObserver: Send + Sync {
    fn on_event(&self, round: &RoundId, event: &DecisionEvent);
}

/// An observer that keeps every event in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<(RoundId, DecisionEvent)>>,
}

impl EventLog {
    pub fn new() -> EventLog {
        EventLog::default()
    }

    /// Removes and returns the recorded events.
    pub fn take(&self) -> Vec<(RoundId, DecisionEvent)> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl DecisionObserver for EventLog {
    fn on_event(&self, round: &RoundId, event: &DecisionEvent) {
        self.events.lock().push((round.clone(), event.clone()));
    }
}
