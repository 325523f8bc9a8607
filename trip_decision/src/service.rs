use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use snafu::{ensure, OptionExt};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::config::*;
use crate::events::{DecisionEvent, DecisionObserver};
use crate::lifecycle::Round;

// Number of times finalize tallies outside the lock before giving up and
// tallying while holding it.
const MAX_OPTIMISTIC_FINALIZE_ATTEMPTS: usize = 3;

struct RoundSlot {
    round: Mutex<Round>,
    // Events not yet delivered, in the order the round produced them.
    outbox: Mutex<VecDeque<DecisionEvent>>,
    // Held by the single thread delivering the outbox of this round.
    delivery: Mutex<()>,
}

impl RoundSlot {
    fn new(round: Round) -> RoundSlot {
        RoundSlot {
            round: Mutex::new(round),
            outbox: Mutex::new(VecDeque::new()),
            delivery: Mutex::new(()),
        }
    }

    // Must be called with the round locked, so the outbox follows the
    // order of the mutations.
    fn enqueue(&self, round: &mut Round) {
        self.outbox.lock().extend(round.drain_events());
    }
}

/// Hosts many rounds and serializes the mutations of each of them.
///
/// Every round sits behind its own mutex. Ballot mutations hold it for the
/// read-validate-replace sequence only. Tallies are computed on a snapshot
/// outside the lock. Finalize commits only if no ballot changed since its
/// snapshot was taken.
///
/// Events are queued per round while the round is locked and delivered once
/// it is released. Only one thread delivers the events of a round at a time,
/// so observers see them in the order they happened, possibly from the
/// thread of another writer.
#[derive(Default)]
pub struct DecisionService {
    rounds: RwLock<HashMap<RoundId, Arc<RoundSlot>>>,
    observers: RwLock<Vec<Arc<dyn DecisionObserver>>>,
}

impl DecisionService {
    pub fn new() -> DecisionService {
        DecisionService::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn DecisionObserver>) {
        self.observers.write().push(observer);
    }

    pub fn open_round(&self, id: RoundId, mut round: Round) -> DecisionResult<()> {
        let mut rounds = self.rounds.write();
        ensure!(
            !rounds.contains_key(&id),
            RoundAlreadyOpenSnafu { round: id.clone() }
        );
        info!("DecisionService: opening round {}", id);
        round.record_events(true);
        rounds.insert(id, Arc::new(RoundSlot::new(round)));
        Ok(())
    }

    /// Forgets a round, returning its last state.
    pub fn remove_round(&self, id: &RoundId) -> DecisionResult<Round> {
        let removed = self
            .rounds
            .write()
            .remove(id)
            .context(RoundNotFoundSnafu { round: id.clone() })?;
        let round = removed.round.lock().clone();
        Ok(round)
    }

    pub fn round_ids(&self) -> Vec<RoundId> {
        let mut ids: Vec<RoundId> = self.rounds.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn slot(&self, id: &RoundId) -> DecisionResult<Arc<RoundSlot>> {
        self.rounds
            .read()
            .get(id)
            .cloned()
            .context(RoundNotFoundSnafu { round: id.clone() })
    }

    // Runs a mutation under the round lock, then notifies the observers.
    fn mutate<T>(
        &self,
        id: &RoundId,
        f: impl FnOnce(&mut Round) -> DecisionResult<T>,
    ) -> DecisionResult<T> {
        let slot = self.slot(id)?;
        let res = {
            let mut guard = slot.round.lock();
            let res = f(&mut guard);
            slot.enqueue(&mut guard);
            res
        };
        self.deliver(id, &slot);
        res
    }

    /// Read-only access to a round.
    pub fn with_round<T>(&self, id: &RoundId, f: impl FnOnce(&Round) -> T) -> DecisionResult<T> {
        let slot = self.slot(id)?;
        let guard = slot.round.lock();
        Ok(f(&guard))
    }

    // Empties the outbox unless another thread is already doing it. That
    // thread checks the outbox again after letting go of the delivery lock,
    // so no event is left behind. An observer that mutates the same round
    // from `on_event` only queues its events.
    fn deliver(&self, id: &RoundId, slot: &RoundSlot) {
        loop {
            let delivering = match slot.delivery.try_lock() {
                Some(g) => g,
                None => return,
            };
            loop {
                let next = slot.outbox.lock().pop_front();
                match next {
                    Some(event) => self.publish(id, &event),
                    None => break,
                }
            }
            drop(delivering);
            if slot.outbox.lock().is_empty() {
                return;
            }
        }
    }

    fn publish(&self, id: &RoundId, event: &DecisionEvent) {
        let observers: Vec<Arc<dyn DecisionObserver>> = self.observers.read().clone();
        for o in observers.iter() {
            o.on_event(id, event);
        }
    }

    // ********* Requests **********

    pub fn submit_ballot(
        &self,
        id: &RoundId,
        voter: &VoterId,
        ranking: &[CandidateId],
    ) -> DecisionResult<Ballot> {
        self.mutate(id, |r| r.submit_ballot(voter, ranking))
    }

    pub fn skip(&self, id: &RoundId, voter: &VoterId) -> DecisionResult<()> {
        self.mutate(id, |r| r.skip(voter))
    }

    pub fn withdraw(&self, id: &RoundId, voter: &VoterId) -> DecisionResult<()> {
        self.mutate(id, |r| r.withdraw(voter))
    }

    pub fn reset_voter(&self, id: &RoundId, voter: &VoterId) -> DecisionResult<()> {
        self.mutate(id, |r| r.reset_voter(voter))
    }

    pub fn reset(&self, id: &RoundId) -> DecisionResult<()> {
        self.mutate(id, |r| {
            r.reset();
            Ok(())
        })
    }

    /// The current result, computed on a snapshot.
    pub fn tally(&self, id: &RoundId) -> DecisionResult<TallyOutcome> {
        let snapshot = self.slot(id)?.round.lock().snapshot();
        Ok(snapshot.tally())
    }

    pub fn finalize(&self, id: &RoundId) -> DecisionResult<TallyOutcome> {
        let slot = self.slot(id)?;
        for attempt in 0..MAX_OPTIMISTIC_FINALIZE_ATTEMPTS {
            let snapshot = {
                let guard = slot.round.lock();
                ensure!(
                    guard.state() == LifecycleState::Open,
                    AlreadyFinalizedSnafu {}
                );
                guard.snapshot()
            };
            let outcome = snapshot.tally();

            let res = {
                let mut guard = slot.round.lock();
                if guard.version() != snapshot.version {
                    debug!(
                        "DecisionService::finalize: round {} changed during attempt {}",
                        id, attempt
                    );
                    continue;
                }
                let res = guard.commit_finalize(outcome);
                slot.enqueue(&mut guard);
                res
            };
            self.deliver(id, &slot);
            return res;
        }
        debug!(
            "DecisionService::finalize: round {} finalizing under the lock",
            id
        );
        self.mutate(id, |r| r.finalize())
    }

    pub fn is_complete(&self, id: &RoundId) -> DecisionResult<bool> {
        self.with_round(id, |r| r.is_complete())
    }

    pub fn completion(&self, id: &RoundId) -> DecisionResult<CompletionStatus> {
        self.with_round(id, |r| r.completion())
    }

    pub fn summary(&self, id: &RoundId) -> DecisionResult<Vec<VoterSummary>> {
        self.with_round(id, |r| r.summary())
    }

    pub fn ballot_of(&self, id: &RoundId, voter: &VoterId) -> DecisionResult<Option<Ballot>> {
        self.with_round(id, |r| r.ballot_of(voter).cloned())
    }

    pub fn state(&self, id: &RoundId) -> DecisionResult<LifecycleState> {
        self.with_round(id, |r| r.state())
    }
}
