use log::{debug, info};
use snafu::ensure;

use std::collections::BTreeSet;

use crate::ballots::BallotStore;
use crate::config::*;
use crate::events::DecisionEvent;
use crate::registry::CandidateRegistry;
use crate::run_tally;

/// One decision instance, from the moment voting opens until it is finalized
/// or reset.
///
/// The round owns the ballots and the participation of each voter. The
/// candidates are fixed when the round opens and are only read.
///
/// State machine: `Open -> Finalized` through [`Round::finalize`], and back to
/// `Open` through [`Round::reset`]. Ballots can only change while open.
#[derive(Debug, Clone)]
pub struct Round {
    candidates: CandidateRegistry,
    roster: BTreeSet<VoterId>,
    store: BallotStore,
    state: LifecycleState,
    winner: Option<CandidateId>,
    policy: TallyPolicy,
    // Bumped on every successful mutation.
    version: u64,
    // Events are only kept for an owner that drains them.
    recording: bool,
    pending: Vec<DecisionEvent>,
}

/// A consistent copy of what the tally needs, taken at one point in time.
#[derive(Debug, Clone)]
pub struct TallySnapshot {
    pub candidates: CandidateRegistry,
    pub ballots: Vec<Ballot>,
    pub policy: TallyPolicy,
    pub version: u64,
}

impl TallySnapshot {
    pub fn tally(&self) -> TallyOutcome {
        run_tally(&self.candidates, &self.ballots, self.policy)
    }
}

impl Round {
    /// Opens voting over the given candidates. Every roster voter starts as
    /// not voted.
    pub fn open(
        candidates: CandidateRegistry,
        roster: impl IntoIterator<Item = VoterId>,
        policy: TallyPolicy,
    ) -> Round {
        let roster: BTreeSet<VoterId> = roster.into_iter().collect();
        let mut store = BallotStore::new();
        for voter in roster.iter() {
            store.enroll(voter);
        }
        info!(
            "Round::open: {} candidates, {} voters, policy {:?}",
            candidates.len(),
            roster.len(),
            policy
        );
        Round {
            candidates,
            roster,
            store,
            state: LifecycleState::Open,
            winner: None,
            policy,
            version: 0,
            recording: false,
            pending: Vec::new(),
        }
    }

    pub fn candidates(&self) -> &CandidateRegistry {
        &self.candidates
    }

    pub fn roster(&self) -> &BTreeSet<VoterId> {
        &self.roster
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Only set once the round is finalized.
    pub fn winner(&self) -> Option<&CandidateId> {
        self.winner.as_ref()
    }

    pub fn policy(&self) -> TallyPolicy {
        self.policy
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Starts or stops keeping events for [`Round::drain_events`].
    ///
    /// Off for a new round. A round managed by a service records them; a
    /// round used on its own only does when asked to.
    pub fn record_events(&mut self, enabled: bool) {
        self.recording = enabled;
        if !enabled {
            self.pending.clear();
        }
    }

    fn emit(&mut self, event: DecisionEvent) {
        if self.recording {
            self.pending.push(event);
        }
    }

    // ********* Ballots **********

    /// Records the ranking of a voter, replacing any earlier ballot.
    pub fn submit_ballot(
        &mut self,
        voter: &VoterId,
        ranking: &[CandidateId],
    ) -> DecisionResult<Ballot> {
        ensure!(self.state == LifecycleState::Open, RoundClosedSnafu {});
        let (ballot, previous) = self.store.submit(&self.candidates, voter, ranking)?;
        self.status_changed(voter, previous, VoterStatus::Voted);
        Ok(ballot)
    }

    /// The voter declines to rank. Any ballot they had is dropped.
    pub fn skip(&mut self, voter: &VoterId) -> DecisionResult<()> {
        ensure!(self.state == LifecycleState::Open, RoundClosedSnafu {});
        let previous = self.store.skip(voter);
        self.status_changed(voter, previous, VoterStatus::Skipped);
        Ok(())
    }

    /// The voter takes back their ballot or skip.
    pub fn withdraw(&mut self, voter: &VoterId) -> DecisionResult<()> {
        ensure!(self.state == LifecycleState::Open, RoundClosedSnafu {});
        let previous = self.store.withdraw(voter);
        self.status_changed(voter, previous, VoterStatus::NotVoted);
        Ok(())
    }

    /// Clears the participation of one voter on behalf of the round owner.
    ///
    /// Unlike [`Round::withdraw`], the voter must be known to the round.
    pub fn reset_voter(&mut self, voter: &VoterId) -> DecisionResult<()> {
        ensure!(self.state == LifecycleState::Open, RoundClosedSnafu {});
        ensure!(
            self.roster.contains(voter) || self.store.is_known(voter),
            VoterNotFoundSnafu {
                voter: voter.clone()
            }
        );
        let previous = self.store.withdraw(voter);
        self.status_changed(voter, previous, VoterStatus::NotVoted);
        Ok(())
    }

    pub fn ballot_of(&self, voter: &VoterId) -> Option<&Ballot> {
        self.store.ballot(voter)
    }

    pub fn status_of(&self, voter: &VoterId) -> VoterStatus {
        self.store.status(voter)
    }

    /// Live ballots, ordered by voter.
    pub fn ballots(&self) -> impl Iterator<Item = &Ballot> {
        self.store.ballots()
    }

    fn status_changed(&mut self, voter: &VoterId, from: VoterStatus, to: VoterStatus) {
        self.version += 1;
        if from != to {
            debug!("Round: voter {} {:?} -> {:?}", voter, from, to);
            self.emit(DecisionEvent::VoterStatusChanged {
                voter: voter.clone(),
                from,
                to,
            });
        }
    }

    // ********* Completion **********

    /// True when every roster voter has voted or skipped. An empty roster is
    /// complete. This never finalizes the round.
    pub fn is_complete(&self) -> bool {
        self.roster
            .iter()
            .all(|voter| self.store.status(voter).has_acted())
    }

    pub fn completion(&self) -> CompletionStatus {
        let mut res = CompletionStatus {
            complete: true,
            voted: 0,
            skipped: 0,
            not_voted: 0,
            roster_size: self.roster.len(),
        };
        for voter in self.roster.iter() {
            match self.store.status(voter) {
                VoterStatus::Voted => res.voted += 1,
                VoterStatus::Skipped => res.skipped += 1,
                VoterStatus::NotVoted => {
                    res.not_voted += 1;
                    res.complete = false;
                }
            }
        }
        res
    }

    /// Roster voters in id order.
    pub fn summary(&self) -> Vec<VoterSummary> {
        self.roster
            .iter()
            .map(|voter| {
                let status = self.store.status(voter);
                VoterSummary {
                    voter: voter.clone(),
                    status,
                    has_acted: status.has_acted(),
                    ranked_count: self.store.ballot(voter).map_or(0, |b| b.ranking.len()),
                }
            })
            .collect()
    }

    // ********* Tally and lifecycle **********

    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            candidates: self.candidates.clone(),
            ballots: self.store.ballots().cloned().collect(),
            policy: self.policy,
            version: self.version,
        }
    }

    /// Computes the current result without changing anything. Available in
    /// both states.
    pub fn tally(&self) -> TallyOutcome {
        run_tally(&self.candidates, self.store.ballots(), self.policy)
    }

    /// Tallies the current ballots, stores the winner and closes the round.
    ///
    /// The winner is absent when there is no ballot.
    pub fn finalize(&mut self) -> DecisionResult<TallyOutcome> {
        ensure!(
            self.state == LifecycleState::Open,
            AlreadyFinalizedSnafu {}
        );
        let outcome = self.tally();
        self.commit_finalize(outcome)
    }

    // The outcome must have been computed from the current version.
    pub(crate) fn commit_finalize(&mut self, outcome: TallyOutcome) -> DecisionResult<TallyOutcome> {
        ensure!(
            self.state == LifecycleState::Open,
            AlreadyFinalizedSnafu {}
        );
        self.winner = outcome.winner_id().cloned();
        self.state = LifecycleState::Finalized;
        self.version += 1;
        info!(
            "Round::finalize: winner {:?} after {} rounds",
            self.winner,
            outcome.rounds.len()
        );
        self.emit(DecisionEvent::LifecycleChanged {
            from: LifecycleState::Open,
            to: LifecycleState::Finalized,
        });
        self.emit(DecisionEvent::WinnerCommitted(outcome.commit()));
        Ok(outcome)
    }

    /// Clears all ballots and the winner, and reopens voting. Allowed in any
    /// state.
    pub fn reset(&mut self) {
        let before: Vec<(VoterId, VoterStatus)> = self
            .store
            .statuses()
            .map(|(v, s)| (v.clone(), s))
            .collect();
        self.store.clear(self.roster.iter());
        for (voter, from) in before {
            self.status_changed(&voter, from, VoterStatus::NotVoted);
        }
        if self.state == LifecycleState::Finalized {
            self.emit(DecisionEvent::LifecycleChanged {
                from: LifecycleState::Finalized,
                to: LifecycleState::Open,
            });
        }
        self.state = LifecycleState::Open;
        self.winner = None;
        self.version += 1;
        self.emit(DecisionEvent::RoundReset);
        info!("Round::reset: {} voters back to not voted", self.roster.len());
    }

    /// Events produced since the last call, oldest first. Empty unless
    /// [`Round::record_events`] was turned on.
    pub fn drain_events(&mut self) -> Vec<DecisionEvent> {
        std::mem::take(&mut self.pending)
    }

    /// The candidate record of the committed winner.
    pub fn winner_candidate(&self) -> Option<&Candidate> {
        self.winner.as_ref().and_then(|cid| self.candidates.get(cid))
    }
}
