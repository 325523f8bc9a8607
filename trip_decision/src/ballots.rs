use log::debug;
use snafu::ensure;

use std::collections::{BTreeMap, HashSet};

use crate::config::*;
use crate::registry::CandidateRegistry;

// The status and the ballot of a voter live in the same value, so a voter
// can never be marked as voted without a ballot, or skipped with one.
#[derive(Eq, PartialEq, Debug, Clone)]
enum Participation {
    NotVoted,
    Voted(Ballot),
    Skipped,
}

impl Participation {
    fn status(&self) -> VoterStatus {
        match self {
            Participation::NotVoted => VoterStatus::NotVoted,
            Participation::Voted(_) => VoterStatus::Voted,
            Participation::Skipped => VoterStatus::Skipped,
        }
    }
}

/// Checks a ranking against the candidates of a round.
///
/// Ranks are implied by position: the first entry is rank 1. The ranking may
/// be partial, but it must not be empty, must only name registered
/// candidates, and must not repeat one.
pub fn validate_ballot(
    registry: &CandidateRegistry,
    voter: &VoterId,
    ranking: &[CandidateId],
) -> Result<Ballot, ValidationError> {
    ensure!(!ranking.is_empty(), EmptyBallotSnafu {});
    let mut seen: HashSet<&CandidateId> = HashSet::new();
    for cid in ranking.iter() {
        ensure!(
            registry.contains(cid),
            InvalidCandidateSnafu {
                candidate: cid.clone()
            }
        );
        ensure!(
            seen.insert(cid),
            DuplicateRankSnafu {
                candidate: cid.clone()
            }
        );
    }
    Ok(Ballot {
        voter: voter.clone(),
        ranking: ranking.to_vec(),
    })
}

/// One live ballot per voter, plus the status of every voter seen so far.
///
/// The store does not know about the lifecycle: the round only hands it
/// mutations while it is open.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct BallotStore {
    entries: BTreeMap<VoterId, Participation>,
}

impl BallotStore {
    pub fn new() -> BallotStore {
        BallotStore::default()
    }

    /// Registers a voter as not having voted yet. Known voters are untouched.
    pub fn enroll(&mut self, voter: &VoterId) {
        self.entries
            .entry(voter.clone())
            .or_insert(Participation::NotVoted);
    }

    /// Validates and stores a ballot, replacing the previous one.
    ///
    /// Returns the stored ballot and the status the voter had before.
    pub fn submit(
        &mut self,
        registry: &CandidateRegistry,
        voter: &VoterId,
        ranking: &[CandidateId],
    ) -> Result<(Ballot, VoterStatus), ValidationError> {
        let ballot = validate_ballot(registry, voter, ranking)?;
        let previous = self.replace(voter, Participation::Voted(ballot.clone()));
        debug!(
            "BallotStore::submit: voter {} ranked {} candidates (was {:?})",
            voter,
            ballot.ranking.len(),
            previous
        );
        Ok((ballot, previous))
    }

    /// Drops any ballot and marks the voter as skipped. Returns the previous status.
    pub fn skip(&mut self, voter: &VoterId) -> VoterStatus {
        self.replace(voter, Participation::Skipped)
    }

    /// Drops any ballot and marks the voter as not voted. Returns the previous status.
    ///
    /// An unknown voter already counts as not voted and is not added.
    pub fn withdraw(&mut self, voter: &VoterId) -> VoterStatus {
        if !self.is_known(voter) {
            return VoterStatus::NotVoted;
        }
        self.replace(voter, Participation::NotVoted)
    }

    fn replace(&mut self, voter: &VoterId, p: Participation) -> VoterStatus {
        self.entries
            .insert(voter.clone(), p)
            .map(|old| old.status())
            .unwrap_or(VoterStatus::NotVoted)
    }

    /// Clears every ballot and sets all voters, known or listed, to not voted.
    pub fn clear<'a>(&mut self, roster: impl IntoIterator<Item = &'a VoterId>) {
        for p in self.entries.values_mut() {
            *p = Participation::NotVoted;
        }
        for voter in roster {
            self.enroll(voter);
        }
    }

    pub fn is_known(&self, voter: &VoterId) -> bool {
        self.entries.contains_key(voter)
    }

    /// Unknown voters have not voted.
    pub fn status(&self, voter: &VoterId) -> VoterStatus {
        self.entries
            .get(voter)
            .map(|p| p.status())
            .unwrap_or(VoterStatus::NotVoted)
    }

    pub fn ballot(&self, voter: &VoterId) -> Option<&Ballot> {
        match self.entries.get(voter) {
            Some(Participation::Voted(b)) => Some(b),
            _ => None,
        }
    }

    /// Live ballots, ordered by voter id.
    pub fn ballots(&self) -> impl Iterator<Item = &Ballot> {
        self.entries.values().filter_map(|p| match p {
            Participation::Voted(b) => Some(b),
            _ => None,
        })
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&VoterId, VoterStatus)> {
        self.entries.iter().map(|(v, p)| (v, p.status()))
    }

    pub fn ballot_count(&self) -> usize {
        self.ballots().count()
    }
}
