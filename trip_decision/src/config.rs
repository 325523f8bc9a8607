// ********* Identifiers ***********

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> $name {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> $name {
                $name(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> $name {
                $name(s)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a destination candidate.
    ///
    /// Candidate ids are totally ordered (lexicographically). This order is the
    /// tie-break used when several candidates share the lowest count.
    CandidateId
);

string_id!(
    /// Opaque identifier of a participant.
    VoterId
);

string_id!(
    /// Identifier of one decision round, as handed out by the collaborator layer.
    RoundId
);

// ********* Input data structures ***********

/// A destination option. Supplied by the caller when a round opens and never
/// mutated afterwards.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub label: String,
    /// Estimated cost. Only used by the Borda policy to break ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Candidate {
    pub fn new(id: impl Into<CandidateId>, label: impl Into<String>) -> Candidate {
        Candidate {
            id: id.into(),
            label: label.into(),
            cost: None,
        }
    }

    pub fn with_cost(self, cost: f64) -> Candidate {
        Candidate {
            cost: Some(cost),
            ..self
        }
    }
}

/// One voter's ranking. The first element is the preferred candidate.
///
/// A ballot only exists once it has been validated against the candidates of
/// its round: it is never empty and holds distinct, known candidate ids.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: VoterId,
    pub ranking: Vec<CandidateId>,
}

/// Participation of a voter in the current round.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoterStatus {
    NotVoted,
    Voted,
    Skipped,
}

impl VoterStatus {
    /// Voted or skipped: this voter is not holding the round back.
    pub fn has_acted(&self) -> bool {
        !matches!(self, VoterStatus::NotVoted)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Open,
    Finalized,
}

// ********* Configuration **********

/// The counting method applied by the tally engine.
///
/// - InstantRunoff repeatedly eliminates the candidate with the fewest first
///   preferences (lowest id on ties) until one holds a strict majority.
/// - Borda awards `N - k + 1` points for rank `k` among `N` candidates and
///   picks the highest total, preferring the lowest cost on ties.
///
/// The two methods can disagree on the same ballots.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TallyPolicy {
    InstantRunoff,
    Borda,
}

impl TallyPolicy {
    pub const DEFAULT: TallyPolicy = TallyPolicy::InstantRunoff;
}

impl Default for TallyPolicy {
    fn default() -> TallyPolicy {
        TallyPolicy::DEFAULT
    }
}

// ******** Output data structures *********

/// Statistics for one counting round.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionRoundTrace {
    pub round_number: u32,
    pub vote_counts: BTreeMap<CandidateId, u64>,
    pub eliminated: Option<CandidateId>,
    pub winner: Option<CandidateId>,
    pub total_votes: u64,
    /// The candidates still running when this round was counted.
    pub active_candidates: BTreeSet<CandidateId>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyOutcome {
    pub winner: Option<Candidate>,
    pub rounds: Vec<ElectionRoundTrace>,
    /// Number of ballots that entered the count.
    pub total_voters: usize,
    pub total_candidates: usize,
    pub policy: TallyPolicy,
}

impl TallyOutcome {
    pub fn winner_id(&self) -> Option<&CandidateId> {
        self.winner.as_ref().map(|c| &c.id)
    }

    /// The record handed to the collaborator when a round is finalized.
    pub fn commit(&self) -> WinnerCommit {
        WinnerCommit {
            winner_candidate_id: self.winner_id().cloned(),
            round_trace: self.rounds.clone(),
        }
    }
}

/// Emitted once per finalize, for the collaborator to persist.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerCommit {
    pub winner_candidate_id: Option<CandidateId>,
    pub round_trace: Vec<ElectionRoundTrace>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    pub complete: bool,
    pub voted: usize,
    pub skipped: usize,
    pub not_voted: usize,
    pub roster_size: usize,
}

/// Who has voted, as shown to the participants.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterSummary {
    pub voter: VoterId,
    pub status: VoterStatus,
    pub has_acted: bool,
    pub ranked_count: usize,
}

// ********* Errors **********

/// Defects in the caller's input. Nothing is mutated when they are returned.
#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ValidationError {
    #[snafu(display("candidate {candidate} is not part of this round"))]
    InvalidCandidate { candidate: CandidateId },
    #[snafu(display("candidate {candidate} is ranked more than once"))]
    DuplicateRank { candidate: CandidateId },
    #[snafu(display("a ballot must rank at least one candidate"))]
    EmptyBallot {},
    #[snafu(display("candidate {candidate} is registered more than once"))]
    DuplicateCandidate { candidate: CandidateId },
    #[snafu(display("candidate {candidate} has a negative or undefined cost"))]
    InvalidCost { candidate: CandidateId },
}

/// An operation was attempted in the wrong lifecycle state.
#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LifecycleError {
    #[snafu(display("voting is closed for this round"))]
    RoundClosed {},
    #[snafu(display("the round has already been finalized"))]
    AlreadyFinalized {},
}

#[derive(Eq, PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecisionError {
    #[snafu(context(false), display("invalid input: {source}"))]
    Validation { source: ValidationError },
    #[snafu(context(false), display("{source}"))]
    Lifecycle { source: LifecycleError },
    #[snafu(display("round {round} not found"))]
    RoundNotFound { round: RoundId },
    #[snafu(display("voter {voter} is not part of this round"))]
    VoterNotFound { voter: VoterId },
    #[snafu(display("round {round} is already open"))]
    RoundAlreadyOpen { round: RoundId },
}

impl DecisionError {
    pub fn is_validation(&self) -> bool {
        matches!(self, DecisionError::Validation { .. })
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, DecisionError::Lifecycle { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DecisionError::RoundNotFound { .. } | DecisionError::VoterNotFound { .. }
        )
    }
}

pub type DecisionResult<T> = Result<T, DecisionError>;
