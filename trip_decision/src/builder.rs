pub use crate::config::*;
use crate::lifecycle::Round;
use crate::registry::CandidateRegistry;

/// A builder for opening a round.
///
/// Candidates and voters are collected as given; they are checked when the
/// round is built.
///
/// ```
/// pub use trip_decision::builder::Builder;
/// pub use trip_decision::TallyPolicy;
/// # use trip_decision::DecisionError;
///
/// let round = Builder::new(TallyPolicy::Borda)
///     .candidate("A", "Lisbon", Some(850.0))
///     .candidate("B", "Kyoto", None)
///     .roster(&["ana", "ben", "cleo"])
///     .build()?;
///
/// assert_eq!(round.candidates().len(), 2);
/// assert_eq!(round.roster().len(), 3);
/// assert!(!round.is_complete());
///
/// # Ok::<(), DecisionError>(())
/// ```
///
/// Registering the same candidate twice fails:
///
/// ```
/// pub use trip_decision::builder::Builder;
/// pub use trip_decision::*;
///
/// let res = Builder::new(TallyPolicy::DEFAULT)
///     .candidate("A", "Lisbon", None)
///     .candidate("A", "Lisbon again", None)
///     .build();
/// assert!(res.unwrap_err().is_validation());
/// ```
pub struct Builder {
    pub(crate) _policy: TallyPolicy,
    pub(crate) _candidates: Vec<Candidate>,
    pub(crate) _roster: Vec<VoterId>,
}

impl Builder {
    pub fn new(policy: TallyPolicy) -> Builder {
        Builder {
            _policy: policy,
            _candidates: Vec::new(),
            _roster: Vec::new(),
        }
    }

    /// Adds a candidate, with an optional estimated cost.
    pub fn candidate(mut self, id: &str, label: &str, cost: Option<f64>) -> Builder {
        self._candidates.push(Candidate {
            id: CandidateId::from(id),
            label: label.to_string(),
            cost,
        });
        self
    }

    pub fn candidates(mut self, cands: &[Candidate]) -> Builder {
        self._candidates.extend(cands.iter().cloned());
        self
    }

    /// Adds voters to the roster. Duplicates are merged.
    pub fn roster(mut self, voters: &[&str]) -> Builder {
        self._roster.extend(voters.iter().map(|v| VoterId::from(*v)));
        self
    }

    pub fn voter(mut self, voter: VoterId) -> Builder {
        self._roster.push(voter);
        self
    }

    /// Validates the candidates and opens the round.
    pub fn build(self) -> DecisionResult<Round> {
        let registry = CandidateRegistry::new(self._candidates)?;
        Ok(Round::open(registry, self._roster, self._policy))
    }
}
