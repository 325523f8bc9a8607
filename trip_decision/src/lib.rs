/*!
Ranked-choice decision engine for group trip planning.

Participants rank a shared set of destination candidates. The crate validates
and stores one ballot per participant, tracks who has voted or skipped, and
derives a single winner with instant-runoff voting (or, optionally, a Borda
count). See the [`manual`] module for the full description.

```
use trip_decision::builder::Builder;
use trip_decision::*;

let mut round = Builder::new(TallyPolicy::DEFAULT)
    .candidate("A", "Lisbon", None)
    .candidate("B", "Kyoto", None)
    .roster(&["ana", "ben"])
    .build()?;

round.submit_ballot(&"ana".into(), &["A".into(), "B".into()])?;
round.skip(&"ben".into())?;
assert!(round.is_complete());

let outcome = round.finalize()?;
assert_eq!(outcome.winner_id(), Some(&CandidateId::from("A")));
# Ok::<(), DecisionError>(())
```
*/

mod ballots;
pub mod builder;
mod config;
mod events;
mod lifecycle;
pub mod manual;
mod registry;
mod service;

use log::{debug, info, warn};

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::{Add, AddAssign},
};

pub use crate::ballots::{validate_ballot, BallotStore};
pub use crate::config::*;
pub use crate::events::{DecisionEvent, DecisionObserver, EventLog};
pub use crate::lifecycle::{Round, TallySnapshot};
pub use crate::registry::CandidateRegistry;
pub use crate::service::DecisionService;

// **** Private structures ****

type RoundNumber = u32;

#[derive(Eq, PartialEq, Debug, Clone, Copy, PartialOrd, Ord, Hash)]
struct VoteCount(u64);

impl VoteCount {
    const EMPTY: VoteCount = VoteCount(0);
}

impl std::iter::Sum for VoteCount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        VoteCount(iter.map(|vc| vc.0).sum())
    }
}

impl AddAssign for VoteCount {
    fn add_assign(&mut self, rhs: VoteCount) {
        self.0 += rhs.0;
    }
}

impl Add for VoteCount {
    type Output = VoteCount;
    fn add(self: VoteCount, rhs: VoteCount) -> VoteCount {
        VoteCount(self.0 + rhs.0)
    }
}

type Tally = BTreeMap<CandidateId, VoteCount>;

/// Runs the tally over a fixed set of candidates and ballots.
///
/// Arguments:
/// * `candidates` the candidates of the round
/// * `ballots` the live ballots. Skipped and not-voted participants have none.
/// * `policy` the counting method
///
/// The function is pure: the same inputs always produce the same outcome,
/// independently of the order in which the ballots are supplied. With no
/// candidate or no ballot, the outcome has no winner and no round.
pub fn run_tally<'a>(
    candidates: &CandidateRegistry,
    ballots: impl IntoIterator<Item = &'a Ballot>,
    policy: TallyPolicy,
) -> TallyOutcome {
    let ballots: Vec<&Ballot> = ballots.into_iter().collect();
    info!(
        "run_tally: {} ballots, {} candidates, policy {:?}",
        ballots.len(),
        candidates.len(),
        policy
    );

    let (winner, rounds) = if candidates.is_empty() || ballots.is_empty() {
        (None, Vec::new())
    } else {
        match policy {
            TallyPolicy::InstantRunoff => run_instant_runoff(candidates, &ballots),
            TallyPolicy::Borda => run_borda(candidates, &ballots),
        }
    };

    if let Some(cid) = &winner {
        info!("run_tally: winner {} after {} rounds", cid, rounds.len());
    }
    TallyOutcome {
        winner: winner.and_then(|cid| candidates.get(&cid).cloned()),
        rounds,
        total_voters: ballots.len(),
        total_candidates: candidates.len(),
        policy,
    }
}

fn run_instant_runoff(
    candidates: &CandidateRegistry,
    ballots: &[&Ballot],
) -> (Option<CandidateId>, Vec<ElectionRoundTrace>) {
    let mut active: BTreeSet<CandidateId> = candidates.ids().cloned().collect();
    let mut rounds: Vec<ElectionRoundTrace> = Vec::new();
    // Every non-final round eliminates exactly one candidate.
    let max_rounds = candidates.len();

    while active.len() > 1 {
        if rounds.len() >= max_rounds {
            warn!(
                "run_instant_runoff: stopped after {} rounds with {} candidates still tied",
                rounds.len(),
                active.len()
            );
            return (None, rounds);
        }
        let round_number = (rounds.len() + 1) as RoundNumber;
        let tally = compute_tally(ballots, &active);
        let total: VoteCount = tally.values().cloned().sum();
        debug!(
            "run_instant_runoff: round {} total {:?} tally {:?}",
            round_number, total, tally
        );

        if let Some(cid) = find_majority(&tally, total) {
            debug!("run_instant_runoff: {} holds a majority", cid);
            rounds.push(round_trace(
                round_number,
                &tally,
                None,
                Some(cid.clone()),
                &active,
            ));
            return (Some(cid), rounds);
        }

        let eliminated = match find_eliminated_candidate(&tally) {
            Some(cid) => cid,
            // Not reachable with two or more active candidates.
            None => return (None, rounds),
        };
        debug!("run_instant_runoff: eliminating {}", eliminated);
        rounds.push(round_trace(
            round_number,
            &tally,
            Some(eliminated.clone()),
            None,
            &active,
        ));
        active.remove(&eliminated);
    }

    // A single candidate is left without having held a majority in a counted
    // round. It wins; count it one last time so the trace stays consistent.
    match active.iter().next().cloned() {
        Some(last) => {
            let round_number = (rounds.len() + 1) as RoundNumber;
            let tally = compute_tally(ballots, &active);
            debug!(
                "run_instant_runoff: {} is the last candidate standing",
                last
            );
            rounds.push(round_trace(
                round_number,
                &tally,
                None,
                Some(last.clone()),
                &active,
            ));
            (Some(last), rounds)
        }
        None => (None, rounds),
    }
}

// Each ballot goes to its highest ranked candidate that is still running.
// Exhausted ballots are not counted.
fn compute_tally(ballots: &[&Ballot], active: &BTreeSet<CandidateId>) -> Tally {
    let mut tally: Tally = active
        .iter()
        .map(|cid| (cid.clone(), VoteCount::EMPTY))
        .collect();
    for b in ballots.iter() {
        if let Some(cid) = b.ranking.iter().find(|cid| active.contains(*cid)) {
            if let Some(vc) = tally.get_mut(cid) {
                *vc += VoteCount(1);
            }
        }
    }
    tally
}

// Strict majority: more than half of the counted ballots. Exactly half is not
// enough.
fn find_majority(tally: &Tally, total: VoteCount) -> Option<CandidateId> {
    tally
        .iter()
        .find(|(_, vc)| vc.0 * 2 > total.0)
        .map(|(cid, _)| cid.clone())
}

// The candidate with the fewest votes. Among equally low candidates, the lowest
// id is eliminated. The tally is ordered by id, so this is the first minimum.
fn find_eliminated_candidate(tally: &Tally) -> Option<CandidateId> {
    let min_count: VoteCount = *tally.values().min()?;
    let all_smallest: Vec<&CandidateId> = tally
        .iter()
        .filter_map(|(cid, vc)| if *vc == min_count { Some(cid) } else { None })
        .collect();
    if all_smallest.len() > 1 {
        debug!(
            "find_eliminated_candidate: tie at {:?} between {:?}",
            min_count, all_smallest
        );
    }
    all_smallest.first().map(|cid| (*cid).clone())
}

fn round_trace(
    round_number: RoundNumber,
    tally: &Tally,
    eliminated: Option<CandidateId>,
    winner: Option<CandidateId>,
    active: &BTreeSet<CandidateId>,
) -> ElectionRoundTrace {
    ElectionRoundTrace {
        round_number,
        vote_counts: tally.iter().map(|(cid, vc)| (cid.clone(), vc.0)).collect(),
        eliminated,
        winner,
        total_votes: tally.values().cloned().sum::<VoteCount>().0,
        active_candidates: active.clone(),
    }
}

/// Positional scoring. With `n` candidates, rank `k` earns `n - k + 1` points
/// and unranked candidates earn nothing. Equal totals go to the cheapest
/// candidate; a candidate without a cost comes after any costed one, and the
/// lowest id settles what remains.
fn run_borda(
    candidates: &CandidateRegistry,
    ballots: &[&Ballot],
) -> (Option<CandidateId>, Vec<ElectionRoundTrace>) {
    let n = candidates.len() as u64;
    let mut points: Tally = candidates
        .ids()
        .map(|cid| (cid.clone(), VoteCount::EMPTY))
        .collect();
    for b in ballots.iter() {
        for (idx, cid) in b.ranking.iter().enumerate() {
            if let Some(p) = points.get_mut(cid) {
                *p += VoteCount(n.saturating_sub(idx as u64));
            }
        }
    }
    debug!("run_borda: points {:?}", points);

    let winner: Option<CandidateId> = points
        .iter()
        .min_by(|(cid_a, pa), (cid_b, pb)| {
            let cost_a = candidates.get(cid_a).and_then(|c| c.cost);
            let cost_b = candidates.get(cid_b).and_then(|c| c.cost);
            pb.cmp(pa)
                .then_with(|| match (cost_a, cost_b) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                })
                .then_with(|| cid_a.cmp(cid_b))
        })
        .map(|(cid, _)| cid.clone());

    let all: BTreeSet<CandidateId> = candidates.ids().cloned().collect();
    let trace = round_trace(1, &points, None, winner.clone(), &all);
    (winner, vec![trace])
}
