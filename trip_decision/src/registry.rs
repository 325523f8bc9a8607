use log::debug;
use snafu::ensure;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::*;

/// Read-only view over the destination options of one round.
///
/// The list is fixed when the round opens. Cloning a registry is cheap and
/// shares the underlying candidates, so tally snapshots never copy them.
#[derive(PartialEq, Debug, Clone)]
pub struct CandidateRegistry {
    // Candidates in the order they were supplied.
    candidates: Arc<Vec<Candidate>>,
    index: Arc<BTreeMap<CandidateId, usize>>,
}

impl CandidateRegistry {
    /// Registers the candidates of a round.
    ///
    /// Fails if an id appears twice, or if a cost is negative or not a number.
    pub fn new(candidates: Vec<Candidate>) -> Result<CandidateRegistry, ValidationError> {
        let mut index: BTreeMap<CandidateId, usize> = BTreeMap::new();
        for (idx, c) in candidates.iter().enumerate() {
            if let Some(cost) = c.cost {
                ensure!(
                    cost.is_finite() && cost >= 0.0,
                    InvalidCostSnafu {
                        candidate: c.id.clone()
                    }
                );
            }
            let previous = index.insert(c.id.clone(), idx);
            ensure!(
                previous.is_none(),
                DuplicateCandidateSnafu {
                    candidate: c.id.clone()
                }
            );
        }
        debug!("CandidateRegistry::new: {} candidates", candidates.len());
        Ok(CandidateRegistry {
            candidates: Arc::new(candidates),
            index: Arc::new(index),
        })
    }

    pub fn empty() -> CandidateRegistry {
        CandidateRegistry {
            candidates: Arc::new(Vec::new()),
            index: Arc::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, id: &CandidateId) -> Option<&Candidate> {
        self.index.get(id).map(|idx| &self.candidates[*idx])
    }

    pub fn contains(&self, id: &CandidateId) -> bool {
        self.index.contains_key(id)
    }

    pub fn label(&self, id: &CandidateId) -> Option<&str> {
        self.get(id).map(|c| c.label.as_str())
    }

    /// Candidate ids in increasing order.
    pub fn ids(&self) -> impl Iterator<Item = &CandidateId> {
        self.index.keys()
    }

    /// Candidates in the order they were registered.
    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    /// Finds a candidate by id, or failing that by its exact label.
    pub fn resolve(&self, key: &str) -> Option<&Candidate> {
        self.get(&CandidateId::from(key))
            .or_else(|| self.candidates.iter().find(|c| c.label == key))
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destinations() -> Vec<Candidate> {
        vec![
            Candidate::new("lis", "Lisbon").with_cost(900.0),
            Candidate::new("kyo", "Kyoto").with_cost(2100.0),
            Candidate::new("bcn", "Barcelona"),
        ]
    }

    #[test]
    fn lookup_by_id_and_label() {
        let reg = CandidateRegistry::new(destinations()).unwrap();
        assert_eq!(reg.len(), 3);
        assert_eq!(reg.label(&"kyo".into()), Some("Kyoto"));
        assert!(reg.contains(&"bcn".into()));
        assert!(!reg.contains(&"rom".into()));
        assert_eq!(reg.resolve("Lisbon").map(|c| c.id.as_str()), Some("lis"));
        assert_eq!(reg.resolve("bcn").map(|c| c.label.as_str()), Some("Barcelona"));
        assert!(reg.resolve("Rome").is_none());
    }

    #[test]
    fn ids_are_sorted_and_iteration_keeps_input_order() {
        let reg = CandidateRegistry::new(destinations()).unwrap();
        let ids: Vec<&str> = reg.ids().map(|c| c.as_str()).collect();
        assert_eq!(ids, vec!["bcn", "kyo", "lis"]);
        let labels: Vec<&str> = reg.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Lisbon", "Kyoto", "Barcelona"]);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut cands = destinations();
        cands.push(Candidate::new("lis", "Lisbon again"));
        assert_eq!(
            CandidateRegistry::new(cands),
            Err(ValidationError::DuplicateCandidate {
                candidate: "lis".into()
            })
        );
    }

    #[test]
    fn rejects_bad_costs() {
        for cost in [-1.0, f64::NAN, f64::INFINITY] {
            let res = CandidateRegistry::new(vec![Candidate::new("x", "X").with_cost(cost)]);
            assert_eq!(
                res,
                Err(ValidationError::InvalidCost {
                    candidate: "x".into()
                })
            );
        }
        assert!(CandidateRegistry::new(vec![Candidate::new("x", "X").with_cost(0.0)]).is_ok());
    }
}
